//! Process identity and account lookups

use nix::unistd::{Gid, Group, geteuid};

/// Who we are running as, and which service accounts exist
pub trait Identity: Send + Sync {
    fn is_root(&self) -> bool;

    /// Gid of a system group, `None` if it does not exist (yet)
    fn group_id(&self, name: &str) -> Option<Gid>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemIdentity;

impl Identity for SystemIdentity {
    #[inline]
    fn is_root(&self) -> bool {
        geteuid().is_root()
    }

    fn group_id(&self, name: &str) -> Option<Gid> {
        match Group::from_name(name) {
            Ok(group) => group.map(|g| g.gid),
            Err(e) => {
                log::debug!("group lookup for {name} failed: {e}");
                None
            }
        }
    }
}
