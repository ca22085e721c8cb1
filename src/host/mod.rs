//! Host capabilities.
//!
//! The provisioning workflow never touches the OS directly. It goes through
//! the capability objects bundled in [`Host`]:
//!
//! - `command` - external programs (package manager, firewall, service manager)
//! - `net` - HTTPS fetches and public DNS resolution
//! - `identity` - effective uid and group lookups
//!
//! [`Host::system`] wires the real implementations; tests build a `Host`
//! from the doubles in [`crate::test_utils`].

use std::sync::Arc;

mod command;
mod identity;
mod net;

pub use command::{CommandOutput, CommandRunner, Invocation, SystemRunner};
pub use identity::{Identity, SystemIdentity};
pub use net::{DnsLookup, HickoryLookup, HttpFetch, ReqwestFetch};

use crate::error::ProvisionError;

#[derive(Clone)]
pub struct Host {
    pub runner: Arc<dyn CommandRunner>,
    pub http: Arc<dyn HttpFetch>,
    pub dns: Arc<dyn DnsLookup>,
    pub identity: Arc<dyn Identity>,
}

impl Host {
    /// Capabilities backed by the real machine
    pub fn system() -> Result<Self, ProvisionError> {
        Ok(Self {
            runner: Arc::new(SystemRunner),
            http: Arc::new(ReqwestFetch::new()?),
            dns: Arc::new(HickoryLookup::new()),
            identity: Arc::new(SystemIdentity),
        })
    }
}
