//! Atomic, permission-restricted file writes.
//!
//! Contents go to a temp file in the destination directory, which gets its
//! final mode (and group) before being fsynced and renamed over the target.
//! The target path therefore never exists with wider permissions.

use std::fs::{self, OpenOptions, Permissions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

use nix::unistd::{Gid, chown};

use crate::error::ProvisionError;

/// Write `contents` to `path` atomically with `mode`, optionally handing the
/// file to `group`
pub fn write_restricted(
    path: &Path,
    contents: &[u8],
    mode: u32,
    group: Option<Gid>,
) -> Result<(), ProvisionError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .map_err(|e| ProvisionError::io(format!("failed to create {}", parent.display()), e))?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| ProvisionError::io(format!("failed to create temp file in {}", parent.display()), e))?;

    fs::set_permissions(temp.path(), Permissions::from_mode(mode))
        .map_err(|e| ProvisionError::io("failed to set temp file permissions", e))?;

    if let Some(gid) = group {
        chown(temp.path(), None, Some(gid)).map_err(|e| {
            ProvisionError::io(
                format!("failed to change group of {}", path.display()),
                std::io::Error::from(e),
            )
        })?;
    }

    temp.write_all(contents)
        .map_err(|e| ProvisionError::io("failed to write temp file", e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| ProvisionError::io("failed to sync temp file", e))?;

    temp.persist(path)
        .map_err(|e| ProvisionError::io(format!("failed to replace {}", path.display()), e.error))?;

    Ok(())
}

/// Append one line to a log file created with `mode`.
///
/// An existing file is tightened to `mode` as well.
pub fn append_line(path: &Path, line: &str, mode: u32) -> Result<(), ProvisionError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| ProvisionError::io(format!("failed to create {}", parent.display()), e))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(mode)
        .open(path)
        .map_err(|e| ProvisionError::io(format!("failed to open {}", path.display()), e))?;

    let current = file
        .metadata()
        .map_err(|e| ProvisionError::io(format!("failed to stat {}", path.display()), e))?
        .permissions()
        .mode()
        & 0o777;
    if current != mode {
        file.set_permissions(Permissions::from_mode(mode))
            .map_err(|e| ProvisionError::io(format!("failed to chmod {}", path.display()), e))?;
    }

    writeln!(file, "{line}")
        .map_err(|e| ProvisionError::io(format!("failed to append to {}", path.display()), e))
}

/// Regular file with at least one execute bit
pub fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
