//! Execution-context checks run before anything is mutated.

use std::path::Path;
use std::time::Duration;

use termcolor::WriteColor;

use super::report::Reporter;
use crate::error::ProvisionError;
use crate::host::Identity;

/// Ubuntu releases the workflow is tested against
pub const SUPPORTED_UBUNTU: &[&str] = &["20.04", "22.04", "24.04"];

/// Fail fast unless running as root
pub fn require_root(identity: &dyn Identity) -> Result<(), ProvisionError> {
    if identity.is_root() {
        return Ok(());
    }
    let program = std::env::args()
        .next()
        .and_then(|p| {
            Path::new(&p)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
    Err(ProvisionError::NotRoot { program })
}

/// The fields of `/etc/os-release` we care about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    pub id: String,
    pub version_id: String,
    pub pretty_name: String,
}

impl OsRelease {
    pub fn parse(raw: &str) -> Self {
        let mut release = Self::default();
        for line in raw.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').to_string();
            match key.trim() {
                "ID" => release.id = value,
                "VERSION_ID" => release.version_id = value,
                "PRETTY_NAME" => release.pretty_name = value,
                _ => {}
            }
        }
        release
    }

    pub fn is_supported(&self) -> bool {
        self.id == "ubuntu" && SUPPORTED_UBUNTU.contains(&self.version_id.as_str())
    }
}

/// Advisory OS compatibility check.
///
/// An unsupported or unreadable release is reported and followed by `delay`
/// so the operator can interrupt; the run always continues.
pub async fn check_os<W: WriteColor>(
    os_release_path: &Path,
    delay: Duration,
    reporter: &mut Reporter<W>,
) -> Option<OsRelease> {
    let release = match std::fs::read_to_string(os_release_path) {
        Ok(raw) => Some(OsRelease::parse(&raw)),
        Err(e) => {
            log::debug!("cannot read {}: {e}", os_release_path.display());
            None
        }
    };

    match &release {
        Some(r) if r.is_supported() => {
            reporter.ok(&format!("Operating system: {}", r.pretty_name));
        }
        other => {
            let found = other
                .as_ref()
                .map(|r| format!("{} {}", r.id, r.version_id))
                .unwrap_or_else(|| "unknown".to_string());
            reporter.warn(&format!(
                "Untested operating system ({found}); supported: Ubuntu {}. Continuing in {}s...",
                SUPPORTED_UBUNTU.join(", "),
                delay.as_secs()
            ));
            tokio::time::sleep(delay).await;
        }
    }

    release
}
