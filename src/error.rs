//! Error taxonomy for provisioning
//!
//! Only fatal conditions are errors. Advisory problems (DNS mismatch, a port
//! that fails verification, an inactive service) are recorded on the
//! [`Reporter`](crate::install::report::Reporter) instead and never surface
//! here.

use thiserror::Error;

/// Fatal provisioning failures
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Effective uid is not 0
    #[error("this program must be run as root (try: sudo {program} ...)")]
    NotRoot { program: String },

    /// Missing or malformed command-line arguments
    #[error("{0}")]
    Usage(String),

    /// The upstream installer could not produce a working binary
    #[error("failed to install the hysteria binary: {0}")]
    BinaryInstall(String),

    /// The program could not be started at all (missing executable, EPERM)
    #[error("failed to execute {program}: {source}")]
    CommandSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A mandatory command ran but exited non-zero
    #[error("`{command}` exited with {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: String,
        stderr: String,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize server configuration: {0}")]
    Render(#[from] serde_yaml::Error),

    #[error("invalid settings: {0}")]
    Config(String),

    #[error("request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("DNS lookup for {domain} failed: {reason}")]
    Dns { domain: String, reason: String },
}

impl ProvisionError {
    /// Wrap an I/O error with a human-readable context line
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
