use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProvisionError;

/// Settings file consulted when `--config` is not given
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/hy2setup/hy2setup.toml";

/// Whether advisory failures change the exit code
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Report and carry on, exit 0
    #[default]
    Advisory,
    /// Report and carry on, but exit 1 if anything was reported
    Strict,
}

/// Backoff used while waiting for the server to bind its port
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReadinessSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound on total time spent waiting
    pub total_wait_secs: u64,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 8_000,
            total_wait_secs: 60,
        }
    }
}

impl ReadinessSettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn total_wait(&self) -> Duration {
        Duration::from_secs(self.total_wait_secs)
    }
}

/// Everything the provisioner needs to know about paths, ports and policy.
///
/// Defaults describe a stock Ubuntu host with the upstream Hysteria2
/// installer. A TOML file may override any field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub config_path: PathBuf,
    pub uri_path: PathBuf,
    pub firewall_log_path: PathBuf,
    pub binary_path: PathBuf,
    pub installer_url: String,
    pub service_name: String,
    /// Group that gets read access to the config document
    pub service_group: String,

    pub listen_port: u16,
    pub acme_http_port: u16,
    /// Administrative SSH port; detected from `sshd_config` when unset
    pub ssh_port: Option<u16>,
    pub sshd_config_path: PathBuf,
    pub os_release_path: PathBuf,

    pub masquerade_url: String,
    pub static_cert_path: PathBuf,
    pub static_key_path: PathBuf,

    pub public_ip_endpoints: Vec<String>,
    /// `journalctl --since` value for the error scan
    pub log_scan_window: String,

    pub policy: FailurePolicy,
    pub os_mismatch_delay_secs: u64,
    pub readiness: ReadinessSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/etc/hysteria/config.yaml"),
            uri_path: PathBuf::from("/root/hysteria2-client-uri.txt"),
            firewall_log_path: PathBuf::from("/var/log/hy2setup-firewall.log"),
            binary_path: PathBuf::from("/usr/local/bin/hysteria"),
            installer_url: "https://get.hy2.sh/".to_string(),
            service_name: "hysteria-server.service".to_string(),
            service_group: "hysteria".to_string(),
            listen_port: 443,
            acme_http_port: 80,
            ssh_port: None,
            sshd_config_path: PathBuf::from("/etc/ssh/sshd_config"),
            os_release_path: PathBuf::from("/etc/os-release"),
            masquerade_url: "https://www.bing.com".to_string(),
            static_cert_path: PathBuf::from("/etc/hysteria/server.crt"),
            static_key_path: PathBuf::from("/etc/hysteria/server.key"),
            public_ip_endpoints: vec![
                "https://api.ipify.org".to_string(),
                "https://ifconfig.me/ip".to_string(),
            ],
            log_scan_window: "-10min".to_string(),
            policy: FailurePolicy::Advisory,
            os_mismatch_delay_secs: 5,
            readiness: ReadinessSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings.
    ///
    /// An explicit path must exist. Without one, [`DEFAULT_SETTINGS_PATH`] is
    /// read if present, otherwise built-in defaults are used.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ProvisionError> {
        let settings = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_SETTINGS_PATH);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ProvisionError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ProvisionError::io(format!("failed to read settings {}", path.display()), e)
        })?;
        Self::from_toml(&raw)
            .map_err(|e| ProvisionError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(raw: &str) -> Result<Self, ProvisionError> {
        toml::from_str(raw).map_err(|e| ProvisionError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ProvisionError> {
        if self.listen_port == 0 {
            return Err(ProvisionError::Config("listen_port must be non-zero".into()));
        }
        if self.ssh_port == Some(0) {
            return Err(ProvisionError::Config("ssh_port must be non-zero".into()));
        }
        let masquerade = url::Url::parse(&self.masquerade_url).map_err(|e| {
            ProvisionError::Config(format!("masquerade_url {:?}: {e}", self.masquerade_url))
        })?;
        if !matches!(masquerade.scheme(), "http" | "https") {
            return Err(ProvisionError::Config(format!(
                "masquerade_url must be http(s), got {}",
                masquerade.scheme()
            )));
        }
        if self.public_ip_endpoints.is_empty() {
            return Err(ProvisionError::Config(
                "public_ip_endpoints must list at least one URL".into(),
            ));
        }
        Ok(())
    }

    pub fn os_mismatch_delay(&self) -> Duration {
        Duration::from_secs(self.os_mismatch_delay_secs)
    }
}
