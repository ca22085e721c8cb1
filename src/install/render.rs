//! Hysteria2 server configuration document.
//!
//! The certificate source is a flattened enum, so a rendered document carries
//! exactly one of `acme:` or `tls:`.

use std::path::Path;

use nix::unistd::Gid;
use serde::{Deserialize, Serialize};

use super::file_ops::write_restricted;
use super::secrets::Secrets;
use crate::error::ProvisionError;

pub const CONFIG_MODE: u32 = 0o640;
pub const OBFS_ALGORITHM: &str = "salamander";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen: String,
    #[serde(flatten)]
    pub certificate: CertificateMode,
    pub obfs: Obfs,
    pub auth: Auth,
    pub masquerade: Masquerade,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateMode {
    Acme(Acme),
    Tls(StaticTls),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acme {
    pub domains: Vec<String>,
    pub email: String,
    #[serde(rename = "type")]
    pub challenge: String,
    pub http: AcmeHttp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcmeHttp {
    pub alt_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticTls {
    pub cert: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obfs {
    #[serde(rename = "type")]
    pub kind: String,
    pub salamander: Salamander,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Salamander {
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Auth {
    #[serde(rename = "type")]
    pub kind: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Masquerade {
    #[serde(rename = "type")]
    pub kind: String,
    pub proxy: MasqueradeProxy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasqueradeProxy {
    pub url: String,
    pub rewrite_host: bool,
}

/// Parameters for one rendering
#[derive(Debug, Clone)]
pub struct RenderInput<'a> {
    pub domain: &'a str,
    pub email: &'a str,
    pub secrets: &'a Secrets,
    pub masquerade_url: &'a str,
    pub listen_port: u16,
    pub acme_http_port: u16,
    pub static_cert: &'a Path,
    pub static_key: &'a Path,
}

impl ServerConfig {
    /// ACME when both domain and email are non-empty, static files otherwise
    pub fn from_input(input: &RenderInput<'_>) -> Self {
        let domain = input.domain.trim();
        let email = input.email.trim();

        let certificate = if !domain.is_empty() && !email.is_empty() {
            CertificateMode::Acme(Acme {
                domains: vec![domain.to_string()],
                email: email.to_string(),
                challenge: "http".to_string(),
                http: AcmeHttp {
                    alt_port: input.acme_http_port,
                },
            })
        } else {
            CertificateMode::Tls(StaticTls {
                cert: input.static_cert.display().to_string(),
                key: input.static_key.display().to_string(),
            })
        };

        Self {
            listen: format!(":{}", input.listen_port),
            certificate,
            obfs: Obfs {
                kind: OBFS_ALGORITHM.to_string(),
                salamander: Salamander {
                    password: input.secrets.obfs.clone(),
                },
            },
            auth: Auth {
                kind: "password".to_string(),
                password: input.secrets.auth.clone(),
            },
            masquerade: Masquerade {
                kind: "proxy".to_string(),
                proxy: MasqueradeProxy {
                    url: input.masquerade_url.to_string(),
                    rewrite_host: true,
                },
            },
        }
    }

    pub fn to_yaml(&self) -> Result<String, ProvisionError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ProvisionError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Render and atomically replace `path` with mode 0640
    pub fn write(&self, path: &Path, group: Option<Gid>) -> Result<(), ProvisionError> {
        let yaml = self.to_yaml()?;
        write_restricted(path, yaml.as_bytes(), CONFIG_MODE, group)
    }

    /// Parse an installed document
    pub fn load(path: &Path) -> Result<Self, ProvisionError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ProvisionError::io(format!("failed to read {}", path.display()), e))?;
        Self::from_yaml(&raw)
    }

    /// Domain served under ACME; `None` for static certificates
    pub fn domain(&self) -> Option<&str> {
        match &self.certificate {
            CertificateMode::Acme(acme) => acme.domains.first().map(String::as_str),
            CertificateMode::Tls(_) => None,
        }
    }

    pub fn secrets(&self) -> Secrets {
        Secrets {
            auth: self.auth.password.clone(),
            obfs: self.obfs.salamander.password.clone(),
        }
    }

    /// Port parsed from `listen`, which may be `:443` or `0.0.0.0:443`
    pub fn listen_port(&self) -> Option<u16> {
        self.listen.rsplit(':').next()?.parse().ok()
    }
}
