//! HTTP and DNS capabilities

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;

use crate::error::ProvisionError;

const USER_AGENT: &str = concat!("hy2setup/", env!("CARGO_PKG_VERSION"));
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Plain HTTPS GET
#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, ProvisionError>;

    async fn get_text(&self, url: &str) -> Result<String, ProvisionError> {
        let bytes = self.get_bytes(url).await?;
        String::from_utf8(bytes).map_err(|e| ProvisionError::Http {
            url: url.to_string(),
            reason: format!("response is not UTF-8: {e}"),
        })
    }
}

/// Address-record resolution
#[async_trait]
pub trait DnsLookup: Send + Sync {
    /// All A and AAAA records for `domain`; empty when the name has none
    async fn resolve(&self, domain: &str) -> Result<Vec<IpAddr>, ProvisionError>;
}

/// [`HttpFetch`] over `reqwest`.
///
/// Text lookups are bounded by a short total timeout; byte downloads get the
/// longer one.
pub struct ReqwestFetch {
    client: reqwest::Client,
    lookup_timeout: Duration,
    download_timeout: Duration,
}

impl ReqwestFetch {
    pub fn new() -> Result<Self, ProvisionError> {
        Self::with_timeouts(HTTP_TIMEOUT, DOWNLOAD_TIMEOUT)
    }

    pub fn with_timeouts(lookup: Duration, download: Duration) -> Result<Self, ProvisionError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(lookup.min(HTTP_TIMEOUT))
            .build()
            .map_err(|e| ProvisionError::Http {
                url: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            lookup_timeout: lookup,
            download_timeout: download,
        })
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, ProvisionError> {
        let http_err = |reason: String| ProvisionError::Http {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| http_err(e.to_string()))?;

        if !response.status().is_success() {
            return Err(http_err(format!("HTTP {}", response.status())));
        }

        let body = response.bytes().await.map_err(|e| http_err(e.to_string()))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetch {
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, ProvisionError> {
        self.fetch(url, self.download_timeout).await
    }

    async fn get_text(&self, url: &str) -> Result<String, ProvisionError> {
        let bytes = self.fetch(url, self.lookup_timeout).await?;
        String::from_utf8(bytes).map_err(|e| ProvisionError::Http {
            url: url.to_string(),
            reason: format!("response is not UTF-8: {e}"),
        })
    }
}

/// [`DnsLookup`] over `hickory-resolver`, querying Cloudflare so the answer
/// reflects public DNS rather than `/etc/hosts`
pub struct HickoryLookup {
    resolver: TokioAsyncResolver,
}

impl HickoryLookup {
    pub fn new() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::cloudflare(), ResolverOpts::default()),
        }
    }
}

impl Default for HickoryLookup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DnsLookup for HickoryLookup {
    async fn resolve(&self, domain: &str) -> Result<Vec<IpAddr>, ProvisionError> {
        match self.resolver.lookup_ip(domain).await {
            Ok(lookup) => Ok(lookup.iter().collect()),
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Ok(Vec::new()),
                _ => Err(ProvisionError::Dns {
                    domain: domain.to_string(),
                    reason: e.to_string(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn silent_server_hits_the_lookup_timeout() {
        // Connections complete in the backlog but nothing ever answers
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        let fetch = ReqwestFetch::with_timeouts(Duration::from_millis(300), Duration::from_secs(120)).unwrap();

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(Duration::from_secs(5), fetch.get_text(&url))
            .await
            .expect("lookup outlived its timeout");

        assert!(matches!(result, Err(ProvisionError::Http { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
        drop(listener);
    }

    #[test]
    fn default_timeouts_split_lookup_from_download() {
        let fetch = ReqwestFetch::new().unwrap();
        assert_eq!(fetch.lookup_timeout, HTTP_TIMEOUT);
        assert_eq!(fetch.download_timeout, DOWNLOAD_TIMEOUT);
    }
}
