//! Client connection string

use std::path::Path;

use super::file_ops::write_restricted;
use super::render::OBFS_ALGORITHM;
use super::secrets::Secrets;
use crate::error::ProvisionError;

pub const URI_SCHEME: &str = "hysteria2";
pub const URI_MODE: u32 = 0o600;

/// `hysteria2://<auth>@<domain>:<port>/?obfs=salamander&obfs-password=<obfs>&sni=<domain>`
///
/// Secrets are base64url, so they need no percent-encoding.
pub fn build_uri(secrets: &Secrets, domain: &str, port: u16) -> String {
    format!(
        "{URI_SCHEME}://{auth}@{domain}:{port}/?obfs={OBFS_ALGORITHM}&obfs-password={obfs}&sni={domain}",
        auth = secrets.auth,
        obfs = secrets.obfs,
    )
}

/// Persist the URI as a single line, mode 0600
pub fn publish(path: &Path, uri: &str) -> Result<(), ProvisionError> {
    write_restricted(path, format!("{uri}\n").as_bytes(), URI_MODE, None)
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn secrets() -> Secrets {
        Secrets {
            auth: "A-b_c".into(),
            obfs: "Z_y-x".into(),
        }
    }

    #[test]
    fn uri_has_the_documented_shape() {
        assert_eq!(
            build_uri(&secrets(), "vpn.example.com", 443),
            "hysteria2://A-b_c@vpn.example.com:443/?obfs=salamander&obfs-password=Z_y-x&sni=vpn.example.com"
        );
    }

    #[test]
    fn uri_parses_as_a_url() {
        let uri = build_uri(&secrets(), "vpn.example.com", 443);
        let parsed = url::Url::parse(&uri).unwrap();

        assert_eq!(parsed.scheme(), "hysteria2");
        assert_eq!(parsed.username(), "A-b_c");
        assert_eq!(parsed.host_str(), Some("vpn.example.com"));
        assert_eq!(parsed.port(), Some(443));
        let query: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            query,
            vec![
                ("obfs".to_string(), "salamander".to_string()),
                ("obfs-password".to_string(), "Z_y-x".to_string()),
                ("sni".to_string(), "vpn.example.com".to_string()),
            ]
        );
    }

    #[test]
    fn published_file_is_one_line_and_private() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uri.txt");
        let uri = build_uri(&secrets(), "vpn.example.com", 443);

        publish(&path, &uri).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().collect::<Vec<_>>(), vec![uri.as_str()]);
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
