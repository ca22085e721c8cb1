//! Post-install checks.
//!
//! Every check is read-only and produces a [`CheckOutcome`]; none of them
//! returns an error to the caller.

use std::fmt;
use std::net::IpAddr;

use termcolor::WriteColor;

use super::file_ops::is_executable;
use super::firewall::{Firewall, FirewallState, PortRule, Proto, Transcript, status_allows};
use super::report::Reporter;
use super::service::{Socket, Systemd, listening_sockets};
use crate::config::Settings;
use crate::error::ProvisionError;
use crate::host::{Host, HttpFetch, Invocation};

/// Substrings that mark a journal line as an error (matched lowercase)
const ERROR_MARKERS: &[&str] = &["error", "fatal", "failed"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticsLevel {
    /// Public IP and DNS agreement only
    Dns,
    /// Everything: DNS, sockets, reachability, firewall, journal
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: String,
}

impl CheckOutcome {
    fn new(name: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }

    pub fn is_problem(&self) -> bool {
        matches!(self.status, CheckStatus::Warn | CheckStatus::Fail)
    }
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.detail)
    }
}

/// First endpoint that answers with a parseable address wins
pub async fn public_ip(http: &dyn HttpFetch, endpoints: &[String]) -> Result<IpAddr, ProvisionError> {
    let mut last_err = None;
    for url in endpoints {
        match http.get_text(url).await {
            Ok(body) => match body.trim().parse::<IpAddr>() {
                Ok(ip) => return Ok(ip),
                Err(_) => {
                    last_err = Some(ProvisionError::Http {
                        url: url.clone(),
                        reason: format!("unexpected body {:?}", body.trim()),
                    })
                }
            },
            Err(e) => {
                log::debug!("public IP lookup via {url} failed: {e}");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| ProvisionError::Config("no public IP endpoints".into())))
}

/// Count journal lines that look like errors
pub fn count_error_lines(journal: &str) -> usize {
    journal
        .lines()
        .filter(|line| {
            let lower = line.to_lowercase();
            ERROR_MARKERS.iter().any(|m| lower.contains(m))
        })
        .count()
}

pub struct Diagnostics<'a> {
    host: &'a Host,
    settings: &'a Settings,
}

impl<'a> Diagnostics<'a> {
    pub fn new(host: &'a Host, settings: &'a Settings) -> Self {
        Self { host, settings }
    }

    pub fn binary_presence(&self) -> CheckOutcome {
        let path = &self.settings.binary_path;
        if is_executable(path) {
            CheckOutcome::new("binary", CheckStatus::Pass, format!("{} installed", path.display()))
        } else {
            CheckOutcome::new(
                "binary",
                CheckStatus::Fail,
                format!("{} not found; hysteria is not installed", path.display()),
            )
        }
    }

    /// Run the checks for `level`. `domain` is `None` for static-certificate
    /// installs, in which case the DNS comparison is skipped.
    pub async fn run(&self, domain: Option<&str>, level: DiagnosticsLevel) -> Vec<CheckOutcome> {
        let mut outcomes = Vec::new();

        let ip = public_ip(self.host.http.as_ref(), &self.settings.public_ip_endpoints).await;
        outcomes.push(match &ip {
            Ok(ip) => CheckOutcome::new("public-ip", CheckStatus::Pass, ip.to_string()),
            Err(e) => CheckOutcome::new("public-ip", CheckStatus::Warn, format!("lookup failed: {e}")),
        });
        outcomes.push(self.dns_match(domain, ip.ok()).await);

        if level == DiagnosticsLevel::Dns {
            return outcomes;
        }

        let sockets = listening_sockets(self.host.runner.as_ref());
        outcomes.push(self.local_binding(&sockets));
        outcomes.push(self.reachability(&sockets));
        outcomes.push(self.firewall_rules());
        outcomes.push(self.log_scan());
        outcomes
    }

    async fn dns_match(&self, domain: Option<&str>, ip: Option<IpAddr>) -> CheckOutcome {
        const NAME: &str = "dns";
        let Some(domain) = domain else {
            return CheckOutcome::new(NAME, CheckStatus::Skipped, "no ACME domain configured");
        };
        let records = match self.host.dns.resolve(domain).await {
            Ok(records) => records,
            Err(e) => return CheckOutcome::new(NAME, CheckStatus::Warn, e.to_string()),
        };
        if records.is_empty() {
            return CheckOutcome::new(
                NAME,
                CheckStatus::Warn,
                format!("{domain} has no A/AAAA records; ACME validation will fail"),
            );
        }
        let listed = records
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        match ip {
            Some(ip) if records.contains(&ip) => {
                CheckOutcome::new(NAME, CheckStatus::Pass, format!("{domain} -> {listed}"))
            }
            Some(ip) => CheckOutcome::new(
                NAME,
                CheckStatus::Warn,
                format!(
                    "{domain} -> {listed}, but this host is {ip}; ACME may fail unless a proxy forwards port 80"
                ),
            ),
            None => CheckOutcome::new(
                NAME,
                CheckStatus::Skipped,
                format!("{domain} -> {listed}; public IP unknown"),
            ),
        }
    }

    fn local_binding(&self, sockets: &Result<Vec<Socket>, ProvisionError>) -> CheckOutcome {
        const NAME: &str = "listening";
        let port = self.settings.listen_port;
        match sockets {
            Ok(sockets) => {
                if sockets.iter().any(|s| s.proto == Proto::Udp && s.port == port) {
                    CheckOutcome::new(NAME, CheckStatus::Pass, format!("udp/{port} bound"))
                } else {
                    CheckOutcome::new(NAME, CheckStatus::Fail, format!("nothing bound on udp/{port}"))
                }
            }
            Err(e) => CheckOutcome::new(NAME, CheckStatus::Warn, format!("cannot list sockets: {e}")),
        }
    }

    /// Heuristic: unit active and the UDP socket bound on a wildcard address
    fn reachability(&self, sockets: &Result<Vec<Socket>, ProvisionError>) -> CheckOutcome {
        const NAME: &str = "reachability";
        let port = self.settings.listen_port;
        let state = Systemd::new(self.host.runner.as_ref(), &self.settings.service_name)
            .active_state()
            .unwrap_or_else(|e| e.to_string());
        if state != "active" {
            return CheckOutcome::new(
                NAME,
                CheckStatus::Fail,
                format!("{} is {state}", self.settings.service_name),
            );
        }

        let Ok(sockets) = sockets else {
            return CheckOutcome::new(NAME, CheckStatus::Skipped, "socket list unavailable");
        };
        let udp: Vec<&Socket> = sockets
            .iter()
            .filter(|s| s.proto == Proto::Udp && s.port == port)
            .collect();
        if udp.iter().any(|s| s.is_wildcard()) {
            CheckOutcome::new(
                NAME,
                CheckStatus::Pass,
                format!("udp/{port} open on all interfaces; check any cloud firewall too"),
            )
        } else if udp.iter().any(|s| s.is_loopback()) {
            CheckOutcome::new(NAME, CheckStatus::Warn, format!("udp/{port} bound to loopback only"))
        } else if udp.is_empty() {
            CheckOutcome::new(NAME, CheckStatus::Fail, format!("udp/{port} not bound"))
        } else {
            CheckOutcome::new(
                NAME,
                CheckStatus::Pass,
                format!("udp/{port} bound on {}", udp[0].host),
            )
        }
    }

    fn firewall_rules(&self) -> CheckOutcome {
        const NAME: &str = "firewall";
        // Read-only: status() never writes the transcript
        let firewall = Firewall::new(
            self.host.runner.as_ref(),
            Transcript::new(&self.settings.firewall_log_path),
        );
        let (state, status) = match firewall.status() {
            Ok(s) => s,
            Err(e) => return CheckOutcome::new(NAME, CheckStatus::Warn, e.to_string()),
        };
        if state != FirewallState::Active {
            return CheckOutcome::new(NAME, CheckStatus::Warn, format!("ufw is {state:?}"));
        }
        let expected = [
            PortRule::tcp(self.settings.acme_http_port),
            PortRule::tcp(self.settings.listen_port),
            PortRule::udp(self.settings.listen_port),
        ];
        let missing: Vec<String> = expected
            .iter()
            .filter(|r| !status_allows(&status, r))
            .map(ToString::to_string)
            .collect();
        if missing.is_empty() {
            CheckOutcome::new(NAME, CheckStatus::Pass, "all service ports allowed")
        } else {
            CheckOutcome::new(NAME, CheckStatus::Fail, format!("missing: {}", missing.join(", ")))
        }
    }

    fn log_scan(&self) -> CheckOutcome {
        const NAME: &str = "journal";
        let invocation = Invocation::new("journalctl").args([
            "-u",
            self.settings.service_name.as_str(),
            "--since",
            self.settings.log_scan_window.as_str(),
            "--no-pager",
        ]);
        match self.host.runner.run(&invocation) {
            Ok(output) if output.success() => match count_error_lines(&output.stdout) {
                0 => CheckOutcome::new(NAME, CheckStatus::Pass, "no recent errors"),
                n => CheckOutcome::new(
                    NAME,
                    CheckStatus::Warn,
                    format!("{n} error line(s) since {}", self.settings.log_scan_window),
                ),
            },
            Ok(output) => CheckOutcome::new(NAME, CheckStatus::Warn, output.stderr.trim().to_string()),
            Err(e) => CheckOutcome::new(NAME, CheckStatus::Warn, e.to_string()),
        }
    }
}

/// Print outcomes through the reporter; problems count as soft failures
pub fn report_outcomes<W: WriteColor>(outcomes: &[CheckOutcome], reporter: &mut Reporter<W>) {
    for outcome in outcomes {
        match outcome.status {
            CheckStatus::Pass => reporter.ok(&outcome.to_string()),
            CheckStatus::Warn => reporter.warn(&outcome.to_string()),
            CheckStatus::Fail => reporter.fail(&outcome.to_string()),
            CheckStatus::Skipped => reporter.info(&format!("{outcome} (skipped)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::host::CommandOutput;
    use crate::test_utils::{TestHost, ss_line, test_settings, ufw_status_active};

    const HOST_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));

    fn scripted(test: &TestHost, udp_local: &str, journal: &str) {
        test.http.respond("https://api.ipify.org", "203.0.113.7\n");
        test.dns.record("vpn.example.com", HOST_IP);
        test.runner
            .on("ss -H -tulpn", CommandOutput::ok(ss_line("udp", udp_local)))
            .on(
                "systemctl is-active hysteria-server.service",
                CommandOutput::ok("active\n"),
            )
            .on(
                "ufw status",
                CommandOutput::ok(ufw_status_active(&["22/tcp", "80/tcp", "443/tcp", "443/udp"])),
            )
            .on(
                "journalctl -u hysteria-server.service --since -10min --no-pager",
                CommandOutput::ok(journal),
            );
    }

    fn status_of<'a>(outcomes: &'a [CheckOutcome], name: &str) -> &'a CheckOutcome {
        outcomes.iter().find(|o| o.name == name).unwrap()
    }

    #[test]
    fn error_scan_is_case_insensitive() {
        let journal = "INFO ok\nERROR: acme order failed\nFatal crash\nwarn nothing\n";
        assert_eq!(count_error_lines(journal), 2);
    }

    #[tokio::test]
    async fn public_ip_falls_back_to_second_endpoint() {
        let test = TestHost::root();
        test.http.respond("https://ifconfig.me/ip", "203.0.113.7");
        let endpoints = vec!["https://api.ipify.org".to_string(), "https://ifconfig.me/ip".to_string()];

        let ip = public_ip(test.http.as_ref(), &endpoints).await.unwrap();

        assert_eq!(ip, HOST_IP);
        assert_eq!(test.http.requests(), endpoints);
    }

    #[tokio::test]
    async fn public_ip_rejects_garbage() {
        let test = TestHost::root();
        test.http.respond("https://api.ipify.org", "<html>rate limited</html>");
        let endpoints = vec!["https://api.ipify.org".to_string()];

        assert!(public_ip(test.http.as_ref(), &endpoints).await.is_err());
    }

    #[tokio::test]
    async fn healthy_host_passes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let test = TestHost::root();
        scripted(&test, "*:443", "server up and running\n");
        let host = test.host();

        let outcomes = Diagnostics::new(&host, &settings)
            .run(Some("vpn.example.com"), DiagnosticsLevel::Full)
            .await;

        assert_eq!(outcomes.len(), 6);
        assert!(outcomes.iter().all(|o| o.status == CheckStatus::Pass), "{outcomes:?}");
        assert!(test.runner.only_read_only_calls());
        assert!(!settings.firewall_log_path.exists());
    }

    #[tokio::test]
    async fn dns_mismatch_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let test = TestHost::root();
        test.http.respond("https://api.ipify.org", "198.51.100.1");
        test.dns.record("vpn.example.com", HOST_IP);
        let host = test.host();

        let outcomes = Diagnostics::new(&host, &settings)
            .run(Some("vpn.example.com"), DiagnosticsLevel::Dns)
            .await;

        assert_eq!(outcomes.len(), 2);
        let dns = status_of(&outcomes, "dns");
        assert_eq!(dns.status, CheckStatus::Warn);
        assert!(dns.detail.contains("198.51.100.1"));
        assert!(test.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn static_mode_skips_dns() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let test = TestHost::root();
        test.http.respond("https://api.ipify.org", "203.0.113.7");
        let host = test.host();

        let outcomes = Diagnostics::new(&host, &settings).run(None, DiagnosticsLevel::Dns).await;
        assert_eq!(status_of(&outcomes, "dns").status, CheckStatus::Skipped);
    }

    #[tokio::test]
    async fn loopback_binding_and_journal_errors_are_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let test = TestHost::root();
        scripted(&test, "127.0.0.1:443", "ERROR acme: failed to obtain certificate\n");
        let host = test.host();

        let outcomes = Diagnostics::new(&host, &settings)
            .run(Some("vpn.example.com"), DiagnosticsLevel::Full)
            .await;

        assert_eq!(status_of(&outcomes, "reachability").status, CheckStatus::Warn);
        let journal = status_of(&outcomes, "journal");
        assert_eq!(journal.status, CheckStatus::Warn);
        assert!(journal.detail.starts_with("1 error line"));
    }

    #[tokio::test]
    async fn inactive_service_fails_reachability() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let test = TestHost::root();
        test.runner.on(
            "systemctl is-active hysteria-server.service",
            CommandOutput { code: Some(3), stdout: "inactive\n".into(), stderr: String::new() },
        );
        let host = test.host();

        let outcomes = Diagnostics::new(&host, &settings)
            .run(None, DiagnosticsLevel::Full)
            .await;

        assert_eq!(status_of(&outcomes, "listening").status, CheckStatus::Fail);
        assert_eq!(status_of(&outcomes, "reachability").status, CheckStatus::Fail);
        assert_eq!(status_of(&outcomes, "firewall").status, CheckStatus::Warn);
    }
}
