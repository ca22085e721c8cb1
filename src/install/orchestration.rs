//! Install and check workflows
//!
//! Fatal conditions come back as `Err`; everything advisory lands on the
//! [`Reporter`] and in the returned summary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use termcolor::WriteColor;

use super::binary::ensure_binary;
use super::diagnostics::{CheckOutcome, CheckStatus, Diagnostics, DiagnosticsLevel, report_outcomes};
use super::firewall::{Firewall, FirewallPlan, Transcript, detect_ssh_ports};
use super::packages::ensure_packages;
use super::preflight::{check_os, require_root};
use super::render::{CONFIG_MODE, RenderInput, ServerConfig};
use super::report::Reporter;
use super::secrets::generate_pair;
use super::service::{Systemd, activate, listening_sockets, sshd_listening_ports, wait_for_listener};
use super::uri::{build_uri, publish};
use crate::config::{FailurePolicy, Settings};
use crate::error::ProvisionError;
use crate::host::Host;

/// Validated install-mode arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub domain: String,
    pub email: String,
    pub diagnostics: bool,
}

impl InstallRequest {
    /// Both values are required and must be non-blank
    pub fn new(domain: Option<String>, email: Option<String>) -> Result<Self, ProvisionError> {
        let domain = domain.map(|d| d.trim().to_string()).unwrap_or_default();
        let email = email.map(|e| e.trim().to_string()).unwrap_or_default();
        match (domain.is_empty(), email.is_empty()) {
            (false, false) => Ok(Self {
                domain,
                email,
                diagnostics: true,
            }),
            (true, _) => Err(ProvisionError::Usage("missing <domain> argument".into())),
            (false, true) => Err(ProvisionError::Usage("missing <email> argument".into())),
        }
    }

    pub fn skip_diagnostics(mut self, skip: bool) -> Self {
        self.diagnostics = !skip;
        self
    }
}

fn exit_code(policy: FailurePolicy, soft_failures: &[String]) -> i32 {
    match policy {
        FailurePolicy::Strict if !soft_failures.is_empty() => 1,
        _ => 0,
    }
}

#[derive(Debug, Clone)]
pub struct InstallSummary {
    pub uri: String,
    pub uri_path: PathBuf,
    pub config_path: PathBuf,
    pub soft_failures: Vec<String>,
}

impl InstallSummary {
    pub fn exit_code(&self, policy: FailurePolicy) -> i32 {
        exit_code(policy, &self.soft_failures)
    }
}

#[derive(Debug, Clone)]
pub struct CheckSummary {
    pub binary_present: bool,
    pub outcomes: Vec<CheckOutcome>,
    pub soft_failures: Vec<String>,
}

impl CheckSummary {
    /// Checks that ended in a warning or failure
    pub fn problems(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_problem()).count()
    }

    pub fn exit_code(&self, policy: FailurePolicy) -> i32 {
        if !self.binary_present {
            return 1;
        }
        exit_code(policy, &self.soft_failures)
    }
}

/// Full provisioning run
pub async fn run_install<W: WriteColor>(
    host: &Host,
    settings: &Settings,
    request: &InstallRequest,
    reporter: &mut Reporter<W>,
) -> Result<InstallSummary> {
    require_root(host.identity.as_ref())?;

    reporter.header("Preflight");
    check_os(&settings.os_release_path, settings.os_mismatch_delay(), reporter).await;

    reporter.header("Packages");
    ensure_packages(host.runner.as_ref(), reporter)
        .context("failed to install required packages")?;

    reporter.header("Hysteria binary");
    ensure_binary(host, settings, reporter).await?;

    reporter.header("Configuration");
    let secrets = generate_pair();
    let config = ServerConfig::from_input(&RenderInput {
        domain: &request.domain,
        email: &request.email,
        secrets: &secrets,
        masquerade_url: &settings.masquerade_url,
        listen_port: settings.listen_port,
        acme_http_port: settings.acme_http_port,
        static_cert: &settings.static_cert_path,
        static_key: &settings.static_key_path,
    });
    let group = host.identity.group_id(&settings.service_group);
    if group.is_none() {
        reporter.info(&format!(
            "Group {} not found; config stays root-only",
            settings.service_group
        ));
    }
    config
        .write(&settings.config_path, group)
        .with_context(|| format!("failed to write {}", settings.config_path.display()))?;
    reporter.ok(&format!(
        "Wrote {} (mode {CONFIG_MODE:o})",
        settings.config_path.display()
    ));

    reporter.header("Firewall");
    let plan = FirewallPlan::new(settings, &admin_ports(host, settings));
    let configured = Firewall::new(
        host.runner.as_ref(),
        Transcript::new(&settings.firewall_log_path),
    )
    .configure(&plan, reporter);
    match configured {
        Ok(outcome) if outcome.all_verified() => {}
        Ok(_) => reporter.hint(&format!(
            "Firewall transcript: {}",
            settings.firewall_log_path.display()
        )),
        Err(e) => reporter.fail(&format!("Firewall configuration failed: {e}")),
    }

    reporter.header("Service");
    let systemd = Systemd::new(host.runner.as_ref(), &settings.service_name);
    match activate(&systemd, reporter) {
        Ok(true) => await_listener(host, settings, reporter).await,
        Ok(false) => {}
        Err(e) => reporter.fail(&format!("Could not manage {}: {e}", settings.service_name)),
    }

    if request.diagnostics {
        reporter.header("Diagnostics");
        let outcomes = Diagnostics::new(host, settings)
            .run(Some(request.domain.as_str()), DiagnosticsLevel::Full)
            .await;
        report_outcomes(&outcomes, reporter);
    }

    reporter.header("Client URI");
    let uri = build_uri(&secrets, &request.domain, settings.listen_port);
    publish(&settings.uri_path, &uri)
        .with_context(|| format!("failed to write {}", settings.uri_path.display()))?;
    reporter.ok(&format!("Saved to {}", settings.uri_path.display()));
    reporter.info(&uri);

    let soft_failures = reporter.soft_failures().to_vec();
    if !soft_failures.is_empty() {
        reporter.header(&format!(
            "Finished with {} warning(s); review the output above",
            soft_failures.len()
        ));
    }

    Ok(InstallSummary {
        uri,
        uri_path: settings.uri_path.clone(),
        config_path: settings.config_path.clone(),
        soft_failures,
    })
}

/// SSH ports to keep reachable: configured or detected, plus live sshd listeners
fn admin_ports(host: &Host, settings: &Settings) -> Vec<u16> {
    let mut ports = match settings.ssh_port {
        Some(port) => vec![port],
        None => detect_ssh_ports(&settings.sshd_config_path),
    };
    match listening_sockets(host.runner.as_ref()) {
        Ok(sockets) => {
            for port in sshd_listening_ports(&sockets) {
                if !ports.contains(&port) {
                    ports.push(port);
                }
            }
        }
        Err(e) => log::debug!("cannot list sshd sockets: {e}"),
    }
    log::debug!("admin ports: {ports:?}");
    ports
}

async fn await_listener<W: WriteColor>(host: &Host, settings: &Settings, reporter: &mut Reporter<W>) {
    let port = settings.listen_port;
    reporter.info(&format!(
        "Waiting up to {}s for udp/{port} (certificate issuance)",
        settings.readiness.total_wait_secs
    ));
    match wait_for_listener(host.runner.as_ref(), port, &settings.readiness).await {
        Ok(true) => reporter.ok(&format!("Listening on udp/{port}")),
        Ok(false) => reporter.fail(&format!(
            "udp/{port} not bound after {}s; certificate issuance may still be running",
            settings.readiness.total_wait_secs
        )),
        Err(e) => reporter.fail(&format!("Could not poll for udp/{port}: {e}")),
    }
}

/// Diagnostics against an existing installation. Never mutates the host.
///
/// `domain` falls back to the one recorded in the installed config, and the
/// installed listen port takes precedence over the configured one.
pub async fn run_check<W: WriteColor>(
    host: &Host,
    settings: &Settings,
    domain: Option<&str>,
    level: DiagnosticsLevel,
    reporter: &mut Reporter<W>,
) -> Result<CheckSummary> {
    require_root(host.identity.as_ref())?;

    reporter.header("Diagnostics");
    let binary = Diagnostics::new(host, settings).binary_presence();
    report_outcomes(std::slice::from_ref(&binary), reporter);
    if binary.status == CheckStatus::Fail {
        reporter.info("Remaining checks skipped");
        return Ok(CheckSummary {
            binary_present: false,
            outcomes: vec![binary],
            soft_failures: reporter.soft_failures().to_vec(),
        });
    }

    let installed = ServerConfig::load(&settings.config_path);
    let domain = match (domain, &installed) {
        (Some(d), _) => Some(d.to_string()),
        (None, Ok(config)) => config.domain().map(str::to_string),
        (None, Err(e)) => {
            reporter.warn(&format!("Cannot read installed config: {e}"));
            None
        }
    };

    let mut effective = settings.clone();
    if let Some(port) = installed.as_ref().ok().and_then(ServerConfig::listen_port) {
        if port != settings.listen_port {
            reporter.info(&format!("Installed config listens on port {port}"));
            effective.listen_port = port;
        }
    }

    let mut outcomes = vec![binary];
    let checks = Diagnostics::new(host, &effective)
        .run(domain.as_deref(), level)
        .await;
    report_outcomes(&checks, reporter);
    outcomes.extend(checks);

    let summary = CheckSummary {
        binary_present: true,
        outcomes,
        soft_failures: reporter.soft_failures().to_vec(),
    };
    if summary.problems() > 0 {
        reporter.header(&format!("{} check(s) need attention", summary.problems()));
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_requires_both_values() {
        let ok = InstallRequest::new(Some(" vpn.example.com ".into()), Some("a@b.c".into())).unwrap();
        assert_eq!(ok.domain, "vpn.example.com");
        assert!(ok.diagnostics);

        for (domain, email) in [
            (None, None),
            (Some("vpn.example.com"), None),
            (Some("  "), Some("a@b.c")),
            (Some("vpn.example.com"), Some("")),
        ] {
            let err = InstallRequest::new(domain.map(Into::into), email.map(Into::into)).unwrap_err();
            assert!(matches!(err, ProvisionError::Usage(_)), "{domain:?} {email:?}");
        }
    }

    #[test]
    fn strict_policy_escalates_soft_failures() {
        let summary = InstallSummary {
            uri: String::new(),
            uri_path: PathBuf::new(),
            config_path: PathBuf::new(),
            soft_failures: vec!["dns: mismatch".into()],
        };
        assert_eq!(summary.exit_code(FailurePolicy::Advisory), 0);
        assert_eq!(summary.exit_code(FailurePolicy::Strict), 1);
    }

    #[test]
    fn problems_count_warnings_and_failures_only() {
        let outcome = |status| CheckOutcome {
            name: "dns",
            status,
            detail: String::new(),
        };
        let summary = CheckSummary {
            binary_present: true,
            outcomes: vec![
                outcome(CheckStatus::Pass),
                outcome(CheckStatus::Warn),
                outcome(CheckStatus::Skipped),
                outcome(CheckStatus::Fail),
            ],
            soft_failures: Vec::new(),
        };
        assert_eq!(summary.problems(), 2);
    }

    #[test]
    fn missing_binary_fails_check_regardless_of_policy() {
        let summary = CheckSummary {
            binary_present: false,
            outcomes: Vec::new(),
            soft_failures: Vec::new(),
        };
        assert_eq!(summary.exit_code(FailurePolicy::Advisory), 1);
    }
}
