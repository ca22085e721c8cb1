//! UFW allow-list management.
//!
//! The administrative SSH rules are added and confirmed before the firewall is
//! ever switched on; if one cannot be confirmed an inactive firewall stays
//! inactive. Every mutation and verification lands in a timestamped
//! transcript (mode 0600) next to the operator output.

use std::cell::Cell;
use std::fmt;
use std::path::{Path, PathBuf};

use termcolor::WriteColor;

use super::file_ops::append_line;
use super::report::Reporter;
use crate::config::Settings;
use crate::error::ProvisionError;
use crate::host::{CommandOutput, CommandRunner, Invocation};

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const TRANSCRIPT_MODE: u32 = 0o600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Proto {
    Tcp,
    Udp,
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Proto::Tcp => "tcp",
            Proto::Udp => "udp",
        })
    }
}

/// One allow-list entry, rendered as ufw writes it: `443/udp`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRule {
    pub port: u16,
    pub proto: Proto,
}

impl PortRule {
    pub const fn tcp(port: u16) -> Self {
        Self { port, proto: Proto::Tcp }
    }

    pub const fn udp(port: u16) -> Self {
        Self { port, proto: Proto::Udp }
    }

    /// Does a ufw rule target (`22/tcp`, `22`, `OpenSSH`) cover this rule?
    fn matches_target(&self, target: &str) -> bool {
        if target == self.to_string() || target == self.port.to_string() {
            return true;
        }
        target == "OpenSSH" && self.port == DEFAULT_SSH_PORT && self.proto == Proto::Tcp
    }
}

impl fmt::Display for PortRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.proto)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirewallState {
    Active,
    Inactive,
    /// `ufw status` failed or printed something unexpected
    Unknown,
}

/// First line of `ufw status`
pub fn parse_state(status: &str) -> FirewallState {
    for line in status.lines() {
        if let Some(rest) = line.trim().strip_prefix("Status:") {
            return match rest.trim() {
                "active" => FirewallState::Active,
                "inactive" => FirewallState::Inactive,
                _ => FirewallState::Unknown,
            };
        }
    }
    FirewallState::Unknown
}

/// Whether `ufw status` output lists an ALLOW entry covering `rule`
pub fn status_allows(status: &str, rule: &PortRule) -> bool {
    status.lines().any(|line| {
        let mut tokens = line.split_whitespace();
        let Some(target) = tokens.next() else {
            return false;
        };
        let action = tokens.find(|t| *t != "(v6)");
        rule.matches_target(target) && action.is_some_and(|a| a.starts_with("ALLOW"))
    })
}

/// Whether `ufw show added` output contains an allow for `rule`.
///
/// Used while the firewall is inactive, when `ufw status` lists nothing.
pub fn added_allows(show_added: &str, rule: &PortRule) -> bool {
    show_added.lines().any(|line| {
        let mut tokens = line.split_whitespace();
        if tokens.next() != Some("ufw") || tokens.next() != Some("allow") {
            return false;
        }
        tokens
            .find(|t| *t != "in")
            .is_some_and(|target| rule.matches_target(target))
    })
}

/// sshd rejects deeper `Include` nesting
const MAX_INCLUDE_DEPTH: usize = 16;

/// Ports sshd is configured to listen on, in configuration order.
///
/// `Include` directives are expanded in place: relative patterns resolve
/// against the directory holding `sshd_config` and matches are read in
/// lexical order, as sshd does. Every `Port` counts, and so does a port given
/// on a `ListenAddress`. Falls back to 22 when nothing is configured.
pub fn detect_ssh_ports(sshd_config: &Path) -> Vec<u16> {
    let base = sshd_config.parent().unwrap_or_else(|| Path::new("/"));
    let mut ports = Vec::new();
    collect_ssh_ports(sshd_config, base, 0, &mut ports);
    if ports.is_empty() {
        ports.push(DEFAULT_SSH_PORT);
    }
    ports
}

fn collect_ssh_ports(path: &Path, base: &Path, depth: usize, ports: &mut Vec<u16>) {
    if depth > MAX_INCLUDE_DEPTH {
        log::warn!("sshd Include nesting too deep at {}", path.display());
        return;
    }
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            log::debug!("cannot read {}: {e}", path.display());
            return;
        }
    };

    for line in raw.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, rest) = line
            .split_once(|c: char| c.is_whitespace() || c == '=')
            .unwrap_or((line, ""));
        let mut values = rest.trim_start_matches(['=', ' ', '\t']).split_whitespace();
        match key.to_ascii_lowercase().as_str() {
            "port" => push_port(ports, values.next()),
            "listenaddress" => push_port(ports, values.next().and_then(listen_address_port)),
            "include" => {
                for pattern in values {
                    for included in include_paths(pattern, base) {
                        collect_ssh_ports(&included, base, depth + 1, ports);
                    }
                }
            }
            // Port is not allowed inside Match blocks
            "match" => return,
            _ => {}
        }
    }
}

fn push_port(ports: &mut Vec<u16>, value: Option<&str>) {
    let Some(port) = value.and_then(|v| v.parse::<u16>().ok()).filter(|p| *p != 0) else {
        return;
    };
    if !ports.contains(&port) {
        ports.push(port);
    }
}

/// Port part of `host:port` or `[v6]:port`; bare addresses carry none
fn listen_address_port(addr: &str) -> Option<&str> {
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.split_once("]:").map(|(_, port)| port);
    }
    if addr.matches(':').count() == 1 {
        return addr.rsplit_once(':').map(|(_, port)| port);
    }
    None
}

fn include_paths(pattern: &str, base: &Path) -> Vec<PathBuf> {
    let joined = if Path::new(pattern).is_absolute() {
        PathBuf::from(pattern)
    } else {
        base.join(pattern)
    };
    let Some(full) = joined.to_str() else {
        return Vec::new();
    };
    match glob::glob(full) {
        Ok(paths) => {
            let mut paths: Vec<PathBuf> = paths.filter_map(Result::ok).collect();
            paths.sort();
            paths
        }
        Err(e) => {
            log::warn!("ignoring sshd Include {full}: {e}");
            Vec::new()
        }
    }
}

/// Timestamped, append-only record of firewall activity
pub struct Transcript {
    path: PathBuf,
}

impl Transcript {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn record(&self, msg: &str) -> Result<(), ProvisionError> {
        log::info!("firewall: {msg}");
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        append_line(&self.path, &format!("[{stamp}] {msg}"), TRANSCRIPT_MODE)
    }
}

/// Rules to apply: the admin rules first, then the service's
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallPlan {
    pub admin: Vec<PortRule>,
    pub service: Vec<PortRule>,
}

impl FirewallPlan {
    /// One tcp admin rule per SSH port; 22 if none is given
    pub fn new(settings: &Settings, ssh_ports: &[u16]) -> Self {
        let mut admin: Vec<PortRule> = Vec::new();
        for port in ssh_ports {
            let rule = PortRule::tcp(*port);
            if !admin.contains(&rule) {
                admin.push(rule);
            }
        }
        if admin.is_empty() {
            admin.push(PortRule::tcp(DEFAULT_SSH_PORT));
        }
        Self {
            admin,
            service: vec![
                PortRule::tcp(settings.acme_http_port),
                PortRule::tcp(settings.listen_port),
                PortRule::udp(settings.listen_port),
            ],
        }
    }

    pub fn all(&self) -> impl Iterator<Item = &PortRule> {
        self.admin.iter().chain(self.service.iter())
    }

    fn admin_list(&self) -> String {
        self.admin
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallReport {
    pub initial_state: FirewallState,
    /// Every admin rule was confirmed
    pub admin_confirmed: bool,
    /// Whether this run switched the firewall on
    pub enabled: bool,
    pub verified: Vec<(PortRule, bool)>,
}

impl FirewallReport {
    pub fn all_verified(&self) -> bool {
        self.verified.iter().all(|(_, ok)| *ok)
    }
}

pub struct Firewall<'a> {
    runner: &'a dyn CommandRunner,
    transcript: Transcript,
    transcript_ok: Cell<bool>,
}

impl<'a> Firewall<'a> {
    pub fn new(runner: &'a dyn CommandRunner, transcript: Transcript) -> Self {
        Self {
            runner,
            transcript,
            transcript_ok: Cell::new(true),
        }
    }

    pub fn status(&self) -> Result<(FirewallState, String), ProvisionError> {
        let output = self.ufw(&["status"])?;
        if !output.success() {
            return Ok((FirewallState::Unknown, output.stderr));
        }
        Ok((parse_state(&output.stdout), output.stdout))
    }

    /// Apply `plan`, enabling the firewall only behind confirmed admin rules.
    ///
    /// Errors only when `ufw` cannot be executed at all.
    pub fn configure<W: WriteColor>(
        &self,
        plan: &FirewallPlan,
        reporter: &mut Reporter<W>,
    ) -> Result<FirewallReport, ProvisionError> {
        let (initial_state, _) = self.status()?;
        self.note(
            &format!(
                "---- firewall run: state {initial_state:?}, admin rules {} ----",
                plan.admin_list()
            ),
            reporter,
        );

        for rule in &plan.admin {
            self.allow(rule, reporter)?;
        }
        let mut admin_confirmed = true;
        for (rule, confirmed) in self.confirm_admin(&plan.admin, initial_state)? {
            if confirmed {
                self.note(&format!("confirmed admin rule {rule}"), reporter);
                reporter.ok(&format!("Administrative access {rule} allowed"));
            } else {
                admin_confirmed = false;
                self.note(&format!("admin rule {rule} NOT confirmed"), reporter);
                reporter.fail(&format!(
                    "Could not confirm the {rule} rule for remote administration"
                ));
            }
        }

        for rule in &plan.service {
            self.allow(rule, reporter)?;
        }

        let enabled = match initial_state {
            FirewallState::Inactive if admin_confirmed => self.enable(reporter)?,
            FirewallState::Inactive => {
                self.note("refusing to enable firewall without confirmed admin rule", reporter);
                reporter.fail("Firewall left inactive to avoid locking out SSH");
                false
            }
            FirewallState::Unknown => {
                self.note("firewall state unknown; not enabling", reporter);
                reporter.fail("Could not determine firewall state; not enabling it");
                false
            }
            FirewallState::Active => false,
        };

        let verified = self.verify(plan, reporter)?;

        Ok(FirewallReport {
            initial_state,
            admin_confirmed,
            enabled,
            verified,
        })
    }

    /// Transcript write; a failure is reported once and never aborts
    fn note<W: WriteColor>(&self, msg: &str, reporter: &mut Reporter<W>) {
        if let Err(e) = self.transcript.record(msg) {
            if self.transcript_ok.replace(false) {
                reporter.fail(&format!("Cannot write firewall transcript: {e}"));
            }
        }
    }

    fn allow<W: WriteColor>(
        &self,
        rule: &PortRule,
        reporter: &mut Reporter<W>,
    ) -> Result<bool, ProvisionError> {
        let spec = rule.to_string();
        let output = self.ufw(&["allow", &spec])?;
        if output.success() {
            self.note(&format!("allow {spec}: ok"), reporter);
            Ok(true)
        } else {
            self.note(
                &format!(
                    "allow {spec}: failed ({}): {}",
                    output.code_display(),
                    output.stderr.trim()
                ),
                reporter,
            );
            reporter.fail(&format!("ufw allow {spec} failed: {}", output.stderr.trim()));
            Ok(false)
        }
    }

    fn confirm_admin(
        &self,
        admin: &[PortRule],
        state: FirewallState,
    ) -> Result<Vec<(PortRule, bool)>, ProvisionError> {
        let output = match state {
            FirewallState::Active => self.ufw(&["status"])?,
            _ => self.ufw(&["show", "added"])?,
        };
        Ok(admin
            .iter()
            .map(|rule| {
                let confirmed = output.success()
                    && match state {
                        FirewallState::Active => status_allows(&output.stdout, rule),
                        _ => added_allows(&output.stdout, rule),
                    };
                (*rule, confirmed)
            })
            .collect())
    }

    fn enable<W: WriteColor>(&self, reporter: &mut Reporter<W>) -> Result<bool, ProvisionError> {
        let output = self.ufw(&["--force", "enable"])?;
        if output.success() {
            self.note("enabled firewall", reporter);
            reporter.ok("Firewall enabled");
            Ok(true)
        } else {
            self.note(
                &format!(
                    "enable failed ({}): {}",
                    output.code_display(),
                    output.stderr.trim()
                ),
                reporter,
            );
            reporter.fail(&format!("ufw enable failed: {}", output.stderr.trim()));
            Ok(false)
        }
    }

    fn verify<W: WriteColor>(
        &self,
        plan: &FirewallPlan,
        reporter: &mut Reporter<W>,
    ) -> Result<Vec<(PortRule, bool)>, ProvisionError> {
        let (state, status) = self.status()?;
        let active = state == FirewallState::Active;

        let mut results = Vec::new();
        for rule in plan.all() {
            let ok = active && status_allows(&status, rule);
            if ok {
                self.note(&format!("verify {rule}: present"), reporter);
                reporter.ok(&format!("{rule} open"));
            } else {
                self.note(&format!("verify {rule}: MISSING"), reporter);
                reporter.warn(&format!("{rule} not confirmed in active ufw rules"));
            }
            results.push((*rule, ok));
        }
        Ok(results)
    }

    fn ufw(&self, args: &[&str]) -> Result<CommandOutput, ProvisionError> {
        self.runner
            .run(&Invocation::new("ufw").args(args.iter().copied()))
    }
}
