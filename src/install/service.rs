//! systemd activation of the server unit and readiness polling.

use std::time::Duration;

use termcolor::WriteColor;

use super::firewall::Proto;
use super::report::Reporter;
use crate::config::ReadinessSettings;
use crate::error::ProvisionError;
use crate::host::{CommandOutput, CommandRunner, Invocation};

pub struct Systemd<'a> {
    runner: &'a dyn CommandRunner,
    unit: &'a str,
}

impl<'a> Systemd<'a> {
    pub fn new(runner: &'a dyn CommandRunner, unit: &'a str) -> Self {
        Self { runner, unit }
    }

    pub fn daemon_reload(&self) -> Result<CommandOutput, ProvisionError> {
        self.systemctl(&["daemon-reload"])
    }

    pub fn enable(&self) -> Result<CommandOutput, ProvisionError> {
        self.systemctl(&["enable", self.unit])
    }

    /// Starts a stopped unit, or restarts a running one onto the new config
    pub fn restart(&self) -> Result<CommandOutput, ProvisionError> {
        self.systemctl(&["restart", self.unit])
    }

    /// `systemctl is-active` state word (`active`, `failed`, `activating`...)
    pub fn active_state(&self) -> Result<String, ProvisionError> {
        let output = self.systemctl(&["is-active", self.unit])?;
        let state = output.stdout.trim();
        Ok(if state.is_empty() {
            "unknown".to_string()
        } else {
            state.to_string()
        })
    }

    pub fn journal_hint(&self) -> String {
        format!("journalctl -u {} -e --no-pager", self.unit)
    }

    fn systemctl(&self, args: &[&str]) -> Result<CommandOutput, ProvisionError> {
        self.runner
            .run(&Invocation::new("systemctl").args(args.iter().copied()))
    }
}

/// Enable and (re)start the unit. Every failure here is advisory: the unit
/// may still be waiting on certificate issuance.
pub fn activate<W: WriteColor>(
    systemd: &Systemd<'_>,
    reporter: &mut Reporter<W>,
) -> Result<bool, ProvisionError> {
    for (what, output) in [
        ("daemon-reload", systemd.daemon_reload()?),
        ("enable", systemd.enable()?),
        ("restart", systemd.restart()?),
    ] {
        if !output.success() {
            reporter.fail(&format!(
                "systemctl {what} {} failed: {}",
                systemd.unit,
                output.stderr.trim()
            ));
        }
    }

    let state = systemd.active_state()?;
    if state == "active" {
        reporter.ok(&format!("{} is active and enabled at boot", systemd.unit));
        Ok(true)
    } else {
        reporter.fail(&format!("{} is {state}", systemd.unit));
        reporter.hint(&format!("Inspect logs with: {}", systemd.journal_hint()));
        Ok(false)
    }
}

/// One row of `ss -H -tulpn`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Socket {
    pub proto: Proto,
    pub host: String,
    pub port: u16,
    pub process: Option<String>,
}

impl Socket {
    /// Bound on all interfaces rather than a specific/loopback address
    pub fn is_wildcard(&self) -> bool {
        matches!(self.host.as_str(), "*" | "0.0.0.0" | "[::]" | "::" | "[::ffff:0.0.0.0]")
    }

    pub fn is_loopback(&self) -> bool {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        host.parse::<std::net::IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
    }
}

/// Parse `ss -H -tulpn` (`Netid State Recv-Q Send-Q Local Peer Process`)
pub fn parse_sockets(raw: &str) -> Vec<Socket> {
    raw.lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            let proto = match *cols.first()? {
                "udp" => Proto::Udp,
                "tcp" => Proto::Tcp,
                _ => return None,
            };
            let local = cols.get(4)?;
            let (host, port) = local.rsplit_once(':')?;
            // ss appends the interface: 0.0.0.0%eth0:443
            let host = host.split('%').next().unwrap_or(host);
            let process = cols.get(6).and_then(|p| {
                let name = p.split('"').nth(1)?;
                Some(name.to_string())
            });
            Some(Socket {
                proto,
                host: host.to_string(),
                port: port.parse().ok()?,
                process,
            })
        })
        .collect()
}

pub fn listening_sockets(runner: &dyn CommandRunner) -> Result<Vec<Socket>, ProvisionError> {
    let output = runner.run_checked(&Invocation::new("ss").args(["-H", "-tulpn"]))?;
    Ok(parse_sockets(&output.stdout))
}

/// TCP ports a running sshd accepts connections on from off the host
pub fn sshd_listening_ports(sockets: &[Socket]) -> Vec<u16> {
    let mut ports = Vec::new();
    for socket in sockets {
        let is_sshd = socket.proto == Proto::Tcp && socket.process.as_deref() == Some("sshd");
        if is_sshd && !socket.is_loopback() && !ports.contains(&socket.port) {
            ports.push(socket.port);
        }
    }
    ports
}

/// Poll until a UDP socket is bound on `port`, with exponential backoff.
///
/// Returns `false` once `total_wait` has elapsed without seeing one.
pub async fn wait_for_listener(
    runner: &dyn CommandRunner,
    port: u16,
    readiness: &ReadinessSettings,
) -> Result<bool, ProvisionError> {
    let budget = readiness.total_wait();
    let max_delay = readiness.max_delay().max(Duration::from_millis(1));
    let mut delay = readiness.initial_delay().max(Duration::from_millis(1));
    let mut waited = Duration::ZERO;

    loop {
        let bound = listening_sockets(runner)?
            .iter()
            .any(|s| s.proto == Proto::Udp && s.port == port);
        if bound {
            log::debug!("udp/{port} bound after {waited:?}");
            return Ok(true);
        }
        if waited >= budget {
            return Ok(false);
        }

        let step = delay.min(budget - waited);
        tokio::time::sleep(step).await;
        waited += step;
        delay = (delay * 2).min(max_delay);
    }
}
