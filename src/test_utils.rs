//! Test doubles for the host capabilities.
//!
//! Provides a scripted command runner, canned HTTP/DNS answers and a fixed
//! identity so install and check workflows run without root and without
//! network access.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nix::unistd::Gid;

use crate::config::{ReadinessSettings, Settings};
use crate::error::ProvisionError;
use crate::host::{CommandOutput, CommandRunner, DnsLookup, Host, HttpFetch, Identity, Invocation};

/// Command runner that replays queued outputs and records every call.
///
/// Outputs are keyed by the full command line (`Invocation` display form).
/// Queued outputs are consumed in order and the last one keeps being
/// returned. Unscripted commands succeed with empty output.
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<String>>,
    scripted: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
    executables: Mutex<HashSet<String>>,
    unspawnable: Mutex<HashSet<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `output` for `command_line`
    pub fn on(&self, command_line: &str, output: CommandOutput) -> &Self {
        self.scripted
            .lock()
            .expect("scripted lock poisoned")
            .entry(command_line.to_string())
            .or_default()
            .push_back(output);
        self
    }

    /// Mark executables as present on `PATH`
    pub fn with_executables(&self, names: &[&str]) -> &Self {
        let mut exes = self.executables.lock().expect("executables lock poisoned");
        exes.extend(names.iter().map(|n| n.to_string()));
        self
    }

    /// Fail every invocation of `program` as if it could not be executed
    pub fn unspawnable(&self, program: &str) -> &Self {
        self.unspawnable
            .lock()
            .expect("unspawnable lock poisoned")
            .insert(program.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    /// Index of the first call equal to `command_line`
    pub fn position(&self, command_line: &str) -> Option<usize> {
        self.calls().iter().position(|c| c == command_line)
    }

    pub fn called(&self, command_line: &str) -> bool {
        self.position(command_line).is_some()
    }

    /// True for read-only commands the diagnostics path is allowed to issue
    pub fn only_read_only_calls(&self) -> bool {
        const READ_ONLY: &[&str] = &[
            "ufw status",
            "ss -H -tulpn",
            "systemctl is-active",
            "journalctl",
        ];
        self.calls()
            .iter()
            .all(|c| READ_ONLY.iter().any(|prefix| c.starts_with(prefix)) || c.ends_with(" version"))
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ProvisionError> {
        let line = invocation.to_string();
        self.calls.lock().expect("calls lock poisoned").push(line.clone());

        if self
            .unspawnable
            .lock()
            .expect("unspawnable lock poisoned")
            .contains(&invocation.program)
        {
            return Err(ProvisionError::CommandSpawn {
                program: invocation.program.clone(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }

        let mut scripted = self.scripted.lock().expect("scripted lock poisoned");
        let output = match scripted.get_mut(&line) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => CommandOutput::ok(""),
        };
        Ok(output)
    }

    fn has_executable(&self, name: &str) -> bool {
        self.executables
            .lock()
            .expect("executables lock poisoned")
            .contains(name)
    }
}

/// HTTP double answering from a fixed URL table
#[derive(Default)]
pub struct FakeHttp {
    responses: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
}

impl FakeHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, body: impl Into<Vec<u8>>) -> &Self {
        self.responses
            .lock()
            .expect("responses lock poisoned")
            .insert(url.to_string(), body.into());
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests lock poisoned").clone()
    }
}

#[async_trait]
impl HttpFetch for FakeHttp {
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, ProvisionError> {
        self.requests
            .lock()
            .expect("requests lock poisoned")
            .push(url.to_string());
        self.responses
            .lock()
            .expect("responses lock poisoned")
            .get(url)
            .cloned()
            .ok_or_else(|| ProvisionError::Http {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            })
    }
}

/// DNS double; unknown names resolve to nothing
#[derive(Default)]
pub struct FakeDns {
    records: Mutex<HashMap<String, Vec<IpAddr>>>,
}

impl FakeDns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, domain: &str, addr: IpAddr) -> &Self {
        self.records
            .lock()
            .expect("records lock poisoned")
            .entry(domain.to_string())
            .or_default()
            .push(addr);
        self
    }
}

#[async_trait]
impl DnsLookup for FakeDns {
    async fn resolve(&self, domain: &str) -> Result<Vec<IpAddr>, ProvisionError> {
        Ok(self
            .records
            .lock()
            .expect("records lock poisoned")
            .get(domain)
            .cloned()
            .unwrap_or_default())
    }
}

pub struct FakeIdentity {
    pub root: bool,
}

impl Identity for FakeIdentity {
    fn is_root(&self) -> bool {
        self.root
    }

    fn group_id(&self, _name: &str) -> Option<Gid> {
        None
    }
}

/// Bundle of doubles with handles kept for assertions
pub struct TestHost {
    pub runner: Arc<FakeRunner>,
    pub http: Arc<FakeHttp>,
    pub dns: Arc<FakeDns>,
    pub identity: Arc<FakeIdentity>,
}

impl TestHost {
    pub fn new(root: bool) -> Self {
        Self {
            runner: Arc::new(FakeRunner::new()),
            http: Arc::new(FakeHttp::new()),
            dns: Arc::new(FakeDns::new()),
            identity: Arc::new(FakeIdentity { root }),
        }
    }

    pub fn root() -> Self {
        Self::new(true)
    }

    pub fn host(&self) -> Host {
        Host {
            runner: self.runner.clone(),
            http: self.http.clone(),
            dns: self.dns.clone(),
            identity: self.identity.clone(),
        }
    }
}

/// Settings with every artifact path under `dir` and no real waiting
pub fn test_settings(dir: &Path) -> Settings {
    Settings {
        config_path: dir.join("etc/hysteria/config.yaml"),
        uri_path: dir.join("root/hysteria2-client-uri.txt"),
        firewall_log_path: dir.join("var/log/hy2setup-firewall.log"),
        binary_path: dir.join("usr/local/bin/hysteria"),
        sshd_config_path: dir.join("etc/ssh/sshd_config"),
        os_release_path: dir.join("etc/os-release"),
        static_cert_path: dir.join("etc/hysteria/server.crt"),
        static_key_path: dir.join("etc/hysteria/server.key"),
        os_mismatch_delay_secs: 0,
        readiness: ReadinessSettings {
            initial_delay_ms: 10,
            max_delay_ms: 40,
            total_wait_secs: 1,
        },
        ..Settings::default()
    }
}

/// Place an executable stub at `settings.binary_path`
pub fn install_fake_binary(settings: &Settings) {
    use std::os::unix::fs::PermissionsExt;

    let path = &settings.binary_path;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create binary dir");
    }
    std::fs::write(path, "#!/bin/sh\necho 'Version: v2.6.0'\n").expect("write fake binary");
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod fake binary");
}

/// `/etc/os-release` for a supported Ubuntu
pub fn write_os_release(settings: &Settings, id: &str, version: &str) {
    let path = &settings.os_release_path;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create os-release dir");
    }
    std::fs::write(
        path,
        format!("NAME=\"Ubuntu\"\nID={id}\nVERSION_ID=\"{version}\"\nPRETTY_NAME=\"Ubuntu {version} LTS\"\n"),
    )
    .expect("write os-release");
}

/// `ufw status` output, active, with the given `port/proto` rules allowed
pub fn ufw_status_active(rules: &[&str]) -> String {
    let mut out = String::from(
        "Status: active\n\nTo                         Action      From\n--                         ------      ----\n",
    );
    for rule in rules {
        out.push_str(&format!("{rule:<27}ALLOW       Anywhere\n"));
    }
    for rule in rules {
        out.push_str(&format!("{:<27}ALLOW       Anywhere (v6)\n", format!("{rule} (v6)")));
    }
    out
}

/// `ss -H -tulpn` line for a hysteria socket
pub fn ss_line(proto: &str, local: &str) -> String {
    let state = if proto == "udp" { "UNCONN" } else { "LISTEN" };
    format!("{proto}   {state} 0      0      {local}      *:*    users:((\"hysteria\",pid=4242,fd=7))\n")
}
