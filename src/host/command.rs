//! External command execution.
//!
//! Every OS tool the provisioner drives (`apt-get`, `ufw`, `systemctl`, `ss`,
//! `journalctl`, `bash`) goes through [`CommandRunner`], so workflows can be
//! exercised against a scripted runner without root.

use std::fmt;
use std::process::Command;

use log::debug;

use crate::error::ProvisionError;

/// A program plus its argv and extra environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn code_display(&self) -> String {
        self.code
            .map(|c| format!("exit code {c}"))
            .unwrap_or_else(|| "a signal".to_string())
    }

    /// Turn a non-zero exit into [`ProvisionError::CommandFailed`]
    pub fn into_checked(self, invocation: &Invocation) -> Result<Self, ProvisionError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ProvisionError::CommandFailed {
                command: invocation.to_string(),
                code: self.code_display(),
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Capability to run OS commands
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture output.
    ///
    /// A non-zero exit is *not* an error here; only failure to spawn is.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ProvisionError>;

    /// Whether `name` resolves to an executable on `PATH`
    fn has_executable(&self, name: &str) -> bool;

    /// Run and require a zero exit status
    fn run_checked(&self, invocation: &Invocation) -> Result<CommandOutput, ProvisionError> {
        self.run(invocation)?.into_checked(invocation)
    }
}

/// [`CommandRunner`] backed by `std::process::Command`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ProvisionError> {
        debug!("exec: {invocation}");

        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .output()
            .map_err(|source| ProvisionError::CommandSpawn {
                program: invocation.program.clone(),
                source,
            })?;

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!("exit: {invocation} -> {}", result.code_display());

        Ok(result)
    }

    fn has_executable(&self, name: &str) -> bool {
        which::which(name).is_ok()
    }
}
