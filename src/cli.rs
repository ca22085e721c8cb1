use std::path::PathBuf;

use clap::Parser;
use clap::error::ErrorKind;

use crate::config::{FailurePolicy, Settings};
use crate::error::ProvisionError;
use crate::install::InstallRequest;
use crate::install::diagnostics::DiagnosticsLevel;

pub const USAGE: &str = "\
Usage: hy2setup <domain> <email> [OPTIONS]
       hy2setup --check [domain] [--dns-only] [OPTIONS]

Run `hy2setup --help` for the list of options.";

#[derive(Parser, Debug)]
#[command(version, about = "Provision a Hysteria2 server on Ubuntu")]
pub struct Args {
    /// Domain that resolves to this host (ACME certificate subject)
    pub domain: Option<String>,

    /// Contact email for the certificate authority
    pub email: Option<String>,

    /// Only run diagnostics against an existing installation
    #[arg(long)]
    pub check: bool,

    /// TOML settings file (default: /etc/hy2setup/hy2setup.toml if present)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Site the server impersonates for unauthenticated clients
    #[arg(long, value_name = "URL")]
    pub masquerade: Option<String>,

    /// SSH port to keep open (default: detected from sshd_config)
    #[arg(long, value_name = "PORT")]
    pub ssh_port: Option<u16>,

    /// Upper bound on waiting for the server to bind after start
    #[arg(long, value_name = "SECS")]
    pub cert_wait: Option<u64>,

    /// Exit 1 if any advisory check failed
    #[arg(long)]
    pub strict: bool,

    /// Skip post-install diagnostics
    #[arg(long, conflicts_with = "check")]
    pub skip_diagnostics: bool,

    /// With --check: only compare the public IP against DNS
    #[arg(long, requires = "check")]
    pub dns_only: bool,
}

/// What the invocation asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Install(InstallRequest),
    Check {
        domain: Option<String>,
        level: DiagnosticsLevel,
    },
}

impl Args {
    pub fn mode(&self) -> Result<Mode, ProvisionError> {
        if self.check {
            if self.email.is_some() {
                return Err(ProvisionError::Usage(
                    "--check accepts at most one positional argument".into(),
                ));
            }
            let domain = self
                .domain
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string);
            let level = if self.dns_only {
                DiagnosticsLevel::Dns
            } else {
                DiagnosticsLevel::Full
            };
            return Ok(Mode::Check { domain, level });
        }
        InstallRequest::new(self.domain.clone(), self.email.clone())
            .map(|r| Mode::Install(r.skip_diagnostics(self.skip_diagnostics)))
    }

    /// Flags win over the settings file
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(url) = &self.masquerade {
            settings.masquerade_url = url.clone();
        }
        if let Some(port) = self.ssh_port {
            settings.ssh_port = Some(port);
        }
        if let Some(secs) = self.cert_wait {
            settings.readiness.total_wait_secs = secs;
        }
        if self.strict {
            settings.policy = FailurePolicy::Strict;
        }
    }
}

/// clap reports `--help`/`--version` as errors; those exit 0, the rest 1
pub fn parse_exit_code(err: &clap::Error) -> i32 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("hy2setup").chain(argv.iter().copied()))
    }

    #[test]
    fn two_positionals_select_install() {
        let args = parse(&["vpn.example.com", "ops@example.com", "--skip-diagnostics"]).unwrap();
        match args.mode().unwrap() {
            Mode::Install(req) => {
                assert_eq!(req.domain, "vpn.example.com");
                assert_eq!(req.email, "ops@example.com");
                assert!(!req.diagnostics);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_positionals_are_usage_errors() {
        for argv in [&[][..], &["vpn.example.com"][..]] {
            let err = parse(argv).unwrap().mode().unwrap_err();
            assert!(matches!(err, ProvisionError::Usage(_)));
        }
    }

    #[test]
    fn check_mode_takes_optional_domain() {
        assert_eq!(
            parse(&["--check"]).unwrap().mode().unwrap(),
            Mode::Check { domain: None, level: DiagnosticsLevel::Full }
        );
        assert_eq!(
            parse(&["--check", "vpn.example.com"]).unwrap().mode().unwrap(),
            Mode::Check { domain: Some("vpn.example.com".into()), level: DiagnosticsLevel::Full }
        );
        assert!(parse(&["--check", "a", "b"]).unwrap().mode().is_err());
    }

    #[test]
    fn dns_only_narrows_check_mode() {
        assert_eq!(
            parse(&["--check", "--dns-only"]).unwrap().mode().unwrap(),
            Mode::Check { domain: None, level: DiagnosticsLevel::Dns }
        );
        assert!(parse(&["vpn.example.com", "ops@example.com", "--dns-only"]).is_err());
    }

    #[test]
    fn help_exits_zero_and_bad_flags_exit_one() {
        assert_eq!(parse_exit_code(&parse(&["--help"]).unwrap_err()), 0);
        assert_eq!(parse_exit_code(&parse(&["--version"]).unwrap_err()), 0);
        assert_eq!(parse_exit_code(&parse(&["--ssh-port", "nope"]).unwrap_err()), 1);
        assert_eq!(parse_exit_code(&parse(&["--bogus"]).unwrap_err()), 1);
    }

    #[test]
    fn flags_override_settings() {
        let args = parse(&[
            "d",
            "e",
            "--masquerade",
            "https://example.org",
            "--ssh-port",
            "2222",
            "--cert-wait",
            "15",
            "--strict",
        ])
        .unwrap();
        let mut settings = Settings::default();
        args.apply(&mut settings);

        assert_eq!(settings.masquerade_url, "https://example.org");
        assert_eq!(settings.ssh_port, Some(2222));
        assert_eq!(settings.readiness.total_wait_secs, 15);
        assert_eq!(settings.policy, FailurePolicy::Strict);
    }
}
