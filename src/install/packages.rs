//! OS package prerequisites via apt.

use termcolor::WriteColor;

use super::report::Reporter;
use crate::error::ProvisionError;
use crate::host::{CommandRunner, Invocation};

/// An apt package and the executable that proves it is installed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirement {
    pub package: &'static str,
    pub executable: &'static str,
}

pub const REQUIRED: &[Requirement] = &[
    Requirement { package: "curl", executable: "curl" },
    Requirement { package: "ufw", executable: "ufw" },
    Requirement { package: "iproute2", executable: "ss" },
    Requirement { package: "ca-certificates", executable: "update-ca-certificates" },
];

pub fn missing_packages(runner: &dyn CommandRunner, required: &[Requirement]) -> Vec<&'static str> {
    required
        .iter()
        .filter(|r| !runner.has_executable(r.executable))
        .map(|r| r.package)
        .collect()
}

/// Install whatever is missing from [`REQUIRED`]. Apt failures are fatal.
pub fn ensure_packages<W: WriteColor>(
    runner: &dyn CommandRunner,
    reporter: &mut Reporter<W>,
) -> Result<Vec<&'static str>, ProvisionError> {
    let missing = missing_packages(runner, REQUIRED);
    if missing.is_empty() {
        reporter.ok("All required packages already present");
        return Ok(missing);
    }

    reporter.info(&format!("Installing: {}", missing.join(" ")));

    let update = Invocation::new("apt-get")
        .args(["update", "-q"])
        .env("DEBIAN_FRONTEND", "noninteractive");
    runner.run_checked(&update)?;

    let install = Invocation::new("apt-get")
        .args(["install", "-y", "-q", "--no-install-recommends"])
        .args(missing.iter().copied())
        .env("DEBIAN_FRONTEND", "noninteractive");
    runner.run_checked(&install)?;

    reporter.ok(&format!("Installed {} package(s)", missing.len()));
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::CommandOutput;
    use crate::install::report;
    use crate::test_utils::FakeRunner;

    #[test]
    fn nothing_is_installed_when_all_executables_exist() {
        let runner = FakeRunner::new();
        runner.with_executables(&["curl", "ufw", "ss", "update-ca-certificates"]);

        let mut reporter = report::buffer();
        let installed = ensure_packages(&runner, &mut reporter).unwrap();

        assert!(installed.is_empty());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn only_missing_packages_are_installed() {
        let runner = FakeRunner::new();
        runner.with_executables(&["curl", "update-ca-certificates"]);

        let mut reporter = report::buffer();
        let installed = ensure_packages(&runner, &mut reporter).unwrap();

        assert_eq!(installed, vec!["ufw", "iproute2"]);
        assert_eq!(
            runner.calls(),
            vec![
                "apt-get update -q",
                "apt-get install -y -q --no-install-recommends ufw iproute2",
            ]
        );
    }

    #[test]
    fn apt_failure_is_fatal() {
        let runner = FakeRunner::new();
        runner.on("apt-get update -q", CommandOutput::failed(100, "Could not resolve archive"));

        let mut reporter = report::buffer();
        let err = ensure_packages(&runner, &mut reporter).unwrap_err();

        assert!(matches!(err, ProvisionError::CommandFailed { .. }));
        assert_eq!(runner.calls().len(), 1);
    }
}
