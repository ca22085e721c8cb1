//! Server binary installation through the upstream installer script.

use std::io::Write;

use termcolor::WriteColor;

use super::file_ops::is_executable;
use super::report::Reporter;
use crate::config::Settings;
use crate::error::ProvisionError;
use crate::host::{Host, Invocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryStatus {
    AlreadyInstalled,
    Installed,
}

/// Make sure `settings.binary_path` exists, running the upstream installer
/// only when it does not. Any failure here is fatal.
pub async fn ensure_binary<W: WriteColor>(
    host: &Host,
    settings: &Settings,
    reporter: &mut Reporter<W>,
) -> Result<BinaryStatus, ProvisionError> {
    if is_executable(&settings.binary_path) {
        reporter.ok(&format!(
            "{} already installed{}",
            settings.binary_path.display(),
            version_suffix(host, settings)
        ));
        return Ok(BinaryStatus::AlreadyInstalled);
    }

    reporter.info(&format!("Fetching installer from {}", settings.installer_url));
    let script = host
        .http
        .get_bytes(&settings.installer_url)
        .await
        .map_err(|e| ProvisionError::BinaryInstall(e.to_string()))?;

    let mut script_file = tempfile::Builder::new()
        .prefix("hy2-install-")
        .suffix(".sh")
        .tempfile()
        .map_err(|e| ProvisionError::BinaryInstall(format!("cannot stage installer: {e}")))?;
    script_file
        .write_all(&script)
        .and_then(|()| script_file.flush())
        .map_err(|e| ProvisionError::BinaryInstall(format!("cannot stage installer: {e}")))?;

    let run = Invocation::new("bash").arg(script_file.path().display().to_string());
    let output = host
        .runner
        .run(&run)
        .map_err(|e| ProvisionError::BinaryInstall(e.to_string()))?;
    if !output.success() {
        return Err(ProvisionError::BinaryInstall(format!(
            "installer exited with {}: {}",
            output.code_display(),
            output.stderr.trim()
        )));
    }

    if !is_executable(&settings.binary_path) {
        return Err(ProvisionError::BinaryInstall(format!(
            "installer finished but {} is missing",
            settings.binary_path.display()
        )));
    }

    reporter.ok(&format!(
        "Installed {}{}",
        settings.binary_path.display(),
        version_suffix(host, settings)
    ));
    Ok(BinaryStatus::Installed)
}

/// `hysteria version` first meaningful line, best-effort
pub fn installed_version(host: &Host, settings: &Settings) -> Option<String> {
    let program = settings.binary_path.display().to_string();
    let output = host.runner.run(&Invocation::new(program).arg("version")).ok()?;
    if !output.success() {
        return None;
    }
    output
        .stdout
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("Version:"))
        .map(|l| l.trim_start_matches("Version:").trim().to_string())
        .filter(|v| !v.is_empty())
}

fn version_suffix(host: &Host, settings: &Settings) -> String {
    installed_version(host, settings)
        .map(|v| format!(" ({v})"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::CommandOutput;
    use crate::install::report;
    use crate::test_utils::{TestHost, install_fake_binary, test_settings};

    #[tokio::test]
    async fn present_binary_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        install_fake_binary(&settings);
        let test = TestHost::root();
        test.runner.on(
            &format!("{} version", settings.binary_path.display()),
            CommandOutput::ok("Version:      v2.6.0\nBuildDate: 2024\n"),
        );

        let mut reporter = report::buffer();
        let status = ensure_binary(&test.host(), &settings, &mut reporter).await.unwrap();

        assert_eq!(status, BinaryStatus::AlreadyInstalled);
        assert!(test.http.requests().is_empty());
        assert!(report::text(reporter).contains("(v2.6.0)"));
    }

    #[tokio::test]
    async fn unreachable_installer_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let test = TestHost::root();

        let mut reporter = report::buffer();
        let err = ensure_binary(&test.host(), &settings, &mut reporter).await.unwrap_err();

        assert!(matches!(err, ProvisionError::BinaryInstall(_)));
        assert_eq!(test.http.requests(), vec![settings.installer_url.clone()]);
        assert!(test.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn installer_that_leaves_no_binary_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let test = TestHost::root();
        test.http.respond(&settings.installer_url, "#!/bin/bash\ntrue\n");

        let mut reporter = report::buffer();
        let err = ensure_binary(&test.host(), &settings, &mut reporter).await.unwrap_err();

        assert!(err.to_string().contains("is missing"));
        let calls = test.runner.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("bash ") && calls[0].ends_with(".sh"));
    }
}
