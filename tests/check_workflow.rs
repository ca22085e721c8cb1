use std::net::{IpAddr, Ipv4Addr};

use termcolor::NoColor;

use hy2setup::config::{FailurePolicy, Settings};
use hy2setup::host::CommandOutput;
use hy2setup::install::diagnostics::{CheckStatus, DiagnosticsLevel};
use hy2setup::install::render::{RenderInput, ServerConfig};
use hy2setup::install::secrets::generate_pair;
use hy2setup::install::{Reporter, run_check};
use hy2setup::test_utils::{TestHost, install_fake_binary, ss_line, test_settings, ufw_status_active};

const DOMAIN: &str = "vpn.example.com";

fn reporter() -> Reporter<NoColor<Vec<u8>>> {
    Reporter::new(NoColor::new(Vec::new()))
}

fn install_config(settings: &Settings) {
    install_config_on(settings, settings.listen_port);
}

fn install_config_on(settings: &Settings, listen_port: u16) {
    let secrets = generate_pair();
    ServerConfig::from_input(&RenderInput {
        domain: DOMAIN,
        email: "ops@example.com",
        secrets: &secrets,
        masquerade_url: &settings.masquerade_url,
        listen_port,
        acme_http_port: settings.acme_http_port,
        static_cert: &settings.static_cert_path,
        static_key: &settings.static_key_path,
    })
    .write(&settings.config_path, None)
    .unwrap();
}

fn healthy_host() -> TestHost {
    healthy_host_on("*:443")
}

fn healthy_host_on(udp_local: &str) -> TestHost {
    let test = TestHost::root();
    test.runner
        .on("ss -H -tulpn", CommandOutput::ok(ss_line("udp", udp_local)))
        .on("systemctl is-active hysteria-server.service", CommandOutput::ok("active\n"))
        .on(
            "ufw status",
            CommandOutput::ok(ufw_status_active(&["22/tcp", "80/tcp", "443/tcp", "443/udp"])),
        );
    test.http.respond("https://api.ipify.org", "203.0.113.7");
    test.dns.record(DOMAIN, IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)));
    test
}

#[tokio::test]
async fn missing_binary_fails_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(dir.path());
    let test = healthy_host();

    let summary = run_check(&test.host(), &settings, Some(DOMAIN), DiagnosticsLevel::Full, &mut reporter())
        .await
        .unwrap();

    assert!(!summary.binary_present);
    assert_eq!(summary.exit_code(FailurePolicy::Advisory), 1);
    assert_eq!(summary.outcomes.len(), 1);
    assert!(test.runner.calls().is_empty());
    assert!(test.http.requests().is_empty());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn domain_is_recovered_from_the_installed_config() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(dir.path());
    install_fake_binary(&settings);
    install_config(&settings);
    let test = healthy_host();

    let summary = run_check(&test.host(), &settings, None, DiagnosticsLevel::Full, &mut reporter())
        .await
        .unwrap();

    let dns = summary.outcomes.iter().find(|o| o.name == "dns").unwrap();
    assert_eq!(dns.status, CheckStatus::Pass);
    assert!(dns.detail.starts_with(DOMAIN));
    assert_eq!(summary.exit_code(FailurePolicy::Strict), 0);
    assert!(test.runner.only_read_only_calls(), "{:?}", test.runner.calls());
    assert!(!settings.firewall_log_path.exists());
    assert!(!settings.uri_path.exists());
}

#[tokio::test]
async fn journal_errors_only_fail_under_strict() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(dir.path());
    install_fake_binary(&settings);
    let test = healthy_host();
    test.runner.on(
        "journalctl -u hysteria-server.service --since -10min --no-pager",
        CommandOutput::ok("level=error msg=\"acme: rate limited\"\n"),
    );

    let summary = run_check(&test.host(), &settings, Some(DOMAIN), DiagnosticsLevel::Full, &mut reporter())
        .await
        .unwrap();

    assert!(summary.binary_present);
    assert_eq!(summary.problems(), 1);
    assert_eq!(summary.exit_code(FailurePolicy::Advisory), 0);
    assert_eq!(summary.exit_code(FailurePolicy::Strict), 1);
}

#[tokio::test]
async fn dns_only_check_leaves_local_services_alone() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(dir.path());
    install_fake_binary(&settings);
    let test = healthy_host();

    let summary = run_check(&test.host(), &settings, Some(DOMAIN), DiagnosticsLevel::Dns, &mut reporter())
        .await
        .unwrap();

    let names: Vec<&str> = summary.outcomes.iter().map(|o| o.name).collect();
    assert_eq!(names, vec!["binary", "public-ip", "dns"]);
    assert_eq!(summary.problems(), 0);
    assert!(test.runner.calls().is_empty(), "{:?}", test.runner.calls());
    assert_eq!(test.http.requests(), vec!["https://api.ipify.org"]);
}

#[tokio::test]
async fn installed_listen_port_drives_the_socket_checks() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(dir.path());
    install_fake_binary(&settings);
    install_config_on(&settings, 8443);
    let test = healthy_host_on("*:8443");

    let summary = run_check(&test.host(), &settings, None, DiagnosticsLevel::Full, &mut reporter())
        .await
        .unwrap();

    let listening = summary.outcomes.iter().find(|o| o.name == "listening").unwrap();
    assert_eq!(listening.status, CheckStatus::Pass, "{}", listening.detail);
    assert!(listening.detail.contains("8443"), "{}", listening.detail);
}
