use anyhow::{Context, Result};
use clap::Parser;

use hy2setup::cli::{self, Args, Mode};
use hy2setup::config::Settings;
use hy2setup::host::Host;
use hy2setup::install::{self, Reporter};

fn main() {
    env_logger::Builder::new()
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            std::process::exit(cli::parse_exit_code(&e));
        }
    };

    // Usage problems are reported before anything touches the host
    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("error: {e}\n\n{}", cli::USAGE);
            std::process::exit(1);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("FATAL: Failed to create Tokio runtime: {e}");
            std::process::exit(1);
        }
    };
    let code = match rt.block_on(real_main(&args, mode)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

async fn real_main(args: &Args, mode: Mode) -> Result<i32> {
    let mut settings = Settings::load(args.config.as_deref()).context("failed to load settings")?;
    args.apply(&mut settings);
    settings.validate().context("invalid command-line overrides")?;

    let host = Host::system()?;
    let mut reporter = Reporter::stdout();

    match mode {
        Mode::Install(request) => {
            let summary = install::run_install(&host, &settings, &request, &mut reporter).await?;
            Ok(summary.exit_code(settings.policy))
        }
        Mode::Check { domain, level } => {
            let summary =
                install::run_check(&host, &settings, domain.as_deref(), level, &mut reporter)
                    .await?;
            Ok(summary.exit_code(settings.policy))
        }
    }
}
