//! Vigil CLI binary entrypoint.
//!
//! This is the main entry point for the `vigil` command-line tool.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use vigil_cli::cli::{Cli, Commands};
use vigil_cli::commands::{App, load_config, read_input};
use vigil_cli::output::OutputFormat;

/// Exit code when some ingested records were rejected.
const EXIT_REJECTED: u8 = 2;

fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vigil=info")))
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let format = OutputFormat::new(cli.format);
    let config = load_config(cli.config.as_deref())?;

    if matches!(cli.command, Commands::CheckConfig) {
        format.write(&mut io::stdout().lock(), &config)?;
        return Ok(ExitCode::SUCCESS);
    }

    let app = App::open(config, cli.state_dir)?;
    let mut stdout = io::stdout().lock();

    match cli.command {
        Commands::Ingest { source, file } => {
            let input = read_input(file.as_deref())?;
            let summary = app.ingest(&mut stdout, &format, source.into(), &input)?;
            if summary.rejected() > 0 {
                return Ok(ExitCode::from(EXIT_REJECTED));
            }
        }
        Commands::Watch { once: true } => {
            let summary = app.cycle()?;
            format.write(&mut stdout, &summary)?;
        }
        Commands::Watch { once: false } => {
            drop(stdout);
            watch(app)?;
        }
        Commands::Issues(args) => app.list(&mut stdout, &format, &args)?,
        Commands::Show { id } => app.show(&mut stdout, &format, &id)?,
        Commands::Resolve { id } => app.resolve(&mut stdout, &format, &id)?,
        Commands::Annotate(args) => app.annotate(&mut stdout, &format, &args)?,
        Commands::Tick => app.tick(&mut stdout, &format)?,
        Commands::Health => app.health(&mut stdout, &format)?,
        Commands::Purge { retention_days } => app.purge(&mut stdout, &format, retention_days)?,
        Commands::CheckConfig => {}
    }

    Ok(ExitCode::SUCCESS)
}

/// Runs monitor cycles until interrupted.
///
/// Cycles run on the blocking pool: channels use blocking HTTP clients.
/// The app outlives the runtime so those clients are never dropped on an
/// async thread.
fn watch(app: App) -> anyhow::Result<()> {
    let interval = app.config().monitoring.check_interval();
    let app = Arc::new(app);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create async runtime")?;
    let result = runtime.block_on(watch_loop(Arc::clone(&app), interval));
    drop(runtime);

    app.engine().flush()?;
    result
}

async fn watch_loop(app: Arc<App>, interval: Duration) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_secs = interval.as_secs(), "watching spools");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let cycle_app = Arc::clone(&app);
                let outcome = tokio::task::spawn_blocking(move || cycle_app.cycle())
                    .await
                    .context("monitor cycle panicked")?;
                match outcome {
                    Ok(summary) => info!(
                        events = summary.events,
                        failed_events = summary.failed_events,
                        evaluated = summary.tick.evaluated,
                        notifications = summary.tick.notifications.len(),
                        errors = summary.tick.errors,
                        "cycle complete"
                    ),
                    Err(e) => error!(error = %e, "cycle failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_cli::cli::{Format, SeverityArg, SourceArg, StatusArg};

    #[test]
    fn cli_parses_ingest() {
        let cli = Cli::parse_from(["vigil", "ingest", "--source", "pipeline", "run.json"]);
        match cli.command {
            Commands::Ingest { source, file } => {
                assert_eq!(source, SourceArg::Pipeline);
                assert_eq!(file.unwrap().to_str(), Some("run.json"));
            }
            _ => panic!("expected ingest command"),
        }
    }

    #[test]
    fn cli_parses_issue_filters() {
        let cli = Cli::parse_from([
            "vigil",
            "issues",
            "--status",
            "notified",
            "--min-severity",
            "high",
            "--unresolved",
            "--limit",
            "5",
        ]);
        match cli.command {
            Commands::Issues(args) => {
                assert_eq!(args.status, Some(StatusArg::Notified));
                assert_eq!(args.min_severity, Some(SeverityArg::High));
                assert!(args.unresolved);
                assert_eq!(args.limit, Some(5));
            }
            _ => panic!("expected issues command"),
        }
    }

    #[test]
    fn cli_parses_annotate_with_fixes() {
        let cli = Cli::parse_from([
            "vigil",
            "annotate",
            "abc",
            "--summary",
            "Cache poisoned",
            "--fix",
            "Clear cache",
            "--fix",
            "Re-run",
            "--severity",
            "critical",
        ]);
        match cli.command {
            Commands::Annotate(args) => {
                assert_eq!(args.id, "abc");
                assert_eq!(args.fixes, vec!["Clear cache", "Re-run"]);
                assert_eq!(args.severity, Some(SeverityArg::Critical));
            }
            _ => panic!("expected annotate command"),
        }
    }

    #[test]
    fn cli_respects_global_flags() {
        let cli = Cli::parse_from([
            "vigil",
            "--format",
            "json",
            "--state-dir",
            "/tmp/vigil",
            "watch",
            "--once",
        ]);
        assert_eq!(cli.format, Format::Json);
        assert_eq!(cli.state_dir.unwrap().to_str(), Some("/tmp/vigil"));
        assert!(matches!(cli.command, Commands::Watch { once: true }));
    }

    #[test]
    fn cli_rejects_unknown_source() {
        assert!(Cli::try_parse_from(["vigil", "ingest", "--source", "jenkins"]).is_err());
    }

    #[test]
    fn run_health_on_fresh_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().to_str().unwrap();
        let cli = Cli::parse_from(["vigil", "--state-dir", state, "--format", "json", "health"]);
        assert!(run(cli).is_ok());
    }

    #[test]
    fn run_with_missing_config_fails() {
        let cli = Cli::parse_from(["vigil", "--config", "/nonexistent/vigil.toml", "health"]);
        assert!(run(cli).is_err());
    }
}
