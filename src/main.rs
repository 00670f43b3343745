//! oob-probe: ephemeral capture listeners for out-of-band interaction testing
//!
//! This is the main entry point for the oob-probe binary. It handles CLI argument
//! parsing, configuration loading and tracing setup, then serves control
//! requests on stdin/stdout until input ends or a shutdown signal arrives.
//!
//! # I/O Architecture
//!
//! - **stdin/stdout**: newline-delimited JSON control requests and responses
//! - **stderr**: diagnostics and lifecycle events, so they never mix with
//!   control responses

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use oob_probe::{
    cli::Cli,
    config::{Config, ConfigLoader},
    control::{self, Dispatcher},
    registry::Registry,
    telemetry::{EVENT_TARGET, EventLogger},
    tunnel::LoopbackTunnelProvider,
};
use tokio::io::BufReader;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load(&cli)
        .context("Failed to load configuration")?;

    init_tracing(
        cli.verbose,
        config.general.log_level.as_deref(),
        config.events_enabled(),
    )?;
    debug!("Loaded configuration: {:?}", config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    let events = Arc::new(EventLogger::new(config.events_enabled()));
    let options = config.listener_options(events);
    let provider = LoopbackTunnelProvider::new(config.bind_host());
    let registry = Arc::new(Registry::with_capacity(
        provider,
        options,
        config.background_error_capacity(),
    ));
    let dispatcher = Dispatcher::new(registry.clone());

    info!("oob-probe listening for control requests on stdin");

    let outcome = tokio::select! {
        result = control::serve(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            &dispatcher,
        ) => {
            result.context("Control server failed")
        }
        () = shutdown_signal() => {
            info!("Shutdown signal received");
            Ok(())
        }
    };

    registry.close_all().await;
    info!("All listeners closed");
    outcome
}

/// Resolve when the process is asked to stop.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Initialize the tracing subscriber.
///
/// Logs go to stderr.
fn init_tracing(verbose: u8, configured: Option<&str>, events: bool) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*};

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(build_filter(verbose, configured, events)?)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}

/// Build the log filter.
///
/// # Verbosity Levels
/// - 0 (default): `RUST_LOG`, then `general.log_level`, then warnings and errors
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
///
/// Lifecycle events stay visible at every level unless disabled in config.
fn build_filter(verbose: u8, configured: Option<&str>, events: bool) -> Result<EnvFilter> {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(configured.unwrap_or("warn")))
            .context("Invalid log level")?,
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    if !events {
        return Ok(filter);
    }

    let directive: Directive = format!("{}=info", EVENT_TARGET)
        .parse()
        .context("Invalid event filter directive")?;
    Ok(filter.add_directive(directive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_visible_at_default_level() {
        let filter = build_filter(0, Some("warn"), true).unwrap();
        let rendered = filter.to_string().to_lowercase();
        assert!(rendered.contains("oob_probe::events=info"));
    }

    #[test]
    fn test_events_directive_skipped_when_disabled() {
        let filter = build_filter(1, None, false).unwrap();
        assert!(!filter.to_string().contains("oob_probe::events"));
    }
}
