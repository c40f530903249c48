use anyhow::{Context as _, Result};
use clap::Parser;
use provman::config::{ProvmanConfig, Scope};
use provman::plugins::standard_schemas::standard_plugins;
use provman::{PluginRegistry, SettingsEngine};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "provmand", about = "Provman settings broker daemon", version)]
struct Args {
    /// Run with the system-wide plugin roster and data directory instead
    /// of the per-user one.
    #[arg(long)]
    system: bool,

    /// Base directory for metadata `.ini` files.
    #[arg(long, env = "PROVMAN_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Shutdown-idle timer, in seconds.
    #[arg(long, env = "PROVMAN_IDLE_TIMEOUT_SECS")]
    idle_timeout_secs: Option<u64>,

    /// Log level filter, e.g. "info", "debug", "provman=trace".
    #[arg(long, env = "PROVMAN_LOG")]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let scope = if args.system { Scope::System } else { Scope::User };
    let config = ProvmanConfig::new(scope, args.data_dir, args.idle_timeout_secs, args.log);

    setup_logging(&config.log);

    if let Err(e) = provman::config::ensure_data_dir(&config.data_dir) {
        error!(path = %config.data_dir.display(), error = %e, "failed to create data directory");
        std::process::exit(1);
    }

    let registry = match build_registry(&config) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "invalid plugin roster at startup");
            std::process::exit(1);
        }
    };

    info!(data_dir = %config.data_dir.display(), idle_timeout_secs = config.idle_timeout_secs, "provmand starting");

    let engine = SettingsEngine::new(registry, config.data_dir.clone(), config.idle_timeout());
    run_until_shutdown(&engine).await.context("request loop failed")?;

    info!("provmand exiting cleanly");
    Ok(())
}

fn build_registry(config: &ProvmanConfig) -> anyhow::Result<PluginRegistry> {
    let plugins = standard_plugins(&config.data_dir)?;
    Ok(PluginRegistry::new(plugins)?)
}

/// Drives the daemon until SIGINT/SIGTERM or the idle-shutdown timer
/// fires. Binding this engine to a concrete system-bus transport is left
/// to an embedder (§4.10); this loop only keeps the process alive and
/// honors the same cancel-and-exit contract a bound transport would.
async fn run_until_shutdown(engine: &SettingsEngine) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
            _ = engine.wait_for_idle_shutdown() => info!("idle timeout reached, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received ctrl-c, shutting down"),
            _ = engine.wait_for_idle_shutdown() => info!("idle timeout reached, shutting down"),
        }
    }
    Ok(())
}

/// Falls back to a permissive default filter rather than panicking on a
/// malformed `log` directive.
fn setup_logging(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .compact()
        .init();
}
