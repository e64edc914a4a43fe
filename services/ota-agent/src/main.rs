//! ota-agent entry point.
//!
//! One-shot mode runs a single update check and exits non-zero if it
//! failed. Daemon mode checks on an interval, supervises the optional
//! managed process and stops on SIGINT or SIGTERM.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info};

use ota_agent::{
    logging, CommandRunner, Config, HttpFetcher, ProcessRunner, Reconciler, SupervisorRegistry,
    VersionStore, VERSION,
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    if let Err(e) = logging::init(&config.log_level, config.log_format) {
        eprintln!("Failed to initialize logging: {e:#}");
        return ExitCode::from(1);
    }

    info!(
        version = VERSION,
        url = %config.config_url,
        version_file = %config.version_file.display(),
        once = config.once,
        "ota-agent starting"
    );

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "ota-agent failed");
            for cause in e.chain().skip(1) {
                error!(cause = %cause, "caused by");
            }
            ExitCode::from(1)
        }
    }
}

async fn run(config: Config) -> Result<()> {
    let versions = VersionStore::new(&config.version_file);
    versions.ensure_dir().with_context(|| {
        format!(
            "failed to create directory for {}",
            config.version_file.display()
        )
    })?;

    let fetcher = HttpFetcher::new(config.timeout(), config.max_retries)
        .context("failed to build HTTP client")?;
    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);
    let reconciler = Reconciler::new(
        config.config_url.clone(),
        fetcher,
        versions,
        runner,
        config.reconciler_config(),
    );

    if config.once {
        reconciler.check_once().await.context("update check failed")?;
        info!("Update check complete");
        return Ok(());
    }

    let registry = Arc::new(SupervisorRegistry::new(config.restart_policy()));
    let reconciler = match config.managed_command() {
        Some(command) => reconciler.with_managed_process(Arc::clone(&registry), command),
        None => reconciler,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler_handle = tokio::spawn(async move {
        reconciler.run(shutdown_rx).await;
    });

    wait_for_shutdown_signal().await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = reconciler_handle.await {
        error!(error = %e, "Update loop task panicked");
    }
    registry.stop_all().await;

    info!("ota-agent shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for SIGINT")?;
            info!("Received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
        }
    }
    Ok(())
}
