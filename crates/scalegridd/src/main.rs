//! scalegridd: the ScaleGrid daemon.
//!
//! Runs one autoscaling controller per configured tenant against an
//! in-memory pool whose load follows a simulated demand curve:
//! - Resource manager (in-memory, per-tenant worker sets)
//! - Load driver (sinusoidal demand per tenant)
//! - Controller registry (one control loop per tenant)
//! - Event logger (one task per tenant)
//!
//! # Usage
//!
//! ```text
//! scalegridd init > scalegrid.toml
//! scalegridd check-config scalegrid.toml
//! scalegridd run --config scalegrid.toml --tick 1
//! ```

mod simulate;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use scalegrid_autoscale::{ControllerEvent, ControllerRegistry};
use scalegrid_core::{DaemonConfig, InMemoryResourceManager, Priority};
use scalegrid_metrics::render_prometheus;

use crate::simulate::{SimulatedTenant, drive_load};

#[derive(Parser)]
#[command(name = "scalegridd", about = "ScaleGrid autoscaling daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controllers until Ctrl-C.
    Run {
        /// Path to the daemon config file.
        #[arg(long, short)]
        config: PathBuf,

        /// Load driver update interval in seconds.
        #[arg(long, default_value = "1")]
        tick: u64,
    },
    /// Validate a config file and print the effective per-tenant configs.
    CheckConfig {
        path: PathBuf,
    },
    /// Print a starter config to stdout.
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run { config, tick } => run(&config, Duration::from_secs(tick.max(1))).await,
        Command::CheckConfig { path } => check_config(&path),
        Command::Init => {
            print!("{}", DaemonConfig::scaffold().to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,scalegridd=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(config_path: &Path, tick: Duration) -> anyhow::Result<()> {
    let config = DaemonConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if config.tenants.is_empty() {
        anyhow::bail!("no tenants configured in {}", config_path.display());
    }
    info!(
        path = %config_path.display(),
        tenants = config.tenants.len(),
        "ScaleGrid daemon starting"
    );

    // ── Initialize subsystems ──────────────────────────────────

    let resources = InMemoryResourceManager::new();
    let registry = ControllerRegistry::with_default_config(
        Arc::new(resources.clone()),
        config.base_scaling()?,
    )?;

    let mut simulated = Vec::with_capacity(config.tenants.len());
    for tenant in &config.tenants {
        let sim = SimulatedTenant::new(tenant.id.clone(), tenant.load.clone())
            .with_context(|| format!("invalid load period for tenant {}", tenant.id))?;
        simulated.push(sim);
        resources.provision(&tenant.id, tenant.initial_workers, Priority::Medium);
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let driver_handle = tokio::spawn(drive_load(
        resources.clone(),
        simulated,
        tick,
        shutdown_rx.clone(),
    ));

    let mut logger_handles = Vec::with_capacity(config.tenants.len());
    for tenant in &config.tenants {
        let scaling = config.tenant_scaling(tenant)?;
        let controller = registry.get_for_tenant(&tenant.id, Some(scaling)).await?;
        logger_handles.push(tokio::spawn(log_events(
            controller.subscribe(),
            shutdown_rx.clone(),
        )));
        controller.start().await;
    }

    info!("all controllers running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to install Ctrl-C handler")?;
    info!("shutdown signal received");

    registry.shutdown_all().await;
    let _ = shutdown_tx.send(true);
    let _ = driver_handle.await;
    for handle in logger_handles {
        let _ = handle.await;
    }

    let exposition = render_prometheus(&registry.reports().await);
    debug!("final controller state:\n{exposition}");

    info!("ScaleGrid daemon stopped");
    Ok(())
}

/// Log one controller's events until shutdown. Buffered events are
/// drained before the shutdown signal is honored.
async fn log_events(
    mut events: broadcast::Receiver<ControllerEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            received = events.recv() => match received {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event logger fell behind"),
                Err(RecvError::Closed) => break,
            },
            _ = shutdown.changed() => break,
        }
    }
}

fn log_event(event: &ControllerEvent) {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            warn!(tenant = %event.tenant(), error = %e, "failed to encode event");
            return;
        }
    };
    match event {
        ControllerEvent::Evaluation { .. } => {
            debug!(tenant = %event.tenant(), kind = event.kind(), event = %json, "controller event")
        }
        ControllerEvent::Error { .. } => {
            warn!(tenant = %event.tenant(), kind = event.kind(), event = %json, "controller event")
        }
        _ => {
            info!(tenant = %event.tenant(), kind = event.kind(), event = %json, "controller event")
        }
    }
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = DaemonConfig::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;

    for tenant in &config.tenants {
        let scaling = config.tenant_scaling(tenant)?;
        println!("[{}] initial_workers = {}", tenant.id, tenant.initial_workers);
        println!("{}", serde_json::to_string_pretty(&scaling)?);
    }
    println!("{}: {} tenant(s) OK", path.display(), config.tenants.len());
    Ok(())
}
