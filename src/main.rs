//! zapgate: multi-session messaging gateway with webhook fan-out.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level;

use zapgate_engine::{AutoPair, SessionManager, SessionRegistry, SimulatedBackend, StartupReconciler};
use zapgate_server::{AppState, ServerConfig};
use zapgate_settings::Settings;
use zapgate_store::{Database, DeviceRepo, SessionRepo};
use zapgate_telemetry::{init_telemetry, MetricsRecorder, TelemetryConfig};
use zapgate_webhook::{EventPipeline, RetryPolicy, WebhookDispatcher};

#[derive(Debug, Parser)]
#[command(name = "zapgate", about = "Session gateway with webhook event delivery")]
struct Args {
    /// Settings file. Defaults to `~/.zapgate/settings.json`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen port, overriding settings.
    #[arg(long)]
    port: Option<u16>,

    /// Session database path, overriding settings.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Default log level (`trace`..`error`).
    #[arg(long)]
    log_level: Option<String>,

    /// Simulated scan delay in seconds; 0 disables auto-pairing.
    #[arg(long)]
    auto_pair_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = load(&args)?;

    let log_level: Level = settings
        .logging
        .level
        .parse()
        .with_context(|| format!("invalid log level {:?}", settings.logging.level))?;
    let telemetry = init_telemetry(&TelemetryConfig {
        log_level,
        json: settings.logging.json,
        log_to_sqlite: settings.logging.persist_warnings,
        log_db_path: settings.logging.db_path.clone(),
        ..Default::default()
    });

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting zapgate");

    let db = Database::open(&settings.database.path).context("failed to open session database")?;
    let sessions = Arc::new(SessionRepo::new(db.clone()));
    let devices = Arc::new(DeviceRepo::new(db));
    let metrics = Arc::new(MetricsRecorder::new());

    let hooks = &settings.webhook;
    let policy = RetryPolicy::new(
        hooks.max_attempts,
        Duration::from_millis(hooks.initial_backoff_ms),
        Duration::from_millis(hooks.max_backoff_ms),
        hooks.backoff_factor,
        hooks.jitter,
    );
    let dispatcher = WebhookDispatcher::new(Duration::from_millis(hooks.timeout_ms), policy)
        .context("failed to build webhook client")?
        .with_metrics(Arc::clone(&metrics));
    let pipeline = Arc::new(EventPipeline::new(Arc::new(dispatcher)).with_metrics(Arc::clone(&metrics)));

    let registry = Arc::new(SessionRegistry::new().with_metrics(Arc::clone(&metrics)));
    let backend = Arc::new(simulated_backend(&settings));

    let manager = Arc::new(
        SessionManager::new(sessions, devices, backend, registry, pipeline)
            .with_metrics(Arc::clone(&metrics)),
    );

    let report = StartupReconciler::new(Arc::clone(&manager))
        .reconcile_all()
        .await
        .context("startup reconciliation failed")?;
    tracing::info!(reconnected = report.reconnected, failed = report.failed, "sessions restored");

    let config = ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        request_timeout_secs: settings.server.request_timeout_secs,
    };
    let state = AppState {
        manager: Arc::clone(&manager),
        metrics,
        logs: telemetry.logs(),
    };
    let server = zapgate_server::start(config, state)
        .await
        .context("failed to start server")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    server.shutdown().await;
    manager.shutdown().await;
    Ok(())
}

/// Settings file, then env, then command-line flags.
fn load(args: &Args) -> Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => zapgate_settings::load_settings_from_path(path),
        None => zapgate_settings::load_settings(),
    }
    .context("failed to load settings")?;

    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(db) = &args.db {
        settings.database.path = db.clone();
    }
    if let Some(level) = &args.log_level {
        settings.logging.level = level.clone();
    }
    if let Some(secs) = args.auto_pair_secs {
        settings.simulator.auto_pair_secs = secs;
    }
    Ok(settings)
}

fn simulated_backend(settings: &Settings) -> SimulatedBackend {
    let sim = &settings.simulator;
    let backend = SimulatedBackend::new();
    if sim.auto_pair_secs == 0 {
        return backend;
    }
    backend.with_auto_pair(AutoPair {
        after: Duration::from_secs(sim.auto_pair_secs),
        refresh: Duration::from_secs(sim.qr_refresh_secs.max(1)),
    })
}
