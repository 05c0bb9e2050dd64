//! Bridge binary: wire configuration, stores, broker, pipeline, and HTTP
//! API together and run until a shutdown signal.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, watch};

use gridpulse_common::{BridgeConfig, init_tracing};
use gridpulse_store::{PrimaryStore, SecondaryStore};

use gridpulse_bridge::api;
use gridpulse_bridge::broker::BrokerLink;
use gridpulse_bridge::hub::FanoutHub;
use gridpulse_bridge::pipeline::Pipeline;
use gridpulse_bridge::state::{AppContext, Health, SecondarySlot};

/// Depth of the broker-to-pipeline event channel. Absorbs bursts while a
/// slow store write is in flight; beyond this the broker loop backpressures.
const INGEST_QUEUE_DEPTH: usize = 1024;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Fixed backoff between secondary-store connect attempts when it was
/// unreachable at startup.
const SECONDARY_RETRY_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(
    name = "gridpulse-bridge",
    about = "MQTT energy-telemetry bridge with dual persistence and live fan-out",
    version
)]
struct Args {
    /// Path to the JSON5 configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    };
    config.apply_env_overrides();
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    init_tracing(&config.logging)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        broker = %config.broker.url,
        "Starting gridpulse bridge"
    );

    let primary = PrimaryStore::open(&config.primary.path)
        .await
        .with_context(|| format!("Failed to open primary store at '{}'", config.primary.path))?;
    tracing::info!(path = %config.primary.path, "Primary store ready");

    let health = Arc::new(Health::new());
    let hub = FanoutHub::new();
    let (ingest_tx, ingest_rx) = mpsc::channel(INGEST_QUEUE_DEPTH);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // The secondary store is best-effort at startup; the bridge runs
    // without it, dependent endpoints answer 503, and a background loop
    // keeps retrying until it connects.
    let secondary = SecondarySlot::new(None);
    if let Some(secondary_config) = config.secondary.clone() {
        match SecondaryStore::connect(&secondary_config).await {
            Ok(store) => secondary.set(store),
            Err(e) => {
                tracing::warn!(error = %e, "Secondary store unavailable, retrying in background");

                let slot = secondary.clone();
                let mut shutdown = shutdown_rx.clone();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() {
                                    break;
                                }
                            }
                            _ = tokio::time::sleep(SECONDARY_RETRY_INTERVAL) => {
                                match SecondaryStore::connect(&secondary_config).await {
                                    Ok(store) => {
                                        slot.set(store);
                                        tracing::info!("Secondary store connected");
                                        break;
                                    }
                                    Err(e) => {
                                        tracing::debug!(error = %e, "Secondary store still unavailable");
                                    }
                                }
                            }
                        }
                    }
                });
            }
        }
    }

    let broker = BrokerLink::connect(
        &config.broker,
        config.topics.clone(),
        Arc::clone(&health),
        ingest_tx.clone(),
    )?;
    let broker_task = tokio::spawn(broker.run(shutdown_rx.clone()));

    let pipeline = Pipeline::new(primary.clone(), secondary.clone(), hub.clone(), ingest_rx);
    let pipeline_task = tokio::spawn(pipeline.run(shutdown_rx.clone()));

    let context = AppContext {
        primary,
        secondary,
        hub,
        health,
        ingest_tx,
    };
    let app = api::router(context);

    let listener = tokio::net::TcpListener::bind(&config.http.listen)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {}", config.http.listen))?;
    tracing::info!(listen = %config.http.listen, "HTTP API listening");

    let mut http_shutdown = shutdown_rx.clone();
    let server_task = tokio::spawn(async move {
        let shutdown = async move {
            let _ = http_shutdown.changed().await;
        };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    wait_for_shutdown_signal().await;
    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    for (name, task) in [
        ("broker", broker_task),
        ("pipeline", pipeline_task),
        ("http", server_task),
    ] {
        match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(task = name, error = %e, "Task ended with error"),
            Err(_) => tracing::warn!(task = name, "Task did not stop within grace period"),
        }
    }

    tracing::info!("Bridge stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
