//! promsearch adapter binary
//!
//! Serves Prometheus remote write and remote read on top of Elasticsearch.

use promsearch::api::{self, ApiConfig, ApiState};
use promsearch::clock::{Clock, SystemClock};
use promsearch::config::{AdapterConfig, ComponentFactory};
use promsearch::mapper::PartitionNamer;
use promsearch::metrics::OtelMetrics;
use promsearch::telemetry::Telemetry;

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

/// Prometheus remote storage adapter for Elasticsearch
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML config file
    #[arg(long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Listen address, overrides web.listen.addr
    #[arg(long, env = "LISTEN_ADDR")]
    listen_addr: Option<String>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let telemetry = Telemetry::init("promsearch", &args.log_level)?;
    info!("Starting promsearch adapter");

    let mut config = AdapterConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.listen_addr {
        config.listen_addr = addr;
    }

    let backend = ComponentFactory::create_backend(&config)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // A partition that cannot be created at startup is fatal
    let partition = PartitionNamer::new(config.index_prefix.clone()).name_for(clock.now());
    backend
        .ensure_partition(&partition)
        .await
        .with_context(|| format!("failed to ensure partition {partition}"))?;

    let metrics = Arc::new(OtelMetrics::new(&telemetry.meter()));
    let dispatcher = ComponentFactory::create_write_dispatcher(
        &config,
        backend.clone(),
        metrics.clone(),
        clock,
    );
    let reader = Arc::new(ComponentFactory::create_read_service(
        &config,
        backend,
        metrics,
    ));

    let router = api::build_http_router(
        ApiState {
            dispatcher: dispatcher.clone(),
            reader,
            registry: telemetry.exporter().registry().clone(),
        },
        &ApiConfig {
            telemetry_path: config.telemetry_path.clone(),
            max_body_bytes: config.max_body_bytes,
        },
    );

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen address {}", config.listen_addr))?;
    let listener = TcpListener::bind(addr).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let intake = dispatcher.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        // /ready reports shutting down while connections drain
        intake.close();
        let _ = shutdown_tx.send(true);
    });

    info!(
        listen_addr = %addr,
        partition = %partition,
        telemetry_path = %config.telemetry_path,
        "Adapter ready"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
        .await
        .context("HTTP server error")?;

    info!("HTTP server stopped, draining writes");
    dispatcher.shutdown().await;
    info!("Adapter shutting down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    if *shutdown.borrow() {
        return;
    }
    let _ = shutdown.changed().await;
}
