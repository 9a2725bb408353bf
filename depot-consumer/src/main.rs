mod args_parse;
mod consumer_metrics;
mod http;
mod service_configuration;

use std::{net::SocketAddr, path::Path, sync::Arc};

use crate::{
    args_parse::Args,
    consumer_metrics::init_metrics,
    http::{router, AppState},
    service_configuration::load_configuration,
};

use anyhow::{Context, Result};
use clap::Parser;
use depot_client::{AmqpConnector, DeploymentConsumer, ReceivedEvents};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Parse command line arguments
    let args = Args::parse();

    // Load the configuration from the specified YAML file
    let mut service_config = load_configuration(Path::new(&args.config_file))?;

    // If `http_addr` is provided via command-line args, override the value from the config file
    if let Some(http_addr) = args.http_addr {
        let http_address: SocketAddr = http_addr.parse().context(format!(
            "Failed to parse into Socket address: {}",
            http_addr
        ))?;
        service_config.http_addr = http_address;
    }

    // If `prom_exporter` is provided via command-line args, override the value from the config file
    if let Some(prom_exporter) = args.prom_exporter {
        let prom_address: SocketAddr = prom_exporter.parse().context(format!(
            "Failed to parse into Socket address: {}",
            prom_exporter
        ))?;
        service_config.prom_exporter = Some(prom_address);
    }

    if let Some(broker_host) = args.broker_host {
        service_config.connection.host = broker_host;
    }
    if let Some(broker_port) = args.broker_port {
        service_config.connection.port = broker_port;
    }

    // Init metrics with or without prometheus exporter
    init_metrics(service_config.prom_exporter)?;

    let events = ReceivedEvents::new();
    let mut consumer = DeploymentConsumer::new(
        Arc::new(AmqpConnector::new()),
        service_config.connection.clone(),
        service_config.consumer.clone(),
        events.clone(),
    );
    let health = consumer.health();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut consumer_task = tokio::spawn(async move { consumer.run(shutdown_rx).await });

    let app = router(Arc::new(AppState { events, health }));
    let listener = TcpListener::bind(service_config.http_addr)
        .await
        .context(format!("Failed to bind {}", service_config.http_addr))?;
    info!("query surface listening on http://{}", service_config.http_addr);

    let mut http_shutdown = shutdown_tx.subscribe();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    // Run until a signal arrives or the consumer gives up on its own
    let finished_early = tokio::select! {
        signal = shutdown_signal() => {
            signal?;
            info!("shutdown signal received, stopping consumer");
            None
        }
        joined = &mut consumer_task => Some(joined),
    };

    let _ = shutdown_tx.send(true);
    let consumer_result = match finished_early {
        Some(joined) => joined,
        None => consumer_task.await,
    }
    .context("consumer task panicked")?;

    server
        .await
        .context("http server task panicked")?
        .context("http server failed")?;

    if let Err(e) = consumer_result {
        error!(error = %e, "consumer stopped with an error");
        return Err(e.into());
    }

    info!("depot-consumer stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        ctrl_c = tokio::signal::ctrl_c() => ctrl_c.context("Failed to listen for SIGINT")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}
