use anyhow::{Context, Result};
use depot_client::client_metrics::register_metrics;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

pub(crate) fn init_metrics(prom_addr: Option<SocketAddr>) -> Result<()> {
    info!("initializing metrics exporter");
    if let Some(addr) = prom_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .add_global_label("service", "depot-consumer")
            .install()
            .context("failed to install Prometheus recorder")?;
    }
    register_metrics();
    Ok(())
}
