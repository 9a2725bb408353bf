use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "depot-consumer",
    about = "Consumes deployment events and serves the received snapshots over HTTP"
)]
pub(crate) struct Args {
    /// Path to config file
    #[arg(long, default_value = "config/depot_consumer.yml")]
    pub(crate) config_file: String,

    /// Query surface listen address, overrides http.host/http.port
    #[arg(long)]
    pub(crate) http_addr: Option<String>,

    /// Prometheus exporter listen address
    #[arg(long)]
    pub(crate) prom_exporter: Option<String>,

    /// Broker host, overrides broker.host
    #[arg(long)]
    pub(crate) broker_host: Option<String>,

    /// Broker port, overrides broker.port
    #[arg(long)]
    pub(crate) broker_port: Option<u16>,
}
