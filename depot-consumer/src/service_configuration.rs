use anyhow::{anyhow, Context, Result};
use depot_client::{ConnectionOptions, ConsumerOptions};
use serde::{Deserialize, Serialize};
use std::fs::read_to_string;
use std::net::SocketAddr;
use std::path::Path;

/// configuration settings loaded from the config file
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct LoadConfiguration {
    /// Broker connection settings
    #[serde(default)]
    pub(crate) broker: ConnectionOptions,
    /// Consumer settings
    #[serde(default)]
    pub(crate) consumer: ConsumerOptions,
    /// Query surface
    pub(crate) http: HttpConfig,
}

/// Query surface configuration
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct HttpConfig {
    /// Hostname or IP address the query surface binds to
    pub(crate) host: String,
    pub(crate) port: u16,
    /// Prometheus metrics exporter port (optional)
    pub(crate) prometheus: Option<u16>,
}

/// validated settings the consumer service runs with
#[derive(Debug, Clone)]
pub(crate) struct ServiceConfiguration {
    pub(crate) connection: ConnectionOptions,
    pub(crate) consumer: ConsumerOptions,
    /// Query surface address
    pub(crate) http_addr: SocketAddr,
    /// Prometheus exporter address
    pub(crate) prom_exporter: Option<SocketAddr>,
}

/// Implementing the TryFrom trait to transform LoadConfiguration into ServiceConfiguration
impl TryFrom<LoadConfiguration> for ServiceConfiguration {
    type Error = anyhow::Error;

    fn try_from(config: LoadConfiguration) -> Result<Self> {
        config
            .broker
            .validate()
            .context("invalid broker configuration")?;

        if config.consumer.prefetch == 0 {
            return Err(anyhow!("consumer.prefetch must be at least 1"));
        }
        if config.consumer.startup_attempts == 0 {
            return Err(anyhow!("consumer.startup_attempts must be at least 1"));
        }

        let http_addr: SocketAddr = format!("{}:{}", config.http.host, config.http.port)
            .parse()
            .context("Failed to create http_addr")?;

        let prom_exporter: Option<SocketAddr> = match config.http.prometheus {
            Some(prom_port) => Some(
                format!("{}:{}", config.http.host, prom_port)
                    .parse()
                    .context("Failed to create prom_exporter")?,
            ),
            None => None,
        };

        Ok(ServiceConfiguration {
            connection: config.broker,
            consumer: config.consumer,
            http_addr,
            prom_exporter,
        })
    }
}

/// Reads the YAML file at `path` into a validated configuration.
pub(crate) fn load_configuration(path: &Path) -> Result<ServiceConfiguration> {
    let config_content = read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let load_config: LoadConfiguration =
        serde_yaml::from_str(&config_content).context("Failed to parse config file")?;
    load_config.try_into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_the_shipped_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/depot_consumer.yml");
        let config = load_configuration(&path).unwrap();

        assert_eq!(config.connection, ConnectionOptions::default());
        assert_eq!(config.consumer, ConsumerOptions::default());
        assert_eq!(config.http_addr, "0.0.0.0:8000".parse().unwrap());
        assert_eq!(config.prom_exporter, Some("0.0.0.0:9040".parse().unwrap()));
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "broker:\n  host: rabbit.internal\nhttp:\n  host: 127.0.0.1\n  port: 8081"
        )
        .unwrap();

        let config = load_configuration(file.path()).unwrap();

        assert_eq!(config.connection.host, "rabbit.internal");
        assert_eq!(config.connection.port, 5672);
        assert_eq!(config.consumer.prefetch, 1);
        assert_eq!(config.consumer.reconnect_delay_ms, 2_000);
        assert_eq!(config.prom_exporter, None);
    }

    #[test]
    fn rejects_invalid_values() {
        let zero_prefetch: LoadConfiguration = serde_yaml::from_str(
            "consumer:\n  prefetch: 0\nhttp:\n  host: 127.0.0.1\n  port: 8081",
        )
        .unwrap();
        assert!(ServiceConfiguration::try_from(zero_prefetch).is_err());

        let bad_host: LoadConfiguration =
            serde_yaml::from_str("http:\n  host: not an address\n  port: 8081").unwrap();
        assert!(ServiceConfiguration::try_from(bad_host).is_err());
    }
}
