use lapin::uri::{AMQPAuthority, AMQPQueryString, AMQPUri, AMQPUserInfo};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{DepotError, Result};

/// Where and how to reach the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    pub host: String,
    pub port: u16,
    pub vhost: String,
    pub username: String,
    pub password: String,
    /// Heartbeat interval negotiated with the broker, in seconds
    pub heartbeat_secs: u16,
    /// Connection attempts made by a single connect call
    pub connection_attempts: usize,
    /// Pause between two connection attempts, in milliseconds
    pub retry_delay_ms: u64,
    /// Socket connect timeout, in milliseconds
    pub connection_timeout_ms: u64,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions {
            host: "localhost".to_string(),
            port: 5672,
            vhost: "/".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
            heartbeat_secs: 60,
            connection_attempts: 5,
            retry_delay_ms: 1_000,
            connection_timeout_ms: 5_000,
        }
    }
}

impl ConnectionOptions {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(DepotError::Configuration("broker host is empty".into()));
        }
        if self.port == 0 {
            return Err(DepotError::Configuration("broker port must be > 0".into()));
        }
        if self.connection_attempts == 0 {
            return Err(DepotError::Configuration(
                "connection_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// AMQP URI for these options. Heartbeat and connect timeout travel in
    /// its query string.
    pub fn amqp_uri(&self) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.username.clone(),
                    password: self.password.clone(),
                },
                host: self.host.clone(),
                port: self.port,
            },
            vhost: self.vhost.clone(),
            query: AMQPQueryString {
                heartbeat: Some(self.heartbeat_secs),
                connection_timeout: Some(self.connection_timeout_ms),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Broker address for logs, password masked.
    pub fn display_uri(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!(
            "amqp://{}:***@{}:{} (vhost '{}')",
            self.username, host, self.port, self.vhost
        )
    }
}
