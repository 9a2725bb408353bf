use clap::Args;
use depot_client::ConnectionOptions;

#[derive(Debug, Clone, Args)]
pub struct BrokerArgs {
    #[arg(long, default_value = "localhost", help = "Broker host")]
    pub host: String,

    #[arg(long, default_value_t = 5672, help = "Broker AMQP port")]
    pub port: u16,

    #[arg(long, default_value = "/", help = "Broker virtual host")]
    pub vhost: String,

    #[arg(long, default_value = "guest")]
    pub username: String,

    #[arg(long, default_value = "guest")]
    pub password: String,

    #[arg(
        long,
        default_value_t = 5,
        help = "Connection attempts before giving up"
    )]
    pub connection_attempts: usize,

    #[arg(
        long,
        default_value_t = 1000,
        help = "Pause between connection attempts, in milliseconds"
    )]
    pub retry_delay_ms: u64,
}

impl BrokerArgs {
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            host: self.host.clone(),
            port: self.port,
            vhost: self.vhost.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            connection_attempts: self.connection_attempts,
            retry_delay_ms: self.retry_delay_ms,
            ..ConnectionOptions::default()
        }
    }
}
