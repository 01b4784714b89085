use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use crate::network::NetworkConfig;
use crate::telemetry::LogFormat;

/// Process-level configuration. Every option can also come from the
/// environment variable named next to it.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ServiceConfig {
    /// Role this process plays.
    #[arg(long, env = "SERVICE_ID", default_value = "")]
    pub service_id: String,

    /// Cache address. Empty selects the in-process cache.
    #[arg(long, env = "CACHE_SERVER", default_value = "")]
    pub cache_server: String,

    /// Broker address. Empty selects the in-process broker.
    #[arg(long, env = "MQ_SERVERS", default_value = "")]
    pub mq_servers: String,

    #[arg(long, env = "HTTP_HOST", default_value = "0.0.0.0")]
    pub http_host: String,

    #[arg(long, env = "HTTP_PORT", default_value_t = 8080)]
    pub http_port: u16,

    /// Seconds loops and in-flight requests get to finish after shutdown starts.
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = 10)]
    pub shutdown_grace_secs: u64,

    /// Seconds before an HTTP request is answered with 408.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Prometheus scrape address. Metrics are not exported when unset.
    #[arg(long, env = "METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_id: String::new(),
            cache_server: String::new(),
            mq_servers: String::new(),
            http_host: "0.0.0.0".to_string(),
            http_port: 8080,
            shutdown_grace_secs: 10,
            request_timeout_secs: 30,
            log_format: LogFormat::Pretty,
            metrics_addr: None,
        }
    }
}

impl ServiceConfig {
    /// Reads configuration from environment variables only.
    ///
    /// # Errors
    ///
    /// Fails when a variable holds a value of the wrong type.
    pub fn from_env() -> Result<Self, clap::Error> {
        Self::try_parse_from(["relay-node"])
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    #[must_use]
    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.http_host.clone(),
            port: self.http_port,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            shutdown_grace: self.shutdown_grace(),
            ..NetworkConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_cli_defaults() {
        let parsed = ServiceConfig::try_parse_from([
            "relay-node",
            "--service-id",
            "",
            "--cache-server",
            "",
            "--mq-servers",
            "",
            "--http-host",
            "0.0.0.0",
            "--http-port",
            "8080",
            "--shutdown-grace-secs",
            "10",
            "--request-timeout-secs",
            "30",
            "--log-format",
            "pretty",
        ])
        .unwrap();
        let default = ServiceConfig::default();
        assert_eq!(parsed.http_port, default.http_port);
        assert_eq!(parsed.http_host, default.http_host);
        assert_eq!(parsed.shutdown_grace_secs, default.shutdown_grace_secs);
        assert_eq!(parsed.request_timeout_secs, default.request_timeout_secs);
        assert_eq!(parsed.log_format, default.log_format);
    }

    #[test]
    fn flags_override_defaults() {
        let config = ServiceConfig::try_parse_from([
            "relay-node",
            "--service-id",
            "mail-consumer",
            "--http-port",
            "9000",
            "--log-format",
            "json",
            "--metrics-addr",
            "127.0.0.1:9100",
        ])
        .unwrap();
        assert_eq!(config.service_id, "mail-consumer");
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.metrics_addr, Some("127.0.0.1:9100".parse().unwrap()));
    }

    #[test]
    fn network_config_is_derived() {
        let config = ServiceConfig {
            http_port: 1234,
            request_timeout_secs: 5,
            shutdown_grace_secs: 2,
            ..ServiceConfig::default()
        };
        let network = config.network_config();
        assert_eq!(network.port, 1234);
        assert_eq!(network.host, "0.0.0.0");
        assert_eq!(network.request_timeout, Duration::from_secs(5));
        assert_eq!(network.shutdown_grace, Duration::from_secs(2));
        assert_eq!(network.cors_origins, vec!["*".to_string()]);
    }
}
