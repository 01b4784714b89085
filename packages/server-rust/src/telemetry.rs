//! Logging and metrics installation for relay binaries.

use std::net::SocketAddr;

use clap::ValueEnum;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Counter: batches flushed, labelled by `trigger` (`size`, `timeout`, `drain`).
pub const BATCH_FLUSHES: &str = "relay_batch_flushes_total";
/// Counter: batch `fill`/`execute` failures.
pub const BATCH_ERRORS: &str = "relay_batch_errors_total";
/// Counter: fan-in attempts that lost the optimistic check and retried.
pub const PTASK_MERGE_CONFLICTS: &str = "relay_ptask_merge_conflicts_total";
/// Counter: fan-in merges abandoned after the retry cap.
pub const PTASK_MERGE_EXHAUSTED: &str = "relay_ptask_merge_exhausted_total";
/// Counter: handler invocations that returned an error, labelled by `kind`.
pub const HANDLER_FAILURES: &str = "relay_handler_failures_total";

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` selects the filter; without it everything at `info` and above
/// is logged.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?,
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()?,
    }
    Ok(())
}

/// Starts a Prometheus scrape endpoint on `addr` and installs it as the
/// global metrics recorder.
///
/// # Errors
///
/// Fails if the listener cannot bind or a recorder is already installed.
pub fn install_metrics_exporter(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!(%addr, "prometheus exporter listening");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parses_from_cli_value() {
        assert_eq!(LogFormat::from_str("json", true).unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("pretty", true).unwrap(), LogFormat::Pretty);
        assert!(LogFormat::from_str("xml", true).is_err());
    }
}
