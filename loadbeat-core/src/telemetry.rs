//! Logging and Prometheus exporter bootstrap.

use ::metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::Path;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{HarnessError, Result};

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level. Returns false when a subscriber was already set.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    let result = if config.format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.is_ok()
}

/// Install the Prometheus recorder without an HTTP listener; the caller
/// renders it at run end.
pub fn install_prometheus() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| HarnessError::Config(format!("Failed to install Prometheus recorder: {e}")))?;
    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    describe_counter!("loadbeat_counter_total", "Harness counters by metric name");
    describe_counter!("loadbeat_rate_samples_total", "Boolean samples by metric name and outcome");
    describe_histogram!("loadbeat_trend", "Trend samples by metric name");
    describe_gauge!("loadbeat_gauge", "Gauges by metric name");
}

/// Write the exposition text to `path`
pub fn write_prometheus(handle: &PrometheusHandle, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    std::fs::write(path, handle.render())?;
    info!(path = %path.display(), "Wrote Prometheus metrics");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        assert!(!init_logging(&config));
    }
}
