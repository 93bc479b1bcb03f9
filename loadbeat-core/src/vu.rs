//! Per-VU execution context.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::check::{self, Checks};
use crate::client::{HttpExchange, RequestSpec, SessionClient};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::metrics::MetricsSink;
use crate::random::RandomSource;

/// State owned by one virtual user: its HTTP session, random source and
/// iteration counter.
pub struct VuContext {
    pub id: u64,
    /// 1-based number of the iteration in progress
    pub iteration: u64,
    pub client: SessionClient,
    pub rng: RandomSource,
    config: Arc<HarnessConfig>,
    metrics: Arc<MetricsSink>,
}

impl VuContext {
    pub fn new(id: u64, config: Arc<HarnessConfig>, metrics: Arc<MetricsSink>, run_seed: Option<u64>) -> Result<Self> {
        let client = SessionClient::new(
            &config.target.base_url,
            config.request_timeout(),
            Arc::clone(&metrics),
            id,
        )?;
        Ok(Self {
            id,
            iteration: 0,
            client,
            rng: RandomSource::for_vu(run_seed, id),
            config,
            metrics,
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn metrics(&self) -> &MetricsSink {
        &self.metrics
    }

    pub async fn send(&self, spec: RequestSpec) -> HttpExchange {
        self.client.send(spec).await
    }

    /// Start a chain of checks against `exchange`
    pub fn check<'a>(&'a self, exchange: &'a HttpExchange) -> Checks<'a> {
        Checks::new(&self.metrics, exchange)
    }

    /// Record a check that is not tied to an exchange
    pub fn assert(&self, name: &str, passed: bool) -> bool {
        check::check(&self.metrics, name, passed)
    }

    /// Pause between `min_secs` and `max_secs`, scaled by `pacing.think_scale`
    pub async fn think(&mut self, min_secs: f64, max_secs: f64) {
        let scale = self.config.pacing.think_scale;
        if scale <= 0.0 {
            return;
        }
        let scaled = self
            .rng
            .think_time(min_secs, max_secs)
            .and_then(|pause| {
                Duration::try_from_secs_f64(pause.as_secs_f64() * scale)
                    .map_err(|_| HarnessError::invalid_range(min_secs * scale, max_secs * scale))
            });
        let pause = match scaled {
            Ok(pause) => pause,
            Err(e) => {
                debug!(vu = self.id, error = %e, "Invalid think time, skipping pause");
                return;
            }
        };
        if pause > Duration::ZERO {
            tokio::time::sleep(pause).await;
        }
    }
}
