//! Integration tests for the loadbeat core
//!
//! These tests drive the scenario runner end to end:
//! - Ramp scheduling against the wall clock
//! - Iteration error and panic isolation
//! - Drain grace and interrupted iterations
//! - Setup failure handling
//! - Threshold verdicts over real HTTP traffic

use anyhow::{bail, Result};
use async_trait::async_trait;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

use loadbeat_core::client::RequestSpec;
use loadbeat_core::metrics::names;
use loadbeat_core::profile::{ScenarioProfile, Stage};
use loadbeat_core::runner::{Journey, RunPhase, Runner, SetupData};
use loadbeat_core::summary::{EXIT_OK, EXIT_SETUP_FAILED, EXIT_THRESHOLDS_FAILED};
use loadbeat_core::threshold::Threshold;
use loadbeat_core::vu::VuContext;
use loadbeat_core::HarnessConfig;

/// Configuration pointing at `base_url` with pauses disabled
fn test_config(base_url: &str) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.target.base_url = base_url.to_string();
    config.target.request_timeout_seconds = 5;
    config.pacing.wait_time_seconds = 0.0;
    config.pacing.think_scale = 0.0;
    config.scenario.tick_interval_ms = 20;
    config.scenario.grace_period_seconds = 2;
    config
}

/// Start a small origin: `/ok` answers 200, `/boom` 500, `/private` 401
async fn start_origin() -> String {
    let app = Router::new()
        .route("/ok", get(|| async { (StatusCode::OK, "{\"data\":{}}") }))
        .route("/boom", get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "oops") }))
        .route("/private", get(|| async { (StatusCode::UNAUTHORIZED, "{\"message\":\"Unauthorized\"}") }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Sleeps for `pause` per iteration without touching the network
struct Sleeper {
    pause: Duration,
}

#[async_trait]
impl Journey for Sleeper {
    type Shared = ();

    fn name(&self) -> &'static str {
        "sleeper"
    }

    fn thresholds(&self) -> Option<Vec<Threshold>> {
        Some(Vec::new())
    }

    async fn iteration(&self, _ctx: &mut VuContext, _shared: &SetupData<()>) -> Result<()> {
        tokio::time::sleep(self.pause).await;
        Ok(())
    }
}

#[cfg(test)]
mod scheduling_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_linear_ramp_reaches_half_at_midpoint() {
        let profile = ScenarioProfile::new(vec![
            Stage::new(Duration::from_secs(2), 20),
            Stage::new(Duration::from_secs(1), 20),
        ]);
        let runner = Arc::new(
            Runner::new(test_config("http://127.0.0.1:9"))
                .unwrap()
                .with_profile(profile),
        );
        let state = runner.state();
        let journey = Arc::new(Sleeper {
            pause: Duration::from_millis(10),
        });

        let task = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.run(journey).await })
        };

        tokio::time::sleep(Duration::from_millis(1000)).await;
        let mid = state.live_vus();
        assert!((7..=13).contains(&mid), "live VUs at midpoint: {mid}");
        assert_eq!(state.phase(), RunPhase::Ramping);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(state.live_vus(), 20);
        assert_eq!(state.phase(), RunPhase::Steady);

        let summary = task.await.unwrap().unwrap();
        assert_eq!(state.phase(), RunPhase::Completed);
        assert_eq!(summary.vus_max, 20);
        assert_eq!(summary.iterations_interrupted, 0);
        assert_eq!(summary.exit_code(), EXIT_OK);
    }

    #[tokio::test]
    async fn test_empty_profile_runs_single_pass() {
        let mut config = test_config("http://127.0.0.1:9");
        config.scenario.default_vus = 3;
        let runner = Runner::new(config).unwrap();
        assert!(runner.profile().is_empty());

        let summary = runner
            .run(Arc::new(Sleeper {
                pause: Duration::from_millis(5),
            }))
            .await
            .unwrap();
        assert_eq!(summary.iterations, 3);
        assert_eq!(summary.vus_max, 3);
        for vu in runner.state().vu_ids() {
            assert_eq!(runner.state().iterations_of(vu), 1);
        }
    }

    #[tokio::test]
    async fn test_stop_signal_ends_run_early() {
        let runner = Arc::new(
            Runner::new(test_config("http://127.0.0.1:9"))
                .unwrap()
                .with_profile(ScenarioProfile::constant(2, Duration::from_secs(30))),
        );
        let stop = runner.stop_signal();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            stop.request();
        });

        let started = Instant::now();
        let summary = runner
            .run(Arc::new(Sleeper {
                pause: Duration::from_millis(10),
            }))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(summary.stopped);
        assert!(summary.iterations > 0);
    }
}

/// VU 1 panics on odd iterations and errors on even ones
struct Flaky;

#[async_trait]
impl Journey for Flaky {
    type Shared = ();

    fn name(&self) -> &'static str {
        "flaky"
    }

    fn thresholds(&self) -> Option<Vec<Threshold>> {
        Some(Vec::new())
    }

    async fn iteration(&self, ctx: &mut VuContext, _shared: &SetupData<()>) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if ctx.id == 1 {
            if ctx.iteration % 2 == 1 {
                panic!("simulated crash in iteration {}", ctx.iteration);
            }
            bail!("simulated failure in iteration {}", ctx.iteration);
        }
        Ok(())
    }
}

#[cfg(test)]
mod isolation_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failing_vu_does_not_stop_others() {
        let runner = Runner::new(test_config("http://127.0.0.1:9"))
            .unwrap()
            .with_profile(ScenarioProfile::constant(3, Duration::from_millis(800)));
        let summary = runner.run(Arc::new(Flaky)).await.unwrap();
        let state = runner.state();

        assert!(state.iterations_of(1) >= 4, "crashing VU kept iterating");
        assert!(state.iterations_of(2) >= 10);
        assert!(state.iterations_of(3) >= 10);
        assert_eq!(summary.iteration_failures, state.iterations_of(1));
        assert_eq!(
            summary.iterations,
            state.iterations_of(1) + state.iterations_of(2) + state.iterations_of(3)
        );
    }
}

/// Iterations outlive any reasonable grace period
struct Stuck;

#[async_trait]
impl Journey for Stuck {
    type Shared = ();

    fn name(&self) -> &'static str {
        "stuck"
    }

    fn thresholds(&self) -> Option<Vec<Threshold>> {
        Some(Vec::new())
    }

    async fn iteration(&self, _ctx: &mut VuContext, _shared: &SetupData<()>) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }
}

#[cfg(test)]
mod drain_tests {
    use super::*;

    #[tokio::test]
    async fn test_stragglers_aborted_after_grace() {
        let runner = Runner::new(test_config("http://127.0.0.1:9"))
            .unwrap()
            .with_profile(ScenarioProfile::constant(2, Duration::from_millis(200)))
            .with_grace(Duration::from_millis(300));

        let started = Instant::now();
        let summary = runner.run(Arc::new(Stuck)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(summary.iterations_interrupted, 2);
        assert_eq!(summary.iterations, 0);
    }

    #[tokio::test]
    async fn test_in_flight_iteration_completes_within_grace() {
        let runner = Runner::new(test_config("http://127.0.0.1:9"))
            .unwrap()
            .with_profile(ScenarioProfile::constant(1, Duration::from_millis(100)))
            .with_grace(Duration::from_secs(5));

        let summary = runner
            .run(Arc::new(Sleeper {
                pause: Duration::from_millis(400),
            }))
            .await
            .unwrap();
        assert_eq!(summary.iterations_interrupted, 0);
        assert_eq!(summary.iterations, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ramp_down_lets_retired_iterations_finish() {
        let profile = ScenarioProfile::new(vec![
            Stage::new(Duration::ZERO, 4),
            Stage::new(Duration::from_secs(1), 4),
            Stage::new(Duration::ZERO, 1),
            Stage::new(Duration::from_secs(2), 1),
        ]);
        let runner = Arc::new(
            Runner::new(test_config("http://127.0.0.1:9"))
                .unwrap()
                .with_profile(profile)
                .with_grace(Duration::from_secs(3)),
        );
        let state = runner.state();
        let journey = Arc::new(Sleeper {
            pause: Duration::from_millis(1500),
        });

        let task = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.run(journey).await })
        };

        // Past the drop to 1 VU, before any first iteration ends
        tokio::time::sleep(Duration::from_millis(1250)).await;
        assert_eq!(state.live_vus(), 1);
        for vu in 1..=4 {
            assert_eq!(state.iterations_of(vu), 0, "vu {vu} finished too early");
        }

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.iterations_interrupted, 0);
        assert_eq!(summary.vus_max, 4);
        for vu in 2..=4 {
            assert_eq!(state.iterations_of(vu), 1, "retired vu {vu}");
        }
        assert!(state.iterations_of(1) >= 2);
        assert_eq!(summary.exit_code(), EXIT_OK);
    }
}

/// Setup always fails; iterations need its data
struct NeedsSetup {
    attempted: AtomicU64,
}

#[async_trait]
impl Journey for NeedsSetup {
    type Shared = String;

    fn name(&self) -> &'static str {
        "needs-setup"
    }

    fn thresholds(&self) -> Option<Vec<Threshold>> {
        Some(Vec::new())
    }

    async fn setup(&self, _ctx: &mut VuContext) -> Result<String> {
        bail!("login rejected")
    }

    async fn iteration(&self, _ctx: &mut VuContext, shared: &SetupData<String>) -> Result<()> {
        self.attempted.fetch_add(1, Ordering::Relaxed);
        let _token = shared.get()?;
        Ok(())
    }
}

#[cfg(test)]
mod setup_tests {
    use super::*;

    #[tokio::test]
    async fn test_setup_failure_aborts_dependent_iterations() {
        let mut config = test_config("http://127.0.0.1:9");
        config.scenario.default_vus = 2;
        let runner = Runner::new(config).unwrap();
        let journey = Arc::new(NeedsSetup {
            attempted: AtomicU64::new(0),
        });

        let summary = runner.run(Arc::clone(&journey)).await.unwrap();
        assert_eq!(journey.attempted.load(Ordering::Relaxed), 2);
        assert_eq!(summary.iteration_failures, 2);
        assert_eq!(summary.setup_error.as_deref(), Some("login rejected"));
        assert_eq!(summary.metrics.counter(names::SETUP_FAILURES), 1);
        assert_eq!(summary.exit_code(), EXIT_SETUP_FAILED);
    }
}

/// Nine good requests and `bad` 500s per iteration
struct Mixed {
    bad: usize,
}

#[async_trait]
impl Journey for Mixed {
    type Shared = ();

    fn name(&self) -> &'static str {
        "mixed"
    }

    async fn iteration(&self, ctx: &mut VuContext, _shared: &SetupData<()>) -> Result<()> {
        for _ in 0..9 {
            let res = ctx.send(RequestSpec::get("/ok")).await;
            ctx.check(&res).that("status is 200", |r| r.status_is(200));
        }
        for _ in 0..self.bad {
            ctx.send(RequestSpec::get("/boom")).await;
        }
        let denied = ctx
            .send(RequestSpec::get("/private").bearer("invalid").expect_codes(&[401]))
            .await;
        ctx.check(&denied).that("status is 401", |r| r.status_is(401));
        Ok(())
    }
}

#[cfg(test)]
mod threshold_tests {
    use super::*;

    fn failure_rate_threshold() -> Vec<Threshold> {
        vec![Threshold::new(names::HTTP_REQ_FAILED, "rate<0.01").unwrap()]
    }

    #[tokio::test]
    async fn test_expected_401_keeps_failure_rate_at_zero() {
        let base = start_origin().await;
        let runner = Runner::new(test_config(&base))
            .unwrap()
            .with_thresholds(failure_rate_threshold());
        let summary = runner.run(Arc::new(Mixed { bad: 0 })).await.unwrap();

        assert_eq!(summary.metrics.counter(names::HTTP_REQS), 10);
        assert_eq!(summary.metrics.counter("status_401"), 1);
        assert_eq!(summary.metrics.counter(names::HTTP_UNEXPECTED_STATUS), 0);
        assert_eq!(summary.metrics.rate(names::HTTP_REQ_FAILED), Some(0.0));
        assert_eq!(summary.metrics.rate(names::CHECKS), Some(1.0));
        assert_eq!(summary.exit_code(), EXIT_OK);
    }

    #[tokio::test]
    async fn test_server_errors_fail_the_run() {
        let base = start_origin().await;
        let runner = Runner::new(test_config(&base))
            .unwrap()
            .with_thresholds(failure_rate_threshold());
        let summary = runner.run(Arc::new(Mixed { bad: 1 })).await.unwrap();

        assert_eq!(summary.metrics.counter(names::HTTP_SERVER_ERRORS), 1);
        assert!(!summary.thresholds_passed());
        assert_eq!(summary.exit_code(), EXIT_THRESHOLDS_FAILED);
    }

    #[tokio::test]
    async fn test_abort_on_fail_stops_early() {
        let base = start_origin().await;
        let runner = Runner::new(test_config(&base))
            .unwrap()
            .with_profile(ScenarioProfile::constant(1, Duration::from_secs(30)))
            .with_thresholds(vec![Threshold::new(names::HTTP_REQ_FAILED, "rate<0.01")
                .unwrap()
                .abort_on_fail()]);

        let started = Instant::now();
        let summary = runner.run(Arc::new(Mixed { bad: 3 })).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(summary.aborted);
        assert_eq!(summary.exit_code(), EXIT_THRESHOLDS_FAILED);
    }

    #[tokio::test]
    async fn test_transport_errors_count_as_failed() {
        let runner = Runner::new(test_config("http://127.0.0.1:9"))
            .unwrap()
            .with_thresholds(failure_rate_threshold());
        let summary = runner.run(Arc::new(Mixed { bad: 0 })).await.unwrap();

        assert_eq!(summary.metrics.counter(names::HTTP_TRANSPORT_ERRORS), 10);
        assert_eq!(summary.metrics.rate(names::HTTP_REQ_FAILED), Some(1.0));
        assert_eq!(summary.exit_code(), EXIT_THRESHOLDS_FAILED);
    }
}
