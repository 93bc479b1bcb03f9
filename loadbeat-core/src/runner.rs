//! Scenario runner: schedules virtual users along a ramp profile, runs
//! journey iterations, drains, and evaluates thresholds.
//!
//! Lifecycle: `Pending -> Ramping <-> Steady -> Draining -> Completed`.
//! Every tick the runner computes the target VU count from the profile,
//! spawns new VUs or asks the newest ones to stop after their current
//! iteration. Once the profile ends (or a stop is requested) the runner
//! stops every VU, waits up to the grace period, then aborts stragglers.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::metrics::{names, MetricsSink};
use crate::profile::ScenarioProfile;
use crate::summary::RunSummary;
use crate::threshold::{evaluate_all, Threshold};
use crate::vu::VuContext;

/// A scripted user flow.
///
/// `setup` runs once before any VU starts and its value is shared with every
/// iteration; `teardown` runs once after the drain.
#[async_trait]
pub trait Journey: Send + Sync + 'static {
    /// Data prepared by `setup`
    type Shared: Default + Send + Sync + 'static;

    fn name(&self) -> &'static str;

    /// Thresholds used when the configuration does not set any
    fn thresholds(&self) -> Option<Vec<Threshold>> {
        None
    }

    async fn setup(&self, _ctx: &mut VuContext) -> anyhow::Result<Self::Shared> {
        Ok(Self::Shared::default())
    }

    async fn iteration(&self, ctx: &mut VuContext, shared: &SetupData<Self::Shared>) -> anyhow::Result<()>;

    async fn teardown(&self, _ctx: &mut VuContext, _shared: &SetupData<Self::Shared>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Outcome of `setup`, handed to every iteration
#[derive(Debug)]
pub struct SetupData<S> {
    inner: std::result::Result<S, String>,
}

impl<S> SetupData<S> {
    pub fn ready(value: S) -> Self {
        Self { inner: Ok(value) }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            inner: Err(reason.into()),
        }
    }

    /// Shared data, or `FatalSetup` when setup failed
    pub fn get(&self) -> Result<&S> {
        self.inner
            .as_ref()
            .map_err(|reason| HarnessError::FatalSetup(reason.clone()))
    }

    pub fn error(&self) -> Option<&str> {
        self.inner.as_ref().err().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Pending,
    Ramping,
    Steady,
    Draining,
    Completed,
}

/// Live view of a run, readable while it executes
#[derive(Debug)]
pub struct RunState {
    phase: watch::Sender<RunPhase>,
    live_vus: AtomicU32,
    iterations: DashMap<u64, u64>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        let (phase, _) = watch::channel(RunPhase::Pending);
        Self {
            phase,
            live_vus: AtomicU32::new(0),
            iterations: DashMap::new(),
        }
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    fn set_phase(&self, phase: RunPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            debug!(from = ?previous, to = ?phase, "Run phase changed");
        }
    }

    /// VUs that are not retiring
    pub fn live_vus(&self) -> u32 {
        self.live_vus.load(Ordering::Relaxed)
    }

    /// Completed iterations of one VU
    pub fn iterations_of(&self, vu: u64) -> u64 {
        self.iterations.get(&vu).map(|n| *n).unwrap_or(0)
    }

    /// Ids of every VU that completed at least one iteration
    pub fn vu_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.iterations.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    fn record_iteration(&self, vu: u64, count: u64) {
        self.iterations.insert(vu, count);
    }
}

/// External request to end the run early.
///
/// Cheap to clone; every clone observes the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    requested: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Relaxed)
    }

    /// Request a stop on Ctrl-C
    pub fn install_ctrl_c(&self) {
        let signal = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, draining");
                signal.request();
            }
        });
    }
}

/// Everything a VU task needs, cloned into each spawn
struct VuEnv<J: Journey> {
    journey: Arc<J>,
    setup: Arc<SetupData<J::Shared>>,
    config: Arc<HarnessConfig>,
    metrics: Arc<MetricsSink>,
    state: Arc<RunState>,
    seed: Option<u64>,
    wait_time: Duration,
    single_pass: bool,
}

impl<J: Journey> Clone for VuEnv<J> {
    fn clone(&self) -> Self {
        Self {
            journey: Arc::clone(&self.journey),
            setup: Arc::clone(&self.setup),
            config: Arc::clone(&self.config),
            metrics: Arc::clone(&self.metrics),
            state: Arc::clone(&self.state),
            seed: self.seed,
            wait_time: self.wait_time,
            single_pass: self.single_pass,
        }
    }
}

struct VuHandle {
    id: u64,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Spawned VUs. Retired VUs keep running until their iteration ends.
struct VuPool<J: Journey> {
    env: VuEnv<J>,
    active: Vec<VuHandle>,
    retiring: Vec<VuHandle>,
    next_id: u64,
    max_live: u32,
}

impl<J: Journey> VuPool<J> {
    fn new(env: VuEnv<J>) -> Self {
        Self {
            env,
            active: Vec::new(),
            retiring: Vec::new(),
            next_id: 1,
            max_live: 0,
        }
    }

    fn scale_to(&mut self, target: u32) {
        let target = target as usize;
        while self.active.len() < target {
            if !self.spawn() {
                break;
            }
        }
        while self.active.len() > target {
            if let Some(handle) = self.active.pop() {
                debug!(vu = handle.id, "Retiring VU");
                let _ = handle.stop.send(true);
                self.retiring.push(handle);
            }
        }
        self.retiring.retain(|h| !h.task.is_finished());

        let live = self.active.len() as u32;
        self.max_live = self.max_live.max(live);
        self.env.state.live_vus.store(live, Ordering::Relaxed);
        self.env.metrics.set_gauge(names::VUS, i64::from(live));
        self.env.metrics.set_gauge(names::VUS_MAX, i64::from(self.max_live));
    }

    fn spawn(&mut self) -> bool {
        let id = self.next_id;
        self.next_id += 1;

        let ctx = match VuContext::new(id, Arc::clone(&self.env.config), Arc::clone(&self.env.metrics), self.env.seed) {
            Ok(ctx) => ctx,
            Err(e) => {
                error!(vu = id, error = %e, "Failed to create VU");
                return false;
            }
        };
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(vu_loop(self.env.clone(), ctx, stop_rx));
        self.active.push(VuHandle { id, stop, task });
        true
    }

    fn all_finished(&self) -> bool {
        self.active.iter().chain(&self.retiring).all(|h| h.task.is_finished())
    }

    /// Stop every VU and wait up to `grace`. Returns how many were aborted.
    async fn drain(&mut self, grace: Duration) -> u64 {
        let mut handles: Vec<VuHandle> = self.active.drain(..).chain(self.retiring.drain(..)).collect();
        for handle in &handles {
            let _ = handle.stop.send(true);
        }
        self.env.state.live_vus.store(0, Ordering::Relaxed);

        let now = tokio::time::Instant::now();
        let deadline = now.checked_add(grace).unwrap_or(now + Duration::from_secs(86_400));
        let mut interrupted = 0;
        for handle in &mut handles {
            if tokio::time::timeout_at(deadline, &mut handle.task).await.is_err() {
                warn!(vu = handle.id, "VU still running after grace period, aborting");
                handle.task.abort();
                interrupted += 1;
            }
        }
        self.env.metrics.set_gauge(names::VUS, 0);
        interrupted
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

async fn vu_loop<J: Journey>(env: VuEnv<J>, mut ctx: VuContext, mut stop: watch::Receiver<bool>) {
    debug!(vu = ctx.id, "VU started");
    loop {
        if *stop.borrow() {
            break;
        }

        ctx.iteration += 1;
        let started = Instant::now();
        let outcome = AssertUnwindSafe(env.journey.iteration(&mut ctx, &env.setup))
            .catch_unwind()
            .await;
        env.metrics
            .add_trend(names::ITERATION_DURATION, started.elapsed().as_secs_f64() * 1000.0);
        env.metrics.add_counter(names::ITERATIONS, 1);

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                env.metrics.add_counter(names::ITERATION_FAILURES, 1);
                match e.downcast_ref::<HarnessError>() {
                    Some(HarnessError::FatalSetup(_)) => {
                        debug!(vu = ctx.id, iter = ctx.iteration, error = %e, "Iteration skipped, setup data unavailable")
                    }
                    _ => warn!(vu = ctx.id, iter = ctx.iteration, error = %format!("{e:#}"), "Iteration failed"),
                }
            }
            Err(payload) => {
                env.metrics.add_counter(names::ITERATION_FAILURES, 1);
                error!(vu = ctx.id, iter = ctx.iteration, panic = %panic_message(payload.as_ref()), "Iteration panicked");
            }
        }
        env.state.record_iteration(ctx.id, ctx.iteration);

        if env.single_pass || *stop.borrow() {
            break;
        }
        if !env.wait_time.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(env.wait_time) => {}
                _ = stop.changed() => break,
            }
        }
    }
    debug!(vu = ctx.id, iterations = ctx.iteration, "VU stopped");
}

/// Interval between `abort_on_fail` checks
const ABORT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Drives one journey along a profile
pub struct Runner {
    config: Arc<HarnessConfig>,
    profile: ScenarioProfile,
    thresholds: Option<Vec<Threshold>>,
    tick: Duration,
    grace: Duration,
    metrics: Arc<MetricsSink>,
    state: Arc<RunState>,
    stop: StopSignal,
}

impl Runner {
    /// Build a runner from validated configuration
    pub fn new(config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        let profile = config.profile()?;
        Ok(Self {
            tick: config.tick_interval(),
            grace: config.grace_period(),
            thresholds: config.scenario.thresholds.clone(),
            profile,
            config: Arc::new(config),
            metrics: Arc::new(MetricsSink::new()),
            state: Arc::new(RunState::new()),
            stop: StopSignal::new(),
        })
    }

    pub fn with_profile(mut self, profile: ScenarioProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_thresholds(mut self, thresholds: Vec<Threshold>) -> Self {
        self.thresholds = Some(thresholds);
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn profile(&self) -> &ScenarioProfile {
        &self.profile
    }

    pub fn metrics(&self) -> Arc<MetricsSink> {
        Arc::clone(&self.metrics)
    }

    pub fn state(&self) -> Arc<RunState> {
        Arc::clone(&self.state)
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Execute `journey` to completion
    pub async fn run<J: Journey>(&self, journey: Arc<J>) -> Result<RunSummary> {
        let started_at = Utc::now();
        let started = Instant::now();
        let thresholds = self
            .thresholds
            .clone()
            .or_else(|| journey.thresholds())
            .unwrap_or_else(crate::threshold::default_thresholds);
        let seed = self.config.seed();

        info!(
            journey = journey.name(),
            profile = %self.profile,
            seed = ?seed,
            thresholds = thresholds.len(),
            "Starting run"
        );
        self.state.set_phase(RunPhase::Pending);

        let mut setup_ctx = VuContext::new(0, Arc::clone(&self.config), Arc::clone(&self.metrics), seed)?;
        let setup = match AssertUnwindSafe(journey.setup(&mut setup_ctx)).catch_unwind().await {
            Ok(Ok(shared)) => SetupData::ready(shared),
            Ok(Err(e)) => {
                self.metrics.add_counter(names::SETUP_FAILURES, 1);
                error!(journey = journey.name(), error = %format!("{e:#}"), "Setup failed");
                SetupData::failed(format!("{e:#}"))
            }
            Err(payload) => {
                self.metrics.add_counter(names::SETUP_FAILURES, 1);
                let message = panic_message(payload.as_ref());
                error!(journey = journey.name(), panic = %message, "Setup panicked");
                SetupData::failed(message)
            }
        };
        let setup = Arc::new(setup);

        let single_pass = self.profile.is_empty();
        let mut pool = VuPool::new(VuEnv {
            journey: Arc::clone(&journey),
            setup: Arc::clone(&setup),
            config: Arc::clone(&self.config),
            metrics: Arc::clone(&self.metrics),
            state: Arc::clone(&self.state),
            seed,
            wait_time: self.config.wait_time(),
            single_pass,
        });

        let aborted = if single_pass {
            self.run_single_pass(&mut pool).await
        } else {
            self.run_profile(&mut pool, &thresholds).await
        };

        self.state.set_phase(RunPhase::Draining);
        let interrupted = pool.drain(self.grace).await;
        if interrupted > 0 {
            self.metrics.add_counter(names::ITERATIONS_INTERRUPTED, interrupted);
        }

        match AssertUnwindSafe(journey.teardown(&mut setup_ctx, &setup)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(journey = journey.name(), error = %format!("{e:#}"), "Teardown failed"),
            Err(payload) => warn!(journey = journey.name(), panic = %panic_message(payload.as_ref()), "Teardown panicked"),
        }

        self.state.set_phase(RunPhase::Completed);
        let snapshot = self.metrics.snapshot();
        let outcomes = evaluate_all(&thresholds, &snapshot);
        for outcome in outcomes.iter().filter(|o| !o.passed) {
            warn!(metric = %outcome.metric, expr = %outcome.expr, observed = ?outcome.observed, "Threshold failed");
        }

        let summary = RunSummary {
            journey: journey.name().to_string(),
            profile: self.profile.to_string(),
            started_at,
            duration: started.elapsed(),
            vus_max: pool.max_live,
            iterations: snapshot.counter(names::ITERATIONS),
            iteration_failures: snapshot.counter(names::ITERATION_FAILURES),
            iterations_interrupted: snapshot.counter(names::ITERATIONS_INTERRUPTED),
            setup_error: setup.error().map(str::to_string),
            aborted,
            stopped: self.stop.is_requested(),
            thresholds: outcomes,
            metrics: snapshot,
        };
        info!(
            journey = %summary.journey,
            iterations = summary.iterations,
            failures = summary.iteration_failures,
            passed = summary.passed(),
            "Run completed"
        );
        Ok(summary)
    }

    /// `default_vus` VUs, one iteration each
    async fn run_single_pass<J: Journey>(&self, pool: &mut VuPool<J>) -> bool {
        self.state.set_phase(RunPhase::Steady);
        pool.scale_to(self.config.scenario.default_vus.max(1));

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        while !pool.all_finished() {
            interval.tick().await;
            if self.stop.is_requested() {
                break;
            }
        }
        false
    }

    /// Tick loop along the profile. Returns true when aborted by a threshold.
    async fn run_profile<J: Journey>(&self, pool: &mut VuPool<J>, thresholds: &[Threshold]) -> bool {
        let total = self.profile.total_duration();
        let abort_checks: Vec<&Threshold> = thresholds.iter().filter(|t| t.abort_on_fail).collect();
        let started = tokio::time::Instant::now();
        let mut last_abort_check = started;

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if self.stop.is_requested() {
                info!("Stop requested, ending ramp early");
                return false;
            }

            let elapsed = started.elapsed();
            if elapsed >= total {
                return false;
            }

            let phase = if self.profile.is_ramping_at(elapsed) {
                RunPhase::Ramping
            } else {
                RunPhase::Steady
            };
            self.state.set_phase(phase);
            pool.scale_to(self.profile.target_at(elapsed));

            if !abort_checks.is_empty() && last_abort_check.elapsed() >= ABORT_CHECK_INTERVAL {
                last_abort_check = tokio::time::Instant::now();
                let snapshot = self.metrics.snapshot();
                if let Some(failed) = abort_checks.iter().map(|t| t.evaluate(&snapshot)).find(|o| !o.passed) {
                    warn!(metric = %failed.metric, expr = %failed.expr, observed = ?failed.observed, "Threshold crossed, aborting run");
                    return true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_data() {
        let ready = SetupData::ready(5);
        assert_eq!(*ready.get().unwrap(), 5);
        assert!(ready.error().is_none());

        let failed: SetupData<i32> = SetupData::failed("no token");
        assert!(matches!(failed.get(), Err(HarnessError::FatalSetup(_))));
        assert_eq!(failed.error(), Some("no token"));
    }

    #[test]
    fn test_stop_signal_shared_between_clones() {
        let signal = StopSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_requested());
        signal.request();
        assert!(clone.is_requested());
    }

    #[test]
    fn test_run_state_defaults() {
        let state = RunState::new();
        assert_eq!(state.phase(), RunPhase::Pending);
        assert_eq!(state.live_vus(), 0);
        assert_eq!(state.iterations_of(7), 0);
        state.record_iteration(7, 3);
        assert_eq!(state.iterations_of(7), 3);
        assert_eq!(state.vu_ids(), vec![7]);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
