//! Loadbeat core library
//!
//! Virtual-user load generation: ramp profiles, per-VU HTTP sessions,
//! response classification, metrics, thresholds and the scenario runner.

pub mod check;
pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod profile;
pub mod random;
pub mod runner;
pub mod secret;
pub mod summary;
pub mod telemetry;
pub mod threshold;
pub mod vu;

// Re-export commonly used types
pub use check::{check, Checks};
pub use classify::{Classification, StatusClass};
pub use client::{parse_json, ExpectedStatuses, HttpExchange, RequestSpec, SessionClient, TransportErrorKind};
pub use crate::config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use crate::metrics::{names, MetricsSink, MetricsSnapshot};
pub use profile::{ScenarioProfile, Stage};
pub use random::RandomSource;
pub use runner::{Journey, RunPhase, RunState, Runner, SetupData, StopSignal};
pub use secret::Secret;
pub use summary::RunSummary;
pub use threshold::{Threshold, ThresholdOutcome};
pub use vu::VuContext;
