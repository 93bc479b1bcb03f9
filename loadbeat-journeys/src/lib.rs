//! Loadbeat journeys
//!
//! Scripted user flows for the social-network API, the authenticated
//! session they share, a registry to run them by name, and an in-memory
//! backend that answers them.

pub mod api;
pub mod auth;
pub mod catalog;
pub mod journeys;
pub mod mock;

pub use catalog::{find, journey_names, run_named, JourneyInfo, JOURNEYS};
pub use mock::{MockBackend, MockStats};
