use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{HarnessError, Result};
use crate::profile::ScenarioProfile;
use crate::random::SeedInput;
use crate::secret::Secret;
use crate::threshold::{default_thresholds, Threshold};

/// Main configuration for a load run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// System under test
    pub target: TargetConfig,
    /// Account used by authenticated journeys
    pub credentials: CredentialsConfig,
    /// Random data seeding
    pub random: RandomConfig,
    /// Think time and inter-iteration pauses
    pub pacing: PacingConfig,
    /// Pre-existing entities some journeys act on
    pub targets: EntityTargets,
    /// Ramp profile and thresholds
    pub scenario: ScenarioConfig,
    pub logging: LoggingConfig,
    /// Where run artifacts are written
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Base URL every request path is appended to
    pub base_url: String,
    /// Per-request timeout in seconds
    pub request_timeout_seconds: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub email: Option<String>,
    pub password: Option<Secret<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomConfig {
    /// Numeric seed, kept as text so non-numeric input can be ignored
    pub seed: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Pause after each iteration, in seconds
    pub wait_time_seconds: f64,
    /// Multiplier applied to every scripted think time; 0 disables pauses
    pub think_scale: f64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            wait_time_seconds: 1.0,
            think_scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityTargets {
    pub user_id: Option<String>,
    pub chat_id: Option<String>,
    pub username: Option<String>,
    pub tweet_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Named profile; ignored when `stages` is set
    pub profile: Option<String>,
    /// Inline stages, `30s:10,1m:10,10s:0`
    pub stages: Option<String>,
    /// Overrides the journey's own thresholds when present
    pub thresholds: Option<Vec<Threshold>>,
    pub grace_period_seconds: u64,
    pub tick_interval_ms: u64,
    /// VU count for a single-pass run
    pub default_vus: u32,
    /// Statuses accepted as a successful login
    pub login_statuses: Vec<u16>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            profile: None,
            stages: None,
            thresholds: None,
            grace_period_seconds: 30,
            tick_interval_ms: 100,
            default_vus: 1,
            login_statuses: vec![201, 200],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `text` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub summary_json: Option<String>,
    pub prometheus_out: Option<String>,
}

fn env_source() -> config::Environment {
    config::Environment::with_prefix("LOADBEAT")
        .prefix_separator("_")
        .separator("__")
}

impl HarnessConfig {
    /// Load from a TOML/YAML/JSON file layered with `LOADBEAT_*` variables
    /// (`LOADBEAT_TARGET__BASE_URL`).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(env_source())
            .build()?;
        let config: Self = settings.try_deserialize()?;
        debug!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// Defaults layered with `LOADBEAT_*` variables only
    pub fn from_env() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(env_source())
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Apply the plain unprefixed variables
    /// (`BASE_URL`, `EMAIL`, `PASSWORD`, `RAND_SEED`, `WAIT_TIME`,
    /// `TARGET_USER_ID`, `TARGET_CHAT_ID`, `TARGET_USERNAME`, `TARGET_TWEET_ID`).
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Same as [`apply_env_overrides`](Self::apply_env_overrides) with an
    /// injected lookup
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(base_url) = get("BASE_URL") {
            self.target.base_url = base_url;
        }
        if let Some(email) = get("EMAIL") {
            self.credentials.email = Some(email);
        }
        if let Some(password) = get("PASSWORD") {
            self.credentials.password = Some(Secret::new(password));
        }
        if let Some(seed) = get("RAND_SEED") {
            self.random.seed = Some(seed);
        }
        if let Some(wait) = get("WAIT_TIME") {
            self.pacing.wait_time_seconds = wait
                .trim()
                .parse()
                .map_err(|e| HarnessError::Config(format!("Invalid WAIT_TIME '{wait}': {e}")))?;
        }
        if let Some(id) = get("TARGET_USER_ID") {
            self.targets.user_id = Some(id);
        }
        if let Some(id) = get("TARGET_CHAT_ID") {
            self.targets.chat_id = Some(id);
        }
        if let Some(username) = get("TARGET_USERNAME") {
            self.targets.username = Some(username);
        }
        if let Some(id) = get("TARGET_TWEET_ID") {
            self.targets.tweet_id = Some(id);
        }
        if let Some(level) = get("RUST_LOG") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Fail fast on values a run cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.target.base_url.trim().is_empty() {
            return Err(HarnessError::Config("BASE_URL is required".to_string()));
        }
        let url = reqwest::Url::parse(&self.target.base_url)
            .map_err(|e| HarnessError::Config(format!("Invalid BASE_URL '{}': {e}", self.target.base_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(HarnessError::Config(format!(
                "BASE_URL must use http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.target.request_timeout_seconds == 0 {
            return Err(HarnessError::Config("Request timeout cannot be 0".to_string()));
        }
        if self.scenario.tick_interval_ms == 0 {
            return Err(HarnessError::Config("Tick interval cannot be 0".to_string()));
        }
        if !self.pacing.wait_time_seconds.is_finite() || self.pacing.wait_time_seconds < 0.0 {
            return Err(HarnessError::Config("Wait time must be a non-negative number".to_string()));
        }
        if Duration::try_from_secs_f64(self.pacing.wait_time_seconds).is_err() {
            return Err(HarnessError::Config(format!(
                "Wait time {}s is out of range",
                self.pacing.wait_time_seconds
            )));
        }
        if !self.pacing.think_scale.is_finite() || self.pacing.think_scale < 0.0 {
            return Err(HarnessError::Config("Think scale must be a non-negative number".to_string()));
        }
        if self.scenario.login_statuses.is_empty() {
            return Err(HarnessError::Config("At least one login status is required".to_string()));
        }
        // Surfaces profile and stage errors before any VU starts
        self.profile()?;
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(HarnessError::Config(format!("Unknown log format '{}'", self.logging.format)));
        }
        Ok(())
    }

    /// Profile selected by `stages`, then `profile`, else a single pass
    pub fn profile(&self) -> Result<ScenarioProfile> {
        match (&self.scenario.stages, &self.scenario.profile) {
            (Some(stages), _) => ScenarioProfile::parse_stages(stages),
            (None, Some(name)) => ScenarioProfile::named(name),
            (None, None) => Ok(ScenarioProfile::default()),
        }
    }

    /// Configured thresholds, falling back to `fallback` then the defaults
    pub fn thresholds_or(&self, fallback: Option<Vec<Threshold>>) -> Vec<Threshold> {
        self.scenario
            .thresholds
            .clone()
            .or(fallback)
            .unwrap_or_else(default_thresholds)
    }

    /// Resolved run seed. Non-numeric text is ignored.
    pub fn seed(&self) -> Option<u64> {
        let seed = SeedInput::from(self.random.seed.as_deref()).resolve();
        if self.random.seed.is_some() && seed.is_none() {
            info!(seed = ?self.random.seed, "Ignoring non-numeric seed");
        }
        seed
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.target.request_timeout_seconds)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.scenario.grace_period_seconds)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.scenario.tick_interval_ms)
    }

    /// Pause between iterations. Values `validate` rejects read as zero.
    pub fn wait_time(&self) -> Duration {
        Duration::try_from_secs_f64(self.pacing.wait_time_seconds).unwrap_or_default()
    }

    /// Render as TOML. The password prints redacted.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| HarnessError::Serialization(e.to_string()))
    }

    /// Save configuration as TOML
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.scenario.grace_period_seconds, 30);
        assert_eq!(config.scenario.tick_interval_ms, 100);
        assert_eq!(config.scenario.default_vus, 1);
        assert_eq!(config.scenario.login_statuses, vec![201, 200]);
        assert_eq!(config.pacing.wait_time_seconds, 1.0);
        assert!(config.profile().unwrap().is_empty());
        assert_eq!(config.thresholds_or(None).len(), 3);
    }

    #[test]
    fn test_base_url_required() {
        let config = HarnessConfig::default();
        assert!(matches!(config.validate(), Err(HarnessError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = HarnessConfig::default();
        config
            .apply_overrides(lookup(&[
                ("BASE_URL", "http://localhost:3000/api/v1.0"),
                ("EMAIL", "someone@example.com"),
                ("PASSWORD", "pw"),
                ("RAND_SEED", "42"),
                ("WAIT_TIME", "0.5"),
                ("TARGET_USER_ID", "abc"),
                ("TARGET_USERNAME", ""),
                ("TARGET_CHAT_ID", "chat-1"),
                ("TARGET_TWEET_ID", "tweet-9"),
            ]))
            .unwrap();

        assert_eq!(config.target.base_url, "http://localhost:3000/api/v1.0");
        assert_eq!(config.credentials.email.as_deref(), Some("someone@example.com"));
        assert_eq!(config.credentials.password.as_ref().map(|p| p.expose_secret().as_str()), Some("pw"));
        assert_eq!(config.seed(), Some(42));
        assert_eq!(config.wait_time(), Duration::from_millis(500));
        assert_eq!(config.targets.user_id.as_deref(), Some("abc"));
        assert_eq!(config.targets.username, None);
        assert_eq!(config.targets.chat_id.as_deref(), Some("chat-1"));
        assert_eq!(config.targets.tweet_id.as_deref(), Some("tweet-9"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_wait_time() {
        let mut config = HarnessConfig::default();
        assert!(config.apply_overrides(lookup(&[("WAIT_TIME", "soon")])).is_err());
    }

    #[test]
    fn test_out_of_range_values_fail_validation() {
        let mut config = HarnessConfig::default();
        config.target.base_url = "http://example.com".to_string();
        config.apply_overrides(lookup(&[("WAIT_TIME", "1e30")])).unwrap();
        assert!(matches!(config.validate(), Err(HarnessError::Config(_))));
        assert_eq!(config.wait_time(), Duration::ZERO);

        config.pacing.wait_time_seconds = 1.0;
        config.scenario.stages = Some("999999999999999999999999999999h:10".to_string());
        assert!(matches!(config.validate(), Err(HarnessError::InvalidDuration(_))));
    }

    #[test]
    fn test_non_numeric_seed_ignored() {
        let mut config = HarnessConfig::default();
        config.random.seed = Some("not-a-number".to_string());
        assert_eq!(config.seed(), None);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = HarnessConfig::default();
        config.target.base_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());

        config.target.base_url = "http://example.com".to_string();
        config.scenario.stages = Some("10s".to_string());
        assert!(config.validate().is_err());

        config.scenario.stages = None;
        config.scenario.profile = Some("nope".to_string());
        assert!(matches!(config.validate(), Err(HarnessError::UnknownProfile(_))));

        config.scenario.profile = Some("smoke".to_string());
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stages_win_over_profile() {
        let mut config = HarnessConfig::default();
        config.scenario.profile = Some("standard".to_string());
        config.scenario.stages = Some("1s:2".to_string());
        assert_eq!(config.profile().unwrap().max_target(), 2);
    }

    #[test]
    fn test_password_not_serialized() {
        let mut config = HarnessConfig::default();
        config.credentials.password = Some(Secret::from("top-secret"));
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(!text.contains("top-secret"));
    }
}
