//! Ramp profiles: target virtual-user count as a function of elapsed time.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

use crate::error::{HarnessError, Result};

/// One ramp stage: move linearly to `target` VUs over `duration`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(with = "duration_text")]
    pub duration: Duration,
    pub target: u32,
}

impl Stage {
    pub fn new(duration: Duration, target: u32) -> Self {
        Self { duration, target }
    }
}

/// Ordered ramp stages, starting from zero VUs at t=0
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioProfile {
    pub stages: Vec<Stage>,
}

impl ScenarioProfile {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// Hold `vus` for `duration`. The first stage has zero length so the
    /// target jumps straight to `vus`.
    pub fn constant(vus: u32, duration: Duration) -> Self {
        Self::new(vec![Stage::new(Duration::ZERO, vus), Stage::new(duration, vus)])
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Sum of all stage durations
    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |total, s| total.saturating_add(s.duration))
    }

    /// Highest target across stages
    pub fn max_target(&self) -> u32 {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// Target VU count at `elapsed`, interpolated between stage boundaries.
    /// Past the end of the profile the last target holds.
    pub fn target_at(&self, elapsed: Duration) -> u32 {
        let mut stage_start = Duration::ZERO;
        let mut previous = 0u32;

        for stage in &self.stages {
            let stage_end = stage_start.saturating_add(stage.duration);
            if elapsed < stage_end {
                let progress = (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                let delta = f64::from(stage.target) - f64::from(previous);
                return (f64::from(previous) + delta * progress).round().max(0.0) as u32;
            }
            stage_start = stage_end;
            previous = stage.target;
        }
        previous
    }

    /// Whether the stage active at `elapsed` changes the VU count, as
    /// opposed to holding it
    pub fn is_ramping_at(&self, elapsed: Duration) -> bool {
        let mut stage_start = Duration::ZERO;
        let mut previous = 0u32;
        for stage in &self.stages {
            let stage_end = stage_start.saturating_add(stage.duration);
            if elapsed < stage_end {
                return stage.target != previous;
            }
            stage_start = stage_end;
            previous = stage.target;
        }
        false
    }

    /// Parse `30s:10,1m:10,10s:0`
    pub fn parse_stages(spec: &str) -> Result<Self> {
        let mut stages = Vec::new();
        let mut total = Duration::ZERO;
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (duration, target) = part.split_once(':').ok_or_else(|| {
                HarnessError::Config(format!("stage '{part}' must look like '<duration>:<target>'"))
            })?;
            let target = target
                .trim()
                .parse::<u32>()
                .map_err(|e| HarnessError::Config(format!("stage '{part}' target: {e}")))?;
            let duration = parse_duration(duration)?;
            total = total
                .checked_add(duration)
                .ok_or_else(|| HarnessError::InvalidDuration(spec.to_string()))?;
            stages.push(Stage::new(duration, target));
        }
        Ok(Self::new(stages))
    }

    /// Built-in profile by name
    pub fn named(name: &str) -> Result<Self> {
        let secs = Duration::from_secs;
        let profile = match name {
            "standard" => Self::new(vec![
                Stage::new(secs(60), 50),
                Stage::new(secs(120), 50),
                Stage::new(secs(60), 100),
                Stage::new(secs(120), 100),
                Stage::new(secs(60), 0),
            ]),
            "secondary-stress" => Self::new(vec![
                Stage::new(secs(30), 10),
                Stage::new(secs(60), 10),
                Stage::new(secs(30), 25),
                Stage::new(secs(60), 25),
                Stage::new(secs(30), 0),
            ]),
            "spike" => Self::new(vec![
                Stage::new(secs(10), 100),
                Stage::new(secs(30), 100),
                Stage::new(secs(10), 0),
            ]),
            "smoke" => Self::constant(1, secs(10)),
            "single" => Self::default(),
            other => return Err(HarnessError::UnknownProfile(other.to_string())),
        };
        Ok(profile)
    }

    pub fn profile_names() -> &'static [&'static str] {
        &["standard", "secondary-stress", "spike", "smoke", "single"]
    }
}

impl fmt::Display for ScenarioProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.stages.is_empty() {
            return f.write_str("single pass");
        }
        let parts: Vec<String> = self
            .stages
            .iter()
            .map(|s| format!("{}:{}", format_duration(s.duration), s.target))
            .collect();
        f.write_str(&parts.join(","))
    }
}

/// Parse `500ms`, `30s`, `2m`, `1h`, or compounds like `1m30s`. A bare
/// number is milliseconds.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return Err(HarnessError::InvalidDuration(input.to_string()));
    }
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| HarnessError::InvalidDuration(input.to_string()))?;
        if digits == 0 {
            return Err(HarnessError::InvalidDuration(input.to_string()));
        }
        let value: f64 = rest[..digits]
            .parse()
            .map_err(|_| HarnessError::InvalidDuration(input.to_string()))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let seconds = match &rest[..unit_len] {
            "ms" => value / 1000.0,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            _ => return Err(HarnessError::InvalidDuration(input.to_string())),
        };
        let invalid = || HarnessError::InvalidDuration(input.to_string());
        let step = Duration::try_from_secs_f64(seconds).map_err(|_| invalid())?;
        total = total.checked_add(step).ok_or_else(invalid)?;
        rest = &rest[unit_len..];
    }
    Ok(total)
}

/// Inverse of [`parse_duration`] for whole-unit values
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms == 0 {
        "0s".to_string()
    } else if ms % 60_000 == 0 {
        format!("{}m", ms / 60_000)
    } else if ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{ms}ms")
    }
}

pub(crate) mod duration_text {
    use super::*;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
    }

    #[test]
    fn test_parse_duration_out_of_range() {
        let huge = "999999999999999999999999999999h";
        assert!(matches!(parse_duration(huge), Err(HarnessError::InvalidDuration(_))));
        assert!(matches!(
            parse_duration("9000000000000000000s9000000000000000000s9000000000000000000s"),
            Err(HarnessError::InvalidDuration(_))
        ));
        assert!(matches!(
            ScenarioProfile::parse_stages(&format!("{huge}:10")),
            Err(HarnessError::InvalidDuration(_))
        ));
        assert!(matches!(
            ScenarioProfile::parse_stages("9000000000000000000s:1,9000000000000000000s:1,9000000000000000000s:1"),
            Err(HarnessError::InvalidDuration(_))
        ));
    }

    #[test]
    fn test_total_duration_saturates() {
        let profile = ScenarioProfile::new(vec![Stage::new(Duration::MAX, 1), Stage::new(Duration::MAX, 2)]);
        assert_eq!(profile.total_duration(), Duration::MAX);
        assert_eq!(profile.target_at(Duration::from_secs(1)), 0);
        assert!(profile.is_ramping_at(Duration::from_secs(1)));
    }

    #[test]
    fn test_linear_ramp() {
        let profile = ScenarioProfile::new(vec![Stage::new(Duration::from_secs(10), 100)]);
        assert_eq!(profile.target_at(Duration::ZERO), 0);
        assert_eq!(profile.target_at(Duration::from_secs(5)), 50);
        assert_eq!(profile.target_at(Duration::from_secs(10)), 100);
        assert_eq!(profile.target_at(Duration::from_secs(60)), 100);
    }

    #[test]
    fn test_ramp_down_between_stages() {
        let profile = ScenarioProfile::new(vec![
            Stage::new(Duration::from_secs(10), 20),
            Stage::new(Duration::from_secs(10), 20),
            Stage::new(Duration::from_secs(10), 0),
        ]);
        assert_eq!(profile.target_at(Duration::from_secs(15)), 20);
        assert_eq!(profile.target_at(Duration::from_secs(25)), 10);
        assert_eq!(profile.target_at(Duration::from_secs(30)), 0);
        assert_eq!(profile.total_duration(), Duration::from_secs(30));
        assert_eq!(profile.max_target(), 20);
        assert!(profile.is_ramping_at(Duration::from_secs(5)));
        assert!(!profile.is_ramping_at(Duration::from_secs(15)));
        assert!(profile.is_ramping_at(Duration::from_secs(25)));
    }

    #[test]
    fn test_constant_profile_jumps() {
        let profile = ScenarioProfile::constant(5, Duration::from_secs(3));
        assert_eq!(profile.target_at(Duration::ZERO), 5);
        assert_eq!(profile.target_at(Duration::from_millis(2900)), 5);
    }

    #[test]
    fn test_parse_stages() {
        let profile = ScenarioProfile::parse_stages("30s:10, 1m:10,10s:0").unwrap();
        assert_eq!(profile.stages.len(), 3);
        assert_eq!(profile.stages[1], Stage::new(Duration::from_secs(60), 10));
        assert_eq!(profile.to_string(), "30s:10,1m:10,10s:0");
        assert!(ScenarioProfile::parse_stages("30s").is_err());
        assert!(ScenarioProfile::parse_stages("30s:-1").is_err());
    }

    #[test]
    fn test_named_profiles() {
        for name in ScenarioProfile::profile_names() {
            assert!(ScenarioProfile::named(name).is_ok(), "{name}");
        }
        let standard = ScenarioProfile::named("standard").unwrap();
        assert_eq!(standard.total_duration(), Duration::from_secs(420));
        assert!(ScenarioProfile::named("single").unwrap().is_empty());
        assert!(matches!(
            ScenarioProfile::named("nope"),
            Err(HarnessError::UnknownProfile(_))
        ));
    }

    #[test]
    fn test_stage_serde() {
        let stage: Stage = serde_json::from_str(r#"{"duration":"1m","target":50}"#).unwrap();
        assert_eq!(stage, Stage::new(Duration::from_secs(60), 50));
        let text = serde_json::to_string(&stage).unwrap();
        assert!(text.contains("\"1m\""));
    }
}
