//! Configuration loading from files and the environment

use std::io::Write;
use std::time::Duration;

use loadbeat_core::error::HarnessError;
use loadbeat_core::HarnessConfig;
use tempfile::NamedTempFile;

fn write_toml(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_full_file() {
    let file = write_toml(
        r#"
[target]
base_url = "http://localhost:3000/api/v1.0"
request_timeout_seconds = 10

[credentials]
email = "load@example.com"
password = "not-logged"

[pacing]
wait_time_seconds = 0.5

[scenario]
profile = "secondary-stress"
grace_period_seconds = 5
login_statuses = [201]

[[scenario.thresholds]]
metric = "http_req_duration"
expr = "p(95)<1500"

[[scenario.thresholds]]
metric = "http_req_failed"
expr = "rate<0.05"
abort_on_fail = true

[logging]
level = "debug"
format = "json"
"#,
    );

    let config = HarnessConfig::from_file(file.path()).unwrap();
    assert_eq!(config.target.base_url, "http://localhost:3000/api/v1.0");
    assert_eq!(config.request_timeout(), Duration::from_secs(10));
    assert_eq!(config.credentials.password.as_ref().unwrap().expose_secret(), "not-logged");
    assert_eq!(config.wait_time(), Duration::from_millis(500));
    assert_eq!(config.grace_period(), Duration::from_secs(5));
    assert_eq!(config.scenario.login_statuses, vec![201]);
    assert_eq!(config.profile().unwrap().max_target(), 25);

    let thresholds = config.thresholds_or(None);
    assert_eq!(thresholds.len(), 2);
    assert!(thresholds[1].abort_on_fail);
    assert!(config.validate().is_ok());
    assert!(!format!("{config:?}").contains("not-logged"));
}

#[test]
fn test_partial_file_keeps_defaults() {
    let file = write_toml(
        r#"
[target]
base_url = "https://api.example.com"
"#,
    );
    let config = HarnessConfig::from_file(file.path()).unwrap();
    assert_eq!(config.scenario.tick_interval_ms, 100);
    assert_eq!(config.scenario.default_vus, 1);
    assert_eq!(config.logging.format, "text");
    assert!(config.profile().unwrap().is_empty());
}

#[test]
fn test_invalid_threshold_in_file() {
    let file = write_toml(
        r#"
[target]
base_url = "http://localhost"

[[scenario.thresholds]]
metric = "checks"
expr = "rate>>0.9"
"#,
    );
    assert!(matches!(HarnessConfig::from_file(file.path()), Err(HarnessError::Config(_))));
}

#[test]
fn test_missing_file() {
    assert!(HarnessConfig::from_file("/nonexistent/loadbeat.toml").is_err());
}

#[test]
fn test_save_and_reload() {
    let mut config = HarnessConfig::default();
    config.target.base_url = "http://localhost:8080".to_string();
    config.scenario.stages = Some("10s:5,10s:0".to_string());

    let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    config.save_to_file(file.path()).unwrap();
    let reloaded = HarnessConfig::from_file(file.path()).unwrap();
    assert_eq!(reloaded.target.base_url, config.target.base_url);
    assert_eq!(reloaded.profile().unwrap(), config.profile().unwrap());
}
