#![cfg(feature = "serde")]

use sampling_breaker::{CircuitBreaker, Config, ConfigError, UnhandledProbePolicy};
use std::time::Duration;

#[test]
fn partial_config_falls_back_to_defaults() {
    let config: Config = serde_json::from_str(
        r#"{
            "failure_ratio": 0.25,
            "minimum_throughput": 4,
            "break_duration": { "secs": 2, "nanos": 0 },
            "unhandled_probe": "reopen"
        }"#,
    )
    .unwrap();

    assert_eq!(config.failure_ratio, 0.25);
    assert_eq!(config.minimum_throughput, 4);
    assert_eq!(config.break_duration, Duration::from_secs(2));
    assert_eq!(config.unhandled_probe, UnhandledProbePolicy::Reopen);
    assert_eq!(config.sampling_duration, Config::default().sampling_duration);

    let circuit = CircuitBreaker::builder("from_json").config(config).build();
    assert!(circuit.is_ok());
}

#[test]
fn deserialized_config_is_still_validated() {
    let config: Config = serde_json::from_str(r#"{ "failure_ratio": 1.5 }"#).unwrap();

    let result = CircuitBreaker::new("from_json", config);
    assert_eq!(result.unwrap_err(), ConfigError::FailureRatio(1.5));
}
