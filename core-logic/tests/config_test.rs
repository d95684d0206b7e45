use core_logic::{BatchConfig, ConfigError, EndpointConfig};

#[derive(Debug, serde::Deserialize)]
struct Sections {
    betting: BatchConfig,
    endpoints: EndpointConfig,
}

#[test]
fn test_batch_config_defaults_pace_to_zero() {
    let parsed: BatchConfig = serde_json::from_str(r#"{"concurrency_limit": 20}"#).unwrap();
    assert_eq!(parsed, BatchConfig::new(20, 0));
    assert!(parsed.pace_delay().is_zero());
}

#[test]
fn test_sections_from_json() {
    let raw = r#"{
        "betting": { "concurrency_limit": 40, "pace_delay_ms": 80 },
        "endpoints": { "urls": ["https://a.example.com", "https://b.example.com"] }
    }"#;
    let sections: Sections = serde_json::from_str(raw).unwrap();

    assert_eq!(sections.betting.pace_delay_ms, 80);
    assert_eq!(sections.endpoints.urls.len(), 2);
    assert_eq!(sections.endpoints.settle_delay_ms, 2000);
    assert!(sections.endpoints.validate().is_ok());
}

#[test]
fn test_validation_errors() {
    let zero = BatchConfig::new(0, 10);
    match zero.validate("claims.check") {
        Err(ConfigError::InvalidValue { field, .. }) => {
            assert_eq!(field, "claims.check.concurrency_limit")
        }
        other => panic!("unexpected: {:?}", other),
    }

    let empty = EndpointConfig {
        urls: vec![],
        settle_delay_ms: 0,
    };
    assert!(matches!(
        empty.validate(),
        Err(ConfigError::MissingField { .. })
    ));
}
