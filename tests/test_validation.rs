//! Integration tests for input validation, config loading and log redaction

use token_analyst::config::AppConfig;
use token_analyst::validation::{sanitize_for_logging, validate_api_url, validate_evm_address};

#[test]
fn test_evm_address_validation() {
    assert!(validate_evm_address("0x4200000000000000000000000000000000000006").is_ok());
    // Surrounding whitespace is tolerated, case is normalized
    assert_eq!(
        validate_evm_address("  0xABCDEF0123456789ABCDEF0123456789ABCDEF01 ").unwrap(),
        "0xabcdef0123456789abcdef0123456789abcdef01"
    );

    assert!(validate_evm_address("").is_err());
    assert!(validate_evm_address("4200000000000000000000000000000000000006").is_err());
    assert!(validate_evm_address("0x42000000000000000000000000000000000000zz").is_err());
    assert!(validate_evm_address("0x420000000000000000000000000000000000000600").is_err());
}

#[test]
fn test_api_url_validation() {
    assert!(validate_api_url("https://api.gopluslabs.io/api/v1").is_ok());
    assert!(validate_api_url("http://localhost:8080").is_ok());
    assert!(validate_api_url("http://127.0.0.1:8080").is_ok());

    // Plain HTTP to a remote host is refused
    assert!(validate_api_url("http://api.dexscreener.com").is_err());
    assert!(validate_api_url("not a url").is_err());
    assert!(validate_api_url("").is_err());
}

#[test]
fn test_secrets_are_redacted() {
    let line = "POST https://api.telegram.org/bot123456:AAbbCC_dd-ee/sendMessage failed";
    let clean = sanitize_for_logging(line);
    assert!(!clean.contains("AAbbCC_dd-ee"));
    assert!(clean.contains("bot[REDACTED]"));

    let clean = sanitize_for_logging("Authorization: Bearer abc.def-ghi");
    assert_eq!(clean, "Authorization: Bearer [REDACTED]");
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let mut config = AppConfig::default();
    config.orchestrator.worker_count = 7;
    config.detection.dedup_window_secs = 120;
    config.to_toml_file(&path).unwrap();

    let loaded = AppConfig::from_toml_file(&path).unwrap();
    assert_eq!(loaded.orchestrator.worker_count, 7);
    assert_eq!(loaded.detection.dedup_window_secs, 120);
    assert_eq!(loaded.chain_id, 8453);
}

#[test]
fn test_missing_config_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.orchestrator.queue_capacity, 1000);
    assert_eq!(config.synthesis.confidence_threshold, 0.7);
}

#[test]
fn test_insecure_provider_url_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let mut config = AppConfig::default();
    config.providers.dexscreener_url = "http://api.dexscreener.com".to_string();
    config.to_toml_file(&path).unwrap();

    assert!(AppConfig::from_toml_file(&path).is_err());
}
