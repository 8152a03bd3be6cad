//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.
//! We test observable outcomes, not implementation details of TOML parsing.

use feedping::config::{ConfigError, Credentials, FeedpingConfig};
use feedping::transport::TlsMode;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[broker]
broker_url = "mqtts://io.adafruit.com:8883"

[auth]
username_env = "AIO_USER"
key_env = "AIO_KEY"

[feed]
key = "doorbell"

[publish]
payload = "ring"
qos = 1
timeout_ms = 2000

[retry]
max_attempts = 3
"#
    )
    .unwrap();

    let config = FeedpingConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.broker.broker_url, "mqtts://io.adafruit.com:8883");
    assert_eq!(config.auth.username_env, "AIO_USER");
    assert_eq!(config.auth.key_env, "AIO_KEY");
    assert_eq!(config.feed.key, "doorbell");
    assert_eq!(config.publish.payload, "ring");
    assert_eq!(config.publish_timeout(), Duration::from_secs(2));
    assert_eq!(config.retry.max_attempts, 3);
}

#[test]
fn test_config_empty_file_uses_defaults() {
    let temp_file = NamedTempFile::new().unwrap();

    let config = FeedpingConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config, FeedpingConfig::default());
    assert_eq!(config.feed.key, "beeper");
    assert_eq!(config.publish.payload, "true");
    assert_eq!(config.auth.username_env, "ADAFRUIT_IO_USERNAME");
    assert_eq!(config.auth.key_env, "ADAFRUIT_IO_KEY");
}

#[test]
fn test_config_returns_error_for_invalid_toml_syntax() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[broker\nbroker_url = ").unwrap();

    let result = FeedpingConfig::load_from_file(temp_file.path());

    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_returns_error_for_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("feedping.toml");

    let result = FeedpingConfig::load_from_file(&missing);

    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_config_returns_error_for_unsupported_scheme() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[broker]
broker_url = "https://io.adafruit.com"
"#
    )
    .unwrap();

    let result = FeedpingConfig::load_from_file(temp_file.path());

    assert!(matches!(result, Err(ConfigError::InvalidBrokerUrl(_))));
}

#[test]
fn test_config_returns_error_for_out_of_range_qos() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[publish]
qos = 5
"#
    )
    .unwrap();

    let result = FeedpingConfig::load_from_file(temp_file.path());

    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_config_returns_error_for_zero_timeout() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[publish]
timeout_ms = 0
"#
    )
    .unwrap();

    let result = FeedpingConfig::load_from_file(temp_file.path());

    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_config_returns_error_for_wildcard_account() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[feed]
account = "team/+"
"#
    )
    .unwrap();

    let result = FeedpingConfig::load_from_file(temp_file.path());

    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_config_resolves_credentials_from_named_env_vars() {
    let mut config = FeedpingConfig::default();
    config.auth.username_env = "FEEDPING_TEST_CONFIG_USER".to_string();
    config.auth.key_env = "FEEDPING_TEST_CONFIG_KEY".to_string();
    std::env::set_var("FEEDPING_TEST_CONFIG_USER", "acct");
    std::env::set_var("FEEDPING_TEST_CONFIG_KEY", "aio_testkey");

    let credentials = config.credentials().unwrap();

    assert_eq!(credentials, Credentials::new("acct", "aio_testkey"));
    assert_eq!(config.feed_topic(&credentials).unwrap(), "acct/feeds/beeper");
}

#[test]
fn test_config_rejects_empty_credential_env_var() {
    let mut config = FeedpingConfig::default();
    config.auth.username_env = "FEEDPING_TEST_EMPTY_USER".to_string();
    std::env::set_var("FEEDPING_TEST_EMPTY_USER", "");

    let result = config.credentials();

    assert!(matches!(result, Err(ConfigError::EnvVarNotFound(_))));
}

#[test]
fn test_config_reads_custom_ca_file() {
    let mut ca_file = NamedTempFile::new().unwrap();
    write!(ca_file, "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n").unwrap();

    let mut config = FeedpingConfig::default();
    config.broker.ca_file = Some(ca_file.path().to_path_buf());

    let target = config
        .broker_target(Credentials::new("acct", "key"))
        .unwrap();

    assert_eq!(target.host, "io.adafruit.com");
    assert_eq!(target.port, 8883);
    assert!(matches!(target.tls, TlsMode::CustomCa(ref pem) if pem.starts_with(b"-----BEGIN")));
}

#[test]
fn test_config_missing_ca_file_is_read_error() {
    let mut config = FeedpingConfig::default();
    config.broker.ca_file = Some("/nonexistent/feedping-ca.pem".into());

    let result = config.broker_target(Credentials::new("acct", "key"));

    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}
