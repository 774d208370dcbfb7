//! Integration tests for configuration loading and validation
//!
//! Note: Tests that modify environment variables should be run with --test-threads=1
//! to avoid interference between tests.

use meridian::config::load_config;
use secrecy::ExposeSecret;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tempfile::NamedTempFile;

// Mutex to serialize tests that modify environment variables
static ENV_MUTEX: Mutex<()> = Mutex::new(());

fn cleanup_env_vars() {
    std::env::remove_var("MERIDIAN_APPLICATION_LOG_LEVEL");
    std::env::remove_var("MERIDIAN_CONVERTER_BASE_URL");
    std::env::remove_var("MERIDIAN_EXPORT_MAX_CONCURRENCY");
    std::env::remove_var("MERIDIAN_STORE_TIMEOUT_SECONDS");
    std::env::remove_var("TEST_CONVERTER_TOKEN");
}

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[test]
fn test_load_complete_config() {
    let _lock = ENV_MUTEX.lock().unwrap();
    cleanup_env_vars();
    let temp_file = write_config(
        r#"
[application]
log_level = "debug"
actor = "meridian-test"
organization_id = "org-main"

[converter]
base_url = "https://convert.example.com/"
api_version = "2023-01-01"
timeout_seconds = 15
api_key = "plain-token"

[store]
root_path = "/srv/meridian/store"
timeout_seconds = 10

[state]
jobs_path = "/srv/meridian/jobs"

[import]
max_payload_bytes = 2048

[export]
output_dir = "/srv/meridian/out"
link_ttl_hours = 6
max_concurrency = 16

[matching]
match_threshold = 0.95
review_threshold = 0.7

[logging]
local_enabled = false
local_path = "/tmp/meridian"
local_rotation = "hourly"
"#,
    );

    let config = load_config(temp_file.path()).expect("Failed to load config");

    assert_eq!(config.application.log_level, "debug");
    assert_eq!(config.application.actor, "meridian-test");
    assert_eq!(config.application.organization_id, "org-main");

    let converter = config.converter.as_ref().unwrap();
    assert_eq!(converter.base_url, "https://convert.example.com/");
    assert_eq!(converter.api_version, "2023-01-01");
    assert_eq!(converter.timeout_seconds, 15);
    assert_eq!(
        converter.api_key.as_ref().unwrap().expose_secret().as_ref(),
        "plain-token"
    );

    assert_eq!(config.store.root_path, PathBuf::from("/srv/meridian/store"));
    assert_eq!(config.store.timeout_seconds, 10);
    assert_eq!(config.state.jobs_path, PathBuf::from("/srv/meridian/jobs"));
    assert_eq!(config.import.max_payload_bytes, 2048);
    assert_eq!(config.export.link_ttl_hours, 6);
    assert_eq!(config.export.max_concurrency, 16);
    assert_eq!(config.matching.match_threshold, 0.95);
    assert!(!config.logging.local_enabled);
    assert_eq!(config.logging.local_rotation, "hourly");
}

#[test]
fn test_load_empty_config_with_defaults() {
    let _lock = ENV_MUTEX.lock().unwrap();
    cleanup_env_vars();
    let temp_file = write_config("");

    let config = load_config(temp_file.path()).expect("Failed to load config");

    assert_eq!(config.application.log_level, "info");
    assert_eq!(config.application.actor, "meridian");
    assert!(config.converter.is_none());
    assert_eq!(config.store.timeout_seconds, 30);
    assert_eq!(config.import.max_payload_bytes, 10 * 1024 * 1024);
    assert_eq!(config.export.link_ttl_hours, 24);
    assert_eq!(config.export.max_concurrency, 4);
    assert_eq!(config.matching.review_threshold, 0.6);
    assert_eq!(config.logging.local_rotation, "daily");
}

#[test]
fn test_env_var_substitution() {
    let _lock = ENV_MUTEX.lock().unwrap();
    cleanup_env_vars();
    std::env::set_var("TEST_CONVERTER_TOKEN", "secret_token");

    let temp_file = write_config(
        r#"
# api_key = "${UNSET_IN_A_COMMENT}"
[converter]
base_url = "https://convert.example.com"
api_key = "${TEST_CONVERTER_TOKEN}"
"#,
    );

    let config = load_config(temp_file.path()).expect("Failed to load config");
    let converter = config.converter.unwrap();
    assert_eq!(
        converter.api_key.unwrap().expose_secret().as_ref(),
        "secret_token"
    );

    std::env::remove_var("TEST_CONVERTER_TOKEN");
}

#[test]
fn test_env_var_overrides() {
    let _lock = ENV_MUTEX.lock().unwrap();
    cleanup_env_vars();
    std::env::set_var("MERIDIAN_APPLICATION_LOG_LEVEL", "trace");
    std::env::set_var("MERIDIAN_EXPORT_MAX_CONCURRENCY", "12");
    std::env::set_var("MERIDIAN_CONVERTER_BASE_URL", "http://localhost:8080");

    let temp_file = write_config(
        r#"
[application]
log_level = "info"

[export]
max_concurrency = 2
"#,
    );

    let config = load_config(temp_file.path()).expect("Failed to load config");

    assert_eq!(config.application.log_level, "trace");
    assert_eq!(config.export.max_concurrency, 12);
    assert_eq!(
        config.converter.map(|c| c.base_url),
        Some("http://localhost:8080".to_string())
    );

    cleanup_env_vars();
}

#[test]
fn test_invalid_override_is_rejected() {
    let _lock = ENV_MUTEX.lock().unwrap();
    cleanup_env_vars();
    std::env::set_var("MERIDIAN_STORE_TIMEOUT_SECONDS", "soon");

    let temp_file = write_config("");
    assert!(load_config(temp_file.path()).is_err());

    cleanup_env_vars();
}

#[test]
fn test_invalid_config_validation() {
    let _lock = ENV_MUTEX.lock().unwrap();
    cleanup_env_vars();

    for content in [
        "[application]\nlog_level = \"invalid_level\"\n",
        "[matching]\nmatch_threshold = 0.5\nreview_threshold = 0.8\n",
        "[converter]\nbase_url = \"ftp://convert.example.com\"\n",
        "[logging]\nlocal_rotation = \"weekly\"\n",
    ] {
        let temp_file = write_config(content);
        assert!(load_config(temp_file.path()).is_err(), "accepted: {content}");
    }
}
