//! Configuration loader with TOML parsing and environment variable overrides

use super::schema::MeridianConfig;
use super::secret::secret_string;
use crate::domain::errors::MeridianError;
use crate::domain::result::Result;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Loads configuration from a TOML file
///
/// This function:
/// 1. Reads the TOML file
/// 2. Performs environment variable substitution (${VAR} syntax)
/// 3. Parses the TOML into MeridianConfig
/// 4. Applies environment variable overrides (MERIDIAN_* prefix)
/// 5. Validates the configuration
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Errors
///
/// Returns an error if:
/// - File cannot be read
/// - TOML parsing fails
/// - A referenced environment variable is not set
/// - Configuration validation fails
///
/// # Examples
///
/// ```no_run
/// use meridian::config::loader::load_config;
///
/// let config = load_config("meridian.toml").expect("Failed to load config");
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<MeridianConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MeridianError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        MeridianError::Configuration(format!(
            "Failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;

    let contents = substitute_env_vars(&contents)?;

    let mut config: MeridianConfig = toml::from_str(&contents)
        .map_err(|e| MeridianError::Configuration(format!("Failed to parse TOML: {}", e)))?;

    apply_env_overrides(&mut config)?;

    config.validate().map_err(|e| {
        MeridianError::Configuration(format!("Configuration validation failed: {}", e))
    })?;

    Ok(config)
}

fn placeholder_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid placeholder regex"))
}

/// Substitutes environment variables in the format ${VAR_NAME}
///
/// Comment lines are left untouched.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = placeholder_pattern();
    let mut lines = Vec::new();
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            lines.push(line.to_string());
            continue;
        }

        let mut processed_line = line.to_string();
        for cap in re.captures_iter(line) {
            let var_name = &cap[1];
            match std::env::var(var_name) {
                Ok(value) => {
                    processed_line = processed_line.replace(&format!("${{{}}}", var_name), &value);
                }
                Err(_) => {
                    if !missing_vars.iter().any(|v| v == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                }
            }
        }
        lines.push(processed_line);
    }

    if !missing_vars.is_empty() {
        return Err(MeridianError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    let mut result = lines.join("\n");
    if input.ends_with('\n') {
        result.push('\n');
    }
    Ok(result)
}

fn parse_override<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        MeridianError::Configuration(format!("Invalid value '{}' for {}", value, name))
    })
}

/// Applies environment variable overrides using MERIDIAN_* prefix
///
/// Environment variables follow the pattern: MERIDIAN_<SECTION>_<KEY>
/// For example: MERIDIAN_CONVERTER_BASE_URL, MERIDIAN_EXPORT_MAX_CONCURRENCY
///
/// Numeric overrides that do not parse are reported as configuration errors.
fn apply_env_overrides(config: &mut MeridianConfig) -> Result<()> {
    let var = |name: &str| std::env::var(name).ok();

    // Application overrides
    if let Some(val) = var("MERIDIAN_APPLICATION_LOG_LEVEL") {
        config.application.log_level = val;
    }
    if let Some(val) = var("MERIDIAN_APPLICATION_ACTOR") {
        config.application.actor = val;
    }
    if let Some(val) = var("MERIDIAN_APPLICATION_ORGANIZATION_ID") {
        config.application.organization_id = val;
    }

    // Converter overrides (a base URL alone is enough to configure it)
    if let Some(val) = var("MERIDIAN_CONVERTER_BASE_URL") {
        match config.converter {
            Some(ref mut converter) => converter.base_url = val,
            None => {
                config.converter = toml::from_str(&format!("base_url = {:?}", val))
                    .map(Some)
                    .map_err(|e| MeridianError::Configuration(e.to_string()))?;
            }
        }
    }
    if let Some(ref mut converter) = config.converter {
        if let Some(val) = var("MERIDIAN_CONVERTER_API_VERSION") {
            converter.api_version = val;
        }
        if let Some(val) = var("MERIDIAN_CONVERTER_TIMEOUT_SECONDS") {
            converter.timeout_seconds = parse_override("MERIDIAN_CONVERTER_TIMEOUT_SECONDS", &val)?;
        }
        if let Some(val) = var("MERIDIAN_CONVERTER_API_KEY") {
            converter.api_key = Some(secret_string(val));
        }
    }

    // Store and state overrides
    if let Some(val) = var("MERIDIAN_STORE_ROOT_PATH") {
        config.store.root_path = PathBuf::from(val);
    }
    if let Some(val) = var("MERIDIAN_STORE_TIMEOUT_SECONDS") {
        config.store.timeout_seconds = parse_override("MERIDIAN_STORE_TIMEOUT_SECONDS", &val)?;
    }
    if let Some(val) = var("MERIDIAN_STATE_JOBS_PATH") {
        config.state.jobs_path = PathBuf::from(val);
    }

    // Import overrides
    if let Some(val) = var("MERIDIAN_IMPORT_MAX_PAYLOAD_BYTES") {
        config.import.max_payload_bytes =
            parse_override("MERIDIAN_IMPORT_MAX_PAYLOAD_BYTES", &val)?;
    }

    // Export overrides
    if let Some(val) = var("MERIDIAN_EXPORT_OUTPUT_DIR") {
        config.export.output_dir = PathBuf::from(val);
    }
    if let Some(val) = var("MERIDIAN_EXPORT_LINK_TTL_HOURS") {
        config.export.link_ttl_hours = parse_override("MERIDIAN_EXPORT_LINK_TTL_HOURS", &val)?;
    }
    if let Some(val) = var("MERIDIAN_EXPORT_MAX_CONCURRENCY") {
        config.export.max_concurrency = parse_override("MERIDIAN_EXPORT_MAX_CONCURRENCY", &val)?;
    }

    // Matching overrides
    if let Some(val) = var("MERIDIAN_MATCHING_MATCH_THRESHOLD") {
        config.matching.match_threshold =
            parse_override("MERIDIAN_MATCHING_MATCH_THRESHOLD", &val)?;
    }
    if let Some(val) = var("MERIDIAN_MATCHING_REVIEW_THRESHOLD") {
        config.matching.review_threshold =
            parse_override("MERIDIAN_MATCHING_REVIEW_THRESHOLD", &val)?;
    }

    // Logging overrides
    if let Some(val) = var("MERIDIAN_LOGGING_LOCAL_ENABLED") {
        config.logging.local_enabled = val.parse().unwrap_or(true);
    }
    if let Some(val) = var("MERIDIAN_LOGGING_LOCAL_PATH") {
        config.logging.local_path = val;
    }
    if let Some(val) = var("MERIDIAN_LOGGING_LOCAL_ROTATION") {
        config.logging.local_rotation = val;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_substitute_env_vars() {
        std::env::set_var("MERIDIAN_LOADER_TEST_TOKEN", "test_value");
        let input = "api_key = \"${MERIDIAN_LOADER_TEST_TOKEN}\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "api_key = \"test_value\"");
        std::env::remove_var("MERIDIAN_LOADER_TEST_TOKEN");
    }

    #[test]
    fn test_substitute_env_vars_missing() {
        let input = "api_key = \"${MERIDIAN_LOADER_TEST_UNSET}\"";
        let err = substitute_env_vars(input).unwrap_err();
        assert!(err.to_string().contains("MERIDIAN_LOADER_TEST_UNSET"));
    }

    #[test]
    fn test_substitute_skips_comments() {
        let input = "# api_key = \"${MERIDIAN_LOADER_TEST_COMMENTED}\"\nactor = \"x\"\n";
        assert_eq!(substitute_env_vars(input).unwrap(), input);
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent-meridian.toml");
        assert!(matches!(result, Err(MeridianError::Configuration(_))));
    }

    #[test]
    fn test_load_config_valid() {
        let toml_content = r#"
[application]
log_level = "debug"
actor = "bridge-test"

[converter]
base_url = "https://convert.example.com"

[store]
root_path = "/tmp/meridian-store"

[export]
max_concurrency = 2

[matching]
match_threshold = 0.92
review_threshold = 0.7
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.application.actor, "bridge-test");
        let converter = config.converter.unwrap();
        assert_eq!(converter.base_url, "https://convert.example.com");
        assert_eq!(converter.api_version, "2024-05-01-preview");
        assert_eq!(config.store.root_path, PathBuf::from("/tmp/meridian-store"));
        assert_eq!(config.export.max_concurrency, 2);
        assert_eq!(config.export.link_ttl_hours, 24);
    }

    #[test]
    fn test_load_config_invalid_thresholds() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[matching]\nmatch_threshold = 0.5\nreview_threshold = 0.8\n")
            .unwrap();

        let err = load_config(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("review_threshold"));
    }
}
