//! Configuration schema types
//!
//! Every section has defaults, so a minimal `meridian.toml` only needs the
//! settings that differ from them. The converter section is optional: it is
//! only required for C-CDA and HL7 v2 imports.

use crate::config::SecretString;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main Meridian configuration
///
/// This is the root configuration structure that maps to the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeridianConfig {
    /// Application-level settings
    #[serde(default)]
    pub application: ApplicationConfig,

    /// External document converter (required for C-CDA and HL7 v2 imports)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converter: Option<ConverterConfig>,

    /// Clinical store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Job state persistence
    #[serde(default)]
    pub state: StateConfig,

    /// Import pipeline settings
    #[serde(default)]
    pub import: ImportConfig,

    /// Export pipeline settings
    #[serde(default)]
    pub export: ExportConfig,

    /// Patient matching thresholds
    #[serde(default)]
    pub matching: MatchingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MeridianConfig {
    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid
    pub fn validate(&self) -> Result<(), String> {
        self.application.validate()?;
        if let Some(ref converter) = self.converter {
            converter.validate()?;
        }
        self.store.validate()?;
        self.state.validate()?;
        self.import.validate()?;
        self.export.validate()?;
        self.matching.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Actor recorded on provenance entries
    #[serde(default = "default_actor")]
    pub actor: String,

    /// Organization used when a command does not name one
    #[serde(default = "default_organization_id")]
    pub organization_id: String,
}

impl ApplicationConfig {
    fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            ));
        }
        if self.actor.trim().is_empty() {
            return Err("application.actor cannot be empty".to_string());
        }
        if self.organization_id.trim().is_empty() {
            return Err("application.organization_id cannot be empty".to_string());
        }
        Ok(())
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            actor: default_actor(),
            organization_id: default_organization_id(),
        }
    }
}

/// External document converter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Base URL of the conversion service
    pub base_url: String,

    /// `api-version` query parameter sent with every conversion
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Request timeout in seconds
    #[serde(default = "default_converter_timeout")]
    pub timeout_seconds: u64,

    /// Bearer token for the service
    /// Stored securely in memory and automatically zeroized on drop
    #[serde(default)]
    pub api_key: Option<SecretString>,
}

impl ConverterConfig {
    fn validate(&self) -> Result<(), String> {
        use secrecy::ExposeSecret;

        if self.base_url.is_empty() {
            return Err("converter.base_url cannot be empty".to_string());
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err("converter.base_url must start with http:// or https://".to_string());
        }
        if self.api_version.trim().is_empty() {
            return Err("converter.api_version cannot be empty".to_string());
        }
        if self.timeout_seconds == 0 {
            return Err("converter.timeout_seconds must be > 0".to_string());
        }
        if let Some(ref key) = self.api_key {
            if key.expose_secret().as_ref().is_empty() {
                return Err("converter.api_key cannot be empty when set".to_string());
            }
        }
        Ok(())
    }
}

/// Clinical store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding stored resources and the patient index
    #[serde(default = "default_store_root")]
    pub root_path: PathBuf,

    /// Timeout in seconds for a single store query during export
    #[serde(default = "default_store_timeout")]
    pub timeout_seconds: u64,
}

impl StoreConfig {
    fn validate(&self) -> Result<(), String> {
        if self.root_path.as_os_str().is_empty() {
            return Err("store.root_path cannot be empty".to_string());
        }
        if self.timeout_seconds == 0 {
            return Err("store.timeout_seconds must be > 0".to_string());
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root_path: default_store_root(),
            timeout_seconds: default_store_timeout(),
        }
    }
}

/// Job state configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Directory holding one JSON document per job
    #[serde(default = "default_jobs_path")]
    pub jobs_path: PathBuf,
}

impl StateConfig {
    fn validate(&self) -> Result<(), String> {
        if self.jobs_path.as_os_str().is_empty() {
            return Err("state.jobs_path cannot be empty".to_string());
        }
        Ok(())
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            jobs_path: default_jobs_path(),
        }
    }
}

/// Import pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Largest accepted decoded payload in bytes
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

impl ImportConfig {
    fn validate(&self) -> Result<(), String> {
        if self.max_payload_bytes == 0 {
            return Err("import.max_payload_bytes must be > 0".to_string());
        }
        Ok(())
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

/// Export pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Directory deliverables are published to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Hours a published deliverable stays retrievable
    #[serde(default = "default_link_ttl_hours")]
    pub link_ttl_hours: u64,

    /// Patients exported concurrently during a bulk export
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl ExportConfig {
    fn validate(&self) -> Result<(), String> {
        if self.output_dir.as_os_str().is_empty() {
            return Err("export.output_dir cannot be empty".to_string());
        }
        if self.link_ttl_hours == 0 {
            return Err("export.link_ttl_hours must be > 0".to_string());
        }
        if !(1..=64).contains(&self.max_concurrency) {
            return Err(format!(
                "export.max_concurrency must be between 1 and 64, got {}",
                self.max_concurrency
            ));
        }
        Ok(())
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            link_ttl_hours: default_link_ttl_hours(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Patient matching thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Score at or above which a single candidate is accepted
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,

    /// Score at or above which a candidate is offered for review
    #[serde(default = "default_review_threshold")]
    pub review_threshold: f64,
}

impl MatchingConfig {
    fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.match_threshold) {
            return Err(format!(
                "matching.match_threshold must be between 0.0 and 1.0, got {}",
                self.match_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.review_threshold) {
            return Err(format!(
                "matching.review_threshold must be between 0.0 and 1.0, got {}",
                self.review_threshold
            ));
        }
        if self.review_threshold > self.match_threshold {
            return Err(
                "matching.review_threshold cannot exceed matching.match_threshold".to_string(),
            );
        }
        Ok(())
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            match_threshold: default_match_threshold(),
            review_threshold: default_review_threshold(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Enable local JSON file logging
    #[serde(default = "default_true")]
    pub local_enabled: bool,

    /// Local log directory
    #[serde(default = "default_local_path")]
    pub local_path: String,

    /// Log rotation strategy
    #[serde(default = "default_local_rotation")]
    pub local_rotation: String,
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), String> {
        let valid_rotations = ["daily", "hourly"];
        if !valid_rotations.contains(&self.local_rotation.as_str()) {
            return Err(format!(
                "Invalid logging.local_rotation '{}'. Must be one of: {}",
                self.local_rotation,
                valid_rotations.join(", ")
            ));
        }
        if self.local_enabled && self.local_path.is_empty() {
            return Err("logging.local_path cannot be empty when file logging is enabled".to_string());
        }
        Ok(())
    }

    /// Console-only logging, used before a configuration file is loaded
    pub fn console_only() -> Self {
        Self {
            local_enabled: false,
            local_path: String::new(),
            local_rotation: default_local_rotation(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            local_enabled: true,
            local_path: default_local_path(),
            local_rotation: default_local_rotation(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_actor() -> String {
    "meridian".to_string()
}

fn default_organization_id() -> String {
    "default".to_string()
}

fn default_api_version() -> String {
    "2024-05-01-preview".to_string()
}

fn default_converter_timeout() -> u64 {
    60
}

fn default_store_root() -> PathBuf {
    PathBuf::from("./data/store")
}

fn default_store_timeout() -> u64 {
    30
}

fn default_jobs_path() -> PathBuf {
    PathBuf::from("./data/jobs")
}

fn default_max_payload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./data/exports")
}

fn default_link_ttl_hours() -> u64 {
    24
}

fn default_max_concurrency() -> usize {
    4
}

fn default_match_threshold() -> f64 {
    0.9
}

fn default_review_threshold() -> f64 {
    0.6
}

fn default_true() -> bool {
    true
}

fn default_local_path() -> String {
    "./logs".to_string()
}

fn default_local_rotation() -> String {
    "daily".to_string()
}
