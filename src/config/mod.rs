//! Configuration management for Meridian.
//!
//! This module provides TOML-based configuration loading, parsing, and validation.
//!
//! # Overview
//!
//! Meridian uses TOML configuration files with support for:
//! - Environment variable substitution (`${VAR_NAME}`)
//! - `MERIDIAN_<SECTION>_<KEY>` environment overrides
//! - Default values for every optional setting
//! - Validation per section
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use meridian::config::load_config;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("meridian.toml")?;
//!
//! println!("Store: {}", config.store.root_path.display());
//! if let Some(converter) = &config.converter {
//!     println!("Converter: {}", converter.base_url);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration Structure
//!
//! - [`ApplicationConfig`] - Log level, provenance actor, default organization
//! - [`ConverterConfig`] - External C-CDA / HL7 v2 converter
//! - [`StoreConfig`] - Clinical store location and query timeout
//! - [`StateConfig`] - Job state persistence
//! - [`ImportConfig`] - Payload limits
//! - [`ExportConfig`] - Deliverable directory, link lifetime, bulk concurrency
//! - [`MatchingConfig`] - Patient matching thresholds
//! - [`LoggingConfig`] - Logging configuration
//!
//! # Example Configuration
//!
//! ```toml
//! [application]
//! log_level = "info"
//! actor = "meridian"
//!
//! [converter]
//! base_url = "https://convert.example.com"
//! api_key = "${MERIDIAN_CONVERTER_TOKEN}"
//!
//! [store]
//! root_path = "/var/lib/meridian/store"
//!
//! [export]
//! output_dir = "/var/lib/meridian/exports"
//! link_ttl_hours = 24
//! max_concurrency = 4
//! ```

pub mod loader;
pub mod schema;
pub mod secret;

// Re-export commonly used types
pub use loader::load_config;
pub use schema::{
    ApplicationConfig, ConverterConfig, ExportConfig, ImportConfig, LoggingConfig,
    MatchingConfig, MeridianConfig, StateConfig, StoreConfig,
};
pub use secret::{secret_string, SecretString, SecretValue};
