//! Init command implementation
//!
//! This module implements the `init` command for generating a sample
//! configuration file.

use super::{EXIT_CONFIG, EXIT_FATAL, EXIT_OK};
use clap::Args;
use std::fs;
use std::path::Path;

/// Arguments for the init command
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Path where to create the configuration file
    #[arg(short, long, default_value = "meridian.toml")]
    pub output: String,

    /// Include comments explaining every setting
    #[arg(long)]
    pub with_examples: bool,

    /// Overwrite existing file
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    /// Execute the init command
    pub async fn execute(&self) -> anyhow::Result<i32> {
        tracing::info!(output = %self.output, "Initializing configuration file");

        if Path::new(&self.output).exists() && !self.force {
            println!("❌ Configuration file already exists: {}", self.output);
            println!("   Use --force to overwrite");
            return Ok(EXIT_CONFIG);
        }

        let config_content = if self.with_examples {
            Self::generate_config_with_examples()
        } else {
            Self::generate_minimal_config()
        };

        match fs::write(&self.output, config_content) {
            Ok(_) => {
                println!("✅ Configuration file created: {}", self.output);
                println!();
                println!("Next steps:");
                println!("  1. Edit {} with your settings", self.output);
                println!("  2. For C-CDA or HL7 v2 imports, uncomment [converter] and");
                println!("     set MERIDIAN_CONVERTER_TOKEN in your environment or .env");
                println!("  3. Validate configuration: meridian validate-config");
                println!("  4. Import a document: meridian import --format fhir-r4 bundle.json");
                println!();
                Ok(EXIT_OK)
            }
            Err(e) => {
                println!("❌ Failed to write configuration file");
                println!("   Error: {e}");
                Ok(EXIT_FATAL)
            }
        }
    }

    fn generate_minimal_config() -> String {
        r#"# Meridian Configuration File

[application]
log_level = "info"
actor = "meridian"
organization_id = "default"

# [converter]
# base_url = "https://convert.example.com"
# api_key = "${MERIDIAN_CONVERTER_TOKEN}"

[store]
root_path = "./data/store"
timeout_seconds = 30

[state]
jobs_path = "./data/jobs"

[import]
max_payload_bytes = 10485760

[export]
output_dir = "./data/exports"
link_ttl_hours = 24
max_concurrency = 4

[matching]
match_threshold = 0.9
review_threshold = 0.6

[logging]
local_enabled = true
local_path = "./logs"
local_rotation = "daily"
"#
        .to_string()
    }

    fn generate_config_with_examples() -> String {
        r#"# Meridian Configuration File
#
# Every setting below shows its default. Any of them can be overridden with
# an environment variable named MERIDIAN_<SECTION>_<KEY>, for example
# MERIDIAN_EXPORT_MAX_CONCURRENCY=8. Values may reference environment
# variables with ${NAME}; a .env file next to the binary is loaded first.

# ============================================================================
# Application Settings
# ============================================================================
[application]
# Log level (trace, debug, info, warn, error)
log_level = "info"

# Identity recorded as the actor on every provenance record
actor = "meridian"

# Organization used when a command does not name one
organization_id = "default"

# ============================================================================
# Document Converter
# ============================================================================
# Required for C-CDA and HL7 v2 imports. Generation A bundles (fhir-r4) are
# imported without it.
#
# [converter]
# base_url = "https://convert.example.com"
# api_version = "2024-05-01-preview"
# timeout_seconds = 60
# api_key = "${MERIDIAN_CONVERTER_TOKEN}"

# ============================================================================
# Clinical Store
# ============================================================================
[store]
# Directory holding patients and resources
root_path = "./data/store"

# Time budget of a single store call
timeout_seconds = 30

# ============================================================================
# Job State
# ============================================================================
[state]
# Directory holding job records and the provenance log
jobs_path = "./data/jobs"

# ============================================================================
# Import
# ============================================================================
[import]
# Largest accepted document after base64 decoding
max_payload_bytes = 10485760

# ============================================================================
# Export
# ============================================================================
[export]
# Directory deliverables are published to
output_dir = "./data/exports"

# Hours a deliverable stays retrievable
link_ttl_hours = 24

# Patients exported at the same time during an organization export (1-64)
max_concurrency = 4

# ============================================================================
# Patient Matching
# ============================================================================
[matching]
# A single candidate at or above this score is accepted
match_threshold = 0.9

# Candidates at or above this score are offered for review
review_threshold = 0.6

# ============================================================================
# Logging
# ============================================================================
[logging]
# Write JSON log files in addition to console output
local_enabled = true
local_path = "./logs"

# Rotation (daily or hourly)
local_rotation = "daily"
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeridianConfig;

    #[test]
    fn test_generated_configs_parse_and_validate() {
        for content in [
            InitArgs::generate_minimal_config(),
            InitArgs::generate_config_with_examples(),
        ] {
            let config: MeridianConfig = toml::from_str(&content).unwrap();
            config.validate().unwrap();
            assert!(config.converter.is_none());
        }
    }

    #[tokio::test]
    async fn test_existing_file_is_not_overwritten() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("meridian.toml");
        fs::write(&path, "# keep").unwrap();

        let args = InitArgs {
            output: path.to_string_lossy().to_string(),
            with_examples: false,
            force: false,
        };
        assert_eq!(args.execute().await.unwrap(), EXIT_CONFIG);
        assert_eq!(fs::read_to_string(&path).unwrap(), "# keep");
    }
}
