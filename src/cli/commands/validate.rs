//! Validate config command implementation

use super::{EXIT_CONFIG, EXIT_OK};
use crate::config::load_config;
use clap::Args;

/// Arguments for the validate-config command
#[derive(Args, Debug)]
pub struct ValidateArgs {}

impl ValidateArgs {
    /// Execute the validate-config command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(config_path = %config_path, "Validating configuration");

        println!("🔍 Validating configuration file: {config_path}");
        println!();

        // load_config validates every section before returning
        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Configuration is invalid");
                println!("   Error: {e}");
                return Ok(EXIT_CONFIG);
            }
        };

        println!("✅ Configuration is valid");
        println!();
        println!("Configuration Summary:");
        println!("  Log Level: {}", config.application.log_level);
        println!("  Provenance Actor: {}", config.application.actor);
        println!("  Default Organization: {}", config.application.organization_id);
        match config.converter {
            Some(ref converter) => {
                println!("  Converter: {}", converter.base_url);
                println!("  Converter API Version: {}", converter.api_version);
                println!("  Converter Timeout: {}s", converter.timeout_seconds);
                println!(
                    "  Converter API Key: {}",
                    if converter.api_key.is_some() { "set" } else { "not set" }
                );
            }
            None => println!("  Converter: not configured (fhir-r4 imports only)"),
        }
        println!("  Store: {}", config.store.root_path.display());
        println!("  Store Timeout: {}s", config.store.timeout_seconds);
        println!("  Jobs: {}", config.state.jobs_path.display());
        println!("  Max Payload: {} bytes", config.import.max_payload_bytes);
        println!("  Export Directory: {}", config.export.output_dir.display());
        println!("  Link TTL: {}h", config.export.link_ttl_hours);
        println!("  Bulk Concurrency: {}", config.export.max_concurrency);
        println!(
            "  Match Thresholds: accept >= {}, review >= {}",
            config.matching.match_threshold, config.matching.review_threshold
        );
        println!();
        Ok(EXIT_OK)
    }
}
