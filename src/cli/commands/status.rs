//! Status command implementation
//!
//! Shows the stored record of an import or export job.

use super::services::Services;
use super::{EXIT_CONFIG, EXIT_FATAL, EXIT_OK};
use crate::config::load_config;
use crate::domain::{JobId, MeridianError};
use clap::Args;

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Job to look up
    #[arg(value_name = "JOB_ID")]
    pub job_id: JobId,

    /// Print the full job record as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    /// Execute the status command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("❌ {e}");
                return Ok(EXIT_CONFIG);
            }
        };
        let services = Services::open(&config).await?;

        match services.jobs.load_import(&self.job_id).await {
            Ok(job) => {
                if self.json {
                    println!("{}", serde_json::to_string_pretty(&job)?);
                } else {
                    println!("📊 Import {}", job.id);
                    println!("  Status: {} ({})", job.status, job.stage);
                    println!("  Format: {}", job.format);
                    println!("  Resources: {}", job.counts.total());
                    println!("  Warnings: {}", job.warnings.len());
                    println!("  Errors: {}", job.errors.len());
                    println!("  Updated: {}", job.updated_at.to_rfc3339());
                }
                return Ok(EXIT_OK);
            }
            Err(MeridianError::State(_)) => {}
            Err(e) => return Err(e.into()),
        }

        match services.jobs.load_export(&self.job_id).await {
            Ok(job) => {
                if self.json {
                    println!("{}", serde_json::to_string_pretty(&job)?);
                } else {
                    println!("📊 Export {}", job.id);
                    println!("  Status: {}", job.status);
                    println!("  Format: {}", job.format);
                    println!("  Resources: {}", job.resource_count);
                    if let Some(ref location) = job.location {
                        println!("  Location: {location}");
                    }
                    println!("  Updated: {}", job.updated_at.to_rfc3339());
                }
                Ok(EXIT_OK)
            }
            Err(MeridianError::State(_)) => {
                println!("No job found with id {}", self.job_id);
                Ok(EXIT_FATAL)
            }
            Err(e) => Err(e.into()),
        }
    }
}
