//! Export command implementation
//!
//! Exports stored resources for one patient or, with `--organization`, for
//! every patient of an organization.

use super::services::{organization, Services};
use super::{EXIT_CONFIG, EXIT_FATAL, EXIT_OK, EXIT_PARTIAL};
use crate::config::{load_config, MeridianConfig};
use crate::core::export::ExportRequest;
use crate::domain::{
    DateRange, ExportFormat, ExportJob, ExportScope, ExportStatus, MeridianError, PatientId,
    ResourceType, Result,
};
use chrono::NaiveDate;
use clap::Args;
use std::collections::BTreeSet;
use tokio::sync::watch;

/// Arguments for the export command
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Export a single patient
    #[arg(long, conflicts_with = "organization", required_unless_present = "organization")]
    pub patient_id: Option<String>,

    /// Export every patient of an organization
    #[arg(long)]
    pub organization: Option<String>,

    /// Deliverable format (fhir-r5, fhir-r4, ndjson)
    #[arg(short, long, default_value = "fhir-r5")]
    pub format: ExportFormat,

    /// Resource types to include (comma-separated), default all
    #[arg(long, value_delimiter = ',')]
    pub types: Vec<ResourceType>,

    /// Earliest effective date to include (YYYY-MM-DD)
    #[arg(long)]
    pub since: Option<NaiveDate>,

    /// Latest effective date to include (YYYY-MM-DD)
    #[arg(long)]
    pub until: Option<NaiveDate>,

    /// Purpose of use code
    #[arg(long)]
    pub purpose: Option<String>,
}

impl ExportArgs {
    fn scope(&self, config: &MeridianConfig) -> Result<ExportScope> {
        match self.patient_id.as_deref() {
            Some(raw) => PatientId::new(raw)
                .map(ExportScope::Patient)
                .map_err(MeridianError::Configuration),
            None => organization(config, self.organization.as_deref()).map(ExportScope::Organization),
        }
    }

    fn date_range(&self) -> Option<DateRange> {
        if self.since.is_none() && self.until.is_none() {
            return None;
        }
        Some(DateRange::new(self.since, self.until))
    }

    /// Execute the export command
    pub async fn execute(
        &self,
        config_path: &str,
        shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("❌ {e}");
                return Ok(EXIT_CONFIG);
            }
        };
        let scope = match self.scope(&config) {
            Ok(scope) => scope,
            Err(e) => {
                eprintln!("❌ {e}");
                return Ok(EXIT_CONFIG);
            }
        };

        let services = Services::open(&config).await?;
        let pipeline = services.export_pipeline(&config, shutdown_signal).await?;

        tracing::info!(format = %self.format, "Starting export command");
        let job = pipeline
            .export(ExportRequest {
                scope,
                format: self.format,
                resource_types: self.types.iter().cloned().collect::<BTreeSet<_>>(),
                date_range: self.date_range(),
                purpose: self.purpose.clone(),
            })
            .await?;

        print_export_summary(&job);
        Ok(export_exit_code(&job))
    }
}

fn print_export_summary(job: &ExportJob) {
    println!();
    println!("📤 Export {}", job.id);
    println!("  Status: {}", job.status);
    if job.status == ExportStatus::Completed {
        println!("  Resources: {}", job.resource_count);
        println!("  Size: {} bytes", job.deliverable_size);
        if let Some(ref location) = job.location {
            println!("  Location: {location}");
        }
        if let Some(expires_at) = job.expires_at {
            println!("  Expires: {}", expires_at.to_rfc3339());
        }
        if let Some(ref checksum) = job.checksum {
            println!("  SHA-256: {checksum}");
        }
    }
    if !job.patient_outcomes.is_empty() {
        println!(
            "  Patients: {} succeeded, {} failed",
            job.succeeded_patients(),
            job.failed_patients()
        );
    }
    if !job.warnings.is_empty() {
        println!("  ⚠️  Warnings: {}", job.warnings.len());
    }
    if !job.errors.is_empty() {
        println!("  ❌ Errors:");
        for error in &job.errors {
            println!("    - {error}");
        }
    }
    println!();
}

/// Exit code for a finished export job
pub fn export_exit_code(job: &ExportJob) -> i32 {
    match job.status {
        ExportStatus::Completed if job.failed_patients() > 0 || !job.errors.is_empty() => {
            EXIT_PARTIAL
        }
        ExportStatus::Completed => EXIT_OK,
        ExportStatus::Queued | ExportStatus::Processing | ExportStatus::Failed => EXIT_FATAL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PatientOutcome;

    fn job() -> ExportJob {
        ExportJob::new(
            ExportScope::Patient(PatientId::new("p1").unwrap()),
            ExportFormat::Ndjson,
            BTreeSet::new(),
            None,
            None,
        )
    }

    #[test]
    fn test_export_exit_codes() {
        let mut done = job();
        done.status = ExportStatus::Completed;
        assert_eq!(export_exit_code(&done), 0);

        done.patient_outcomes.push(PatientOutcome {
            patient_id: PatientId::new("p2").unwrap(),
            succeeded: false,
            resource_count: 0,
            error: Some("unreachable".to_string()),
        });
        assert_eq!(export_exit_code(&done), 1);

        let mut failed = job();
        failed.status = ExportStatus::Failed;
        assert_eq!(export_exit_code(&failed), 5);
    }

    #[test]
    fn test_date_range_only_when_bounded() {
        let mut args = ExportArgs {
            patient_id: Some("p1".to_string()),
            organization: None,
            format: ExportFormat::FhirR5Bundle,
            types: Vec::new(),
            since: None,
            until: None,
            purpose: None,
        };
        assert!(args.date_range().is_none());

        args.since = NaiveDate::from_ymd_opt(2024, 1, 1);
        assert_eq!(
            args.date_range(),
            Some(DateRange::new(NaiveDate::from_ymd_opt(2024, 1, 1), None))
        );
    }
}
