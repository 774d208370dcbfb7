//! Import command implementation
//!
//! Reads a document from disk and runs it through the import pipeline.

use super::services::{organization, Services};
use super::{EXIT_AWAITING_PATIENT, EXIT_CONFIG, EXIT_CONNECTION, EXIT_FATAL, EXIT_OK, EXIT_PARTIAL};
use crate::config::load_config;
use crate::core::import::ImportRequest;
use crate::domain::{
    FailureKind, ImportJob, ImportMetadata, ImportStatus, InputFormat, MeridianError, PatientId,
};
use base64::Engine;
use chrono::NaiveDate;
use clap::Args;
use std::path::PathBuf;

/// Arguments for the import command
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Document to import
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Document format (ccda, hl7v2, fhir-r4)
    #[arg(short, long)]
    pub format: InputFormat,

    /// Organization the document belongs to, defaults to the configured one
    #[arg(long)]
    pub organization: Option<String>,

    /// Attach to this patient instead of matching
    #[arg(long)]
    pub patient_id: Option<String>,

    /// Document subtype hint (e.g. CCD, DischargeSummary, ORU_R01)
    #[arg(long)]
    pub subtype: Option<String>,

    /// System the document came from
    #[arg(long)]
    pub source_system: Option<String>,

    /// Date the document was received (YYYY-MM-DD)
    #[arg(long)]
    pub received_date: Option<NaiveDate>,
}

impl ImportArgs {
    /// Execute the import command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("❌ {e}");
                return Ok(EXIT_CONFIG);
            }
        };

        let organization_id = match organization(&config, self.organization.as_deref()) {
            Ok(id) => id,
            Err(e) => {
                eprintln!("❌ {e}");
                return Ok(EXIT_CONFIG);
            }
        };
        let patient_id = self
            .patient_id
            .as_deref()
            .map(PatientId::new)
            .transpose()
            .map_err(|e| anyhow::anyhow!("invalid --patient-id: {e}"))?;

        let raw = tokio::fs::read(&self.file).await?;
        let payload = base64::engine::general_purpose::STANDARD.encode(raw);

        let services = Services::open(&config).await?;
        let pipeline = services.import_pipeline(&config)?;

        tracing::info!(file = %self.file.display(), format = %self.format, "Starting import command");
        let request = ImportRequest {
            format: self.format,
            patient_id,
            organization_id,
            payload,
            metadata: ImportMetadata {
                source_system: self.source_system.clone(),
                document_subtype: self.subtype.clone(),
                received_date: self.received_date,
            },
        };

        let job = match pipeline.import(request).await {
            Ok(job) => job,
            Err(e @ MeridianError::Configuration(_)) => {
                eprintln!("❌ {e}");
                return Ok(EXIT_CONFIG);
            }
            Err(e) => return Err(e.into()),
        };

        print_import_summary(&job);
        Ok(import_exit_code(&job))
    }
}

/// Print the outcome of an import job
pub fn print_import_summary(job: &ImportJob) {
    println!();
    println!("📥 Import {}", job.id);
    println!("  Status: {} ({})", job.status, job.stage);
    if let Some(ref patient_id) = job.patient_id {
        println!("  Patient: {patient_id}");
    }
    if let Some(ref document_id) = job.source_document_id {
        println!("  Source document: {document_id}");
    }
    if let Some(ref provenance_id) = job.provenance_id {
        println!("  Provenance: {provenance_id}");
    }
    if job.counts.total() > 0 {
        println!("  Resources:");
        for (resource_type, count) in job.counts.iter() {
            println!("    {resource_type}: {count}");
        }
    }
    if !job.unconverted_ids.is_empty() {
        println!("  Unconverted: {}", job.unconverted_ids.len());
    }
    if !job.warnings.is_empty() {
        println!("  ⚠️  Warnings:");
        for warning in &job.warnings {
            println!("    - {warning}");
        }
    }
    if !job.errors.is_empty() {
        println!("  ❌ Errors:");
        for error in &job.errors {
            println!("    - {error}");
        }
    }
    if job.is_parked() {
        println!();
        println!("  Patient could not be matched automatically. Resolve with:");
        println!("    meridian resolve {} --patient-id <ID>", job.id);
        println!("    meridian resolve {} --create-new", job.id);
    }
    println!();
}

/// Exit code for an import job in its current state
pub fn import_exit_code(job: &ImportJob) -> i32 {
    match job.status {
        ImportStatus::Completed => EXIT_OK,
        ImportStatus::Partial => EXIT_PARTIAL,
        ImportStatus::Failed => match job.failure {
            Some(FailureKind::Unreachable) => EXIT_CONNECTION,
            _ => EXIT_FATAL,
        },
        ImportStatus::Queued | ImportStatus::Processing if job.is_parked() => EXIT_AWAITING_PATIENT,
        ImportStatus::Queued | ImportStatus::Processing => EXIT_FATAL,
    }
}
