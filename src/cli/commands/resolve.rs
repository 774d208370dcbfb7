//! Resolve command implementation
//!
//! Continues an import that is waiting for a patient decision.

use super::import::{import_exit_code, print_import_summary};
use super::services::Services;
use super::EXIT_CONFIG;
use crate::config::load_config;
use crate::domain::{JobId, PatientId, PatientResolution};
use clap::Args;

/// Arguments for the resolve command
#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Parked import job
    #[arg(value_name = "JOB_ID")]
    pub job_id: JobId,

    /// Attach the import to this existing patient
    #[arg(long, conflicts_with = "create_new", required_unless_present = "create_new")]
    pub patient_id: Option<String>,

    /// Register the imported patient as a new patient
    #[arg(long)]
    pub create_new: bool,
}

impl ResolveArgs {
    fn resolution(&self) -> anyhow::Result<PatientResolution> {
        match self.patient_id.as_deref() {
            Some(raw) => PatientId::new(raw)
                .map(PatientResolution::Existing)
                .map_err(|e| anyhow::anyhow!("invalid --patient-id: {e}")),
            None => Ok(PatientResolution::CreateNew),
        }
    }

    /// Execute the resolve command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("❌ {e}");
                return Ok(EXIT_CONFIG);
            }
        };
        let resolution = self.resolution()?;

        let services = Services::open(&config).await?;
        let pipeline = services.import_pipeline(&config)?;

        tracing::info!(job_id = %self.job_id, "Resolving parked import");
        let job = pipeline.resolve_patient(&self.job_id, resolution).await?;

        print_import_summary(&job);
        Ok(import_exit_code(&job))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_existing_patient_resolution() {
        let args = ResolveArgs {
            job_id: JobId::generate(),
            patient_id: Some("pat-7".to_string()),
            create_new: false,
        };
        assert_eq!(
            args.resolution().unwrap(),
            PatientResolution::Existing(PatientId::new("pat-7").unwrap())
        );
    }

    #[test]
    fn test_create_new_resolution() {
        let args = ResolveArgs {
            job_id: JobId::generate(),
            patient_id: None,
            create_new: true,
        };
        assert_eq!(args.resolution().unwrap(), PatientResolution::CreateNew);
    }
}
