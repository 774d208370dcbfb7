//! Transform command implementation
//!
//! Offline conversion of a bundle file between the two schema generations.
//! Nothing is read from or written to the clinical store.

use super::{EXIT_FATAL, EXIT_OK, EXIT_PARTIAL};
use crate::core::export::BundlePackager;
use crate::core::transform::VersionTransformer;
use crate::domain::codec::decode_bundle;
use crate::domain::{Deliverable, ExportFormat, Result};
use clap::Args;
use serde_json::Value;
use std::path::PathBuf;

/// Arguments for the transform command
#[derive(Args, Debug)]
pub struct TransformArgs {
    /// Bundle to convert
    #[arg(value_name = "FILE")]
    pub input: PathBuf,

    /// Output format (fhir-r5, fhir-r4, ndjson); the input is read as the
    /// other generation
    #[arg(short, long, default_value = "fhir-r5")]
    pub to: ExportFormat,

    /// Write the result here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Converted bundle with the issues met on the way
#[derive(Debug)]
pub struct ConvertedBundle {
    pub deliverable: Deliverable,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// Convert a parsed bundle to the generation of `to`
///
/// # Errors
///
/// Returns a validation error if the input is not a bundle of the source
/// generation.
pub fn convert_bundle(bundle: &Value, to: ExportFormat) -> Result<ConvertedBundle> {
    let target = to.target_generation();
    let source = target.opposite();
    let resources = decode_bundle(bundle, source)?;

    let batch = VersionTransformer::new().transform_all(&resources, source, target);
    tracing::info!(
        source = %source,
        target = %target,
        read = resources.len(),
        produced = batch.resources.len(),
        errors = batch.errors.len(),
        "Bundle transformed"
    );

    let deliverable = BundlePackager::new().package(batch.resources, to)?;
    Ok(ConvertedBundle {
        deliverable,
        warnings: batch.warnings.iter().map(ToString::to_string).collect(),
        errors: batch.errors.iter().map(ToString::to_string).collect(),
    })
}

impl TransformArgs {
    /// Execute the transform command
    pub async fn execute(&self) -> anyhow::Result<i32> {
        let raw = tokio::fs::read(&self.input).await?;
        let bundle: Value = match serde_json::from_slice(&raw) {
            Ok(value) => value,
            Err(e) => {
                eprintln!("❌ {} is not JSON: {e}", self.input.display());
                return Ok(EXIT_FATAL);
            }
        };

        let converted = match convert_bundle(&bundle, self.to) {
            Ok(converted) => converted,
            Err(e) => {
                eprintln!("❌ {e}");
                return Ok(EXIT_FATAL);
            }
        };

        match self.output {
            Some(ref path) => {
                tokio::fs::write(path, &converted.deliverable.bytes).await?;
                eprintln!(
                    "✅ Wrote {} resources to {}",
                    converted.deliverable.resource_count,
                    path.display()
                );
            }
            None => {
                use std::io::Write;
                std::io::stdout().write_all(&converted.deliverable.bytes)?;
            }
        }

        for warning in &converted.warnings {
            eprintln!("⚠️  {warning}");
        }
        for error in &converted.errors {
            eprintln!("❌ {error}");
        }

        Ok(if converted.errors.is_empty() {
            EXIT_OK
        } else {
            EXIT_PARTIAL
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn generation_a_bundle() -> Value {
        json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [
                {"resource": {
                    "resourceType": "MedicationStatement",
                    "id": "med-1",
                    "status": "active",
                    "medicationCodeableConcept": {"text": "lisinopril"},
                    "subject": {"reference": "Patient/p1"}
                }},
                {"resource": {
                    "resourceType": "MedicationStatement",
                    "id": "med-2",
                    "subject": {"reference": "Patient/p1"}
                }}
            ]
        })
    }

    #[test]
    fn test_convert_to_generation_b() {
        let converted = convert_bundle(&generation_a_bundle(), ExportFormat::FhirR5Bundle).unwrap();
        let bundle: Value = serde_json::from_slice(&converted.deliverable.bytes).unwrap();

        assert_eq!(bundle["entry"][0]["resource"]["resourceType"], "MedicationUsage");
        assert_eq!(bundle["entry"][0]["resource"]["status"], "recorded");
        assert_eq!(converted.errors.len(), 1);
        assert!(converted.errors[0].contains("med-2"));
    }

    #[test]
    fn test_non_bundle_is_rejected() {
        let result = convert_bundle(&json!({"resourceType": "Patient"}), ExportFormat::FhirR5Bundle);
        assert!(result.is_err());
    }
}
