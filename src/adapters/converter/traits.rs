//! Document converter trait definitions

use crate::domain::{ClinicalResource, ConversionWarning, InputFormat, Result};
use async_trait::async_trait;

/// Generation A resources produced from one legacy document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversionOutput {
    /// Converted resources in bundle order
    pub resources: Vec<ClinicalResource>,

    /// Non-fatal findings reported by the converter
    pub warnings: Vec<ConversionWarning>,
}

/// Converts legacy clinical documents into generation A resources
///
/// Implementations delegate to an external conversion service. Calls are
/// bounded by a timeout and are not retried within a job.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Convert a document
    ///
    /// # Arguments
    ///
    /// * `raw` - Decoded document text
    /// * `format` - Input format of the document (C-CDA or HL7 v2)
    /// * `template` - Root template name chosen from the detected document or message type
    ///
    /// # Returns
    ///
    /// The converted generation A resources and any converter warnings
    ///
    /// # Errors
    ///
    /// Returns a `ConversionError` if the service is unreachable, times out,
    /// rejects the document or answers with something other than a bundle.
    async fn convert(
        &self,
        raw: &str,
        format: InputFormat,
        template: &str,
    ) -> Result<ConversionOutput>;

    /// Check whether the conversion service answers
    async fn health_check(&self) -> Result<bool>;
}
