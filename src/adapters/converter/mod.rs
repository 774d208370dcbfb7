//! External document conversion
//!
//! C-CDA documents and HL7 v2 messages are not parsed locally. They are sent
//! to a conversion service that returns generation A resources.

pub mod http;
pub mod traits;

pub use http::HttpDocumentConverter;
pub use traits::{ConversionOutput, DocumentConverter};

use crate::config::ConverterConfig;
use crate::domain::Result;
use std::sync::Arc;

/// Create the document converter described by the configuration
///
/// Returns `None` when no converter is configured; imports of C-CDA and
/// HL7 v2 documents then fail with a configuration error.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub fn create_converter(
    config: Option<&ConverterConfig>,
) -> Result<Option<Arc<dyn DocumentConverter>>> {
    match config {
        Some(config) => {
            tracing::info!(base_url = %config.base_url, "Using HTTP document converter");
            let converter = HttpDocumentConverter::new(config)?;
            Ok(Some(Arc::new(converter)))
        }
        None => {
            tracing::debug!("No document converter configured");
            Ok(None)
        }
    }
}
