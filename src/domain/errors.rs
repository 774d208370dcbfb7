//! Domain error types
//!
//! This module defines the error hierarchy for Meridian. Job-level failures
//! (validation, conversion, storage, export query) abort the job; per-resource
//! transform failures are isolated and recorded in the job instead.
//!
//! Error payloads reference job and resource identifiers only. Demographic
//! content never ends up in an error message.

use thiserror::Error;

/// Main Meridian error type
///
/// This is the primary error type used throughout the application.
/// It wraps specific error types and provides context for error handling.
#[derive(Debug, Error)]
pub enum MeridianError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed or oversized input rejected before any resource is touched
    #[error("Validation error: {0}")]
    Validation(String),

    /// External document converter failures
    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// Per-resource transformation failures
    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    /// Ambiguous or missing patient match that needs a caller decision
    #[error("Patient match conflict: {0}")]
    PatientMatchConflict(String),

    /// Clinical store failures
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Malformed export filters
    #[error("Export query error: {0}")]
    ExportQuery(String),

    /// Job state management errors, including failed compare-and-set transitions
    #[error("State management error: {0}")]
    State(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

impl MeridianError {
    /// Returns true when the error comes from an unreachable external collaborator
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            MeridianError::Conversion(ConversionError::ConnectionFailed(_))
                | MeridianError::Conversion(ConversionError::Timeout(_))
                | MeridianError::Storage(StorageError::Unreachable(_))
                | MeridianError::Storage(StorageError::Timeout(_))
        )
    }
}

/// Document converter errors
///
/// Errors that occur when delegating a legacy document to the external
/// converter. These errors don't expose third-party HTTP client types.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// Failed to connect to the converter
    #[error("Failed to connect to converter: {0}")]
    ConnectionFailed(String),

    /// Request timed out
    #[error("Converter request timeout: {0}")]
    Timeout(String),

    /// Server error (5xx)
    #[error("Converter server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    /// Client error (4xx)
    #[error("Converter client error: {status} - {message}")]
    ClientError { status: u16, message: String },

    /// Converter answered with something that is not a resource bundle
    #[error("Invalid converter response: {0}")]
    InvalidResponse(String),

    /// The converter cannot handle this input format
    #[error("Unsupported input format: {0}")]
    UnsupportedFormat(String),
}

/// Per-resource transformation errors
///
/// Raised by a transform rule for a single resource. The import pipeline
/// catches these at the resource boundary and continues with the rest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    /// A field the rule requires is absent
    #[error("Resource {resource_id}: missing required field '{field}'")]
    MissingField { resource_id: String, field: String },

    /// A field is present but carries a value of the wrong shape
    #[error("Resource {resource_id}: invalid value for field '{field}': {reason}")]
    InvalidField {
        resource_id: String,
        field: String,
        reason: String,
    },

    /// Two source fields describe the same target field with different content
    #[error("Resource {resource_id}: conflicting fields {fields:?}")]
    ConflictingFields {
        resource_id: String,
        fields: Vec<String>,
    },
}

impl TransformError {
    /// Returns the id of the resource the error belongs to
    pub fn resource_id(&self) -> &str {
        match self {
            TransformError::MissingField { resource_id, .. }
            | TransformError::InvalidField { resource_id, .. }
            | TransformError::ConflictingFields { resource_id, .. } => resource_id,
        }
    }
}

/// Clinical store errors
///
/// Errors that occur when reading from or writing to the backing clinical
/// store. These errors don't expose store implementation types.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Store cannot be reached
    #[error("Clinical store unreachable: {0}")]
    Unreachable(String),

    /// Store call exceeded its time budget
    #[error("Clinical store timeout: {0}")]
    Timeout(String),

    /// Failed to write resources
    #[error("Failed to write resources: {0}")]
    WriteFailed(String),

    /// Failed to query resources
    #[error("Failed to query resources: {0}")]
    QueryFailed(String),

    /// Requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Per-resource error details
///
/// Provides context for a single failed resource inside a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceErrorDetail {
    /// Id of the resource that failed
    pub resource_id: Option<String>,

    /// Type of the resource that failed
    pub resource_type: Option<String>,

    /// Pipeline stage that produced the error
    pub stage: Option<String>,

    /// Error message
    pub message: String,
}

impl ResourceErrorDetail {
    /// Creates a new error detail
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            resource_id: None,
            resource_type: None,
            stage: None,
            message: message.into(),
        }
    }

    /// Sets the resource ID
    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Sets the resource type
    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    /// Sets the pipeline stage
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }
}

impl std::fmt::Display for ResourceErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(stage) = &self.stage {
            write!(f, "[{stage}] ")?;
        }
        match (&self.resource_type, &self.resource_id) {
            (Some(t), Some(id)) => write!(f, "{t}/{id}: ")?,
            (None, Some(id)) => write!(f, "{id}: ")?,
            _ => {}
        }
        write!(f, "{}", self.message)
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for MeridianError {
    fn from(err: std::io::Error) -> Self {
        MeridianError::Io(err.to_string())
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for MeridianError {
    fn from(err: serde_json::Error) -> Self {
        MeridianError::Serialization(err.to_string())
    }
}

// Conversion from toml parse errors
impl From<toml::de::Error> for MeridianError {
    fn from(err: toml::de::Error) -> Self {
        MeridianError::Configuration(format!("TOML parse error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meridian_error_display() {
        let err = MeridianError::Configuration("Invalid config".to_string());
        assert_eq!(err.to_string(), "Configuration error: Invalid config");
    }

    #[test]
    fn test_conversion_error_conversion() {
        let err = ConversionError::Timeout("60s".to_string());
        let meridian_err: MeridianError = err.into();
        assert!(matches!(meridian_err, MeridianError::Conversion(_)));
        assert!(meridian_err.is_connection_error());
    }

    #[test]
    fn test_storage_error_conversion() {
        let err = StorageError::WriteFailed("disk full".to_string());
        let meridian_err: MeridianError = err.into();
        assert!(matches!(meridian_err, MeridianError::Storage(_)));
        assert!(!meridian_err.is_connection_error());
    }

    #[test]
    fn test_transform_error_carries_resource_id() {
        let err = TransformError::MissingField {
            resource_id: "med-1".to_string(),
            field: "subject".to_string(),
        };
        assert_eq!(err.resource_id(), "med-1");
        assert_eq!(
            err.to_string(),
            "Resource med-1: missing required field 'subject'"
        );
    }

    #[test]
    fn test_resource_error_detail_builder() {
        let detail = ResourceErrorDetail::new("bad status")
            .with_resource_id("cond-1")
            .with_resource_type("Condition")
            .with_stage("transforming");

        assert_eq!(detail.resource_id, Some("cond-1".to_string()));
        assert_eq!(
            detail.to_string(),
            "[transforming] Condition/cond-1: bad status"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let meridian_err: MeridianError = io_err.into();
        assert!(matches!(meridian_err, MeridianError::Io(_)));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let meridian_err: MeridianError = json_err.into();
        assert!(matches!(meridian_err, MeridianError::Serialization(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let meridian_err: MeridianError = toml_err.into();
        assert!(matches!(meridian_err, MeridianError::Configuration(_)));
        assert!(meridian_err.to_string().contains("TOML parse error"));
    }
}
