//! Domain models and types for Meridian.
//!
//! # Overview
//!
//! The domain layer provides:
//! - **Strongly-typed identifiers** ([`PatientId`], [`ResourceId`], [`JobId`], ...)
//! - **Clinical resources** ([`ClinicalResource`], [`FieldValue`]) and their JSON codec
//! - **Jobs** ([`ImportJob`], [`ExportJob`]) with forward-only state
//! - **Error types** ([`MeridianError`], [`ConversionError`], [`TransformError`], [`StorageError`])
//! - **Result type alias** ([`Result`])
//!
//! # Type Safety
//!
//! Identifiers are newtypes so different id spaces cannot be mixed:
//!
//! ```rust
//! use meridian::domain::{PatientId, ResourceId};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let patient_id = PatientId::new("pat-123")?;
//! let resource_id = ResourceId::new("cond-456")?;
//!
//! // This won't compile
//! // let wrong: PatientId = resource_id;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod deliverable;
pub mod errors;
pub mod ids;
pub mod job;
pub mod patient;
pub mod provenance;
pub mod resource;
pub mod result;
pub mod warning;

// Re-export commonly used types for convenience
pub use deliverable::{Deliverable, PublishedDeliverable};
pub use errors::{
    ConversionError, MeridianError, ResourceErrorDetail, StorageError, TransformError,
};
pub use ids::{DocumentId, JobId, OrganizationId, PatientId, ProvenanceId, ResourceId};
pub use job::{
    DateRange, ExportFormat, ExportJob, ExportScope, ExportStatus, FailureKind, ImportJob,
    ImportMetadata, ImportStage, ImportState, ImportStatus, InputFormat, ParkedImport,
    PatientOutcome, ResourceCounts,
};
pub use patient::{
    Demographics, MatchCandidate, MatchOutcome, PatientMatchResult, PatientRecord,
    PatientResolution,
};
pub use provenance::{ProducedResource, ProvenanceRecord};
pub use resource::{
    ClinicalResource, ClinicalResourceBuilder, Coding, Concept, FieldValue, Generation, Period,
    Quantity, Reference, ResourceType,
};
pub use result::Result;
pub use warning::{ConversionWarning, TransformWarning};
