//! Core business logic for Meridian.
//!
//! # Modules
//!
//! - [`import`] - Payload validation and the staged import job
//! - [`export`] - Filtering, packaging and publication of stored resources
//! - [`transform`] - Generation A / generation B resource transformation
//! - [`matching`] - Patient identity resolution
//! - [`provenance`] - Audit trail of recorded imports
//! - [`state`] - Forward-only job state management
//!
//! # Import Workflow
//!
//! 1. **Validate**: Decode the payload and check its structure
//! 2. **Convert**: Hand legacy documents to the external converter
//! 3. **Transform**: Map generation A resources to generation B
//! 4. **Match**: Resolve the patient, parking the job when undecided
//! 5. **Record**: Write provenance, then the resources
//!
//! # Example
//!
//! ```rust,no_run
//! use meridian::adapters::store::InMemoryClinicalStore;
//! use meridian::core::import::{ImportPipeline, ImportRequest};
//! use meridian::core::provenance::ProvenanceTracker;
//! use meridian::core::state::{InMemoryJobStore, JobManager};
//! use meridian::domain::{ImportMetadata, InputFormat, OrganizationId, PatientId};
//! use std::sync::Arc;
//!
//! # async fn example(payload: String) -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryClinicalStore::new());
//! let pipeline = ImportPipeline::new(
//!     store.clone(),
//!     store,
//!     Arc::new(ProvenanceTracker::in_memory()),
//!     JobManager::new(Arc::new(InMemoryJobStore::new())),
//! );
//!
//! let job = pipeline
//!     .import(ImportRequest {
//!         format: InputFormat::FhirR4,
//!         patient_id: Some(PatientId::new("p1")?),
//!         organization_id: OrganizationId::new("org-1")?,
//!         payload,
//!         metadata: ImportMetadata::default(),
//!     })
//!     .await?;
//!
//! println!("{}: {} resources", job.status, job.counts.total());
//! # Ok(())
//! # }
//! ```

pub mod export;
pub mod import;
pub mod matching;
pub mod provenance;
pub mod state;
pub mod transform;
