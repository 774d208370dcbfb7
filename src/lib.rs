// Meridian - Clinical record import/export bridge
// Copyright (c) 2025 Meridian Contributors
// Licensed under the MIT License

//! # Meridian - clinical record import/export bridge
//!
//! Meridian moves clinical records between document formats and two schema
//! generations of a clinical resource model. Generation A is the older,
//! interop-oriented shape (FHIR R4); generation B is the newer canonical
//! shape the clinical store keeps (FHIR R5).
//!
//! ## Overview
//!
//! This library provides the core functionality for:
//! - **Importing** C-CDA documents, HL7 v2 messages and generation A bundles
//! - **Transforming** resources between the two generations without dropping data
//! - **Matching** imported documents to known patients
//! - **Recording** provenance for every stored resource
//! - **Exporting** patients or whole organizations as bundles or NDJSON
//!
//! ## Architecture
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`core`] - Business logic (import, export, transform, matching, provenance, state)
//! - [`adapters`] - External integrations (converter service, clinical store, deliverables)
//! - [`domain`] - Core domain types and models
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging
//!
//! ## Transforming Resources
//!
//! ```rust
//! use meridian::core::transform::VersionTransformer;
//! use meridian::domain::codec::decode_resource;
//! use meridian::domain::{Generation, ResourceType};
//! use serde_json::json;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let condition = decode_resource(
//!     &json!({
//!         "resourceType": "Condition",
//!         "id": "c1",
//!         "subject": {"reference": "Patient/p1"},
//!         "clinicalStatus": {"coding": [{
//!             "system": "http://terminology.hl7.org/CodeSystem/condition-clinical",
//!             "code": "active"
//!         }]}
//!     }),
//!     Generation::A,
//! )?;
//!
//! let outcome = VersionTransformer::new().transform(&condition, Generation::A, Generation::B)?;
//! assert_eq!(outcome.resources[0].resource_type, ResourceType::Condition);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Library code returns [`domain::Result`], whose error is
//! [`domain::MeridianError`]. Failures that belong to a single resource are
//! recorded on the job and do not abort it.

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
