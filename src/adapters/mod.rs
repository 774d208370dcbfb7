//! External system integrations for Meridian.
//!
//! This module provides adapters for the collaborators the pipelines talk to:
//!
//! - [`converter`] - External C-CDA / HL7 v2 document converter
//! - [`store`] - Clinical store and patient index (trait-based)
//! - [`deliverable`] - Sink for packaged exports
//!
//! # Design Pattern
//!
//! Adapters follow the **Adapter Pattern** to isolate external dependencies and
//! enable testing with in-memory implementations. Pipelines only see the
//! traits, held as `Arc<dyn Trait>`.
//!
//! # Converter Adapter
//!
//! ```rust,no_run
//! use meridian::adapters::converter::{DocumentConverter, HttpDocumentConverter};
//! use meridian::config::ConverterConfig;
//! use meridian::domain::InputFormat;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConverterConfig {
//!     base_url: "https://convert.example.com".to_string(),
//!     api_version: "2024-05-01-preview".to_string(),
//!     timeout_seconds: 60,
//!     api_key: None,
//! };
//!
//! let converter = HttpDocumentConverter::new(&config)?;
//! let output = converter.convert("MSH|^~\\&|...", InputFormat::Hl7v2, "ADT_A01").await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Store Adapter
//!
//! ```rust,no_run
//! use meridian::adapters::store::{ClinicalStore, FileSystemStore, ResourceQuery};
//! use meridian::domain::PatientId;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = FileSystemStore::new("/var/lib/meridian/store");
//! store.ensure_root().await?;
//!
//! let query = ResourceQuery::for_patient(PatientId::new("pat-1")?);
//! let resources = store.query(&query).await?;
//! # Ok(())
//! # }
//! ```

pub mod converter;
pub mod deliverable;
pub mod store;
