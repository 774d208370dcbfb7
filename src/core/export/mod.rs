//! Export of stored resources
//!
//! This module provides the export side of Meridian, including:
//! - Type and date filtering of stored resources
//! - Deterministic bundle packaging
//! - Export job orchestration with per-patient fan-out for bulk exports

pub mod bundle;
pub mod filter;
pub mod pipeline;

pub use bundle::{sort_canonical, BundlePackager};
pub use filter::ExportFilter;
pub use pipeline::{ExportPipeline, ExportRequest};
