//! Document import
//!
//! - [`validation`]: payload decoding and per-format structural checks
//! - [`pipeline`]: the staged import job, including patient resolution of
//!   parked jobs

pub mod pipeline;
pub mod validation;

pub use pipeline::{parked_demographics, ImportPipeline, ImportRequest};
pub use validation::{validate_payload, ValidatedDocument};
