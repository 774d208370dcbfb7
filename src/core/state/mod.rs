//! Job state management
//!
//! Jobs move forward only. Every transition is a compare-and-set keyed by
//! job id and the state the writer last observed.

pub mod manager;
pub mod store;

pub use manager::JobManager;
pub use store::{FileJobStore, InMemoryJobStore, JobStore};
