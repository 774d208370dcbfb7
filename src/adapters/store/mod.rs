//! Clinical store layer
//!
//! This module provides a trait-based abstraction over the backing clinical
//! store and patient index, with two implementations:
//!
//! - [`FileSystemStore`] - one JSON document per resource under a root directory
//! - [`InMemoryClinicalStore`] - process-local store for tests and dry runs

pub mod filesystem;
pub mod memory;
pub mod traits;

pub use filesystem::FileSystemStore;
pub use memory::InMemoryClinicalStore;
pub use traits::{ClinicalStore, PatientIndex, ResourceQuery};

use crate::config::StoreConfig;
use crate::domain::Result;
use std::sync::Arc;

/// Create the clinical store described by the configuration
///
/// The same instance serves as clinical store and patient index.
///
/// # Errors
///
/// Returns an error if the store root cannot be created.
pub async fn create_store(config: &StoreConfig) -> Result<Arc<FileSystemStore>> {
    tracing::info!(root = %config.root_path.display(), "Opening file-system clinical store");
    let store = FileSystemStore::new(&config.root_path);
    store.ensure_root().await?;
    Ok(Arc::new(store))
}
