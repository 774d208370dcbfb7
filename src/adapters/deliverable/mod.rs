//! Deliverable publication
//!
//! Packaged exports are handed to a [`DeliverableStore`], which makes them
//! retrievable for a limited time and reports where.

pub mod local;

pub use local::LocalDirectoryStore;

use crate::config::ExportConfig;
use crate::domain::ids::JobId;
use crate::domain::{Deliverable, PublishedDeliverable, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Sink for packaged exports
#[async_trait]
pub trait DeliverableStore: Send + Sync {
    /// Publish a deliverable produced by an export job
    ///
    /// # Arguments
    ///
    /// * `job_id` - Export job the deliverable belongs to
    /// * `deliverable` - Serialized export
    ///
    /// # Returns
    ///
    /// Location the deliverable can be fetched from and its expiry
    ///
    /// # Errors
    ///
    /// Returns a storage error if the deliverable cannot be written.
    async fn publish(&self, job_id: &JobId, deliverable: &Deliverable)
        -> Result<PublishedDeliverable>;

    /// Remove deliverables whose retrieval window has passed
    ///
    /// Returns the number of removed deliverables.
    async fn purge_expired(&self) -> Result<usize>;
}

/// Create the deliverable store described by the export configuration
///
/// # Errors
///
/// Returns an error if the output directory cannot be created.
pub async fn create_deliverable_store(config: &ExportConfig) -> Result<Arc<dyn DeliverableStore>> {
    tracing::info!(
        output_dir = %config.output_dir.display(),
        link_ttl_hours = config.link_ttl_hours,
        "Opening local deliverable store"
    );
    let store = LocalDirectoryStore::new(&config.output_dir, config.link_ttl_hours);
    store.ensure_dir().await?;
    Ok(Arc::new(store))
}
