//! Wiring of stores and pipelines shared by the commands

use crate::adapters::converter::create_converter;
use crate::adapters::deliverable::create_deliverable_store;
use crate::adapters::store::{create_store, FileSystemStore};
use crate::config::MeridianConfig;
use crate::core::export::ExportPipeline;
use crate::core::import::ImportPipeline;
use crate::core::provenance::ProvenanceTracker;
use crate::core::state::{FileJobStore, JobManager};
use crate::domain::{MeridianError, OrganizationId, Result};
use std::sync::Arc;
use tokio::sync::watch;

const PROVENANCE_LOG: &str = "provenance.jsonl";

/// Stores opened from a configuration
pub struct Services {
    pub store: Arc<FileSystemStore>,
    pub jobs: JobManager,
    pub provenance: Arc<ProvenanceTracker>,
}

impl Services {
    /// Open the clinical store, job store and provenance log
    ///
    /// # Errors
    ///
    /// Returns a storage error if a directory cannot be created or the
    /// provenance log cannot be replayed.
    pub async fn open(config: &MeridianConfig) -> Result<Self> {
        let store = create_store(&config.store).await?;
        let jobs = JobManager::new(Arc::new(FileJobStore::new(&config.state.jobs_path)));
        let provenance =
            ProvenanceTracker::open(config.state.jobs_path.join(PROVENANCE_LOG)).await?;
        Ok(Self {
            store,
            jobs,
            provenance: Arc::new(provenance),
        })
    }

    /// Import pipeline over the opened stores
    ///
    /// # Errors
    ///
    /// Returns an error if the configured converter client cannot be built.
    pub fn import_pipeline(&self, config: &MeridianConfig) -> Result<ImportPipeline> {
        let converter = create_converter(config.converter.as_ref())?;
        Ok(ImportPipeline::new(
            self.store.clone(),
            self.store.clone(),
            self.provenance.clone(),
            self.jobs.clone(),
        )
        .configure(config)
        .with_converter(converter))
    }

    /// Export pipeline over the opened stores
    ///
    /// # Errors
    ///
    /// Returns an error if the deliverable directory cannot be created.
    pub async fn export_pipeline(
        &self,
        config: &MeridianConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<ExportPipeline> {
        let deliverables = create_deliverable_store(&config.export).await?;
        Ok(
            ExportPipeline::new(self.store.clone(), deliverables, self.jobs.clone())
                .configure(config)
                .with_shutdown(shutdown),
        )
    }
}

/// Organization named on the command line, else the configured default
pub fn organization(config: &MeridianConfig, explicit: Option<&str>) -> Result<OrganizationId> {
    let raw = explicit.unwrap_or(config.application.organization_id.as_str());
    OrganizationId::new(raw).map_err(MeridianError::Configuration)
}
