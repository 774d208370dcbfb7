//! Job manager
//!
//! Thin layer over a [`JobStore`] that stamps `updated_at`, performs the
//! compare-and-set against the state the caller last saw and logs every
//! transition.

use super::store::JobStore;
use crate::domain::ids::JobId;
use crate::domain::{
    ExportJob, ExportStatus, ImportJob, ImportStage, ImportState, ImportStatus, MeridianError,
    Result,
};
use chrono::Utc;
use std::sync::Arc;

/// Job manager for import and export jobs
#[derive(Clone)]
pub struct JobManager {
    /// Job storage backend
    store: Arc<dyn JobStore + Send + Sync>,
}

impl JobManager {
    /// Create a new JobManager with a job storage backend
    pub fn new(store: Arc<dyn JobStore + Send + Sync>) -> Self {
        Self { store }
    }

    pub async fn create_import(&self, job: &ImportJob) -> Result<()> {
        self.store.create_import(job).await?;
        tracing::debug!(job_id = %job.id, state = %job.state(), "Import job created");
        Ok(())
    }

    /// Load an import job
    ///
    /// # Errors
    ///
    /// Returns a state error if the job does not exist.
    pub async fn load_import(&self, id: &JobId) -> Result<ImportJob> {
        self.store
            .load_import(id)
            .await?
            .ok_or_else(|| MeridianError::State(format!("import job {id} not found")))
    }

    /// Move an import job to a new status and stage
    ///
    /// The job is updated in place only if the store accepted the transition.
    ///
    /// # Errors
    ///
    /// Returns a state error if another writer moved the job first or the
    /// transition is not a forward step.
    pub async fn advance_import(
        &self,
        job: &mut ImportJob,
        status: ImportStatus,
        stage: ImportStage,
    ) -> Result<()> {
        let expected = job.state();
        let mut next = job.clone();
        next.status = status;
        next.stage = stage;
        next.updated_at = Utc::now();
        self.store.update_import(expected, &next).await?;

        tracing::info!(
            job_id = %job.id,
            from = %expected,
            to = %ImportState::new(status, stage),
            "Import job transitioned"
        );
        *job = next;
        Ok(())
    }

    /// Persist progress details without changing the job's state
    pub async fn save_import(&self, job: &mut ImportJob) -> Result<()> {
        job.updated_at = Utc::now();
        self.store.update_import(job.state(), job).await
    }

    pub async fn create_export(&self, job: &ExportJob) -> Result<()> {
        self.store.create_export(job).await?;
        tracing::debug!(job_id = %job.id, status = %job.status, "Export job created");
        Ok(())
    }

    /// Load an export job
    ///
    /// # Errors
    ///
    /// Returns a state error if the job does not exist.
    pub async fn load_export(&self, id: &JobId) -> Result<ExportJob> {
        self.store
            .load_export(id)
            .await?
            .ok_or_else(|| MeridianError::State(format!("export job {id} not found")))
    }

    /// Move an export job to a new status
    pub async fn advance_export(&self, job: &mut ExportJob, status: ExportStatus) -> Result<()> {
        let expected = job.status;
        let mut next = job.clone();
        next.status = status;
        next.updated_at = Utc::now();
        self.store.update_export(expected, &next).await?;

        tracing::info!(job_id = %job.id, from = %expected, to = %status, "Export job transitioned");
        *job = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::InMemoryJobStore;
    use crate::domain::{ImportMetadata, InputFormat, OrganizationId};

    #[tokio::test]
    async fn test_advance_import_updates_job_and_store() {
        let manager = JobManager::new(Arc::new(InMemoryJobStore::new()));
        let mut job = ImportJob::new(
            OrganizationId::new("org-1").unwrap(),
            InputFormat::Ccda,
            None,
            ImportMetadata::default(),
        );
        manager.create_import(&job).await.unwrap();

        manager
            .advance_import(&mut job, ImportStatus::Queued, ImportStage::Validating)
            .await
            .unwrap();
        assert_eq!(job.stage, ImportStage::Validating);

        job.warnings.push("w".to_string());
        manager.save_import(&mut job).await.unwrap();

        let stored = manager.load_import(&job.id).await.unwrap();
        assert_eq!(stored.warnings, vec!["w".to_string()]);
        assert_eq!(stored.stage, ImportStage::Validating);
    }

    #[tokio::test]
    async fn test_rejected_transition_leaves_job_untouched() {
        let manager = JobManager::new(Arc::new(InMemoryJobStore::new()));
        let mut job = ImportJob::new(
            OrganizationId::new("org-1").unwrap(),
            InputFormat::Ccda,
            None,
            ImportMetadata::default(),
        );
        manager.create_import(&job).await.unwrap();
        manager
            .advance_import(&mut job, ImportStatus::Failed, ImportStage::Finished)
            .await
            .unwrap();

        let result = manager
            .advance_import(&mut job, ImportStatus::Processing, ImportStage::Converting)
            .await;
        assert!(result.is_err());
        assert_eq!(job.status, ImportStatus::Failed);
    }

    #[tokio::test]
    async fn test_missing_job_is_state_error() {
        let manager = JobManager::new(Arc::new(InMemoryJobStore::new()));
        assert!(matches!(
            manager.load_export(&JobId::generate()).await,
            Err(MeridianError::State(_))
        ));
    }
}
