//! Job persistence with compare-and-set transitions
//!
//! A job update names the state the caller last saw. The store accepts it
//! only when the stored job is still in that state and the new state is the
//! same or a forward step from it, so two workers racing on one job cannot
//! both move it.

use crate::domain::ids::JobId;
use crate::domain::{
    ExportJob, ExportStatus, ImportJob, ImportState, MeridianError, Result, StorageError,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Persistence for import and export jobs
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Store a new import job
    ///
    /// # Errors
    ///
    /// Returns a state error if a job with the same id already exists.
    async fn create_import(&self, job: &ImportJob) -> Result<()>;

    /// Load an import job, `None` if unknown
    async fn load_import(&self, id: &JobId) -> Result<Option<ImportJob>>;

    /// Replace an import job if it is still in `expected`
    ///
    /// # Errors
    ///
    /// Returns a state error if the job is unknown, was moved by someone
    /// else, or the new state is not a forward step.
    async fn update_import(&self, expected: ImportState, job: &ImportJob) -> Result<()>;

    /// Store a new export job
    async fn create_export(&self, job: &ExportJob) -> Result<()>;

    /// Load an export job, `None` if unknown
    async fn load_export(&self, id: &JobId) -> Result<Option<ExportJob>>;

    /// Replace an export job if it is still in `expected`
    async fn update_export(&self, expected: ExportStatus, job: &ExportJob) -> Result<()>;
}

/// A job kind the stores know how to key and compare
trait JobRecord: Clone + Serialize + DeserializeOwned + Send + Sync {
    type State: Copy + Eq + Display + Send;

    const KIND: &'static str;

    fn job_id(&self) -> JobId;
    fn current_state(&self) -> Self::State;
    fn may_move(from: Self::State, to: Self::State) -> bool;
}

impl JobRecord for ImportJob {
    type State = ImportState;
    const KIND: &'static str = "imports";

    fn job_id(&self) -> JobId {
        self.id
    }

    fn current_state(&self) -> ImportState {
        self.state()
    }

    fn may_move(from: ImportState, to: ImportState) -> bool {
        from == to || from.can_advance_to(to)
    }
}

impl JobRecord for ExportJob {
    type State = ExportStatus;
    const KIND: &'static str = "exports";

    fn job_id(&self) -> JobId {
        self.id
    }

    fn current_state(&self) -> ExportStatus {
        self.status
    }

    fn may_move(from: ExportStatus, to: ExportStatus) -> bool {
        (from == to && !from.is_terminal()) || from.can_advance_to(to)
    }
}

fn check_transition<J: JobRecord>(
    stored: Option<&J>,
    expected: J::State,
    job: &J,
) -> Result<()> {
    let id = job.job_id();
    let stored = stored.ok_or_else(|| {
        MeridianError::State(format!("{} job {id} does not exist", J::KIND))
    })?;
    let actual = stored.current_state();
    if actual != expected {
        return Err(MeridianError::State(format!(
            "job {id} is {actual}, expected {expected}"
        )));
    }
    let next = job.current_state();
    if !J::may_move(actual, next) {
        return Err(MeridianError::State(format!(
            "job {id} cannot move from {actual} to {next}"
        )));
    }
    Ok(())
}

/// Process-local job store
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    imports: Mutex<HashMap<JobId, ImportJob>>,
    exports: Mutex<HashMap<JobId, ExportJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

async fn create_in<J: JobRecord>(map: &Mutex<HashMap<JobId, J>>, job: &J) -> Result<()> {
    let mut jobs = map.lock().await;
    if jobs.contains_key(&job.job_id()) {
        return Err(MeridianError::State(format!(
            "job {} already exists",
            job.job_id()
        )));
    }
    jobs.insert(job.job_id(), job.clone());
    Ok(())
}

async fn update_in<J: JobRecord>(
    map: &Mutex<HashMap<JobId, J>>,
    expected: J::State,
    job: &J,
) -> Result<()> {
    let mut jobs = map.lock().await;
    check_transition(jobs.get(&job.job_id()), expected, job)?;
    jobs.insert(job.job_id(), job.clone());
    Ok(())
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_import(&self, job: &ImportJob) -> Result<()> {
        create_in(&self.imports, job).await
    }

    async fn load_import(&self, id: &JobId) -> Result<Option<ImportJob>> {
        Ok(self.imports.lock().await.get(id).cloned())
    }

    async fn update_import(&self, expected: ImportState, job: &ImportJob) -> Result<()> {
        update_in(&self.imports, expected, job).await
    }

    async fn create_export(&self, job: &ExportJob) -> Result<()> {
        create_in(&self.exports, job).await
    }

    async fn load_export(&self, id: &JobId) -> Result<Option<ExportJob>> {
        Ok(self.exports.lock().await.get(id).cloned())
    }

    async fn update_export(&self, expected: ExportStatus, job: &ExportJob) -> Result<()> {
        update_in(&self.exports, expected, job).await
    }
}

/// Job store keeping one JSON document per job
///
/// ```text
/// <dir>/imports/<job id>.json
/// <dir>/exports/<job id>.json
/// ```
///
/// Compare-and-set is serialized within the process; the store is not meant
/// to be shared by several processes.
#[derive(Debug)]
pub struct FileJobStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileJobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    fn path<J: JobRecord>(&self, id: &JobId) -> PathBuf {
        self.dir.join(J::KIND).join(format!("{id}.json"))
    }

    async fn read<J: JobRecord>(&self, id: &JobId) -> Result<Option<J>> {
        let path = self.path::<J>(id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                MeridianError::State(format!("{}: {e}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::QueryFailed(format!("{}: {e}", path.display())).into()),
        }
    }

    async fn write<J: JobRecord>(&self, job: &J) -> Result<()> {
        let path = self.path::<J>(&job.job_id());
        let bytes = serde_json::to_vec_pretty(job)?;
        write_atomic(&path, &bytes)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("{}: {e}", path.display())))?;
        Ok(())
    }

    async fn create<J: JobRecord>(&self, job: &J) -> Result<()> {
        let _guard = self.lock.lock().await;
        if self.read::<J>(&job.job_id()).await?.is_some() {
            return Err(MeridianError::State(format!(
                "job {} already exists",
                job.job_id()
            )));
        }
        self.write(job).await
    }

    async fn update<J: JobRecord>(&self, expected: J::State, job: &J) -> Result<()> {
        let _guard = self.lock.lock().await;
        let stored = self.read::<J>(&job.job_id()).await?;
        check_transition(stored.as_ref(), expected, job)?;
        self.write(job).await
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn create_import(&self, job: &ImportJob) -> Result<()> {
        self.create(job).await
    }

    async fn load_import(&self, id: &JobId) -> Result<Option<ImportJob>> {
        self.read(id).await
    }

    async fn update_import(&self, expected: ImportState, job: &ImportJob) -> Result<()> {
        self.update(expected, job).await
    }

    async fn create_export(&self, job: &ExportJob) -> Result<()> {
        self.create(job).await
    }

    async fn load_export(&self, id: &JobId) -> Result<Option<ExportJob>> {
        self.read(id).await
    }

    async fn update_export(&self, expected: ExportStatus, job: &ExportJob) -> Result<()> {
        self.update(expected, job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ExportFormat, ExportScope, ImportMetadata, ImportStage, ImportStatus, InputFormat,
        OrganizationId, PatientId,
    };
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn import_job() -> ImportJob {
        ImportJob::new(
            OrganizationId::new("org-1").unwrap(),
            InputFormat::FhirR4,
            None,
            ImportMetadata::default(),
        )
    }

    async fn exercise_import_cas(store: &dyn JobStore) {
        let mut job = import_job();
        store.create_import(&job).await.unwrap();
        assert!(store.create_import(&job).await.is_err());

        let queued = job.state();
        job.status = ImportStatus::Processing;
        job.stage = ImportStage::Converting;
        store.update_import(queued, &job).await.unwrap();

        // a second writer still holding the queued state loses
        let mut stale = job.clone();
        stale.stage = ImportStage::Transforming;
        assert!(matches!(
            store.update_import(queued, &stale).await,
            Err(MeridianError::State(_))
        ));

        // moving backwards is rejected even with the right expected state
        let converting = job.state();
        let mut backwards = job.clone();
        backwards.stage = ImportStage::Validating;
        assert!(store.update_import(converting, &backwards).await.is_err());

        let loaded = store.load_import(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.stage, ImportStage::Converting);
    }

    #[tokio::test]
    async fn test_in_memory_import_compare_and_set() {
        exercise_import_cas(&InMemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn test_file_import_compare_and_set() {
        let dir = TempDir::new().unwrap();
        exercise_import_cas(&FileJobStore::new(dir.path())).await;
    }

    #[tokio::test]
    async fn test_terminal_export_is_final() {
        let dir = TempDir::new().unwrap();
        let store = FileJobStore::new(dir.path());
        let mut job = ExportJob::new(
            ExportScope::Patient(PatientId::new("pat-1").unwrap()),
            ExportFormat::Ndjson,
            BTreeSet::new(),
            None,
            None,
        );
        store.create_export(&job).await.unwrap();

        job.status = ExportStatus::Completed;
        store.update_export(ExportStatus::Queued, &job).await.unwrap();

        let mut again = job.clone();
        again.resource_count = 3;
        assert!(store
            .update_export(ExportStatus::Completed, &again)
            .await
            .is_err());
        assert!(store.load_export(&JobId::generate()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_of_unknown_job_fails() {
        let store = InMemoryJobStore::new();
        let job = import_job();
        assert!(store.update_import(job.state(), &job).await.is_err());
    }
}
