//! File-system clinical store
//!
//! Resources are kept as one JSON document per resource:
//!
//! ```text
//! <root>/resources/<patient id>/<resource type>/<resource id>.json
//! <root>/patients/<organization id>/<patient id>.json
//! ```

use super::traits::{ClinicalStore, PatientIndex, ResourceQuery};
use crate::domain::codec::{decode_resource, encode_resource};
use crate::domain::{
    ClinicalResource, Demographics, Generation, OrganizationId, PatientId, PatientRecord,
    ResourceId, Result, StorageError,
};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Clinical store and patient index backed by a directory tree
#[derive(Debug, Clone)]
pub struct FileSystemStore {
    root: PathBuf,
}

impl FileSystemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Checks that the store root exists and is a directory, creating it if needed
    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            StorageError::Unreachable(format!("{}: {e}", self.root.display()))
        })?;
        Ok(())
    }

    fn patient_dir(&self, patient_id: &PatientId) -> Result<PathBuf> {
        Ok(self.root.join("resources").join(segment(patient_id.as_str())?))
    }

    fn organization_dir(&self, organization_id: &OrganizationId) -> Result<PathBuf> {
        Ok(self.root.join("patients").join(segment(organization_id.as_str())?))
    }

    /// Stores a patient record under an organization, replacing any with the same id
    pub async fn save_patient(
        &self,
        organization_id: &OrganizationId,
        record: &PatientRecord,
    ) -> Result<()> {
        let path = self
            .organization_dir(organization_id)?
            .join(format!("{}.json", segment(record.id.as_str())?));
        let bytes = serde_json::to_vec_pretty(record)?;
        write_atomic(&path, &bytes).await.map_err(write_failed)?;
        Ok(())
    }

    async fn read_records(&self, organization_id: &OrganizationId) -> Result<Vec<PatientRecord>> {
        let dir = self.organization_dir(organization_id)?;
        let mut records = Vec::new();
        for path in json_files(&dir).await? {
            let bytes = tokio::fs::read(&path).await.map_err(query_failed)?;
            let record: PatientRecord = serde_json::from_slice(&bytes).map_err(|e| {
                StorageError::QueryFailed(format!("{}: {e}", path.display()))
            })?;
            records.push(record);
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }
}

/// Rejects ids that would escape their directory
fn segment(id: &str) -> Result<&str> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'));
    if valid {
        Ok(id)
    } else {
        Err(StorageError::QueryFailed(format!("id '{id}' cannot be used as a path segment")).into())
    }
}

fn query_failed(err: std::io::Error) -> StorageError {
    StorageError::QueryFailed(err.to_string())
}

fn write_failed(err: std::io::Error) -> StorageError {
    StorageError::WriteFailed(err.to_string())
}

/// Lists `*.json` files of a directory sorted by path; a missing directory is empty
async fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(query_failed(e).into()),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(query_failed)? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

async fn sub_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(query_failed(e).into()),
    };
    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(query_failed)? {
        if entry.file_type().await.map_err(query_failed)?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Writes through a temporary file so readers never see a partial document
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

#[async_trait]
impl ClinicalStore for FileSystemStore {
    async fn query(&self, query: &ResourceQuery) -> Result<Vec<ClinicalResource>> {
        let patient_dir = self.patient_dir(&query.patient_id)?;
        let mut resources = Vec::new();

        for type_dir in sub_dirs(&patient_dir).await? {
            let type_name = type_dir
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            if !query.resource_types.is_empty()
                && !query.resource_types.iter().any(|t| t.as_str() == type_name)
            {
                continue;
            }

            for path in json_files(&type_dir).await? {
                let bytes = tokio::fs::read(&path).await.map_err(query_failed)?;
                let json: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
                    StorageError::QueryFailed(format!("{}: {e}", path.display()))
                })?;
                let resource = decode_resource(&json, Generation::B).map_err(|e| {
                    StorageError::QueryFailed(format!("{}: {e}", path.display()))
                })?;
                resources.push(resource);
            }
        }

        tracing::debug!(
            patient_id = %query.patient_id,
            count = resources.len(),
            "Read resources from file-system store"
        );
        Ok(resources)
    }

    async fn write(
        &self,
        patient_id: &PatientId,
        resources: &[ClinicalResource],
    ) -> Result<Vec<ResourceId>> {
        let patient_dir = self.patient_dir(patient_id)?;
        let mut stored = Vec::with_capacity(resources.len());

        for resource in resources {
            let path = patient_dir
                .join(segment(resource.resource_type.as_str())?)
                .join(format!("{}.json", resource.id));
            let bytes = serde_json::to_vec_pretty(&encode_resource(resource))?;
            write_atomic(&path, &bytes).await.map_err(write_failed)?;
            stored.push(resource.id.clone());
        }

        tracing::debug!(
            patient_id = %patient_id,
            count = stored.len(),
            "Wrote resources to file-system store"
        );
        Ok(stored)
    }

    async fn list_patients(&self, organization_id: &OrganizationId) -> Result<Vec<PatientId>> {
        Ok(self
            .read_records(organization_id)
            .await?
            .into_iter()
            .map(|record| record.id)
            .collect())
    }
}

#[async_trait]
impl PatientIndex for FileSystemStore {
    async fn find_candidates(
        &self,
        organization_id: &OrganizationId,
        demographics: &Demographics,
    ) -> Result<Vec<PatientRecord>> {
        let records = self.read_records(organization_id).await?;
        Ok(records
            .into_iter()
            .filter(|record| {
                let same_mrn = demographics.mrn.is_some()
                    && record.demographics.mrn == demographics.mrn;
                let same_birth_date = demographics.birth_date.is_some()
                    && record.demographics.birth_date == demographics.birth_date;
                same_mrn || same_birth_date
            })
            .collect())
    }

    async fn register_patient(
        &self,
        organization_id: &OrganizationId,
        demographics: &Demographics,
    ) -> Result<PatientId> {
        let id = PatientId::new(format!("pat-{}", Uuid::new_v4().simple()))
            .map_err(StorageError::WriteFailed)?;
        let record = PatientRecord {
            id: id.clone(),
            demographics: demographics.clone(),
        };
        self.save_patient(organization_id, &record).await?;

        tracing::info!(
            organization_id = %organization_id,
            patient_id = %id,
            "Registered new patient"
        );
        Ok(id)
    }
}
