//! Local directory deliverable store

use super::DeliverableStore;
use crate::domain::ids::JobId;
use crate::domain::{Deliverable, PublishedDeliverable, Result, StorageError};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Publishes deliverables as files named after their export job
///
/// A file stays retrievable for the configured number of hours after it was
/// written; [`DeliverableStore::purge_expired`] removes older files.
#[derive(Debug, Clone)]
pub struct LocalDirectoryStore {
    dir: PathBuf,
    ttl_hours: u64,
}

impl LocalDirectoryStore {
    pub fn new(dir: impl Into<PathBuf>, ttl_hours: u64) -> Self {
        Self {
            dir: dir.into(),
            ttl_hours,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the output directory if needed
    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StorageError::Unreachable(format!("{}: {e}", self.dir.display())))?;
        Ok(())
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours.saturating_mul(3600))
    }
}

#[async_trait]
impl DeliverableStore for LocalDirectoryStore {
    async fn publish(
        &self,
        job_id: &JobId,
        deliverable: &Deliverable,
    ) -> Result<PublishedDeliverable> {
        self.ensure_dir().await?;
        let path = self
            .dir
            .join(format!("{}.{}", job_id, deliverable.format.file_extension()));
        let tmp = path.with_extension("partial");

        let write = async {
            tokio::fs::write(&tmp, &deliverable.bytes).await?;
            tokio::fs::rename(&tmp, &path).await
        };
        write
            .await
            .map_err(|e| StorageError::WriteFailed(format!("{}: {e}", path.display())))?;

        let expires_at = Utc::now() + ChronoDuration::hours(self.ttl_hours as i64);
        tracing::info!(
            job_id = %job_id,
            bytes = deliverable.size(),
            checksum = %deliverable.checksum,
            "Deliverable published"
        );

        Ok(PublishedDeliverable {
            location: path.display().to_string(),
            expires_at,
        })
    }

    async fn purge_expired(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StorageError::QueryFailed(e.to_string()).into()),
        };

        let cutoff = SystemTime::now()
            .checked_sub(self.ttl())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?
        {
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
            let expired = metadata.is_file()
                && metadata.modified().map(|m| m < cutoff).unwrap_or(false);
            if expired {
                tokio::fs::remove_file(entry.path())
                    .await
                    .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(removed = removed, "Expired deliverables purged");
        }
        Ok(removed)
    }
}
