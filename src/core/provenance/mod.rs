//! Provenance tracking
//!
//! Every import that produces resources records which source document they
//! came from, which rule versions shaped them and who ran the import. Records
//! are append-only. Recording the same document and produced set twice
//! returns the first record instead of adding a second one.
//!
//! A tracker is either purely in memory or backed by a JSON-lines log file
//! that is replayed when the tracker is opened.

use crate::domain::ids::{DocumentId, ProvenanceId};
use crate::domain::{MeridianError, ProducedResource, ProvenanceRecord, Result, StorageError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

type RecordKey = (DocumentId, Vec<ProducedResource>);

#[derive(Debug, Default)]
struct Ledger {
    records: Vec<ProvenanceRecord>,
    by_key: HashMap<RecordKey, usize>,
}

impl Ledger {
    fn key(record: &ProvenanceRecord) -> RecordKey {
        (
            record.source_document_id.clone(),
            record.produced.clone(),
        )
    }

    fn push(&mut self, record: ProvenanceRecord) {
        self.by_key.insert(Self::key(&record), self.records.len());
        self.records.push(record);
    }
}

/// Append-only provenance ledger
#[derive(Debug)]
pub struct ProvenanceTracker {
    ledger: Mutex<Ledger>,
    log_path: Option<PathBuf>,
}

impl Default for ProvenanceTracker {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl ProvenanceTracker {
    /// Tracker that keeps records for the lifetime of the process
    pub fn in_memory() -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            log_path: None,
        }
    }

    /// Opens a tracker backed by a JSON-lines log, replaying existing records
    ///
    /// # Errors
    ///
    /// Returns a storage error if the log exists but cannot be read or parsed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut ledger = Ledger::default();
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                for (line_no, line) in contents.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let record: ProvenanceRecord = serde_json::from_str(line).map_err(|e| {
                        StorageError::QueryFailed(format!(
                            "{} line {}: {e}",
                            path.display(),
                            line_no + 1
                        ))
                    })?;
                    ledger.push(record);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StorageError::Unreachable(format!("{}: {e}", path.display())).into())
            }
        }

        tracing::debug!(
            path = %path.display(),
            records = ledger.records.len(),
            "Provenance log opened"
        );
        Ok(Self {
            ledger: Mutex::new(ledger),
            log_path: Some(path),
        })
    }

    /// Record provenance for resources produced from a document
    ///
    /// # Arguments
    ///
    /// * `source_document_id` - Content id of the imported document
    /// * `produced` - Type and id of each produced resource, in any order
    /// * `rule_versions` - Transform rule versions applied
    /// * `actor` - Identity of the acting system
    ///
    /// # Returns
    ///
    /// The new record, or the existing one when the same document and
    /// produced set were already recorded.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the record cannot be appended to the log.
    pub async fn record(
        &self,
        source_document_id: DocumentId,
        produced: Vec<ProducedResource>,
        rule_versions: Vec<String>,
        actor: &str,
    ) -> Result<ProvenanceRecord> {
        let candidate =
            ProvenanceRecord::new(source_document_id, produced, rule_versions, actor);

        let mut ledger = self.ledger.lock().await;
        if let Some(&index) = ledger.by_key.get(&Ledger::key(&candidate)) {
            let existing = ledger.records[index].clone();
            tracing::debug!(
                provenance_id = %existing.id,
                "Provenance already recorded for this document and resource set"
            );
            return Ok(existing);
        }

        if let Some(ref path) = self.log_path {
            append_line(path, &candidate).await?;
        }
        ledger.push(candidate.clone());

        tracing::info!(
            provenance_id = %candidate.id,
            source_document_id = %candidate.source_document_id,
            resources = candidate.produced.len(),
            "Provenance recorded"
        );
        Ok(candidate)
    }

    /// Look up a record by id
    pub async fn get(&self, id: &ProvenanceId) -> Option<ProvenanceRecord> {
        self.ledger
            .lock()
            .await
            .records
            .iter()
            .find(|r| &r.id == id)
            .cloned()
    }

    /// Every record for a source document, in recording order
    pub async fn for_document(&self, document_id: &DocumentId) -> Vec<ProvenanceRecord> {
        self.ledger
            .lock()
            .await
            .records
            .iter()
            .filter(|r| &r.source_document_id == document_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.ledger.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

async fn append_line(path: &Path, record: &ProvenanceRecord) -> Result<()> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let write = async {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    };
    write.await.map_err(|e| {
        MeridianError::from(StorageError::WriteFailed(format!("{}: {e}", path.display())))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ResourceId, ResourceType};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn doc(fill: char) -> DocumentId {
        DocumentId::new(fill.to_string().repeat(64)).unwrap()
    }

    fn ids(values: &[&str]) -> Vec<ProducedResource> {
        values
            .iter()
            .map(|v| ProducedResource::new(ResourceType::Condition, ResourceId::new(*v).unwrap()))
            .collect()
    }

    #[tokio::test]
    async fn test_record_is_idempotent_per_document_and_set() {
        let tracker = ProvenanceTracker::in_memory();
        let first = tracker
            .record(doc('a'), ids(&["c1", "m1"]), vec!["v1".into()], "meridian")
            .await
            .unwrap();
        let second = tracker
            .record(doc('a'), ids(&["m1", "c1"]), vec!["v1".into()], "meridian")
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(tracker.len().await, 1);

        tracker
            .record(doc('a'), ids(&["c1"]), vec![], "meridian")
            .await
            .unwrap();
        assert_eq!(tracker.for_document(&doc('a')).await.len(), 2);
        assert!(tracker.for_document(&doc('b')).await.is_empty());
    }

    #[tokio::test]
    async fn test_shared_id_across_types_is_a_different_set() {
        let tracker = ProvenanceTracker::in_memory();
        let id = || ResourceId::new("1").unwrap();
        let patient_only = tracker
            .record(
                doc('e'),
                vec![ProducedResource::new(ResourceType::Patient, id())],
                vec![],
                "meridian",
            )
            .await
            .unwrap();
        let observation_only = tracker
            .record(
                doc('e'),
                vec![ProducedResource::new(ResourceType::Observation, id())],
                vec![],
                "meridian",
            )
            .await
            .unwrap();
        let both = tracker
            .record(
                doc('e'),
                vec![
                    ProducedResource::new(ResourceType::Observation, id()),
                    ProducedResource::new(ResourceType::Patient, id()),
                ],
                vec![],
                "meridian",
            )
            .await
            .unwrap();

        assert_ne!(patient_only.id, observation_only.id);
        assert_eq!(both.produced.len(), 2);
        assert_eq!(tracker.len().await, 3);
    }

    #[tokio::test]
    async fn test_concurrent_identical_records_yield_one() {
        let tracker = Arc::new(ProvenanceTracker::in_memory());
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                tokio::spawn(async move {
                    tracker
                        .record(doc('c'), ids(&["x"]), vec![], "meridian")
                        .await
                        .unwrap()
                        .id
                })
            })
            .collect();

        let mut seen = Vec::new();
        for task in tasks {
            seen.push(task.await.unwrap());
        }
        seen.dedup();
        assert_eq!(seen.len(), 1);
        assert_eq!(tracker.len().await, 1);
    }

    #[tokio::test]
    async fn test_log_is_replayed_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("provenance.jsonl");

        let recorded = {
            let tracker = ProvenanceTracker::open(&path).await.unwrap();
            tracker
                .record(doc('d'), ids(&["c1"]), vec!["Condition@1".into()], "meridian")
                .await
                .unwrap()
        };

        let reopened = ProvenanceTracker::open(&path).await.unwrap();
        assert_eq!(reopened.get(&recorded.id).await, Some(recorded.clone()));

        let again = reopened
            .record(doc('d'), ids(&["c1"]), vec!["Condition@1".into()], "meridian")
            .await
            .unwrap();
        assert_eq!(again.id, recorded.id);
    }
}
