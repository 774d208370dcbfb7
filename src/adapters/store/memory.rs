//! In-memory clinical store
//!
//! Used by tests and offline runs. Failures can be injected per patient so
//! partial outcomes of bulk exports can be exercised.

use super::traits::{ClinicalStore, PatientIndex, ResourceQuery};
use crate::domain::{
    ClinicalResource, Demographics, OrganizationId, PatientId, PatientRecord, ResourceId,
    ResourceType, Result, StorageError,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

type PatientResources = BTreeMap<(ResourceType, ResourceId), ClinicalResource>;

/// Clinical store and patient index held in memory
#[derive(Debug, Default)]
pub struct InMemoryClinicalStore {
    resources: RwLock<BTreeMap<PatientId, PatientResources>>,
    patients: RwLock<BTreeMap<OrganizationId, BTreeMap<PatientId, PatientRecord>>>,
    unreachable: RwLock<BTreeSet<PatientId>>,
    fail_writes: AtomicBool,
    latency: Option<Duration>,
}

impl InMemoryClinicalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every call, for exercising caller timeouts
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes every query for `patient_id` fail as unreachable
    pub async fn fail_patient(&self, patient_id: PatientId) {
        self.unreachable.write().await.insert(patient_id);
    }

    /// Makes every write fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Adds a known patient to an organization
    pub async fn add_patient(&self, organization_id: OrganizationId, record: PatientRecord) {
        self.patients
            .write()
            .await
            .entry(organization_id)
            .or_default()
            .insert(record.id.clone(), record);
    }

    /// Number of resources stored for a patient
    pub async fn resource_count(&self, patient_id: &PatientId) -> usize {
        self.resources
            .read()
            .await
            .get(patient_id)
            .map_or(0, BTreeMap::len)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ClinicalStore for InMemoryClinicalStore {
    async fn query(&self, query: &ResourceQuery) -> Result<Vec<ClinicalResource>> {
        self.simulate_latency().await;
        if self.unreachable.read().await.contains(&query.patient_id) {
            return Err(StorageError::Unreachable(format!(
                "store unavailable for patient {}",
                query.patient_id
            ))
            .into());
        }

        let resources = self.resources.read().await;
        Ok(resources
            .get(&query.patient_id)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|r| {
                query.resource_types.is_empty() || query.resource_types.contains(&r.resource_type)
            })
            .cloned()
            .collect())
    }

    async fn write(
        &self,
        patient_id: &PatientId,
        resources: &[ClinicalResource],
    ) -> Result<Vec<ResourceId>> {
        self.simulate_latency().await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed(format!(
                "write rejected for patient {patient_id}"
            ))
            .into());
        }

        let mut stored = self.resources.write().await;
        let entry = stored.entry(patient_id.clone()).or_default();
        for resource in resources {
            entry.insert(
                (resource.resource_type.clone(), resource.id.clone()),
                resource.clone(),
            );
        }
        Ok(resources.iter().map(|r| r.id.clone()).collect())
    }

    async fn list_patients(&self, organization_id: &OrganizationId) -> Result<Vec<PatientId>> {
        self.simulate_latency().await;
        Ok(self
            .patients
            .read()
            .await
            .get(organization_id)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl PatientIndex for InMemoryClinicalStore {
    async fn find_candidates(
        &self,
        organization_id: &OrganizationId,
        _demographics: &Demographics,
    ) -> Result<Vec<PatientRecord>> {
        self.simulate_latency().await;
        Ok(self
            .patients
            .read()
            .await
            .get(organization_id)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn register_patient(
        &self,
        organization_id: &OrganizationId,
        demographics: &Demographics,
    ) -> Result<PatientId> {
        let mut patients = self.patients.write().await;
        let records = patients.entry(organization_id.clone()).or_default();
        let id = PatientId::new(format!("pat-{}", records.len() + 1))
            .map_err(StorageError::WriteFailed)?;
        records.insert(
            id.clone(),
            PatientRecord {
                id: id.clone(),
                demographics: demographics.clone(),
            },
        );
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FieldValue, Generation};

    fn condition(id: &str) -> ClinicalResource {
        ClinicalResource::builder()
            .id(id)
            .unwrap()
            .resource_type(ResourceType::Condition)
            .generation(Generation::B)
            .field("recordedDate", FieldValue::Date("2024-01-01".to_string()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_write_then_query() {
        let store = InMemoryClinicalStore::new();
        let patient = PatientId::new("p1").unwrap();
        store
            .write(&patient, &[condition("c1"), condition("c2")])
            .await
            .unwrap();

        let found = store
            .query(&ResourceQuery::for_patient(patient.clone()))
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(store.resource_count(&patient).await, 2);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = InMemoryClinicalStore::new();
        let patient = PatientId::new("p1").unwrap();
        store.fail_patient(patient.clone()).await;

        let err = store
            .query(&ResourceQuery::for_patient(patient))
            .await
            .unwrap_err();
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_register_patient_is_listed() {
        let store = InMemoryClinicalStore::new();
        let org = OrganizationId::new("org-1").unwrap();
        let id = store
            .register_patient(&org, &Demographics::default())
            .await
            .unwrap();
        assert_eq!(store.list_patients(&org).await.unwrap(), vec![id]);
    }
}
