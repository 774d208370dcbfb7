//! Clinical store abstraction traits
//!
//! This module defines the traits that clinical store adapters must implement
//! to work with Meridian. The store owns persisted resources; pipelines only
//! hold transient working copies while a job runs.

use crate::domain::{
    ClinicalResource, DateRange, Demographics, OrganizationId, PatientId, PatientRecord,
    ResourceId, ResourceType, Result,
};
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Query for the stored resources of one patient
///
/// Stores may use the filters to narrow what they read. Callers apply them
/// again, so a store that ignores them is still correct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceQuery {
    pub patient_id: PatientId,

    /// Resource types to return; empty means all
    pub resource_types: BTreeSet<ResourceType>,

    pub date_range: Option<DateRange>,
}

impl ResourceQuery {
    /// Query for every resource of a patient
    pub fn for_patient(patient_id: PatientId) -> Self {
        Self {
            patient_id,
            resource_types: BTreeSet::new(),
            date_range: None,
        }
    }

    /// Restricts the query to the given resource types
    pub fn with_types(mut self, resource_types: BTreeSet<ResourceType>) -> Self {
        self.resource_types = resource_types;
        self
    }

    pub fn with_date_range(mut self, date_range: Option<DateRange>) -> Self {
        self.date_range = date_range;
        self
    }
}

/// Clinical store trait for generation B resources
#[async_trait]
pub trait ClinicalStore: Send + Sync {
    /// Read the stored resources matching a query
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the store cannot be read.
    async fn query(&self, query: &ResourceQuery) -> Result<Vec<ClinicalResource>>;

    /// Write resources for a patient, replacing any with the same type and id
    ///
    /// # Returns
    ///
    /// Returns the ids of the stored resources, in input order.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if any resource cannot be written.
    async fn write(
        &self,
        patient_id: &PatientId,
        resources: &[ClinicalResource],
    ) -> Result<Vec<ResourceId>>;

    /// List the patients of an organization, sorted by id
    async fn list_patients(&self, organization_id: &OrganizationId) -> Result<Vec<PatientId>>;
}

/// Patient index trait used for identity resolution
#[async_trait]
pub trait PatientIndex: Send + Sync {
    /// Find the known patients of an organization that could match
    ///
    /// Implementations may pre-select candidates (for example by birth date
    /// or record number); the matcher does the scoring.
    async fn find_candidates(
        &self,
        organization_id: &OrganizationId,
        demographics: &Demographics,
    ) -> Result<Vec<PatientRecord>>;

    /// Register a new patient after the caller confirmed no match exists
    async fn register_patient(
        &self,
        organization_id: &OrganizationId,
        demographics: &Demographics,
    ) -> Result<PatientId>;
}
