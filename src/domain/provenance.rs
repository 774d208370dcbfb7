//! Provenance record model

use super::ids::{DocumentId, ProvenanceId, ResourceId};
use super::resource::ResourceType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Type and id of one produced resource
///
/// Ids are only unique within a type, so both parts identify the resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProducedResource {
    pub resource_type: ResourceType,
    pub id: ResourceId,
}

impl ProducedResource {
    pub fn new(resource_type: ResourceType, id: ResourceId) -> Self {
        Self { resource_type, id }
    }
}

impl std::fmt::Display for ProducedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.id)
    }
}

/// Immutable audit record linking produced resources to their source document
///
/// Produced resources are kept sorted and rule versions sorted and deduplicated, so
/// two records for the same inputs compare equal apart from id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub id: ProvenanceId,
    pub source_document_id: DocumentId,
    pub produced: Vec<ProducedResource>,
    pub rule_versions: Vec<String>,
    pub recorded_at: DateTime<Utc>,

    /// Identity of the acting system
    pub actor: String,
}

impl ProvenanceRecord {
    /// Creates a record with normalized id and version lists
    pub fn new(
        source_document_id: DocumentId,
        mut produced: Vec<ProducedResource>,
        mut rule_versions: Vec<String>,
        actor: impl Into<String>,
    ) -> Self {
        produced.sort();
        produced.dedup();
        rule_versions.sort();
        rule_versions.dedup();
        Self {
            id: ProvenanceId::generate(),
            source_document_id,
            produced,
            rule_versions,
            recorded_at: Utc::now(),
            actor: actor.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn produced(resource_type: ResourceType, id: &str) -> ProducedResource {
        ProducedResource::new(resource_type, ResourceId::new(id).unwrap())
    }

    #[test]
    fn test_new_normalizes_lists() {
        let doc = DocumentId::new("0".repeat(64)).unwrap();
        let record = ProvenanceRecord::new(
            doc,
            vec![
                produced(ResourceType::Condition, "b"),
                produced(ResourceType::Condition, "a"),
                produced(ResourceType::Condition, "a"),
            ],
            vec!["Condition/A->B@1".to_string(), "Condition/A->B@1".to_string()],
            "meridian",
        );
        assert_eq!(record.produced.len(), 2);
        assert_eq!(record.produced[0].to_string(), "Condition/a");
        assert_eq!(record.rule_versions.len(), 1);
    }

    #[test]
    fn test_same_id_under_two_types_is_kept_twice() {
        let doc = DocumentId::new("0".repeat(64)).unwrap();
        let record = ProvenanceRecord::new(
            doc,
            vec![
                produced(ResourceType::Patient, "1"),
                produced(ResourceType::Observation, "1"),
            ],
            vec![],
            "meridian",
        );
        let refs: Vec<String> = record.produced.iter().map(ToString::to_string).collect();
        assert_eq!(refs, vec!["Patient/1", "Observation/1"]);

        let json = serde_json::to_value(&record.produced[0]).unwrap();
        assert_eq!(json, serde_json::json!({"resource_type": "Patient", "id": "1"}));
    }
}
