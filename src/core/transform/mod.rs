//! Bidirectional schema-generation transformation
//!
//! This module converts clinical resources between generation A and
//! generation B. Dispatch is a registry keyed by resource type and source
//! generation; each entry is a table-driven [`TransformRule`]:
//!
//! - **Rule tables** ([`rule`]): ordered field transforms with derived inverses
//! - **Vocabularies** ([`vocabulary`]): enumerated code tables
//! - **Per-type rules** ([`rules`]): one module per registered resource type
//!
//! Transformation is pure. It performs no I/O, holds no mutable state, and
//! produces identical output and warnings for identical input.

pub mod rule;
pub mod rules;
pub mod vocabulary;

pub use rule::{fragment_parent_id, FieldTransform, Fragmentation, TransformRule};

use crate::domain::{
    ClinicalResource, Generation, ResourceId, ResourceType, TransformError, TransformWarning,
};
use std::collections::{BTreeMap, BTreeSet};

/// Result of transforming one resource
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutcome {
    /// Produced resources; the direct counterpart of the input comes first
    pub resources: Vec<ClinicalResource>,
    pub warnings: Vec<TransformWarning>,

    /// Version tag of the rule that ran, `None` for pass-throughs
    pub rule_version: Option<String>,
}

impl TransformOutcome {
    fn passthrough(resource: &ClinicalResource, warning: Option<TransformWarning>) -> Self {
        Self {
            resources: vec![resource.clone()],
            warnings: warning.into_iter().collect(),
            rule_version: None,
        }
    }

    /// True when the resource went through unchanged because no rule applied
    pub fn is_passthrough(&self) -> bool {
        self.rule_version.is_none()
    }
}

/// Result of transforming a batch of resources
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub resources: Vec<ClinicalResource>,
    pub warnings: Vec<TransformWarning>,

    /// Per-resource failures, in input order
    pub errors: Vec<TransformError>,

    /// Version tags of every rule that ran
    pub rule_versions: BTreeSet<String>,

    /// Resources carried through untransformed, in input order
    pub passthrough: Vec<ResourceId>,
}

/// Registry of transform rules
///
/// # Examples
///
/// ```
/// use meridian::core::transform::VersionTransformer;
/// use meridian::domain::codec::decode_resource;
/// use meridian::domain::{Generation, ResourceType};
/// use serde_json::json;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transformer = VersionTransformer::new();
/// let statement = decode_resource(
///     &json!({
///         "resourceType": "MedicationStatement",
///         "id": "med-1",
///         "status": "active",
///         "medicationCodeableConcept": {"text": "lisinopril"},
///         "subject": {"reference": "Patient/p1"}
///     }),
///     Generation::A,
/// )?;
///
/// let outcome = transformer.transform(&statement, Generation::A, Generation::B)?;
/// assert_eq!(outcome.resources[0].resource_type, ResourceType::MedicationUsage);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct VersionTransformer {
    rules: BTreeMap<(ResourceType, Generation), TransformRule>,
}

impl Default for VersionTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionTransformer {
    /// Creates a transformer with every built-in rule registered
    pub fn new() -> Self {
        Self::with_rules(rules::all())
    }

    /// Creates a transformer with the given rules only
    pub fn with_rules(rules: impl IntoIterator<Item = TransformRule>) -> Self {
        let mut transformer = Self {
            rules: BTreeMap::new(),
        };
        for rule in rules {
            transformer.register(rule);
        }
        transformer
    }

    /// Registers a rule, replacing any rule for the same type and generation
    pub fn register(&mut self, rule: TransformRule) {
        self.rules
            .insert((rule.source_type.clone(), rule.source), rule);
    }

    pub fn rule(&self, resource_type: &ResourceType, source: Generation) -> Option<&TransformRule> {
        self.rules.get(&(resource_type.clone(), source))
    }

    pub fn is_registered(&self, resource_type: &ResourceType, source: Generation) -> bool {
        self.rule(resource_type, source).is_some()
    }

    /// Rule that merges fragments of `resource_type` when reading `source`
    fn merging_rule(&self, resource_type: &ResourceType, source: Generation) -> Option<&TransformRule> {
        self.rules.values().find(|rule| {
            rule.source == source
                && rule
                    .merge
                    .as_ref()
                    .is_some_and(|m| &m.fragment_type == resource_type)
        })
    }

    /// True when `resource_type` only exists as a fragment split off another type
    pub fn is_fragment_type(&self, resource_type: &ResourceType, source: Generation) -> bool {
        self.merging_rule(resource_type, source).is_some()
    }

    /// Transforms one resource from `source` to `target`
    ///
    /// Fragments are only folded back by [`VersionTransformer::transform_all`];
    /// a fragment transformed on its own passes through as orphaned.
    pub fn transform(
        &self,
        resource: &ClinicalResource,
        source: Generation,
        target: Generation,
    ) -> Result<TransformOutcome, TransformError> {
        if resource.generation != source {
            return Err(TransformError::InvalidField {
                resource_id: resource.id.to_string(),
                field: "generation".to_string(),
                reason: format!("expected generation {source}, found {}", resource.generation),
            });
        }
        if source == target {
            return Ok(TransformOutcome::passthrough(resource, None));
        }

        if self.is_fragment_type(&resource.resource_type, source) {
            return Ok(TransformOutcome::passthrough(
                resource,
                Some(orphaned(resource)),
            ));
        }

        let Some(rule) = self.rule(&resource.resource_type, source) else {
            return Ok(TransformOutcome::passthrough(
                resource,
                Some(TransformWarning::UnmappedType {
                    resource_id: resource.id.to_string(),
                    resource_type: resource.resource_type.to_string(),
                }),
            ));
        };

        let (resources, warnings) = rule.apply(resource)?;
        Ok(TransformOutcome {
            resources,
            warnings,
            rule_version: Some(rule.version_tag()),
        })
    }

    /// Transforms a batch, folding fragments back into their parents
    ///
    /// A failing resource is recorded in [`BatchOutcome::errors`] and the rest
    /// of the batch continues. Fragments that find no parent in the batch
    /// pass through after all other resources, in input order.
    pub fn transform_all(
        &self,
        resources: &[ClinicalResource],
        source: Generation,
        target: Generation,
    ) -> BatchOutcome {
        let mut batch = BatchOutcome::default();

        // fragments grouped by parent id, each with its input position
        let mut fragments: BTreeMap<&str, Vec<(usize, &ClinicalResource)>> = BTreeMap::new();
        let mut orphans: Vec<(usize, &ClinicalResource)> = Vec::new();
        let mut parents: Vec<&ClinicalResource> = Vec::new();
        for (position, resource) in resources.iter().enumerate() {
            let is_fragment = source != target
                && resource.generation == source
                && self.is_fragment_type(&resource.resource_type, source);
            if !is_fragment {
                parents.push(resource);
                continue;
            }
            match fragment_parent_id(resource) {
                Some(parent) => fragments
                    .entry(parent)
                    .or_default()
                    .push((position, resource)),
                None => orphans.push((position, resource)),
            }
        }

        for resource in parents {
            let outcome = match self.transform(resource, source, target) {
                Ok(outcome) => outcome,
                Err(err) => {
                    batch.errors.push(err);
                    continue;
                }
            };

            let mut produced = outcome.resources;
            batch.warnings.extend(outcome.warnings);
            match outcome.rule_version {
                Some(version) => {
                    batch.rule_versions.insert(version);
                }
                None => batch.passthrough.push(resource.id.clone()),
            }

            let merge = self
                .rule(&resource.resource_type, source)
                .and_then(|rule| rule.merge.as_ref());
            if let (Some(merge), Some(children)) = (merge, fragments.remove(resource.id.as_str())) {
                for (position, child) in children {
                    let mut ctx = rule::RuleContext::new(child);
                    let merged = match produced.first_mut() {
                        Some(parent) if child.resource_type == merge.fragment_type => {
                            (merge.merge)(&mut ctx, parent, child)
                        }
                        _ => Ok(false),
                    };
                    batch.warnings.extend(ctx.into_warnings());
                    match merged {
                        Ok(true) => {}
                        Ok(false) => orphans.push((position, child)),
                        Err(err) => batch.errors.push(err),
                    }
                }
            }
            batch.resources.extend(produced);
        }

        // fragments whose parent never showed up, or failed
        let mut leftover: Vec<(usize, &ClinicalResource)> =
            fragments.into_values().flatten().collect();
        leftover.extend(orphans);
        leftover.sort_by_key(|(position, _)| *position);

        for (_, fragment) in leftover {
            batch.warnings.push(orphaned(fragment));
            batch.passthrough.push(fragment.id.clone());
            batch.resources.push(fragment.clone());
        }

        batch
    }
}

fn orphaned(fragment: &ClinicalResource) -> TransformWarning {
    TransformWarning::OrphanedFragment {
        resource_id: fragment.id.to_string(),
        resource_type: fragment.resource_type.to_string(),
        parent_id: fragment_parent_id(fragment).unwrap_or_default().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::codec::{decode_resource, encode_resource};
    use serde_json::{json, Value};

    fn a(json: Value) -> ClinicalResource {
        decode_resource(&json, Generation::A).unwrap()
    }

    fn samples() -> Vec<Value> {
        vec![
            json!({"resourceType": "Patient", "id": "p1", "gender": "male", "birthDate": "1975-06-01"}),
            json!({
                "resourceType": "Composition", "id": "doc1", "status": "final",
                "type": {"text": "continuity of care"}, "subject": {"reference": "Patient/p1"},
                "confidentiality": "N", "section": [{"title": "Problems", "mode": "snapshot"}]
            }),
            json!({
                "resourceType": "Condition", "id": "c1",
                "subject": {"reference": "Patient/p1"},
                "clinicalStatus": {"coding": [{"system": "http://terminology.hl7.org/CodeSystem/condition-clinical", "code": "active"}]},
                "code": {"text": "Type 2 diabetes"},
                "onsetDateTime": "2019-05-04T00:00:00Z"
            }),
            json!({
                "resourceType": "MedicationStatement", "id": "m1", "status": "completed",
                "medicationReference": {"reference": "Medication/metformin"},
                "subject": {"reference": "Patient/p1"},
                "dosage": [{"text": "twice daily", "timing": {"repeat": {"frequency": 2, "period": 1, "periodUnit": "d"}}}]
            }),
            json!({
                "resourceType": "AllergyIntolerance", "id": "al1", "type": "intolerance",
                "patient": {"reference": "Patient/p1"}, "recorder": {"reference": "Practitioner/x"}
            }),
            json!({
                "resourceType": "Immunization", "id": "i1", "status": "completed",
                "vaccineCode": {"text": "influenza"}, "patient": {"reference": "Patient/p1"},
                "protocolApplied": [{"doseNumberString": "first"}]
            }),
            json!({
                "resourceType": "Observation", "id": "o1", "status": "amended",
                "code": {"text": "weight"}, "valueQuantity": {"value": 81.5, "unit": "kg"}
            }),
            json!({
                "resourceType": "Encounter", "id": "e1", "status": "in-progress",
                "class": {"system": "http://terminology.hl7.org/CodeSystem/v3-ActCode", "code": "IMP"}
            }),
            json!({
                "resourceType": "Organization", "id": "org1", "name": "Clinic",
                "telecom": [{"system": "phone", "value": "555-0199"}]
            }),
        ]
    }

    #[test]
    fn test_round_trip_every_registered_type() {
        let transformer = VersionTransformer::new();
        let originals: Vec<ClinicalResource> = samples().into_iter().map(a).collect();

        let forward = transformer.transform_all(&originals, Generation::A, Generation::B);
        assert!(forward.errors.is_empty());
        assert!(forward.passthrough.is_empty());
        assert!(forward
            .resources
            .iter()
            .any(|r| r.resource_type == ResourceType::MedicationTiming));

        let back = transformer.transform_all(&forward.resources, Generation::B, Generation::A);
        assert!(back.errors.is_empty());
        assert!(back.passthrough.is_empty(), "{:?}", back.warnings);

        let restored: Vec<Value> = back.resources.iter().map(encode_resource).collect();
        assert_eq!(restored, samples());
    }

    #[test]
    fn test_transform_is_deterministic() {
        let transformer = VersionTransformer::new();
        let originals: Vec<ClinicalResource> = samples().into_iter().map(a).collect();
        let first = transformer.transform_all(&originals, Generation::A, Generation::B);
        let second = transformer.transform_all(&originals, Generation::A, Generation::B);
        assert_eq!(first, second);
    }

    #[test]
    fn test_every_produced_resource_has_source() {
        let transformer = VersionTransformer::new();
        let originals: Vec<ClinicalResource> = samples().into_iter().map(a).collect();
        let forward = transformer.transform_all(&originals, Generation::A, Generation::B);
        for resource in &forward.resources {
            assert!(resource.source_id.is_some(), "{} has no source", resource.id);
            assert_eq!(resource.generation, Generation::B);
        }
    }

    #[test]
    fn test_unknown_type_passes_through() {
        let transformer = VersionTransformer::new();
        let resource = a(json!({"resourceType": "CarePlan", "id": "cp1", "status": "active"}));
        let outcome = transformer
            .transform(&resource, Generation::A, Generation::B)
            .unwrap();

        assert!(outcome.is_passthrough());
        assert_eq!(outcome.resources, vec![resource]);
        assert_eq!(outcome.resources[0].generation, Generation::A);
        assert!(matches!(
            &outcome.warnings[..],
            [TransformWarning::UnmappedType { resource_type, .. }] if resource_type == "CarePlan"
        ));
    }

    #[test]
    fn test_wrong_generation_is_rejected() {
        let transformer = VersionTransformer::new();
        let resource = a(json!({"resourceType": "Patient", "id": "p1"}));
        assert!(transformer
            .transform(&resource, Generation::B, Generation::A)
            .is_err());
    }

    #[test]
    fn test_failures_are_isolated() {
        let transformer = VersionTransformer::new();
        let resources = vec![
            a(json!({"resourceType": "Condition", "id": "c1", "subject": {"reference": "Patient/p1"}})),
            a(json!({"resourceType": "Condition", "id": "c2"})),
            a(json!({"resourceType": "Observation", "id": "o1", "status": "final", "code": {"text": "bp"}})),
        ];
        let batch = transformer.transform_all(&resources, Generation::A, Generation::B);

        assert_eq!(batch.resources.len(), 2);
        assert_eq!(batch.errors.len(), 1);
        assert_eq!(batch.errors[0].resource_id(), "c2");
        assert_eq!(
            batch.rule_versions.iter().cloned().collect::<Vec<_>>(),
            vec!["Condition:A->B@1.0.0", "Observation:A->B@1.0.0"]
        );
    }

    #[test]
    fn test_orphaned_fragment_passes_through() {
        let transformer = VersionTransformer::new();
        let fragment = decode_resource(
            &json!({
                "resourceType": "MedicationTiming",
                "id": "m9-timing-0",
                "parent": {"reference": "MedicationUsage/m9"},
                "dosageIndex": 0,
                "timing": {"code": {"text": "QD"}}
            }),
            Generation::B,
        )
        .unwrap();

        let batch = transformer.transform_all(
            std::slice::from_ref(&fragment),
            Generation::B,
            Generation::A,
        );
        assert_eq!(batch.resources, vec![fragment]);
        assert_eq!(batch.passthrough.len(), 1);
        assert!(matches!(
            &batch.warnings[..],
            [TransformWarning::OrphanedFragment { parent_id, .. }] if parent_id == "m9"
        ));
    }

    #[test]
    fn test_same_generation_is_identity() {
        let transformer = VersionTransformer::new();
        let resource = a(json!({"resourceType": "Condition", "id": "c1"}));
        let outcome = transformer
            .transform(&resource, Generation::A, Generation::A)
            .unwrap();
        assert_eq!(outcome.resources, vec![resource]);
        assert!(outcome.warnings.is_empty());
    }
}
