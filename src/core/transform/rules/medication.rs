//! Medication statement (A) <-> medication usage (B)
//!
//! Generation A carries the adherence of the patient in `status`; generation
//! B always records `recorded` and moves the adherence into `adherence`.
//! Timed dosage entries are split into separate `MedicationTiming` facts that
//! reference their usage through `parent` and `dosageIndex`.
//!
//! Lossy in B -> A: a `recorded` usage without an adherence code becomes
//! status `unknown`.

use crate::core::transform::rule::{
    reference_to, FieldTransform, Fields, Fragmentation, RuleContext, TransformRule,
    PARENT_FIELD,
};
use crate::core::transform::vocabulary::{MEDICATION_ADHERENCE, MEDICATION_STATUS};
use crate::domain::codec::{decode_value, encode_value};
use crate::domain::{ClinicalResource, FieldValue, Generation, ResourceType, TransformError};
use serde_json::{json, Value};

pub const VERSION: &str = "1.0.0";

const RECORDED: &str = "recorded";

pub fn rules() -> Vec<TransformRule> {
    let forward = TransformRule::new(ResourceType::MedicationStatement, Generation::A, VERSION)
        .target_type(ResourceType::MedicationUsage)
        .require(&["status", "subject"])
        .field(FieldTransform::Custom {
            name: "medication-status",
            apply: status_to_usage,
            undo: status_to_statement,
        })
        .field(FieldTransform::ChoiceToCodeableReference {
            concept: Some("medicationCodeableConcept"),
            reference: Some("medicationReference"),
            target: "medication",
            required: true,
        })
        .field(FieldTransform::Rename {
            from: "context",
            to: "encounter",
        })
        .field(FieldTransform::WrapList { field: "category" })
        .field(FieldTransform::WrapList {
            field: "informationSource",
        })
        .field(FieldTransform::MergeReasons {
            concept: "reasonCode",
            reference: "reasonReference",
            target: "reason",
        })
        .field(FieldTransform::Rename {
            from: "basedOn",
            to: "relatedClinicalInformation",
        })
        .split(Fragmentation {
            fragment_type: ResourceType::MedicationTiming,
            split: split_timing,
            merge: merge_timing,
        });

    let backward = forward
        .inverse()
        .require(&["status", "subject", "medication"]);

    vec![forward, backward]
}

fn adherence_value(code: &str) -> FieldValue {
    let system = MEDICATION_ADHERENCE.system.unwrap_or_default();
    let mut map = serde_json::Map::new();
    map.insert(
        "code".to_string(),
        json!({ "coding": [{ "system": system, "code": code }] }),
    );
    FieldValue::Structure(map)
}

/// Extracts the adherence code when the element holds nothing else
fn adherence_code(value: &FieldValue) -> Option<String> {
    let FieldValue::Structure(map) = value else {
        return None;
    };
    if map.len() != 1 {
        return None;
    }
    let concept = match decode_value("code", map.get("code")?)? {
        FieldValue::Concept(concept) => concept,
        _ => return None,
    };
    match (concept.codings.as_slice(), &concept.text) {
        ([coding], None)
            if coding.system.as_deref() == MEDICATION_ADHERENCE.system
                && coding.display.is_none()
                && coding.version.is_none() =>
        {
            coding.code.clone()
        }
        _ => None,
    }
}

fn status_to_usage(ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    let Some(FieldValue::Code(code)) = fields.get("status").cloned() else {
        return Ok(());
    };

    if let Some(status) = MEDICATION_STATUS.forward(&code) {
        fields.insert("status".to_string(), FieldValue::Code(status.to_string()));
        return Ok(());
    }

    if let Some(adherence) = MEDICATION_ADHERENCE.forward(&code) {
        if fields.contains_key("adherence") {
            return Err(ctx.conflict(&["status", "adherence"]));
        }
        fields.insert("status".to_string(), FieldValue::Code(RECORDED.to_string()));
        fields.insert("adherence".to_string(), adherence_value(adherence));
        return Ok(());
    }

    ctx.unmapped_code("status", &code);
    fields.insert("status".to_string(), FieldValue::Text(code));
    Ok(())
}

fn status_to_statement(ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    let Some(FieldValue::Code(code)) = fields.get("status").cloned() else {
        return Ok(());
    };

    if code != RECORDED {
        match MEDICATION_STATUS.backward(&code) {
            Some(status) => {
                fields.insert("status".to_string(), FieldValue::Code(status.to_string()));
            }
            None => {
                ctx.unmapped_code("status", &code);
                fields.insert("status".to_string(), FieldValue::Text(code));
            }
        }
        return Ok(());
    }

    let adherence = fields.get("adherence").and_then(adherence_code);
    let status = match adherence.as_deref() {
        Some(adherence) => match MEDICATION_ADHERENCE.backward(adherence) {
            Some(status) => {
                fields.remove("adherence");
                status
            }
            None => {
                ctx.unmapped_code("adherence", adherence);
                "unknown"
            }
        },
        None => "unknown",
    };
    fields.insert("status".to_string(), FieldValue::Code(status.to_string()));
    Ok(())
}

fn split_timing(
    _ctx: &mut RuleContext,
    usage: &mut ClinicalResource,
) -> Result<Vec<ClinicalResource>, TransformError> {
    let Some(dosage) = usage.fields.get("dosage") else {
        return Ok(Vec::new());
    };
    let mut dosage_json = encode_value(dosage);
    let Some(entries) = dosage_json.as_array_mut() else {
        return Ok(Vec::new());
    };

    let mut fragments = Vec::new();
    for (index, entry) in entries.iter_mut().enumerate() {
        let Some(timing) = entry.as_object_mut().and_then(|e| e.remove("timing")) else {
            continue;
        };

        let mut fields = Fields::new();
        fields.insert(
            PARENT_FIELD.to_string(),
            reference_to(&ResourceType::MedicationUsage, usage.id.as_str()),
        );
        fields.insert("dosageIndex".to_string(), FieldValue::Integer(index as i64));
        if let Some(timing) = decode_value("timing", &timing) {
            fields.insert("timing".to_string(), timing);
        }
        if let Some(subject) = usage.fields.get("subject") {
            fields.insert("subject".to_string(), subject.clone());
        }

        fragments.push(ClinicalResource {
            id: usage.id.derive(&format!("timing-{index}")),
            resource_type: ResourceType::MedicationTiming,
            generation: Generation::B,
            fields,
            source_id: usage.source_id.clone(),
            created_at: usage.created_at,
        });
    }

    if !fragments.is_empty() {
        if let Some(dosage) = decode_value("dosage", &dosage_json) {
            usage.fields.insert("dosage".to_string(), dosage);
        }
    }
    Ok(fragments)
}

fn merge_timing(
    _ctx: &mut RuleContext,
    statement: &mut ClinicalResource,
    fragment: &ClinicalResource,
) -> Result<bool, TransformError> {
    let index = match fragment.field("dosageIndex") {
        Some(FieldValue::Integer(i)) if *i >= 0 => *i as usize,
        _ => return Ok(false),
    };
    let (Some(timing), Some(dosage)) = (fragment.field("timing"), statement.fields.get("dosage"))
    else {
        return Ok(false);
    };

    let mut dosage_json = encode_value(dosage);
    let Some(entry) = dosage_json
        .as_array_mut()
        .and_then(|entries| entries.get_mut(index))
        .and_then(Value::as_object_mut)
    else {
        return Ok(false);
    };
    if entry.contains_key("timing") {
        return Ok(false);
    }
    entry.insert("timing".to_string(), encode_value(timing));

    if let Some(dosage) = decode_value("dosage", &dosage_json) {
        statement.fields.insert("dosage".to_string(), dosage);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transform::rule::fragment_parent_id;
    use crate::domain::codec::decode_resource;
    use serde_json::json;
    use test_case::test_case;

    fn statement(status: &str) -> ClinicalResource {
        decode_resource(
            &json!({
                "resourceType": "MedicationStatement",
                "id": "med-1",
                "status": status,
                "medicationCodeableConcept": {"coding": [{"system": "http://www.nlm.nih.gov/research/umls/rxnorm", "code": "197361"}]},
                "subject": {"reference": "Patient/p1"},
                "context": {"reference": "Encounter/e1"},
                "reasonCode": [{"text": "hypertension"}],
                "dosage": [
                    {"text": "once daily", "timing": {"repeat": {"frequency": 1, "period": 1, "periodUnit": "d"}}},
                    {"text": "as needed"}
                ]
            }),
            Generation::A,
        )
        .unwrap()
    }

    #[test_case("active", "recorded", Some("taking"))]
    #[test_case("completed", "recorded", Some("taken"))]
    #[test_case("not-taken", "recorded", Some("not-taking"))]
    #[test_case("intended", "draft", None)]
    #[test_case("entered-in-error", "entered-in-error", None)]
    fn test_status_maps_to_usage(a: &str, b: &str, adherence: Option<&str>) {
        let rules = rules();
        let (produced, warnings) = rules[0].apply(&statement(a)).unwrap();
        let usage = &produced[0];
        assert!(warnings.is_empty());
        assert_eq!(usage.field("status"), Some(&FieldValue::Code(b.to_string())));
        assert_eq!(
            usage.field("adherence").and_then(adherence_code).as_deref(),
            adherence
        );
    }

    #[test]
    fn test_unknown_status_is_kept_as_text() {
        let rules = rules();
        let (produced, warnings) = rules[0].apply(&statement("paused")).unwrap();
        assert_eq!(
            produced[0].field("status"),
            Some(&FieldValue::Text("paused".to_string()))
        );
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_timed_dosage_is_split() {
        let rules = rules();
        let (produced, _) = rules[0].apply(&statement("active")).unwrap();
        assert_eq!(produced.len(), 2);

        let usage = &produced[0];
        let timing = &produced[1];
        assert_eq!(usage.resource_type, ResourceType::MedicationUsage);
        assert!(matches!(usage.field("medication"), Some(FieldValue::CodeableReference { .. })));
        assert!(usage.field("encounter").is_some());
        assert!(usage.field("reason").is_some());
        assert_eq!(timing.resource_type, ResourceType::MedicationTiming);
        assert_eq!(timing.id.as_str(), "med-1-timing-0");
        assert_eq!(fragment_parent_id(timing), Some("med-1"));
        assert_eq!(timing.source_id.as_ref().map(|id| id.as_str()), Some("med-1"));
        assert!(timing.subject_reference().is_some());

        let dosage = encode_value(usage.field("dosage").unwrap());
        assert!(dosage[0].get("timing").is_none());
    }

    #[test]
    fn test_merge_restores_timing() {
        let rules = rules();
        let original = statement("active");
        let (produced, _) = rules[0].apply(&original).unwrap();
        let (mut back, _) = rules[1].apply(&produced[0]).unwrap();

        let mut ctx = RuleContext::new(&produced[1]);
        assert!(merge_timing(&mut ctx, &mut back[0], &produced[1]).unwrap());
        assert_eq!(back[0].fields, original.fields);
    }

    #[test]
    fn test_missing_medication_fails_resource() {
        let mut resource = statement("active");
        resource.fields.remove("medicationCodeableConcept");
        let err = rules()[0].apply(&resource).unwrap_err();
        assert!(matches!(err, TransformError::MissingField { field, .. } if field == "medication[x]"));
    }

    #[test]
    fn test_recorded_without_adherence_becomes_unknown() {
        let rules = rules();
        let (produced, _) = rules[0].apply(&statement("active")).unwrap();
        let mut usage = produced[0].clone();
        usage.fields.remove("adherence");
        let (back, _) = rules[1].apply(&usage).unwrap();
        assert_eq!(back[0].field("status"), Some(&FieldValue::Code("unknown".to_string())));
    }
}
