//! Encounter rules
//!
//! Generation B turns `class` into a list of concepts, renames `period` and
//! `hospitalization`, restructures `reason`, `diagnosis` and `participant`,
//! and makes `serviceType` a list of codeable references. Status codes are
//! remapped through [`ENCOUNTER_STATUS`], whose lossy codes are listed there.

use crate::core::transform::rule::{edit_entries, FieldTransform, Fields, RuleContext, TransformRule};
use crate::core::transform::vocabulary::ENCOUNTER_STATUS;
use crate::domain::codec::{decode_value, encode_value};
use crate::domain::{Concept, FieldValue, Generation, ResourceType, TransformError};
use serde_json::{json, Value};

pub const VERSION: &str = "1.0.0";

pub fn rules() -> Vec<TransformRule> {
    let forward = TransformRule::new(ResourceType::Encounter, Generation::A, VERSION)
        .require(&["status", "class"])
        .field(FieldTransform::Vocabulary {
            field: "status",
            table: &ENCOUNTER_STATUS,
            reversed: false,
        })
        .field(FieldTransform::Custom {
            name: "encounter-class",
            apply: class_to_concepts,
            undo: class_to_coding,
        })
        .field(FieldTransform::Rename {
            from: "period",
            to: "actualPeriod",
        })
        .field(FieldTransform::Rename {
            from: "hospitalization",
            to: "admission",
        })
        .field(FieldTransform::Custom {
            name: "encounter-reason",
            apply: reasons_to_backbone,
            undo: backbone_to_reasons,
        })
        .field(FieldTransform::Custom {
            name: "encounter-diagnosis",
            apply: diagnosis_to_b,
            undo: diagnosis_to_a,
        })
        .field(FieldTransform::Custom {
            name: "encounter-participant",
            apply: |_, fields| rename_in_entries(fields, "participant", "individual", "actor"),
            undo: |_, fields| rename_in_entries(fields, "participant", "actor", "individual"),
        })
        .field(FieldTransform::Custom {
            name: "encounter-service-type",
            apply: service_type_to_b,
            undo: service_type_to_a,
        });

    let backward = forward.inverse().require(&["status"]);
    vec![forward, backward]
}

fn class_to_concepts(_ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    if let Some(FieldValue::Coding(coding)) = fields.get("class").cloned() {
        fields.insert(
            "class".to_string(),
            FieldValue::List(vec![FieldValue::Concept(Concept::from_coding(coding))]),
        );
    }
    Ok(())
}

fn class_to_coding(_ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    let single = match fields.get("class") {
        Some(FieldValue::List(items)) if items.len() == 1 => match &items[0] {
            FieldValue::Concept(concept) if concept.codings.len() == 1 && concept.text.is_none() => {
                Some(concept.codings[0].clone())
            }
            _ => None,
        },
        _ => None,
    };
    if let Some(coding) = single {
        fields.insert("class".to_string(), FieldValue::Coding(coding));
    }
    Ok(())
}

fn list_items(value: Option<FieldValue>) -> Vec<Value> {
    match value.map(|v| encode_value(&v)) {
        Some(Value::Array(items)) => items,
        Some(other) => vec![other],
        None => Vec::new(),
    }
}

/// `reasonCode`/`reasonReference` become one `reason` entry each
fn reasons_to_backbone(ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    if !fields.contains_key("reasonCode") && !fields.contains_key("reasonReference") {
        return Ok(());
    }
    if fields.contains_key("reason") {
        return Err(ctx.conflict(&["reasonCode", "reasonReference", "reason"]));
    }
    let codes = list_items(fields.remove("reasonCode"));
    let references = list_items(fields.remove("reasonReference"));
    let entries: Vec<Value> = codes
        .into_iter()
        .map(|c| json!({ "value": [{ "concept": c }] }))
        .chain(
            references
                .into_iter()
                .map(|r| json!({ "value": [{ "reference": r }] })),
        )
        .collect();
    if let Some(reason) = decode_value("reason", &Value::Array(entries)) {
        fields.insert("reason".to_string(), reason);
    }
    Ok(())
}

fn backbone_to_reasons(ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    let Some(reason) = fields.get("reason") else {
        return Ok(());
    };
    let Value::Array(entries) = encode_value(reason) else {
        return Ok(());
    };

    let mut codes = Vec::new();
    let mut references = Vec::new();
    for entry in &entries {
        // only entries holding exactly one value and nothing else can be split
        let slot = entry
            .as_object()
            .filter(|e| e.len() == 1)
            .and_then(|e| e.get("value"))
            .and_then(Value::as_array)
            .filter(|values| values.len() == 1)
            .and_then(|values| values[0].as_object())
            .filter(|value| value.len() == 1);
        match slot.and_then(|value| value.iter().next()) {
            Some((key, inner)) if key == "concept" => codes.push(inner.clone()),
            Some((key, inner)) if key == "reference" => references.push(inner.clone()),
            _ => return Ok(()),
        }
    }

    if fields.contains_key("reasonCode") || fields.contains_key("reasonReference") {
        return Err(ctx.conflict(&["reason", "reasonCode", "reasonReference"]));
    }
    fields.remove("reason");
    for (name, items) in [("reasonCode", codes), ("reasonReference", references)] {
        if items.is_empty() {
            continue;
        }
        if let Some(value) = decode_value(name, &Value::Array(items)) {
            fields.insert(name.to_string(), value);
        }
    }
    Ok(())
}

fn rename_in_entries(
    fields: &mut Fields,
    field: &str,
    from: &str,
    to: &str,
) -> Result<(), TransformError> {
    edit_entries(fields, field, |entry| {
        if entry.contains_key(to) {
            return;
        }
        if let Some(value) = entry.remove(from) {
            entry.insert(to.to_string(), value);
        }
    })
}

/// `diagnosis.condition` becomes a list of codeable references and `use` a list
fn diagnosis_to_b(_ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    edit_entries(fields, "diagnosis", |entry| {
        if let Some(condition) = entry.remove("condition") {
            entry.insert(
                "condition".to_string(),
                json!([{ "reference": condition }]),
            );
        }
        if let Some(use_) = entry.remove("use") {
            entry.insert("use".to_string(), json!([use_]));
        }
    })
}

fn diagnosis_to_a(_ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    edit_entries(fields, "diagnosis", |entry| {
        let single_reference = entry
            .get("condition")
            .and_then(Value::as_array)
            .filter(|items| items.len() == 1)
            .and_then(|items| items[0].as_object())
            .filter(|item| item.len() == 1)
            .and_then(|item| item.get("reference"))
            .cloned();
        if let Some(reference) = single_reference {
            entry.insert("condition".to_string(), reference);
        }

        let single_use = entry
            .get("use")
            .and_then(Value::as_array)
            .filter(|items| items.len() == 1)
            .map(|items| items[0].clone());
        if let Some(use_) = single_use {
            entry.insert("use".to_string(), use_);
        }
    })
}

fn service_type_to_b(ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    let Some(service_type) = fields.remove("serviceType") else {
        return Ok(());
    };
    let json = json!([{ "concept": encode_value(&service_type) }]);
    match decode_value("serviceType", &json) {
        Some(value) => {
            fields.insert("serviceType".to_string(), value);
            Ok(())
        }
        None => Err(ctx.invalid("serviceType", "cannot be wrapped as a codeable reference")),
    }
}

fn service_type_to_a(_ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    let concept = match fields.get("serviceType").map(encode_value) {
        Some(Value::Array(items)) if items.len() == 1 => items[0]
            .as_object()
            .filter(|item| item.len() == 1)
            .and_then(|item| item.get("concept"))
            .cloned(),
        _ => None,
    };
    if let Some(value) = concept.and_then(|c| decode_value("serviceType", &c)) {
        fields.insert("serviceType".to_string(), value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::codec::{decode_resource, encode_resource};

    fn encounter() -> serde_json::Value {
        json!({
            "resourceType": "Encounter",
            "id": "enc-1",
            "status": "finished",
            "class": {"system": "http://terminology.hl7.org/CodeSystem/v3-ActCode", "code": "AMB"},
            "subject": {"reference": "Patient/p1"},
            "period": {"start": "2024-02-01T09:00:00Z", "end": "2024-02-01T10:00:00Z"},
            "hospitalization": {"dischargeDisposition": {"text": "home"}},
            "reasonCode": [{"text": "chest pain"}],
            "reasonReference": [{"reference": "Condition/c1"}],
            "diagnosis": [{"condition": {"reference": "Condition/c1"}, "use": {"text": "billing"}, "rank": 1}],
            "participant": [{"individual": {"reference": "Practitioner/dr1"}}],
            "serviceType": {"text": "cardiology"}
        })
    }

    #[test]
    fn test_forward_shapes() {
        let resource = decode_resource(&encounter(), Generation::A).unwrap();
        let (produced, warnings) = rules()[0].apply(&resource).unwrap();
        assert!(warnings.is_empty());

        let json = encode_resource(&produced[0]);
        assert_eq!(json["status"], "completed");
        assert_eq!(json["class"][0]["coding"][0]["code"], "AMB");
        assert_eq!(json["actualPeriod"]["start"], "2024-02-01T09:00:00Z");
        assert!(json.get("hospitalization").is_none());
        assert_eq!(json["admission"]["dischargeDisposition"]["text"], "home");
        assert_eq!(json["reason"][0]["value"][0]["concept"]["text"], "chest pain");
        assert_eq!(
            json["reason"][1]["value"][0]["reference"]["reference"],
            "Condition/c1"
        );
        assert_eq!(
            json["diagnosis"][0]["condition"][0]["reference"]["reference"],
            "Condition/c1"
        );
        assert_eq!(json["diagnosis"][0]["rank"], 1);
        assert_eq!(
            json["participant"][0]["actor"]["reference"],
            "Practitioner/dr1"
        );
        assert_eq!(json["serviceType"][0]["concept"]["text"], "cardiology");
    }

    #[test]
    fn test_round_trip() {
        let resource = decode_resource(&encounter(), Generation::A).unwrap();
        let rules = rules();
        let (b, _) = rules[0].apply(&resource).unwrap();
        let (a, _) = rules[1].apply(&b[0]).unwrap();
        assert_eq!(encode_resource(&a[0]), encounter());
    }

    #[test]
    fn test_discharged_has_no_generation_a_status() {
        let resource = decode_resource(
            &json!({"resourceType": "Encounter", "id": "enc-2", "status": "discharged"}),
            Generation::B,
        )
        .unwrap();
        let (produced, warnings) = rules()[1].apply(&resource).unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            produced[0].field("status"),
            Some(&FieldValue::Text("discharged".to_string()))
        );
    }
}
