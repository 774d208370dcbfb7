//! AllergyIntolerance rules
//!
//! Generation B makes `type` a concept and replaces `recorder`/`asserter` with
//! a `participant` list whose `function` names the role.

use crate::core::transform::rule::{FieldTransform, Fields, RuleContext, TransformRule};
use crate::core::transform::vocabulary::{
    ALLERGY_CLINICAL_STATUS, ALLERGY_CRITICALITY, ALLERGY_VERIFICATION_STATUS,
};
use crate::domain::codec::{decode_value, encode_value};
use crate::domain::{Coding, Concept, FieldValue, Generation, ResourceType, TransformError};
use serde_json::{json, Value};

pub const VERSION: &str = "1.0.0";

const TYPE_SYSTEM: &str = "http://hl7.org/fhir/allergy-intolerance-type";
const PARTICIPATION_SYSTEM: &str =
    "http://terminology.hl7.org/CodeSystem/provenance-participant-type";

/// Generation A field and the participant function it becomes
const PARTICIPANT_ROLES: [(&str, &str); 2] = [("recorder", "author"), ("asserter", "informant")];

pub fn rules() -> Vec<TransformRule> {
    let forward = TransformRule::new(ResourceType::AllergyIntolerance, Generation::A, VERSION)
        .require(&["patient"])
        .field(FieldTransform::Custom {
            name: "allergy-type",
            apply: type_to_concept,
            undo: type_to_code,
        })
        .field(FieldTransform::ConceptVocabulary {
            field: "clinicalStatus",
            table: &ALLERGY_CLINICAL_STATUS,
            reversed: false,
        })
        .field(FieldTransform::ConceptVocabulary {
            field: "verificationStatus",
            table: &ALLERGY_VERIFICATION_STATUS,
            reversed: false,
        })
        .field(FieldTransform::Vocabulary {
            field: "criticality",
            table: &ALLERGY_CRITICALITY,
            reversed: false,
        })
        .field(FieldTransform::Custom {
            name: "allergy-participant",
            apply: roles_to_participants,
            undo: participants_to_roles,
        });

    let backward = forward.inverse().require(&["patient"]);
    vec![forward, backward]
}

fn type_to_concept(_ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    if let Some(FieldValue::Code(code)) = fields.get("type").cloned() {
        fields.insert(
            "type".to_string(),
            FieldValue::Concept(Concept::from_coding(Coding::new(TYPE_SYSTEM, code))),
        );
    }
    Ok(())
}

fn type_to_code(ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    let Some(FieldValue::Concept(concept)) = fields.get("type") else {
        return Ok(());
    };
    let code = match (concept.codings.as_slice(), &concept.text) {
        ([coding], None)
            if coding.system.as_deref() == Some(TYPE_SYSTEM)
                && coding.display.is_none()
                && coding.version.is_none() =>
        {
            coding.code.clone()
        }
        _ => None,
    };
    match code {
        Some(code) => {
            fields.insert("type".to_string(), FieldValue::Code(code));
        }
        None => {
            let label = concept
                .codings
                .iter()
                .find_map(|c| c.code.clone())
                .or_else(|| concept.text.clone())
                .unwrap_or_default();
            ctx.unmapped_code("type", &label);
        }
    }
    Ok(())
}

fn roles_to_participants(ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    let mut participants = Vec::new();
    for (field, function) in PARTICIPANT_ROLES {
        if let Some(actor) = fields.remove(field) {
            participants.push(json!({
                "function": {"coding": [{"system": PARTICIPATION_SYSTEM, "code": function}]},
                "actor": encode_value(&actor),
            }));
        }
    }
    if participants.is_empty() {
        return Ok(());
    }
    if fields.contains_key("participant") {
        return Err(ctx.conflict(&["recorder", "asserter", "participant"]));
    }
    if let Some(value) = decode_value("participant", &Value::Array(participants)) {
        fields.insert("participant".to_string(), value);
    }
    Ok(())
}

fn participant_role(entry: &Value) -> Option<(&'static str, &Value)> {
    let entry = entry.as_object().filter(|e| e.len() == 2)?;
    let actor = entry.get("actor")?;
    let codings = entry.get("function")?.get("coding")?.as_array()?;
    let [coding] = codings.as_slice() else {
        return None;
    };
    if coding.get("system").and_then(Value::as_str) != Some(PARTICIPATION_SYSTEM) {
        return None;
    }
    let code = coding.get("code").and_then(Value::as_str)?;
    PARTICIPANT_ROLES
        .iter()
        .find(|(_, function)| *function == code)
        .map(|(field, _)| (*field, actor))
}

/// Folds participants back into `recorder`/`asserter`
///
/// Only applies when every participant is one author or informant; any other
/// participant list is kept as it is.
fn participants_to_roles(ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    let Some(Value::Array(entries)) = fields.get("participant").map(encode_value) else {
        return Ok(());
    };
    let mut roles = Vec::new();
    for entry in &entries {
        match participant_role(entry) {
            Some((field, _)) if roles.iter().any(|(f, _)| *f == field) => return Ok(()),
            Some((field, actor)) => roles.push((field, actor.clone())),
            None => return Ok(()),
        }
    }
    if let Some((field, _)) = roles.iter().find(|(f, _)| fields.contains_key(*f)) {
        return Err(ctx.conflict(&["participant", *field]));
    }
    fields.remove("participant");
    for (field, actor) in roles {
        if let Some(value) = decode_value(field, &actor) {
            fields.insert(field.to_string(), value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::codec::{decode_resource, encode_resource};

    fn allergy() -> Value {
        json!({
            "resourceType": "AllergyIntolerance",
            "id": "alg-1",
            "type": "allergy",
            "category": ["food"],
            "criticality": "high",
            "clinicalStatus": {"coding": [{"system": "http://terminology.hl7.org/CodeSystem/allergyintolerance-clinical", "code": "active"}]},
            "code": {"text": "Peanut"},
            "patient": {"reference": "Patient/p1"},
            "recorder": {"reference": "Practitioner/dr1"},
            "asserter": {"reference": "RelatedPerson/rp1"}
        })
    }

    #[test]
    fn test_forward_shapes() {
        let resource = decode_resource(&allergy(), Generation::A).unwrap();
        let (produced, warnings) = rules()[0].apply(&resource).unwrap();
        assert!(warnings.is_empty());

        let json = encode_resource(&produced[0]);
        assert_eq!(json["type"]["coding"][0]["code"], "allergy");
        assert!(json.get("recorder").is_none());
        assert_eq!(json["participant"][0]["function"]["coding"][0]["code"], "author");
        assert_eq!(json["participant"][0]["actor"]["reference"], "Practitioner/dr1");
        assert_eq!(json["participant"][1]["function"]["coding"][0]["code"], "informant");
    }

    #[test]
    fn test_round_trip() {
        let rules = rules();
        let resource = decode_resource(&allergy(), Generation::A).unwrap();
        let (b, _) = rules[0].apply(&resource).unwrap();
        let (a, warnings) = rules[1].apply(&b[0]).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(encode_resource(&a[0]), allergy());
    }

    #[test]
    fn test_extra_participants_stay_in_list() {
        let resource = decode_resource(&allergy(), Generation::A).unwrap();
        let rules = rules();
        let (mut b, _) = rules[0].apply(&resource).unwrap();

        let mut json = encode_resource(&b[0]);
        json["participant"]
            .as_array_mut()
            .unwrap()
            .push(json!({"actor": {"reference": "Device/d1"}}));
        b[0] = decode_resource(&json, Generation::B).unwrap();

        let (a, _) = rules[1].apply(&b[0]).unwrap();
        let back = encode_resource(&a[0]);
        assert!(back.get("recorder").is_none());
        assert_eq!(back["participant"].as_array().map(Vec::len), Some(3));
    }
}
