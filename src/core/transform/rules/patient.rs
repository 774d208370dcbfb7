//! Patient rules
//!
//! The patient shape is stable across generations. Gender and link types are
//! checked against their tables so codes from outside them surface as
//! warnings instead of passing silently.

use crate::core::transform::rule::{edit_json, FieldTransform, Fields, RuleContext, TransformRule};
use crate::core::transform::vocabulary::{PATIENT_GENDER, PATIENT_LINK_TYPE};
use crate::domain::{Generation, ResourceType, TransformError};
use serde_json::Value;

pub const VERSION: &str = "1.0.0";

pub fn rules() -> Vec<TransformRule> {
    let forward = TransformRule::new(ResourceType::Patient, Generation::A, VERSION)
        .field(FieldTransform::Vocabulary {
            field: "gender",
            table: &PATIENT_GENDER,
            reversed: false,
        })
        .field(FieldTransform::Custom {
            name: "patient-link-type",
            apply: |ctx, fields| check_link_types(ctx, fields, false),
            undo: |ctx, fields| check_link_types(ctx, fields, true),
        });

    let backward = forward.inverse();
    vec![forward, backward]
}

fn check_link_types(
    ctx: &mut RuleContext,
    fields: &mut Fields,
    reversed: bool,
) -> Result<(), TransformError> {
    let mut unmapped = Vec::new();
    edit_json(fields, "link", |json| {
        for entry in json
            .as_array_mut()
            .into_iter()
            .flatten()
            .filter_map(Value::as_object_mut)
        {
            let Some(code) = entry.get("type").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            match PATIENT_LINK_TYPE.lookup(&code, reversed) {
                Some(mapped) => {
                    entry.insert("type".to_string(), Value::String(mapped.to_string()));
                }
                None => unmapped.push(code),
            }
        }
        Ok(())
    })?;
    for code in unmapped {
        ctx.unmapped_code("link.type", &code);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::codec::{decode_resource, encode_resource};
    use serde_json::json;

    #[test]
    fn test_patient_round_trip() {
        let source = json!({
            "resourceType": "Patient",
            "id": "p1",
            "gender": "female",
            "birthDate": "1980-04-12",
            "name": [{"family": "Rivera", "given": ["Ana"]}],
            "link": [{"other": {"reference": "Patient/p0"}, "type": "replaces"}]
        });
        let rules = rules();
        let resource = decode_resource(&source, Generation::A).unwrap();
        let (b, warnings) = rules[0].apply(&resource).unwrap();
        assert!(warnings.is_empty());
        let (a, _) = rules[1].apply(&b[0]).unwrap();
        assert_eq!(encode_resource(&a[0]), source);
    }

    #[test]
    fn test_unknown_link_type_warns() {
        let resource = decode_resource(
            &json!({
                "resourceType": "Patient",
                "id": "p2",
                "link": [{"other": {"reference": "Patient/p0"}, "type": "merged-into"}]
            }),
            Generation::A,
        )
        .unwrap();
        let (_, warnings) = rules()[0].apply(&resource).unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].resource_id(), "p2");
    }
}
