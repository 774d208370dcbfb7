//! Immunization rules
//!
//! Dose numbers in `protocolApplied` lose their positive-int/string choice in
//! generation B and become plain strings. On the way back a string made of
//! digits is read as a positive integer, so a generation A `doseNumberString`
//! of `"2"` returns as `doseNumberPositiveInt`.

use crate::core::transform::rule::{edit_json, FieldTransform, Fields, RuleContext, TransformRule};
use crate::core::transform::vocabulary::IMMUNIZATION_STATUS;
use crate::domain::{Generation, ResourceType, TransformError};
use serde_json::{json, Map, Value};

pub const VERSION: &str = "1.0.0";

const DOSE_FIELDS: [&str; 2] = ["doseNumber", "seriesDoses"];

pub fn rules() -> Vec<TransformRule> {
    let forward = TransformRule::new(ResourceType::Immunization, Generation::A, VERSION)
        .require(&["status", "vaccineCode", "patient"])
        .field(FieldTransform::Vocabulary {
            field: "status",
            table: &IMMUNIZATION_STATUS,
            reversed: false,
        })
        .field(FieldTransform::Custom {
            name: "immunization-dose-numbers",
            apply: doses_to_string,
            undo: doses_to_choice,
        })
        .field(FieldTransform::MergeReasons {
            concept: "reasonCode",
            reference: "reasonReference",
            target: "reason",
        })
        .field(FieldTransform::ChoiceToCodeableReference {
            concept: Some("reportOrigin"),
            reference: None,
            target: "informationSource",
            required: false,
        })
        .field(FieldTransform::Custom {
            name: "immunization-program-eligibility",
            apply: eligibility_to_b,
            undo: eligibility_to_a,
        });

    let backward = forward
        .inverse()
        .require(&["status", "vaccineCode", "patient"]);
    vec![forward, backward]
}

fn edit_protocols<F>(fields: &mut Fields, mut edit: F) -> Result<(), TransformError>
where
    F: FnMut(&mut Map<String, Value>) -> Result<(), TransformError>,
{
    edit_json(fields, "protocolApplied", |json| {
        if let Some(entries) = json.as_array_mut() {
            for entry in entries.iter_mut().filter_map(Value::as_object_mut) {
                edit(entry)?;
            }
        }
        Ok(())
    })
}

fn doses_to_string(ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    let resource_id = ctx.resource_id().to_string();
    edit_protocols(fields, |entry| {
        for name in DOSE_FIELDS {
            let int_key = format!("{name}PositiveInt");
            let string_key = format!("{name}String");
            let value = match (entry.remove(&int_key), entry.remove(&string_key)) {
                (Some(_), Some(_)) => {
                    return Err(TransformError::ConflictingFields {
                        resource_id: resource_id.clone(),
                        fields: vec![int_key, string_key],
                    })
                }
                (Some(Value::Number(n)), None) => Value::String(n.to_string()),
                (Some(other), None) | (None, Some(other)) => other,
                (None, None) => continue,
            };
            entry.insert(name.to_string(), value);
        }
        Ok(())
    })
}

fn doses_to_choice(_ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    edit_protocols(fields, |entry| {
        for name in DOSE_FIELDS {
            let Some(value) = entry.remove(name) else {
                continue;
            };
            let positive = value
                .as_str()
                .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|n| *n > 0);
            match positive {
                Some(n) => entry.insert(format!("{name}PositiveInt"), json!(n)),
                None => entry.insert(format!("{name}String"), value),
            };
        }
        Ok(())
    })
}

/// `programEligibility` concepts become `{programStatus}` backbone elements
fn eligibility_to_b(_ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    edit_json(fields, "programEligibility", |json| {
        if let Some(entries) = json.as_array_mut() {
            for entry in entries.iter_mut() {
                *entry = json!({ "programStatus": entry.take() });
            }
        }
        Ok(())
    })
}

fn eligibility_to_a(_ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    edit_json(fields, "programEligibility", |json| {
        let Some(entries) = json.as_array_mut() else {
            return Ok(());
        };
        let unwrappable = entries.iter().all(|entry| {
            entry
                .as_object()
                .is_some_and(|e| e.len() == 1 && e.contains_key("programStatus"))
        });
        if unwrappable {
            for entry in entries.iter_mut() {
                if let Some(status) = entry.get_mut("programStatus") {
                    *entry = status.take();
                }
            }
        }
        Ok(())
    })
}
