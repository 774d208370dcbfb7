//! Observation rules
//!
//! Generation B adds the statuses `specimen-in-process`, `appended` and
//! `cannot-be-obtained`; they are carried as text with a warning on the way
//! back to generation A.

use crate::core::transform::rule::{FieldTransform, TransformRule};
use crate::core::transform::vocabulary::OBSERVATION_STATUS;
use crate::domain::{Generation, ResourceType};

pub const VERSION: &str = "1.0.0";

pub fn rules() -> Vec<TransformRule> {
    let forward = TransformRule::new(ResourceType::Observation, Generation::A, VERSION)
        .require(&["status", "code"])
        .field(FieldTransform::Vocabulary {
            field: "status",
            table: &OBSERVATION_STATUS,
            reversed: false,
        });

    let backward = forward.inverse().require(&["status", "code"]);
    vec![forward, backward]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::codec::{decode_resource, encode_resource};
    use crate::domain::{FieldValue, TransformWarning};
    use serde_json::json;

    #[test]
    fn test_value_quantity_is_untouched() {
        let source = json!({
            "resourceType": "Observation",
            "id": "obs-1",
            "status": "final",
            "code": {"coding": [{"system": "http://loinc.org", "code": "8867-4"}]},
            "subject": {"reference": "Patient/p1"},
            "effectiveDateTime": "2024-03-01T08:30:00Z",
            "valueQuantity": {"value": 72, "unit": "beats/minute", "system": "http://unitsofmeasure.org", "code": "/min"}
        });
        let rules = rules();
        let resource = decode_resource(&source, Generation::A).unwrap();
        let (b, _) = rules[0].apply(&resource).unwrap();
        assert!(matches!(b[0].field("valueQuantity"), Some(FieldValue::Quantity(_))));
        let (a, _) = rules[1].apply(&b[0]).unwrap();
        assert_eq!(encode_resource(&a[0]), source);
    }

    #[test]
    fn test_cannot_be_obtained_warns() {
        let resource = decode_resource(
            &json!({
                "resourceType": "Observation",
                "id": "obs-2",
                "status": "cannot-be-obtained",
                "code": {"text": "HbA1c"}
            }),
            Generation::B,
        )
        .unwrap();
        let (produced, warnings) = rules()[1].apply(&resource).unwrap();
        assert!(matches!(
            &warnings[..],
            [TransformWarning::UnmappedCode { code, .. }] if code == "cannot-be-obtained"
        ));
        assert_eq!(
            produced[0].field("status"),
            Some(&FieldValue::Text("cannot-be-obtained".to_string()))
        );
    }
}
