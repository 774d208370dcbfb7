//! Condition rules
//!
//! Status concepts are validated against their enumerated tables. Generation B
//! adds clinical status `unknown`, which has no generation A code and is
//! carried as concept text on the way back.

use crate::core::transform::rule::{FieldTransform, TransformRule};
use crate::core::transform::vocabulary::{
    CONDITION_CLINICAL_STATUS, CONDITION_VERIFICATION_STATUS,
};
use crate::domain::{Generation, ResourceType};

pub const VERSION: &str = "1.0.0";

pub fn rules() -> Vec<TransformRule> {
    let forward = TransformRule::new(ResourceType::Condition, Generation::A, VERSION)
        .require(&["subject"])
        .field(FieldTransform::ConceptVocabulary {
            field: "clinicalStatus",
            table: &CONDITION_CLINICAL_STATUS,
            reversed: false,
        })
        .field(FieldTransform::ConceptVocabulary {
            field: "verificationStatus",
            table: &CONDITION_VERIFICATION_STATUS,
            reversed: false,
        });

    let backward = forward.inverse().require(&["subject"]);
    vec![forward, backward]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::codec::decode_resource;
    use crate::domain::FieldValue;
    use serde_json::json;

    #[test]
    fn test_verification_status_kept() {
        let condition = decode_resource(
            &json!({
                "resourceType": "Condition",
                "id": "cond-1",
                "subject": {"reference": "Patient/p1"},
                "verificationStatus": {"coding": [{"system": "http://terminology.hl7.org/CodeSystem/condition-ver-status", "code": "provisional"}]},
                "code": {"text": "Asthma"}
            }),
            Generation::A,
        )
        .unwrap();

        let (produced, warnings) = rules()[0].apply(&condition).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(produced[0].fields, condition.fields);
    }

    #[test]
    fn test_unknown_clinical_status_has_no_generation_a_code() {
        let condition = decode_resource(
            &json!({
                "resourceType": "Condition",
                "id": "cond-2",
                "subject": {"reference": "Patient/p1"},
                "clinicalStatus": {"coding": [{"system": "http://terminology.hl7.org/CodeSystem/condition-clinical", "code": "unknown"}]}
            }),
            Generation::B,
        )
        .unwrap();

        let (produced, warnings) = rules()[1].apply(&condition).unwrap();
        assert_eq!(warnings.len(), 1);
        let status = produced[0].field("clinicalStatus").and_then(FieldValue::as_concept);
        assert_eq!(status.and_then(|c| c.text.as_deref()), Some("unknown"));
    }

    #[test]
    fn test_missing_subject_is_error() {
        let condition = decode_resource(
            &json!({"resourceType": "Condition", "id": "cond-3"}),
            Generation::A,
        )
        .unwrap();
        assert!(rules()[0].apply(&condition).is_err());
    }
}
