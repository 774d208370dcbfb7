//! JSON codec between FHIR-style resources and [`ClinicalResource`]
//!
//! Decoding classifies every JSON element into a [`FieldValue`]. An object is
//! only given a typed variant when all of its keys are understood by that
//! variant; anything else becomes [`FieldValue::Structure`] so that encoding
//! reproduces the original JSON exactly.

use super::errors::MeridianError;
use super::ids::ResourceId;
use super::resource::{
    ClinicalResource, Coding, Concept, FieldValue, Generation, Period, Quantity, Reference,
    ResourceType,
};
use super::result::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Field names whose string values are code tokens rather than free text
const CODE_FIELDS: &[&str] = &[
    "status",
    "gender",
    "intent",
    "criticality",
    "use",
    "type",
    "category",
    "priority",
    "language",
    "severity",
    "mode",
    "kind",
    "comparator",
];

const CODING_KEYS: &[&str] = &["system", "version", "code", "display"];
const CONCEPT_KEYS: &[&str] = &["coding", "text"];
const REFERENCE_KEYS: &[&str] = &["reference", "type", "display"];
const PERIOD_KEYS: &[&str] = &["start", "end"];
const QUANTITY_KEYS: &[&str] = &["value", "comparator", "unit", "system", "code"];
const CODEABLE_REFERENCE_KEYS: &[&str] = &["concept", "reference"];

fn date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{4}(-(0[1-9]|1[0-2])(-(0[1-9]|[12]\d|3[01]))?)?$")
            .expect("date pattern is valid")
    })
}

fn date_time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}:\d{2})?$")
            .expect("dateTime pattern is valid")
    })
}

/// Decodes a JSON resource into a [`ClinicalResource`] of the given generation
///
/// `resourceType` and `id` are required. `meta.lastUpdated` populates
/// `created_at`; the `meta` element itself is kept as a field.
pub fn decode_resource(value: &Value, generation: Generation) -> Result<ClinicalResource> {
    let object = value
        .as_object()
        .ok_or_else(|| MeridianError::Validation("Resource must be a JSON object".to_string()))?;

    let resource_type: ResourceType = object
        .get("resourceType")
        .and_then(Value::as_str)
        .ok_or_else(|| MeridianError::Validation("Resource is missing resourceType".to_string()))?
        .parse()
        .map_err(MeridianError::Validation)?;

    let id = object
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            MeridianError::Validation(format!("{resource_type} resource is missing id"))
        })
        .and_then(|id| ResourceId::new(id).map_err(MeridianError::Validation))?;

    let created_at = object
        .get("meta")
        .and_then(|meta| meta.get("lastUpdated"))
        .and_then(Value::as_str)
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Utc));

    let fields = object
        .iter()
        .filter(|(name, _)| name.as_str() != "resourceType" && name.as_str() != "id")
        .filter_map(|(name, value)| decode_value(name, value).map(|v| (name.clone(), v)))
        .collect::<BTreeMap<_, _>>();

    Ok(ClinicalResource {
        id,
        resource_type,
        generation,
        fields,
        source_id: None,
        created_at,
    })
}

/// Encodes a [`ClinicalResource`] as a JSON resource
///
/// When no `meta` field is present and `created_at` is set, a
/// `meta.lastUpdated` element is emitted.
pub fn encode_resource(resource: &ClinicalResource) -> Value {
    let mut object = Map::new();
    object.insert(
        "resourceType".to_string(),
        Value::String(resource.resource_type.to_string()),
    );
    object.insert("id".to_string(), Value::String(resource.id.to_string()));
    for (name, value) in &resource.fields {
        object.insert(name.clone(), encode_value(value));
    }
    if let (false, Some(created_at)) = (object.contains_key("meta"), resource.created_at) {
        object.insert(
            "meta".to_string(),
            serde_json::json!({ "lastUpdated": created_at.to_rfc3339() }),
        );
    }
    Value::Object(object)
}

/// Classifies a JSON element found under `name`
///
/// Returns `None` for a JSON null field, which carries no clinical content.
/// A null inside an array stays as [`FieldValue::Null`] so that the array
/// keeps lining up with its `_name` primitive extension array.
pub fn decode_value(name: &str, value: &Value) -> Option<FieldValue> {
    let decoded = match value {
        Value::Null => return None,
        Value::Bool(b) => FieldValue::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => FieldValue::Integer(i),
            None => FieldValue::Decimal(n.clone()),
        },
        Value::String(s) => decode_string(name, s),
        Value::Array(items) => FieldValue::List(
            items
                .iter()
                .map(|item| decode_value(name, item).unwrap_or(FieldValue::Null))
                .collect(),
        ),
        Value::Object(map) => decode_object(map),
    };
    Some(decoded)
}

fn decode_string(name: &str, s: &str) -> FieldValue {
    if CODE_FIELDS.contains(&name) {
        FieldValue::Code(s.to_string())
    } else if date_regex().is_match(s) {
        FieldValue::Date(s.to_string())
    } else if date_time_regex().is_match(s) {
        FieldValue::DateTime(s.to_string())
    } else {
        FieldValue::Text(s.to_string())
    }
}

fn keys_within(map: &Map<String, Value>, allowed: &[&str]) -> bool {
    !map.is_empty() && map.keys().all(|k| allowed.contains(&k.as_str()))
}

fn string_member(map: &Map<String, Value>, key: &str) -> Option<Option<String>> {
    match map.get(key) {
        None => Some(None),
        Some(Value::String(s)) => Some(Some(s.clone())),
        Some(_) => None,
    }
}

fn decode_coding(map: &Map<String, Value>) -> Option<Coding> {
    if !keys_within(map, CODING_KEYS) || !(map.contains_key("code") || map.contains_key("system"))
    {
        return None;
    }
    Some(Coding {
        system: string_member(map, "system")?,
        version: string_member(map, "version")?,
        code: string_member(map, "code")?,
        display: string_member(map, "display")?,
    })
}

fn decode_concept(map: &Map<String, Value>) -> Option<Concept> {
    if !keys_within(map, CONCEPT_KEYS) {
        return None;
    }
    let codings = match map.get("coding") {
        None => Vec::new(),
        Some(Value::Array(items)) if !items.is_empty() => items
            .iter()
            .map(|item| item.as_object().and_then(decode_coding))
            .collect::<Option<Vec<_>>>()?,
        Some(_) => return None,
    };
    Some(Concept {
        codings,
        text: string_member(map, "text")?,
    })
}

fn decode_reference(map: &Map<String, Value>) -> Option<Reference> {
    if !keys_within(map, REFERENCE_KEYS)
        || !(map.contains_key("reference") || map.contains_key("display"))
    {
        return None;
    }
    Some(Reference {
        reference: string_member(map, "reference")?,
        target_type: string_member(map, "type")?,
        display: string_member(map, "display")?,
    })
}

fn decode_period(map: &Map<String, Value>) -> Option<Period> {
    if !keys_within(map, PERIOD_KEYS) {
        return None;
    }
    Some(Period {
        start: string_member(map, "start")?,
        end: string_member(map, "end")?,
    })
}

fn decode_quantity(map: &Map<String, Value>) -> Option<Quantity> {
    if !keys_within(map, QUANTITY_KEYS) {
        return None;
    }
    let value = match map.get("value") {
        Some(Value::Number(n)) => n.clone(),
        _ => return None,
    };
    Some(Quantity {
        value,
        comparator: string_member(map, "comparator")?,
        unit: string_member(map, "unit")?,
        system: string_member(map, "system")?,
        code: string_member(map, "code")?,
    })
}

fn decode_codeable_reference(map: &Map<String, Value>) -> Option<FieldValue> {
    if !keys_within(map, CODEABLE_REFERENCE_KEYS) {
        return None;
    }
    let concept = match map.get("concept") {
        None => None,
        Some(Value::Object(inner)) => Some(decode_concept(inner)?),
        Some(_) => return None,
    };
    let reference = match map.get("reference") {
        None => None,
        Some(Value::Object(inner)) => Some(decode_reference(inner)?),
        Some(_) => return None,
    };
    Some(FieldValue::CodeableReference { concept, reference })
}

fn decode_object(map: &Map<String, Value>) -> FieldValue {
    if let Some(quantity) = decode_quantity(map) {
        return FieldValue::Quantity(quantity);
    }
    if let Some(coding) = decode_coding(map) {
        return FieldValue::Coding(coding);
    }
    if let Some(concept) = decode_concept(map) {
        return FieldValue::Concept(concept);
    }
    if let Some(reference) = decode_reference(map) {
        return FieldValue::Reference(reference);
    }
    if let Some(period) = decode_period(map) {
        return FieldValue::Period(period);
    }
    if let Some(codeable_reference) = decode_codeable_reference(map) {
        return codeable_reference;
    }
    FieldValue::Structure(map.clone())
}

fn insert_opt(map: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        map.insert(key.to_string(), Value::String(v.clone()));
    }
}

/// Encodes a coding as a JSON object
pub fn encode_coding(coding: &Coding) -> Value {
    let mut map = Map::new();
    insert_opt(&mut map, "system", &coding.system);
    insert_opt(&mut map, "version", &coding.version);
    insert_opt(&mut map, "code", &coding.code);
    insert_opt(&mut map, "display", &coding.display);
    Value::Object(map)
}

/// Encodes a concept as a JSON object
pub fn encode_concept(concept: &Concept) -> Value {
    let mut map = Map::new();
    if !concept.codings.is_empty() {
        map.insert(
            "coding".to_string(),
            Value::Array(concept.codings.iter().map(encode_coding).collect()),
        );
    }
    insert_opt(&mut map, "text", &concept.text);
    Value::Object(map)
}

/// Encodes a reference as a JSON object
pub fn encode_reference(reference: &Reference) -> Value {
    let mut map = Map::new();
    insert_opt(&mut map, "reference", &reference.reference);
    insert_opt(&mut map, "type", &reference.target_type);
    insert_opt(&mut map, "display", &reference.display);
    Value::Object(map)
}

/// Encodes a field value back to JSON
pub fn encode_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Code(s)
        | FieldValue::Date(s)
        | FieldValue::DateTime(s)
        | FieldValue::Text(s) => Value::String(s.clone()),
        FieldValue::Coding(coding) => encode_coding(coding),
        FieldValue::Concept(concept) => encode_concept(concept),
        FieldValue::Reference(reference) => encode_reference(reference),
        FieldValue::CodeableReference { concept, reference } => {
            let mut map = Map::new();
            if let Some(c) = concept {
                map.insert("concept".to_string(), encode_concept(c));
            }
            if let Some(r) = reference {
                map.insert("reference".to_string(), encode_reference(r));
            }
            Value::Object(map)
        }
        FieldValue::Period(period) => {
            let mut map = Map::new();
            insert_opt(&mut map, "start", &period.start);
            insert_opt(&mut map, "end", &period.end);
            Value::Object(map)
        }
        FieldValue::Quantity(q) => {
            let mut map = Map::new();
            map.insert("value".to_string(), Value::Number(q.value.clone()));
            insert_opt(&mut map, "comparator", &q.comparator);
            insert_opt(&mut map, "unit", &q.unit);
            insert_opt(&mut map, "system", &q.system);
            insert_opt(&mut map, "code", &q.code);
            Value::Object(map)
        }
        FieldValue::Integer(i) => Value::Number(Number::from(*i)),
        FieldValue::Decimal(n) => Value::Number(n.clone()),
        FieldValue::Boolean(b) => Value::Bool(*b),
        FieldValue::List(items) => Value::Array(items.iter().map(encode_value).collect()),
        FieldValue::Structure(map) => Value::Object(map.clone()),
        FieldValue::Null => Value::Null,
    }
}

/// Decodes the entries of a JSON bundle
///
/// Entries without a `resource` element are skipped. Any entry resource that
/// fails to decode rejects the whole bundle.
pub fn decode_bundle(value: &Value, generation: Generation) -> Result<Vec<ClinicalResource>> {
    if value.get("resourceType").and_then(Value::as_str) != Some("Bundle") {
        return Err(MeridianError::Validation(
            "Expected a JSON object with resourceType 'Bundle'".to_string(),
        ));
    }
    let entries = match value.get("entry") {
        None => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            return Err(MeridianError::Validation(
                "Bundle entry must be an array".to_string(),
            ))
        }
    };
    entries
        .iter()
        .filter_map(|entry| entry.get("resource"))
        .map(|resource| decode_resource(resource, generation))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn medication_statement() -> Value {
        json!({
            "resourceType": "MedicationStatement",
            "id": "med-1",
            "meta": {"lastUpdated": "2024-05-01T12:00:00Z"},
            "status": "active",
            "medicationCodeableConcept": {
                "coding": [{"system": "http://www.nlm.nih.gov/research/umls/rxnorm", "code": "197361"}],
                "text": "Amlodipine 5 MG"
            },
            "subject": {"reference": "Patient/p1"},
            "effectivePeriod": {"start": "2024-01-01"},
            "dosage": [{"text": "once daily", "timing": {"repeat": {"frequency": 1, "period": 1, "periodUnit": "d"}}}],
            "note": [{"text": "patient reports good adherence", "authorString": "Dr. A"}]
        })
    }

    #[test]
    fn test_decode_classifies_fields() {
        let resource = decode_resource(&medication_statement(), Generation::A).unwrap();

        assert_eq!(resource.resource_type, ResourceType::MedicationStatement);
        assert_eq!(resource.field("status"), Some(&FieldValue::Code("active".to_string())));
        assert!(matches!(
            resource.field("medicationCodeableConcept"),
            Some(FieldValue::Concept(_))
        ));
        assert!(matches!(resource.field("subject"), Some(FieldValue::Reference(_))));
        assert!(matches!(resource.field("effectivePeriod"), Some(FieldValue::Period(_))));
        assert!(resource.created_at.is_some());
    }

    #[test]
    fn test_unknown_keys_fall_back_to_structure() {
        let value = decode_value(
            "code",
            &json!({"coding": [{"code": "x", "userSelected": true}]}),
        )
        .unwrap();
        assert!(matches!(value, FieldValue::Structure(_)));
    }

    #[test]
    fn test_encode_reproduces_input() {
        let input = medication_statement();
        let resource = decode_resource(&input, Generation::A).unwrap();
        assert_eq!(encode_resource(&resource), input);
    }

    #[test]
    fn test_decimal_and_integer_survive() {
        let input = json!({
            "resourceType": "Observation",
            "id": "obs-1",
            "valueQuantity": {"value": 98.6, "unit": "F"},
            "component": [{"valueInteger": 3}]
        });
        let resource = decode_resource(&input, Generation::B).unwrap();
        assert!(matches!(resource.field("valueQuantity"), Some(FieldValue::Quantity(_))));
        assert_eq!(encode_resource(&resource), input);
    }

    #[test]
    fn test_date_classification() {
        assert_eq!(
            decode_value("birthDate", &json!("1980-02-29")),
            Some(FieldValue::Date("1980-02-29".to_string()))
        );
        assert_eq!(
            decode_value("issued", &json!("2024-01-01T08:30:00+01:00")),
            Some(FieldValue::DateTime("2024-01-01T08:30:00+01:00".to_string()))
        );
        assert_eq!(
            decode_value("text", &json!("1980 vintage")),
            Some(FieldValue::Text("1980 vintage".to_string()))
        );
    }

    #[test]
    fn test_missing_resource_type_is_validation_error() {
        let err = decode_resource(&json!({"id": "x"}), Generation::A).unwrap_err();
        assert!(matches!(err, MeridianError::Validation(_)));
    }

    #[test]
    fn test_invalid_id_is_validation_error() {
        let err =
            decode_resource(&json!({"resourceType": "Patient", "id": "a b"}), Generation::A)
                .unwrap_err();
        assert!(matches!(err, MeridianError::Validation(_)));
    }

    #[test]
    fn test_decode_bundle_skips_entries_without_resource() {
        let bundle = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [
                {"resource": {"resourceType": "Patient", "id": "p1"}},
                {"fullUrl": "urn:uuid:nothing"},
                {"resource": medication_statement()}
            ]
        });
        let resources = decode_bundle(&bundle, Generation::A).unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[1].resource_type, ResourceType::MedicationStatement);
    }

    #[test]
    fn test_decode_bundle_rejects_non_bundle() {
        assert!(decode_bundle(&json!({"resourceType": "Patient", "id": "p1"}), Generation::A).is_err());
        assert!(decode_bundle(&json!({"resourceType": "Bundle", "entry": {}}), Generation::A).is_err());
    }

    #[test]
    fn test_null_list_entries_keep_their_position() {
        let given = json!(["Ada", null, "King"]);
        let extensions = json!([null, {"extension": [{"url": "http://example.org/initial", "valueBoolean": true}]}, null]);
        let resource = decode_resource(
            &json!({"resourceType": "Patient", "id": "p1", "name": [{"given": given, "_given": extensions}]}),
            Generation::A,
        )
        .unwrap();

        assert_eq!(encode_resource(&resource)["name"][0]["given"], given);
        assert_eq!(
            decode_value("given", &given),
            Some(FieldValue::List(vec![
                FieldValue::Text("Ada".to_string()),
                FieldValue::Null,
                FieldValue::Text("King".to_string()),
            ]))
        );
        assert_eq!(decode_value("given", &Value::Null), None);
    }
}
