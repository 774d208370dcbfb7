//! Demographics extraction from Patient resources

use crate::domain::codec::encode_value;
use crate::domain::resource::parse_partial_date;
use crate::domain::{ClinicalResource, Demographics};
use serde_json::Value;

/// Identifier type code marking a medical record number
const MRN_TYPE_CODE: &str = "MR";

fn field_json(patient: &ClinicalResource, name: &str) -> Vec<Value> {
    match patient.field(name).map(encode_value) {
        Some(Value::Array(items)) => items,
        Some(other) => vec![other],
        None => Vec::new(),
    }
}

fn str_member<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn is_mrn(identifier: &Value) -> bool {
    identifier
        .get("type")
        .and_then(|t| t.get("coding"))
        .and_then(Value::as_array)
        .is_some_and(|codings| {
            codings
                .iter()
                .any(|c| str_member(c, "code") == Some(MRN_TYPE_CODE))
        })
}

/// Pulls the matching demographics out of a Patient resource
///
/// The medical record number is the first identifier typed `MR`, falling back
/// to an identifier with `use = usual`. The official name is preferred over
/// the first listed one. Partial birth dates are ignored. Missing elements
/// stay `None`.
pub fn demographics_from_patient(patient: &ClinicalResource) -> Demographics {
    let identifiers = field_json(patient, "identifier");
    let mrn = identifiers
        .iter()
        .find(|i| is_mrn(i))
        .or_else(|| identifiers.iter().find(|i| str_member(i, "use") == Some("usual")))
        .and_then(|i| str_member(i, "value"))
        .map(str::to_string);

    let names = field_json(patient, "name");
    let name = names
        .iter()
        .find(|n| str_member(n, "use") == Some("official"))
        .or_else(|| names.first());
    let given_name = name
        .and_then(|n| n.get("given"))
        .and_then(Value::as_array)
        .and_then(|given| given.first())
        .and_then(Value::as_str)
        .map(str::to_string);
    let family_name = name
        .and_then(|n| str_member(n, "family"))
        .map(str::to_string);

    let birth_date = patient
        .field("birthDate")
        .and_then(|v| v.as_str())
        .filter(|d| d.len() >= 10)
        .and_then(parse_partial_date);

    let postal_code = field_json(patient, "address")
        .iter()
        .find_map(|a| str_member(a, "postalCode").map(str::to_string));

    let telecom = field_json(patient, "telecom");
    let contact = |system: &str| {
        telecom
            .iter()
            .filter(|t| str_member(t, "system") == Some(system))
            .find_map(|t| str_member(t, "value").map(str::to_string))
    };

    Demographics {
        mrn,
        given_name,
        family_name,
        birth_date,
        postal_code,
        phone: contact("phone"),
        email: contact("email"),
    }
}
