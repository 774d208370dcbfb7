//! Organization rules
//!
//! Generation B moves organization-level `telecom` and `address` into the
//! leading entries of `contact`. The first entry carries the telecoms and the
//! first address; every further address gets an entry of its own.
//!
//! Lossy in B -> A: a leading generation A contact that holds nothing but an
//! address returns as an organization-level address.

use crate::core::transform::rule::{FieldTransform, Fields, RuleContext, TransformRule};
use crate::domain::codec::{decode_value, encode_value};
use crate::domain::{FieldValue, Generation, ResourceType, TransformError};
use serde_json::{Map, Value};

pub const VERSION: &str = "1.0.0";

pub fn rules() -> Vec<TransformRule> {
    let forward = TransformRule::new(ResourceType::Organization, Generation::A, VERSION).field(
        FieldTransform::Custom {
            name: "organization-contact",
            apply: fold_contacts,
            undo: unfold_contacts,
        },
    );

    let backward = forward.inverse();
    vec![forward, backward]
}

fn json_items(value: Option<FieldValue>) -> Vec<Value> {
    match value.map(|v| encode_value(&v)) {
        Some(Value::Array(items)) => items,
        Some(single) => vec![single],
        None => Vec::new(),
    }
}

fn fold_contacts(_ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    let telecom = json_items(fields.remove("telecom"));
    let mut addresses = json_items(fields.remove("address")).into_iter();
    if telecom.is_empty() && addresses.as_slice().is_empty() {
        return Ok(());
    }

    let mut first = Map::new();
    if !telecom.is_empty() {
        first.insert("telecom".to_string(), Value::Array(telecom));
    }
    if let Some(address) = addresses.next() {
        first.insert("address".to_string(), address);
    }

    let mut contacts = vec![Value::Object(first)];
    contacts.extend(addresses.map(|address| {
        let mut entry = Map::new();
        entry.insert("address".to_string(), address);
        Value::Object(entry)
    }));
    contacts.extend(json_items(fields.remove("contact")));

    if let Some(value) = decode_value("contact", &Value::Array(contacts)) {
        fields.insert("contact".to_string(), value);
    }
    Ok(())
}

fn unfold_contacts(ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    let contacts = match fields.get("contact").map(encode_value) {
        Some(Value::Array(items)) => items,
        _ => return Ok(()),
    };

    let mut telecom = Vec::new();
    let mut addresses = Vec::new();
    let mut folded = 0;
    for (index, entry) in contacts.iter().enumerate() {
        let Some(entry) = entry.as_object().filter(|e| !e.is_empty()) else {
            break;
        };
        let allowed: &[&str] = if index == 0 {
            &["telecom", "address"]
        } else {
            &["address"]
        };
        if !entry.keys().all(|k| allowed.contains(&k.as_str())) {
            break;
        }
        if let Some(Value::Array(items)) = entry.get("telecom") {
            telecom.extend(items.iter().cloned());
        }
        if let Some(address) = entry.get("address") {
            addresses.push(address.clone());
        }
        folded += 1;
    }
    if folded == 0 {
        return Ok(());
    }
    if fields.contains_key("telecom") || fields.contains_key("address") {
        return Err(ctx.conflict(&["contact", "telecom", "address"]));
    }

    let rest: Vec<Value> = contacts.into_iter().skip(folded).collect();
    fields.remove("contact");
    for (name, items) in [("telecom", telecom), ("address", addresses), ("contact", rest)] {
        if items.is_empty() {
            continue;
        }
        if let Some(value) = decode_value(name, &Value::Array(items)) {
            fields.insert(name.to_string(), value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::codec::{decode_resource, encode_resource};
    use serde_json::json;

    fn organization() -> Value {
        json!({
            "resourceType": "Organization",
            "id": "org-1",
            "name": "Lakeside Clinic",
            "telecom": [{"system": "phone", "value": "555-0100"}],
            "address": [{"city": "Springfield"}, {"city": "Shelbyville"}],
            "contact": [{"name": {"text": "Front desk"}, "telecom": [{"system": "email", "value": "desk@example.org"}]}]
        })
    }

    #[test]
    fn test_forward_folds_into_contact() {
        let resource = decode_resource(&organization(), Generation::A).unwrap();
        let (produced, _) = rules()[0].apply(&resource).unwrap();
        let json = encode_resource(&produced[0]);

        assert!(json.get("telecom").is_none());
        assert!(json.get("address").is_none());
        assert_eq!(json["contact"].as_array().map(Vec::len), Some(3));
        assert_eq!(json["contact"][0]["telecom"][0]["value"], "555-0100");
        assert_eq!(json["contact"][0]["address"]["city"], "Springfield");
        assert_eq!(json["contact"][1]["address"]["city"], "Shelbyville");
        assert_eq!(json["contact"][2]["name"]["text"], "Front desk");
    }

    #[test]
    fn test_round_trip() {
        let rules = rules();
        let resource = decode_resource(&organization(), Generation::A).unwrap();
        let (b, _) = rules[0].apply(&resource).unwrap();
        let (a, _) = rules[1].apply(&b[0]).unwrap();
        assert_eq!(encode_resource(&a[0]), organization());
    }

    #[test]
    fn test_named_contact_is_not_unfolded() {
        let resource = decode_resource(
            &json!({
                "resourceType": "Organization",
                "id": "org-2",
                "contact": [{"name": {"text": "Billing"}, "address": {"city": "Ogdenville"}}]
            }),
            Generation::B,
        )
        .unwrap();
        let (produced, _) = rules()[1].apply(&resource).unwrap();
        assert!(produced[0].field("address").is_none());
        assert!(produced[0].field("contact").is_some());
    }
}
