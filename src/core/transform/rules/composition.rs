//! Composition rules
//!
//! Every converted C-CDA document is headed by a Composition. Generation B
//! makes `subject` a list, turns `attester.mode` into a concept, folds
//! `relatesTo.target[x]` into `resourceReference` and `event.code` into
//! codeable-reference `event.detail` entries. `confidentiality` and
//! `section.mode` no longer exist in generation B and are carried as
//! cross-version extensions so the document survives a round trip.

use crate::core::transform::rule::{
    edit_entries, edit_json, FieldTransform, Fields, RuleContext, TransformRule,
};
use crate::domain::codec::{decode_value, encode_value};
use crate::domain::{Generation, ResourceType, TransformError};
use serde_json::{json, Map, Value};

pub const VERSION: &str = "1.0.0";

pub const CONFIDENTIALITY_URL: &str =
    "http://hl7.org/fhir/4.0/StructureDefinition/extension-Composition.confidentiality";
pub const SECTION_MODE_URL: &str =
    "http://hl7.org/fhir/4.0/StructureDefinition/extension-Composition.section.mode";
const ATTESTATION_MODE_SYSTEM: &str = "http://hl7.org/fhir/composition-attestation-mode";

pub fn rules() -> Vec<TransformRule> {
    let forward = TransformRule::new(ResourceType::Composition, Generation::A, VERSION)
        .require(&["status", "type"])
        .field(FieldTransform::WrapList { field: "subject" })
        .field(FieldTransform::Custom {
            name: "composition-confidentiality",
            apply: confidentiality_to_extension,
            undo: extension_to_confidentiality,
        })
        .field(FieldTransform::Custom {
            name: "composition-attester-mode",
            apply: attester_mode_to_concept,
            undo: attester_mode_to_code,
        })
        .field(FieldTransform::Custom {
            name: "composition-relates-to",
            apply: relates_to_b,
            undo: relates_to_a,
        })
        .field(FieldTransform::Custom {
            name: "composition-event",
            apply: event_to_b,
            undo: event_to_a,
        })
        .field(FieldTransform::Custom {
            name: "composition-section-mode",
            apply: |_, fields| edit_json(fields, "section", |json| {
                section_mode(json, true);
                Ok(())
            }),
            undo: |_, fields| edit_json(fields, "section", |json| {
                section_mode(json, false);
                Ok(())
            }),
        });

    let backward = forward.inverse().require(&["status", "type"]);
    vec![forward, backward]
}

fn push_extension(map: &mut Map<String, Value>, url: &str, value: Value) {
    let extensions = map
        .entry("extension".to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if let Some(items) = extensions.as_array_mut() {
        items.push(json!({ "url": url, "valueCode": value }));
    }
}

/// Removes the extension with `url`, dropping an emptied extension list
fn take_extension(map: &mut Map<String, Value>, url: &str) -> Option<Value> {
    let items = map.get_mut("extension")?.as_array_mut()?;
    let position = items
        .iter()
        .position(|e| e.get("url").and_then(Value::as_str) == Some(url))?;
    let extension = items.remove(position);
    if items.is_empty() {
        map.remove("extension");
    }
    extension.get("valueCode").cloned()
}

/// Moves the top-level `extension` field in or out of a scratch map
fn with_extensions<F, T>(fields: &mut Fields, edit: F) -> T
where
    F: FnOnce(&mut Map<String, Value>) -> T,
{
    let mut holder = Map::new();
    if let Some(extensions) = fields.remove("extension") {
        holder.insert("extension".to_string(), encode_value(&extensions));
    }
    let result = edit(&mut holder);
    if let Some(value) = holder.get("extension").and_then(|e| decode_value("extension", e)) {
        fields.insert("extension".to_string(), value);
    }
    result
}

fn confidentiality_to_extension(
    _ctx: &mut RuleContext,
    fields: &mut Fields,
) -> Result<(), TransformError> {
    let Some(code) = fields.remove("confidentiality") else {
        return Ok(());
    };
    with_extensions(fields, |holder| {
        push_extension(holder, CONFIDENTIALITY_URL, encode_value(&code))
    });
    Ok(())
}

fn extension_to_confidentiality(
    ctx: &mut RuleContext,
    fields: &mut Fields,
) -> Result<(), TransformError> {
    if fields.contains_key("confidentiality") {
        return Err(ctx.conflict(&["extension", "confidentiality"]));
    }
    let code = with_extensions(fields, |holder| take_extension(holder, CONFIDENTIALITY_URL));
    if let Some(value) = code.and_then(|c| decode_value("confidentiality", &c)) {
        fields.insert("confidentiality".to_string(), value);
    }
    Ok(())
}

fn attester_mode_to_concept(
    _ctx: &mut RuleContext,
    fields: &mut Fields,
) -> Result<(), TransformError> {
    edit_entries(fields, "attester", |entry| {
        if let Some(Value::String(mode)) = entry.get("mode").cloned() {
            entry.insert(
                "mode".to_string(),
                json!({ "coding": [{ "system": ATTESTATION_MODE_SYSTEM, "code": mode }] }),
            );
        }
    })
}

fn attester_mode_to_code(_ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    edit_entries(fields, "attester", |entry| {
        let code = entry
            .get("mode")
            .and_then(Value::as_object)
            .filter(|mode| mode.len() == 1)
            .and_then(|mode| mode.get("coding"))
            .and_then(Value::as_array)
            .filter(|codings| codings.len() == 1)
            .and_then(|codings| codings[0].as_object())
            .filter(|coding| {
                coding.len() == 2
                    && coding.get("system").and_then(Value::as_str) == Some(ATTESTATION_MODE_SYSTEM)
            })
            .and_then(|coding| coding.get("code"))
            .filter(|code| code.is_string())
            .cloned();
        if let Some(code) = code {
            entry.insert("mode".to_string(), code);
        }
    })
}

fn relates_to_b(_ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    edit_entries(fields, "relatesTo", |entry| {
        if let Some(code) = entry.remove("code") {
            entry.insert("type".to_string(), code);
        }
        if let Some(identifier) = entry.remove("targetIdentifier") {
            entry.insert(
                "resourceReference".to_string(),
                json!({ "identifier": identifier }),
            );
        } else if let Some(reference) = entry.remove("targetReference") {
            entry.insert("resourceReference".to_string(), reference);
        }
    })
}

fn relates_to_a(_ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    edit_entries(fields, "relatesTo", |entry| {
        if let Some(kind) = entry.remove("type") {
            entry.insert("code".to_string(), kind);
        }
        let Some(reference) = entry.remove("resourceReference") else {
            return;
        };
        let identifier_only = reference
            .as_object()
            .filter(|r| r.len() == 1)
            .and_then(|r| r.get("identifier"))
            .cloned();
        match identifier_only {
            Some(identifier) => entry.insert("targetIdentifier".to_string(), identifier),
            None => entry.insert("targetReference".to_string(), reference),
        };
    })
}

/// `event.code` concepts and `event.detail` references become one
/// codeable-reference `detail` list
fn event_to_b(_ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    edit_entries(fields, "event", |entry| {
        let codes = entry.remove("code");
        let details = entry.remove("detail");
        let merged: Vec<Value> = list(codes)
            .into_iter()
            .map(|c| json!({ "concept": c }))
            .chain(list(details).into_iter().map(|r| json!({ "reference": r })))
            .collect();
        if !merged.is_empty() {
            entry.insert("detail".to_string(), Value::Array(merged));
        }
    })
}

fn event_to_a(_ctx: &mut RuleContext, fields: &mut Fields) -> Result<(), TransformError> {
    edit_entries(fields, "event", |entry| {
        let Some(Value::Array(details)) = entry.get("detail") else {
            return;
        };
        let mut codes = Vec::new();
        let mut references = Vec::new();
        for detail in details {
            let slot = detail.as_object().filter(|d| d.len() == 1);
            match slot.and_then(|d| d.iter().next()) {
                Some((key, inner)) if key == "concept" => codes.push(inner.clone()),
                Some((key, inner)) if key == "reference" => references.push(inner.clone()),
                _ => return,
            }
        }
        entry.remove("detail");
        if !codes.is_empty() {
            entry.insert("code".to_string(), Value::Array(codes));
        }
        if !references.is_empty() {
            entry.insert("detail".to_string(), Value::Array(references));
        }
    })
}

fn list(value: Option<Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items,
        Some(other) => vec![other],
        None => Vec::new(),
    }
}

/// Moves `section.mode` to and from its extension, through nested sections
fn section_mode(sections: &mut Value, into_extension: bool) {
    let Some(items) = sections.as_array_mut() else {
        return;
    };
    for section in items.iter_mut().filter_map(Value::as_object_mut) {
        if into_extension {
            if let Some(mode) = section.remove("mode") {
                push_extension(section, SECTION_MODE_URL, mode);
            }
        } else if let Some(mode) = take_extension(section, SECTION_MODE_URL) {
            section.insert("mode".to_string(), mode);
        }
        if let Some(nested) = section.get_mut("section") {
            section_mode(nested, into_extension);
        }
    }
}
