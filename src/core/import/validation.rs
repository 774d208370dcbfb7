//! Import payload validation
//!
//! Decodes the base64 payload, enforces the size limit and runs the
//! structural checks of the declared format. Nothing here converts clinical
//! content; it only decides whether a document may enter the pipeline and,
//! for converter formats, which root template the converter should use.

use crate::domain::codec::decode_bundle;
use crate::domain::ids::DocumentId;
use crate::domain::{ClinicalResource, Generation, InputFormat, MeridianError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

const CDA_NAMESPACE: &str = "urn:hl7-org:v3";

/// Default C-CDA root template when the document names no known one
pub const DEFAULT_CCDA_TEMPLATE: &str = "CCD";

/// C-CDA document template OIDs and the converter root template they select
const CCDA_TEMPLATES: [(&str, &str); 10] = [
    ("2.16.840.1.113883.10.20.22.1.1", "CCD"),
    ("2.16.840.1.113883.10.20.22.1.2", "CCD"),
    ("2.16.840.1.113883.10.20.22.1.3", "HistoryandPhysical"),
    ("2.16.840.1.113883.10.20.22.1.4", "ConsultationNote"),
    ("2.16.840.1.113883.10.20.22.1.6", "ProcedureNote"),
    ("2.16.840.1.113883.10.20.22.1.7", "OperativeNote"),
    ("2.16.840.1.113883.10.20.22.1.8", "DischargeSummary"),
    ("2.16.840.1.113883.10.20.22.1.9", "ProgressNote"),
    ("2.16.840.1.113883.10.20.22.1.13", "TransferSummary"),
    ("2.16.840.1.113883.10.20.22.1.14", "ReferralNote"),
];

/// HL7 v2 message structures the converter has root templates for
const HL7V2_TEMPLATES: [&str; 34] = [
    "ADT_A01", "ADT_A02", "ADT_A03", "ADT_A04", "ADT_A05", "ADT_A08", "ADT_A11", "ADT_A13",
    "ADT_A14", "ADT_A15", "ADT_A16", "ADT_A25", "ADT_A26", "ADT_A27", "ADT_A28", "ADT_A29",
    "ADT_A31", "ADT_A40", "ADT_A41", "ADT_A45", "ADT_A47", "ADT_A60", "ORM_O01", "ORU_R01",
    "OML_O21", "VXU_V04", "SIU_S12", "SIU_S13", "SIU_S14", "SIU_S15", "SIU_S16", "SIU_S17",
    "SIU_S26", "MDM_T02",
];

/// A payload that passed validation
#[derive(Debug, Clone)]
pub struct ValidatedDocument {
    /// Decoded document text
    pub text: String,

    /// Content id of the decoded payload
    pub document_id: DocumentId,

    /// Converter root template, `None` for generation A bundles
    pub template: Option<String>,

    /// Generation A resources, decoded directly for `fhir-r4` input
    pub resources: Option<Vec<ClinicalResource>>,

    /// Non-fatal findings
    pub warnings: Vec<String>,
}

/// Validate an encoded import payload
///
/// # Arguments
///
/// * `payload` - Base64 encoded document
/// * `format` - Declared input format
/// * `subtype` - Optional caller hint naming the converter root template
/// * `max_bytes` - Upper bound on the decoded size
///
/// # Errors
///
/// Returns `MeridianError::Validation` if the payload cannot be decoded, is
/// too large or fails the structural checks of its format.
pub fn validate_payload(
    payload: &str,
    format: InputFormat,
    subtype: Option<&str>,
    max_bytes: usize,
) -> Result<ValidatedDocument> {
    // base64 expands by 4/3; reject obviously oversized payloads before decoding
    if payload.len() / 4 * 3 > max_bytes + 3 {
        return Err(too_large(max_bytes));
    }
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| MeridianError::Validation(format!("payload is not valid base64: {e}")))?;
    if bytes.is_empty() {
        return Err(MeridianError::Validation("payload is empty".to_string()));
    }
    if bytes.len() > max_bytes {
        return Err(too_large(max_bytes));
    }
    let document_id = DocumentId::from_payload(&bytes);
    let text = String::from_utf8(bytes)
        .map_err(|_| MeridianError::Validation("payload is not valid UTF-8".to_string()))?;

    let mut warnings = Vec::new();
    let (template, resources) = match format {
        InputFormat::Ccda => {
            let detected = validate_ccda(&text)?;
            let template = choose_template(subtype, detected, &mut warnings, |s| {
                CCDA_TEMPLATES.iter().any(|(_, t)| *t == s)
            });
            (Some(template), None)
        }
        InputFormat::Hl7v2 => {
            let structure = validate_hl7v2(&text)?;
            (Some(structure), None)
        }
        InputFormat::FhirR4 => (None, Some(validate_bundle(&text)?)),
    };

    Ok(ValidatedDocument {
        text,
        document_id,
        template,
        resources,
        warnings,
    })
}

fn too_large(max_bytes: usize) -> MeridianError {
    MeridianError::Validation(format!("payload exceeds the {max_bytes} byte limit"))
}

fn choose_template(
    subtype: Option<&str>,
    detected: Option<&'static str>,
    warnings: &mut Vec<String>,
    known: impl Fn(&str) -> bool,
) -> String {
    if let Some(hint) = subtype {
        if known(hint) {
            return hint.to_string();
        }
        warnings.push(format!("Ignored unknown document subtype '{hint}'"));
    }
    match detected {
        Some(template) => template.to_string(),
        None => {
            warnings.push(format!(
                "No known C-CDA document template, using {DEFAULT_CCDA_TEMPLATE}"
            ));
            DEFAULT_CCDA_TEMPLATE.to_string()
        }
    }
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

/// Checks the C-CDA envelope and returns the detected root template
///
/// The root must be `ClinicalDocument`, either unqualified or in the HL7 v3
/// namespace, and the document needs a `structuredBody` with at least one
/// `section`. Only `templateId` children of the root select the template.
pub fn validate_ccda(text: &str) -> Result<Option<&'static str>> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut depth = 0usize;
    let mut saw_root = false;
    let mut template = None;
    let mut body_depth: Option<usize> = None;
    let mut sections = 0usize;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| MeridianError::Validation(format!("invalid XML: {e}")))?;
        let (element, is_empty) = match event {
            Event::Start(e) => (e, false),
            Event::Empty(e) => (e, true),
            Event::End(_) => {
                if body_depth == Some(depth) {
                    body_depth = None;
                }
                depth = depth.saturating_sub(1);
                continue;
            }
            Event::Eof => break,
            _ => continue,
        };
        let local = element.local_name();
        let local = local.as_ref();

        if depth == 0 {
            if saw_root || local != b"ClinicalDocument" {
                return Err(MeridianError::Validation(
                    "document is not a C-CDA: missing ClinicalDocument root element".to_string(),
                ));
            }
            check_namespace(&element)?;
            saw_root = true;
        } else if depth == 1 && local == b"templateId" && template.is_none() {
            template = attribute(&element, b"root").and_then(|oid| {
                CCDA_TEMPLATES
                    .iter()
                    .find(|(known, _)| *known == oid)
                    .map(|(_, t)| *t)
            });
        } else if local == b"structuredBody" && body_depth.is_none() && !is_empty {
            body_depth = Some(depth + 1);
        } else if local == b"section" && body_depth.is_some() {
            sections += 1;
        }

        if !is_empty {
            depth += 1;
        }
    }

    if !saw_root {
        return Err(MeridianError::Validation(
            "document is not a C-CDA: missing ClinicalDocument root element".to_string(),
        ));
    }
    if sections == 0 {
        return Err(MeridianError::Validation(
            "C-CDA document has no structuredBody sections".to_string(),
        ));
    }
    Ok(template)
}

fn check_namespace(root: &BytesStart<'_>) -> Result<()> {
    let prefix = root
        .name()
        .prefix()
        .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned());
    let declaration = match prefix {
        Some(p) => format!("xmlns:{p}"),
        None => "xmlns".to_string(),
    };
    match attribute(root, declaration.as_bytes()) {
        Some(ns) if ns != CDA_NAMESPACE => Err(MeridianError::Validation(format!(
            "ClinicalDocument is in namespace '{ns}', expected {CDA_NAMESPACE}"
        ))),
        _ => Ok(()),
    }
}

/// Checks the MSH header and returns the message structure (e.g. `ORU_R01`)
///
/// The structure comes from MSH-9: component 3 when present, otherwise
/// message code and trigger event joined by `_`.
pub fn validate_hl7v2(text: &str) -> Result<String> {
    let header = text
        .trim_start_matches('\u{feff}')
        .split(['\r', '\n'])
        .find(|line| !line.trim().is_empty())
        .unwrap_or_default();
    if !header.starts_with("MSH") || header.len() < 8 {
        return Err(MeridianError::Validation(
            "HL7 v2 message must start with an MSH segment".to_string(),
        ));
    }

    let mut chars = header[3..].chars();
    let field_sep = chars.next().unwrap_or('|');
    let component_sep = chars.next().unwrap_or('^');
    if field_sep.is_alphanumeric() || component_sep.is_alphanumeric() {
        return Err(MeridianError::Validation(
            "MSH segment has invalid delimiters".to_string(),
        ));
    }

    // MSH-1 is the separator itself, so MSH-9 is the ninth item after splitting
    let message_type = header.split(field_sep).nth(8).unwrap_or_default();
    let components: Vec<&str> = message_type.split(component_sep).map(str::trim).collect();
    let structure = match components.as_slice() {
        [_, _, structure, ..] if !structure.is_empty() => structure.to_string(),
        [code, event, ..] if !code.is_empty() && !event.is_empty() => format!("{code}_{event}"),
        _ => {
            return Err(MeridianError::Validation(
                "MSH-9 does not name a message type".to_string(),
            ))
        }
    };
    let structure = structure.to_uppercase();
    if !HL7V2_TEMPLATES.contains(&structure.as_str()) {
        return Err(MeridianError::Validation(format!(
            "unsupported HL7 v2 message type {structure}"
        )));
    }
    Ok(structure)
}

/// Decodes a generation A bundle
pub fn validate_bundle(text: &str) -> Result<Vec<ClinicalResource>> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| MeridianError::Validation(format!("payload is not valid JSON: {e}")))?;
    decode_bundle(&value, Generation::A).map_err(|e| match e {
        invalid @ MeridianError::Validation(_) => invalid,
        other => MeridianError::Validation(other.to_string()),
    })
}
