//! Bundle packaging
//!
//! Serializes exported resources into a deliverable. Ordering is fully
//! determined by the resources themselves, so identical inputs always give
//! byte-identical output and the same checksum.

use crate::domain::codec::encode_resource;
use crate::domain::{ClinicalResource, Deliverable, ExportFormat, Result};
use serde_json::{json, Value};
use std::cmp::Ordering;

/// Packages resources into deliverables
#[derive(Debug, Clone, Copy, Default)]
pub struct BundlePackager;

impl BundlePackager {
    pub fn new() -> Self {
        Self
    }

    /// Package resources in the requested format
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the output cannot be encoded.
    pub fn package(
        &self,
        mut resources: Vec<ClinicalResource>,
        format: ExportFormat,
    ) -> Result<Deliverable> {
        sort_canonical(&mut resources);

        let bytes = match format {
            ExportFormat::FhirR4Bundle | ExportFormat::FhirR5Bundle => {
                serde_json::to_vec(&collection_bundle(&resources))?
            }
            ExportFormat::Ndjson => {
                let mut out = Vec::new();
                for resource in &resources {
                    serde_json::to_writer(&mut out, &encode_resource(resource))?;
                    out.push(b'\n');
                }
                out
            }
        };

        tracing::debug!(
            format = %format,
            resources = resources.len(),
            bytes = bytes.len(),
            "Deliverable packaged"
        );
        Ok(Deliverable::new(format, bytes, resources.len()))
    }
}

/// Orders resources for delivery
///
/// Patient first, then the canonical type list, then unlisted types by name.
/// Within a type, resources go by creation timestamp (undated last) and
/// then by id.
pub fn sort_canonical(resources: &mut [ClinicalResource]) {
    resources.sort_by(compare_canonical);
}

fn compare_canonical(a: &ClinicalResource, b: &ClinicalResource) -> Ordering {
    a.resource_type
        .canonical_rank()
        .cmp(&b.resource_type.canonical_rank())
        .then_with(|| a.resource_type.as_str().cmp(b.resource_type.as_str()))
        .then_with(|| match (a.created_at, b.created_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.id.cmp(&b.id))
}

fn collection_bundle(resources: &[ClinicalResource]) -> Value {
    let entries: Vec<Value> = resources
        .iter()
        .map(|resource| {
            json!({
                "fullUrl": format!("{}/{}", resource.resource_type, resource.id),
                "resource": encode_resource(resource),
            })
        })
        .collect();
    json!({
        "resourceType": "Bundle",
        "type": "collection",
        "total": resources.len(),
        "entry": entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::codec::decode_resource;
    use crate::domain::Generation;

    fn resources() -> Vec<ClinicalResource> {
        [
            json!({"resourceType": "Observation", "id": "o-2", "meta": {"lastUpdated": "2024-02-01T00:00:00Z"}}),
            json!({"resourceType": "CarePlan", "id": "cp-1"}),
            json!({"resourceType": "Condition", "id": "c-1"}),
            json!({"resourceType": "Observation", "id": "o-1", "meta": {"lastUpdated": "2024-03-01T00:00:00Z"}}),
            json!({"resourceType": "Patient", "id": "p-1"}),
            json!({"resourceType": "Observation", "id": "o-0"}),
            json!({"resourceType": "AuditEvent", "id": "ae-1"}),
        ]
        .iter()
        .map(|v| decode_resource(v, Generation::B).unwrap())
        .collect()
    }

    #[test]
    fn test_canonical_order() {
        let mut resources = resources();
        sort_canonical(&mut resources);
        let ids: Vec<&str> = resources.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["p-1", "c-1", "o-2", "o-1", "o-0", "ae-1", "cp-1"]);
    }

    #[test]
    fn test_output_independent_of_input_order() {
        let packager = BundlePackager::new();
        let forward = packager
            .package(resources(), ExportFormat::FhirR5Bundle)
            .unwrap();
        let mut reversed = resources();
        reversed.reverse();
        let backward = packager.package(reversed, ExportFormat::FhirR5Bundle).unwrap();

        assert_eq!(forward.bytes, backward.bytes);
        assert_eq!(forward.checksum, backward.checksum);
        assert_eq!(forward.resource_count, 7);
    }

    #[test]
    fn test_bundle_shape() {
        let deliverable = BundlePackager::new()
            .package(resources(), ExportFormat::FhirR5Bundle)
            .unwrap();
        let bundle: Value = serde_json::from_slice(&deliverable.bytes).unwrap();
        assert_eq!(bundle["type"], "collection");
        assert_eq!(bundle["total"], 7);
        assert_eq!(bundle["entry"][0]["fullUrl"], "Patient/p-1");
        assert_eq!(bundle["entry"][0]["resource"]["resourceType"], "Patient");
    }

    #[test]
    fn test_ndjson_one_resource_per_line() {
        let deliverable = BundlePackager::new()
            .package(resources(), ExportFormat::Ndjson)
            .unwrap();
        let text = String::from_utf8(deliverable.bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 7);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["id"], "p-1");
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_empty_export_still_packages() {
        let deliverable = BundlePackager::new()
            .package(Vec::new(), ExportFormat::FhirR4Bundle)
            .unwrap();
        assert_eq!(deliverable.resource_count, 0);
        assert!(deliverable.size() > 0);
    }
}
