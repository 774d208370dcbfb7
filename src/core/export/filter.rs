//! Export filters
//!
//! Filters run on the stored generation B resources before any
//! transformation. A requested type names what the caller wants to receive,
//! so generation A names are translated to the stored types first.

use crate::core::transform::fragment_parent_id;
use crate::domain::{
    ClinicalResource, DateRange, Generation, MeridianError, ResourceType, Result,
};
use std::collections::{BTreeSet, HashSet};

/// Resource type and date filters of one export
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportFilter {
    /// Requested types, empty means all
    pub resource_types: BTreeSet<ResourceType>,
    pub date_range: Option<DateRange>,
}

impl ExportFilter {
    pub fn new(resource_types: BTreeSet<ResourceType>, date_range: Option<DateRange>) -> Self {
        Self {
            resource_types,
            date_range,
        }
    }

    /// Rejects malformed filters before anything is read
    ///
    /// # Errors
    ///
    /// Returns `MeridianError::ExportQuery` for an inverted date range or a
    /// type name that is not a resource type identifier.
    pub fn validate(&self) -> Result<()> {
        if let Some(range) = &self.date_range {
            range.validate().map_err(MeridianError::ExportQuery)?;
        }
        for resource_type in &self.resource_types {
            let name = resource_type.as_str();
            let well_formed = name.starts_with(|c: char| c.is_ascii_uppercase())
                && name.chars().all(|c| c.is_ascii_alphanumeric());
            if !well_formed {
                return Err(MeridianError::ExportQuery(format!(
                    "'{name}' is not a resource type"
                )));
            }
        }
        Ok(())
    }

    /// Stored types to read for the requested types
    ///
    /// Medication facts are stored as `MedicationUsage` plus split-off
    /// `MedicationTiming` fragments. The fragments are only read when the
    /// deliverable is generation A, where they fold back into their parent.
    pub fn stored_types(&self, target: Generation) -> BTreeSet<ResourceType> {
        let mut types = BTreeSet::new();
        for requested in &self.resource_types {
            match requested {
                ResourceType::MedicationStatement | ResourceType::MedicationUsage => {
                    types.insert(ResourceType::MedicationUsage);
                    if target == Generation::A {
                        types.insert(ResourceType::MedicationTiming);
                    }
                }
                other => {
                    types.insert(other.clone());
                }
            }
        }
        types
    }

    /// Applies the type and date filters
    ///
    /// Resources without an effective date are excluded once a date range is
    /// set. A timing fragment has no date of its own and follows its parent.
    pub fn apply(&self, resources: Vec<ClinicalResource>, target: Generation) -> Vec<ClinicalResource> {
        let types = self.stored_types(target);
        let typed: Vec<ClinicalResource> = resources
            .into_iter()
            .filter(|r| types.is_empty() || types.contains(&r.resource_type))
            .collect();

        let Some(range) = self.date_range.filter(|r| !r.is_unbounded()) else {
            return typed;
        };

        let in_range = |r: &ClinicalResource| r.effective_date().is_some_and(|d| range.contains(d));
        let kept_parents: HashSet<String> = typed
            .iter()
            .filter(|r| r.resource_type != ResourceType::MedicationTiming && in_range(r))
            .map(|r| r.id.to_string())
            .collect();

        typed
            .into_iter()
            .filter(|r| {
                if r.resource_type == ResourceType::MedicationTiming {
                    fragment_parent_id(r).is_some_and(|p| kept_parents.contains(p))
                } else {
                    kept_parents.contains(r.id.as_str())
                }
            })
            .collect()
    }
}
