//! Non-fatal findings surfaced to callers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Warning produced while transforming a resource
///
/// Warnings are attached to the affected resource and never stop a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformWarning {
    /// No rule is registered for the resource type; it passed through untouched
    UnmappedType {
        resource_id: String,
        resource_type: String,
    },

    /// A coded value has no entry in the target vocabulary and was kept as text
    UnmappedCode {
        resource_id: String,
        resource_type: String,
        field: String,
        code: String,
    },

    /// A split-off fragment had no parent in the batch and passed through
    OrphanedFragment {
        resource_id: String,
        resource_type: String,
        parent_id: String,
    },
}

impl TransformWarning {
    pub fn resource_id(&self) -> &str {
        match self {
            TransformWarning::UnmappedType { resource_id, .. }
            | TransformWarning::UnmappedCode { resource_id, .. }
            | TransformWarning::OrphanedFragment { resource_id, .. } => resource_id,
        }
    }
}

impl fmt::Display for TransformWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformWarning::UnmappedType {
                resource_id,
                resource_type,
            } => write!(
                f,
                "UnmappedType: {resource_type}/{resource_id} has no registered transform and was passed through"
            ),
            TransformWarning::UnmappedCode {
                resource_id,
                resource_type,
                field,
                code,
            } => write!(
                f,
                "UnmappedCode: {resource_type}/{resource_id} field '{field}' code '{code}' has no target equivalent, kept as text"
            ),
            TransformWarning::OrphanedFragment {
                resource_id,
                resource_type,
                parent_id,
            } => write!(
                f,
                "OrphanedFragment: {resource_type}/{resource_id} references missing parent {parent_id}"
            ),
        }
    }
}

/// Warning reported by the document converter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionWarning(pub String);

impl fmt::Display for ConversionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Conversion: {}", self.0)
    }
}
