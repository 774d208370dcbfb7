//! Import and export job models
//!
//! Jobs are the unit of work tracked by the job store. Their status only ever
//! moves forward; see [`ImportState::can_advance_to`] and
//! [`ExportStatus::can_advance_to`].

use super::ids::{DocumentId, JobId, OrganizationId, PatientId, ProvenanceId, ResourceId};
use super::patient::{Demographics, PatientMatchResult};
use super::resource::{ClinicalResource, Generation, ResourceType};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Input document format of an import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputFormat {
    /// C-CDA clinical document (XML)
    #[serde(rename = "ccda")]
    Ccda,
    /// HL7 v2 message (pipe delimited)
    #[serde(rename = "hl7v2")]
    Hl7v2,
    /// Generation A bundle as JSON
    #[serde(rename = "fhir-r4")]
    FhirR4,
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputFormat::Ccda => write!(f, "ccda"),
            InputFormat::Hl7v2 => write!(f, "hl7v2"),
            InputFormat::FhirR4 => write!(f, "fhir-r4"),
        }
    }
}

impl FromStr for InputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ccda" | "c-cda" => Ok(InputFormat::Ccda),
            "hl7v2" | "hl7" => Ok(InputFormat::Hl7v2),
            "fhir-r4" | "fhir" | "r4" => Ok(InputFormat::FhirR4),
            _ => Err(format!(
                "Invalid input format '{s}'. Must be one of: ccda, hl7v2, fhir-r4"
            )),
        }
    }
}

/// Deliverable format of an export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExportFormat {
    /// Generation B collection bundle
    #[serde(rename = "fhir-r5")]
    FhirR5Bundle,
    /// Generation A collection bundle
    #[serde(rename = "fhir-r4")]
    FhirR4Bundle,
    /// Generation B newline-delimited resources
    #[serde(rename = "ndjson")]
    Ndjson,
}

impl ExportFormat {
    /// Schema generation the deliverable is written in
    pub fn target_generation(self) -> Generation {
        match self {
            ExportFormat::FhirR4Bundle => Generation::A,
            ExportFormat::FhirR5Bundle | ExportFormat::Ndjson => Generation::B,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::FhirR4Bundle | ExportFormat::FhirR5Bundle => "application/fhir+json",
            ExportFormat::Ndjson => "application/fhir+ndjson",
        }
    }

    pub fn file_extension(self) -> &'static str {
        match self {
            ExportFormat::FhirR4Bundle | ExportFormat::FhirR5Bundle => "json",
            ExportFormat::Ndjson => "ndjson",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::FhirR5Bundle => write!(f, "fhir-r5"),
            ExportFormat::FhirR4Bundle => write!(f, "fhir-r4"),
            ExportFormat::Ndjson => write!(f, "ndjson"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fhir-r5" | "r5" => Ok(ExportFormat::FhirR5Bundle),
            "fhir-r4" | "r4" => Ok(ExportFormat::FhirR4Bundle),
            "ndjson" => Ok(ExportFormat::Ndjson),
            _ => Err(format!(
                "Invalid export format '{s}'. Must be one of: fhir-r5, fhir-r4, ndjson"
            )),
        }
    }
}

/// Import job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Queued,
    Processing,
    Completed,
    Partial,
    Failed,
}

impl ImportStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ImportStatus::Completed | ImportStatus::Partial | ImportStatus::Failed
        )
    }

    fn rank(self) -> u8 {
        match self {
            ImportStatus::Queued => 0,
            ImportStatus::Processing => 1,
            ImportStatus::Completed | ImportStatus::Partial | ImportStatus::Failed => 2,
        }
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImportStatus::Queued => "queued",
            ImportStatus::Processing => "processing",
            ImportStatus::Completed => "completed",
            ImportStatus::Partial => "partial",
            ImportStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Pipeline stage an import job is in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStage {
    Queued,
    Validating,
    Converting,
    Transforming,
    Matching,
    Recording,
    Finished,
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImportStage::Queued => "queued",
            ImportStage::Validating => "validating",
            ImportStage::Converting => "converting",
            ImportStage::Transforming => "transforming",
            ImportStage::Matching => "matching",
            ImportStage::Recording => "recording",
            ImportStage::Finished => "finished",
        };
        write!(f, "{s}")
    }
}

/// Observable state of an import job, the key of compare-and-set transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImportState {
    pub status: ImportStatus,
    pub stage: ImportStage,
}

impl ImportState {
    pub fn new(status: ImportStatus, stage: ImportStage) -> Self {
        Self { status, stage }
    }

    /// Returns true if moving from `self` to `next` is a forward step
    ///
    /// Terminal states never advance. Otherwise the status may not move back
    /// and, within the same status, the stage must move forward.
    pub fn can_advance_to(self, next: ImportState) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        match self.status.rank().cmp(&next.status.rank()) {
            std::cmp::Ordering::Less => next.stage >= self.stage,
            std::cmp::Ordering::Equal => next.stage > self.stage,
            std::cmp::Ordering::Greater => false,
        }
    }
}

impl fmt::Display for ImportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.status, self.stage)
    }
}

/// Per-type counts of produced resources
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceCounts(BTreeMap<String, usize>);

impl ResourceCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the count for a resource type
    pub fn increment(&mut self, resource_type: &ResourceType) {
        *self.0.entry(resource_type.to_string()).or_insert(0) += 1;
    }

    pub fn get(&self, resource_type: &str) -> usize {
        self.0.get(resource_type).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &usize)> {
        self.0.iter()
    }
}

/// Caller-supplied metadata describing an imported document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportMetadata {
    /// System the document came from
    pub source_system: Option<String>,

    /// Document subtype hint (e.g. `DischargeSummary`, `ORU_R01`)
    pub document_subtype: Option<String>,

    /// Date the document was received
    pub received_date: Option<NaiveDate>,
}

/// Working set held while an import waits for a patient decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkedImport {
    /// Transformed generation B resources awaiting recording
    pub resources: Vec<ClinicalResource>,

    /// Rule versions applied while transforming
    pub rule_versions: Vec<String>,

    /// Demographics the match was attempted with
    pub demographics: Demographics,
}

/// Why an import ended in `failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Payload rejected before conversion
    Validation,
    /// Converter rejected the document or answered with garbage
    Conversion,
    /// Converter or store could not be reached in time
    Unreachable,
    /// Store rejected the write
    Storage,
    /// Every resource failed to transform
    NoResources,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Validation => "validation",
            FailureKind::Conversion => "conversion",
            FailureKind::Unreachable => "unreachable",
            FailureKind::Storage => "storage",
            FailureKind::NoResources => "no_resources",
        };
        write!(f, "{s}")
    }
}

/// Import job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: JobId,
    pub status: ImportStatus,
    pub stage: ImportStage,

    /// Resolved patient, empty until matched or supplied
    pub patient_id: Option<PatientId>,
    pub organization_id: OrganizationId,
    pub format: InputFormat,
    pub metadata: ImportMetadata,

    /// Produced resources per type
    pub counts: ResourceCounts,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub provenance_id: Option<ProvenanceId>,
    pub source_document_id: Option<DocumentId>,

    /// Match result the job is parked on
    pub pending_match: Option<PatientMatchResult>,

    /// Resources passed through without a registered transform
    pub unconverted_ids: Vec<ResourceId>,

    /// Ids written to the clinical store
    pub stored_ids: Vec<ResourceId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parked: Option<ParkedImport>,

    /// Set when the job ended in `failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportJob {
    /// Creates a queued import job
    pub fn new(
        organization_id: OrganizationId,
        format: InputFormat,
        patient_id: Option<PatientId>,
        metadata: ImportMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::generate(),
            status: ImportStatus::Queued,
            stage: ImportStage::Queued,
            patient_id,
            organization_id,
            format,
            metadata,
            counts: ResourceCounts::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            provenance_id: None,
            source_document_id: None,
            pending_match: None,
            unconverted_ids: Vec::new(),
            stored_ids: Vec::new(),
            parked: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> ImportState {
        ImportState::new(self.status, self.stage)
    }

    /// Returns true while the job waits for a patient decision
    pub fn is_parked(&self) -> bool {
        self.status == ImportStatus::Processing && self.stage == ImportStage::Matching
    }
}

/// Export job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl ExportStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExportStatus::Completed | ExportStatus::Failed)
    }

    /// Returns true if moving to `next` is a forward step
    pub fn can_advance_to(self, next: ExportStatus) -> bool {
        match self {
            ExportStatus::Queued => next != ExportStatus::Queued,
            ExportStatus::Processing => next.is_terminal(),
            ExportStatus::Completed | ExportStatus::Failed => false,
        }
    }
}

impl fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExportStatus::Queued => "queued",
            ExportStatus::Processing => "processing",
            ExportStatus::Completed => "completed",
            ExportStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Who an export covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum ExportScope {
    /// A single patient
    Patient(PatientId),
    /// Every patient of an organization (bulk)
    Organization(OrganizationId),
}

/// Inclusive date range filter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    /// Checks that the range is not inverted
    pub fn validate(&self) -> Result<(), String> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if start > end => Err(format!(
                "date range start {start} is after end {end}"
            )),
            _ => Ok(()),
        }
    }

    /// Returns true if `date` falls inside the range, bounds included
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Outcome of one patient's sub-export within a bulk export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientOutcome {
    pub patient_id: PatientId,
    pub succeeded: bool,
    pub resource_count: usize,
    pub error: Option<String>,
}

/// Export job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportJob {
    pub id: JobId,
    pub status: ExportStatus,
    pub format: ExportFormat,
    pub scope: ExportScope,

    /// Requested types, empty means all
    pub resource_types: BTreeSet<ResourceType>,
    pub date_range: Option<DateRange>,
    pub purpose: Option<String>,

    pub resource_count: usize,
    pub deliverable_size: u64,
    pub location: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,

    /// SHA-256 of the deliverable bytes
    pub checksum: Option<String>,

    /// Per-patient results, filled for bulk exports
    pub patient_outcomes: Vec<PatientOutcome>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExportJob {
    /// Creates a queued export job
    pub fn new(
        scope: ExportScope,
        format: ExportFormat,
        resource_types: BTreeSet<ResourceType>,
        date_range: Option<DateRange>,
        purpose: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::generate(),
            status: ExportStatus::Queued,
            format,
            scope,
            resource_types,
            date_range,
            purpose,
            resource_count: 0,
            deliverable_size: 0,
            location: None,
            expires_at: None,
            checksum: None,
            patient_outcomes: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Number of successful per-patient sub-exports
    pub fn succeeded_patients(&self) -> usize {
        self.patient_outcomes.iter().filter(|o| o.succeeded).count()
    }

    /// Number of failed per-patient sub-exports
    pub fn failed_patients(&self) -> usize {
        self.patient_outcomes.iter().filter(|o| !o.succeeded).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn state(status: ImportStatus, stage: ImportStage) -> ImportState {
        ImportState::new(status, stage)
    }

    #[test]
    fn test_import_state_moves_forward() {
        let queued = state(ImportStatus::Queued, ImportStage::Validating);
        let converting = state(ImportStatus::Processing, ImportStage::Converting);
        assert!(queued.can_advance_to(converting));
        assert!(!converting.can_advance_to(queued));
    }

    #[test]
    fn test_import_state_rejects_same_state() {
        let matching = state(ImportStatus::Processing, ImportStage::Matching);
        assert!(!matching.can_advance_to(matching));
    }

    #[test]
    fn test_terminal_import_state_is_final() {
        let done = state(ImportStatus::Completed, ImportStage::Finished);
        assert!(!done.can_advance_to(state(ImportStatus::Failed, ImportStage::Finished)));
    }

    #[test]
    fn test_validation_failure_goes_straight_to_failed() {
        let validating = state(ImportStatus::Queued, ImportStage::Validating);
        assert!(validating.can_advance_to(state(ImportStatus::Failed, ImportStage::Finished)));
    }

    #[test_case(ExportStatus::Queued, ExportStatus::Processing, true)]
    #[test_case(ExportStatus::Queued, ExportStatus::Failed, true)]
    #[test_case(ExportStatus::Processing, ExportStatus::Completed, true)]
    #[test_case(ExportStatus::Processing, ExportStatus::Queued, false)]
    #[test_case(ExportStatus::Completed, ExportStatus::Failed, false)]
    fn test_export_status_transitions(from: ExportStatus, to: ExportStatus, allowed: bool) {
        assert_eq!(from.can_advance_to(to), allowed);
    }

    #[test]
    fn test_date_range_inclusive() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1),
            NaiveDate::from_ymd_opt(2024, 1, 31),
        );
        assert!(range.contains(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()));
        assert!(range.contains(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()));
        assert!(!range.contains(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()));
    }

    #[test]
    fn test_inverted_date_range_is_invalid() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 2, 1),
            NaiveDate::from_ymd_opt(2024, 1, 1),
        );
        assert!(range.validate().is_err());
    }

    #[test]
    fn test_resource_counts() {
        let mut counts = ResourceCounts::new();
        counts.increment(&ResourceType::Condition);
        counts.increment(&ResourceType::Condition);
        counts.increment(&ResourceType::MedicationUsage);
        assert_eq!(counts.get("Condition"), 2);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("CCDA".parse::<InputFormat>().unwrap(), InputFormat::Ccda);
        assert!("pdf".parse::<InputFormat>().is_err());
        assert_eq!(
            "ndjson".parse::<ExportFormat>().unwrap().target_generation(),
            Generation::B
        );
        assert_eq!(
            serde_json::to_string(&InputFormat::FhirR4).unwrap(),
            "\"fhir-r4\""
        );
    }
}
