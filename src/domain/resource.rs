//! Clinical resource domain model
//!
//! A [`ClinicalResource`] is one typed clinical fact in either schema
//! generation. Its content is an ordered map of field name to [`FieldValue`],
//! a semantically typed value model that the transform rules operate on.

use super::ids::ResourceId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Field names consulted for a resource's effective date, in precedence order
///
/// Dotted names address the `start` of a period-valued field.
pub const EFFECTIVE_DATE_FIELDS: &[&str] = &[
    "effectiveDateTime",
    "effectivePeriod.start",
    "onsetDateTime",
    "occurrenceDateTime",
    "actualPeriod.start",
    "period.start",
    "recordedDate",
    "date",
];

/// Schema generation of a clinical resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Generation {
    /// Older, interop-oriented generation (FHIR R4 shape)
    A,
    /// Newer, internal canonical generation (FHIR R5 shape)
    B,
}

impl Generation {
    /// Returns the other generation
    pub fn opposite(self) -> Self {
        match self {
            Generation::A => Generation::B,
            Generation::B => Generation::A,
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Generation::A => write!(f, "A"),
            Generation::B => write!(f, "B"),
        }
    }
}

impl FromStr for Generation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "a" | "r4" => Ok(Generation::A),
            "b" | "r5" => Ok(Generation::B),
            _ => Err(format!("Invalid generation '{s}'. Must be one of: A, B, r4, r5")),
        }
    }
}

/// Resource type tag
///
/// Known types get their own variant; anything else is carried as
/// [`ResourceType::Other`] so unknown resources are never rejected at decode
/// time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    Patient,
    /// Clinical document header produced by document conversion
    Composition,
    Organization,
    Encounter,
    Condition,
    AllergyIntolerance,
    /// Generation A medication usage fact
    MedicationStatement,
    /// Generation B medication usage fact
    MedicationUsage,
    /// Generation B timing fact split out of a medication dosage
    MedicationTiming,
    Immunization,
    Observation,
    Procedure,
    DiagnosticReport,
    DocumentReference,
    Other(String),
}

impl ResourceType {
    /// Canonical ordering used when packaging resources for delivery
    ///
    /// Patient demographics come first. Types outside the list sort after
    /// every listed type.
    pub const CANONICAL_ORDER: &'static [ResourceType] = &[
        ResourceType::Patient,
        ResourceType::Composition,
        ResourceType::Encounter,
        ResourceType::Condition,
        ResourceType::AllergyIntolerance,
        ResourceType::MedicationStatement,
        ResourceType::MedicationUsage,
        ResourceType::MedicationTiming,
        ResourceType::Immunization,
        ResourceType::Observation,
        ResourceType::Procedure,
        ResourceType::DiagnosticReport,
        ResourceType::DocumentReference,
        ResourceType::Organization,
    ];

    /// Returns the wire name of the type
    pub fn as_str(&self) -> &str {
        match self {
            ResourceType::Patient => "Patient",
            ResourceType::Composition => "Composition",
            ResourceType::Organization => "Organization",
            ResourceType::Encounter => "Encounter",
            ResourceType::Condition => "Condition",
            ResourceType::AllergyIntolerance => "AllergyIntolerance",
            ResourceType::MedicationStatement => "MedicationStatement",
            ResourceType::MedicationUsage => "MedicationUsage",
            ResourceType::MedicationTiming => "MedicationTiming",
            ResourceType::Immunization => "Immunization",
            ResourceType::Observation => "Observation",
            ResourceType::Procedure => "Procedure",
            ResourceType::DiagnosticReport => "DiagnosticReport",
            ResourceType::DocumentReference => "DocumentReference",
            ResourceType::Other(name) => name,
        }
    }

    /// Position of the type in [`Self::CANONICAL_ORDER`]
    pub fn canonical_rank(&self) -> usize {
        Self::CANONICAL_ORDER
            .iter()
            .position(|t| t == self)
            .unwrap_or(Self::CANONICAL_ORDER.len())
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("Resource type cannot be empty".to_string());
        }
        let known = Self::CANONICAL_ORDER.iter().find(|t| t.as_str() == s);
        Ok(known
            .cloned()
            .unwrap_or_else(|| ResourceType::Other(s.to_string())))
    }
}

impl Serialize for ResourceType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ResourceType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A code drawn from a terminology system
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coding {
    pub system: Option<String>,
    pub version: Option<String>,
    pub code: Option<String>,
    pub display: Option<String>,
}

impl Coding {
    /// Creates a coding with a system and code
    pub fn new(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            code: Some(code.into()),
            ..Self::default()
        }
    }
}

/// A concept expressed as zero or more codings plus optional text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    pub codings: Vec<Coding>,
    pub text: Option<String>,
}

impl Concept {
    /// Creates a concept from a single coding
    pub fn from_coding(coding: Coding) -> Self {
        Self {
            codings: vec![coding],
            text: None,
        }
    }

    /// Creates a text-only concept
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            codings: Vec::new(),
            text: Some(text.into()),
        }
    }
}

/// A reference to another resource, usually `Type/id`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub reference: Option<String>,
    #[serde(rename = "type")]
    pub target_type: Option<String>,
    pub display: Option<String>,
}

impl Reference {
    /// Creates a literal reference
    pub fn to(reference: impl Into<String>) -> Self {
        Self {
            reference: Some(reference.into()),
            ..Self::default()
        }
    }

    /// Returns the id part of a `Type/id` reference
    pub fn target_id(&self) -> Option<&str> {
        self.reference
            .as_deref()
            .and_then(|r| r.rsplit_once('/').map(|(_, id)| id))
    }
}

/// A time interval with optional bounds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: Option<String>,
    pub end: Option<String>,
}

/// A measured amount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: serde_json::Number,
    pub comparator: Option<String>,
    pub unit: Option<String>,
    pub system: Option<String>,
    pub code: Option<String>,
}

/// Semantically typed field value
///
/// Elements the codec cannot classify are carried as
/// [`FieldValue::Structure`] and survive every transform untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Code(String),
    Coding(Coding),
    Concept(Concept),
    Reference(Reference),
    CodeableReference {
        concept: Option<Concept>,
        reference: Option<Reference>,
    },
    Period(Period),
    Quantity(Quantity),
    Date(String),
    DateTime(String),
    Text(String),
    Integer(i64),
    Decimal(serde_json::Number),
    Boolean(bool),
    List(Vec<FieldValue>),
    Structure(serde_json::Map<String, serde_json::Value>),
    /// Placeholder inside a list, keeping positions aligned with `_field` siblings
    Null,
}

impl FieldValue {
    /// Short name of the variant, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Code(_) => "code",
            FieldValue::Coding(_) => "coding",
            FieldValue::Concept(_) => "concept",
            FieldValue::Reference(_) => "reference",
            FieldValue::CodeableReference { .. } => "codeable_reference",
            FieldValue::Period(_) => "period",
            FieldValue::Quantity(_) => "quantity",
            FieldValue::Date(_) => "date",
            FieldValue::DateTime(_) => "date_time",
            FieldValue::Text(_) => "text",
            FieldValue::Integer(_) => "integer",
            FieldValue::Decimal(_) => "decimal",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::List(_) => "list",
            FieldValue::Structure(_) => "structure",
            FieldValue::Null => "null",
        }
    }

    /// Returns the token of a code value
    pub fn as_code(&self) -> Option<&str> {
        match self {
            FieldValue::Code(code) => Some(code),
            _ => None,
        }
    }

    /// Returns any string-like primitive
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Code(s)
            | FieldValue::Text(s)
            | FieldValue::Date(s)
            | FieldValue::DateTime(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            FieldValue::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_concept(&self) -> Option<&Concept> {
        match self {
            FieldValue::Concept(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Calendar date at which the value starts, if it is date-like
    ///
    /// Partial dates resolve to their first day (`2021` is 2021-01-01).
    pub fn start_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(s) | FieldValue::DateTime(s) => parse_partial_date(s),
            FieldValue::Period(p) => p.start.as_deref().and_then(parse_partial_date),
            _ => None,
        }
    }
}

/// Parses the date portion of a FHIR date or dateTime string
pub fn parse_partial_date(value: &str) -> Option<NaiveDate> {
    let date_part = value.get(..10).unwrap_or(value);
    match date_part.len() {
        4 => NaiveDate::parse_from_str(&format!("{date_part}-01-01"), "%Y-%m-%d").ok(),
        7 => NaiveDate::parse_from_str(&format!("{date_part}-01"), "%Y-%m-%d").ok(),
        10 => NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok(),
        _ => None,
    }
}

/// A typed, versioned clinical fact
///
/// # Examples
///
/// ```
/// use meridian::domain::resource::{ClinicalResource, FieldValue, Generation, ResourceType};
///
/// let condition = ClinicalResource::builder()
///     .id("cond-1")
///     .unwrap()
///     .resource_type(ResourceType::Condition)
///     .generation(Generation::A)
///     .field("recordedDate", FieldValue::Date("2024-03-01".to_string()))
///     .build()
///     .unwrap();
///
/// assert_eq!(condition.id.as_str(), "cond-1");
/// assert!(condition.effective_date().is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClinicalResource {
    /// Logical id of the resource
    pub id: ResourceId,

    /// Resource type tag
    pub resource_type: ResourceType,

    /// Schema generation the fields conform to
    pub generation: Generation,

    /// Content fields, ordered by name
    pub fields: BTreeMap<String, FieldValue>,

    /// Resource this one was derived from by a transformation
    pub source_id: Option<ResourceId>,

    /// Last-updated timestamp of the resource
    pub created_at: Option<DateTime<Utc>>,
}

impl ClinicalResource {
    /// Creates a new builder for constructing a ClinicalResource
    pub fn builder() -> ClinicalResourceBuilder {
        ClinicalResourceBuilder::default()
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Reference to the patient the resource is about
    ///
    /// Looks at `subject` first, then `patient`. A list-valued subject yields
    /// its first reference.
    pub fn subject_reference(&self) -> Option<&Reference> {
        ["subject", "patient"]
            .iter()
            .filter_map(|name| self.fields.get(*name))
            .find_map(|value| match value {
                FieldValue::Reference(r) => Some(r),
                FieldValue::List(items) => items.iter().find_map(FieldValue::as_reference),
                _ => None,
            })
    }

    /// Effective date of the resource, following [`EFFECTIVE_DATE_FIELDS`]
    pub fn effective_date(&self) -> Option<NaiveDate> {
        EFFECTIVE_DATE_FIELDS.iter().find_map(|name| {
            let value = match name.split_once('.') {
                Some((field, "start")) => match self.fields.get(field)? {
                    FieldValue::Period(p) => {
                        return p.start.as_deref().and_then(parse_partial_date)
                    }
                    FieldValue::Structure(map) => {
                        return map
                            .get("start")
                            .and_then(|v| v.as_str())
                            .and_then(parse_partial_date)
                    }
                    _ => return None,
                },
                _ => self.fields.get(*name)?,
            };
            value.start_date()
        })
    }
}

/// Builder for constructing ClinicalResource instances
#[derive(Debug, Default)]
pub struct ClinicalResourceBuilder {
    id: Option<ResourceId>,
    resource_type: Option<ResourceType>,
    generation: Option<Generation>,
    fields: BTreeMap<String, FieldValue>,
    source_id: Option<ResourceId>,
    created_at: Option<DateTime<Utc>>,
}

impl ClinicalResourceBuilder {
    /// Creates a new ClinicalResourceBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the resource id, validating its format
    pub fn id(mut self, id: impl Into<String>) -> Result<Self, String> {
        self.id = Some(ResourceId::new(id)?);
        Ok(self)
    }

    pub fn resource_id(mut self, id: ResourceId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = Some(resource_type);
        self
    }

    pub fn generation(mut self, generation: Generation) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Adds or replaces a field
    pub fn field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn source_id(mut self, source_id: ResourceId) -> Self {
        self.source_id = Some(source_id);
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Builds the ClinicalResource
    ///
    /// # Errors
    ///
    /// Returns an error if id, resource type or generation is missing
    pub fn build(self) -> Result<ClinicalResource, String> {
        Ok(ClinicalResource {
            id: self.id.ok_or("id is required")?,
            resource_type: self.resource_type.ok_or("resource_type is required")?,
            generation: self.generation.ok_or("generation is required")?,
            fields: self.fields,
            source_id: self.source_id,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(fields: Vec<(&str, FieldValue)>) -> ClinicalResource {
        let mut builder = ClinicalResource::builder()
            .id("r-1")
            .unwrap()
            .resource_type(ResourceType::Observation)
            .generation(Generation::B);
        for (name, value) in fields {
            builder = builder.field(name, value);
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_builder_missing_field() {
        let result = ClinicalResource::builder().id("x").unwrap().build();
        assert!(result.unwrap_err().contains("resource_type is required"));
    }

    #[test]
    fn test_resource_type_parsing() {
        assert_eq!(
            "Condition".parse::<ResourceType>().unwrap(),
            ResourceType::Condition
        );
        assert_eq!(
            "CarePlan".parse::<ResourceType>().unwrap(),
            ResourceType::Other("CarePlan".to_string())
        );
        assert!("".parse::<ResourceType>().is_err());
    }

    #[test]
    fn test_canonical_rank_puts_patient_first_and_unknown_last() {
        assert_eq!(ResourceType::Patient.canonical_rank(), 0);
        assert!(
            ResourceType::Other("CarePlan".to_string()).canonical_rank()
                > ResourceType::Organization.canonical_rank()
        );
    }

    #[test]
    fn test_generation_parsing() {
        assert_eq!("r4".parse::<Generation>().unwrap(), Generation::A);
        assert_eq!("B".parse::<Generation>().unwrap(), Generation::B);
        assert!("r6".parse::<Generation>().is_err());
        assert_eq!(Generation::A.opposite(), Generation::B);
    }

    #[test]
    fn test_parse_partial_date() {
        assert_eq!(
            parse_partial_date("2021"),
            NaiveDate::from_ymd_opt(2021, 1, 1)
        );
        assert_eq!(
            parse_partial_date("2021-06"),
            NaiveDate::from_ymd_opt(2021, 6, 1)
        );
        assert_eq!(
            parse_partial_date("2021-06-15T10:00:00+02:00"),
            NaiveDate::from_ymd_opt(2021, 6, 15)
        );
        assert_eq!(parse_partial_date("June"), None);
    }

    #[test]
    fn test_effective_date_precedence() {
        let r = resource(vec![
            ("date", FieldValue::Date("2020-01-01".to_string())),
            (
                "effectivePeriod",
                FieldValue::Period(Period {
                    start: Some("2022-02-02".to_string()),
                    end: None,
                }),
            ),
        ]);
        assert_eq!(r.effective_date(), NaiveDate::from_ymd_opt(2022, 2, 2));
    }

    #[test]
    fn test_effective_date_absent() {
        let r = resource(vec![("status", FieldValue::Code("final".to_string()))]);
        assert_eq!(r.effective_date(), None);
    }

    #[test]
    fn test_subject_reference_from_list() {
        let r = resource(vec![(
            "subject",
            FieldValue::List(vec![FieldValue::Reference(Reference::to("Patient/p1"))]),
        )]);
        assert_eq!(r.subject_reference().and_then(Reference::target_id), Some("p1"));
    }
}
