//! Patient identity types used by matching

use super::ids::PatientId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Demographic identifiers extracted from an incoming record
///
/// `Debug` output is redacted so demographics never reach a log line.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Demographics {
    /// Medical record number
    pub mrn: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub postal_code: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl Demographics {
    /// Full name normalized for comparison, or `None` if no name part is known
    pub fn normalized_name(&self) -> Option<String> {
        let parts: Vec<String> = [&self.given_name, &self.family_name]
            .into_iter()
            .flatten()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }

    /// Returns true if any secondary identifier equals the other side's
    ///
    /// Postal codes compare without whitespace, phones by digits only and
    /// emails case-insensitively.
    pub fn shares_secondary_identifier(&self, other: &Demographics) -> bool {
        fn same(a: &Option<String>, b: &Option<String>, norm: fn(&str) -> String) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => {
                    let (a, b) = (norm(a), norm(b));
                    !a.is_empty() && a == b
                }
                _ => false,
            }
        }
        same(&self.postal_code, &other.postal_code, |s| {
            s.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_uppercase()
        }) || same(&self.phone, &other.phone, |s| {
            s.chars().filter(|c| c.is_ascii_digit()).collect()
        }) || same(&self.email, &other.email, |s| s.trim().to_lowercase())
    }

    pub fn has_secondary_identifier(&self) -> bool {
        self.postal_code.is_some() || self.phone.is_some() || self.email.is_some()
    }
}

impl fmt::Debug for Demographics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Demographics")
            .field("mrn", &self.mrn.as_ref().map(|_| "[REDACTED]"))
            .field("has_name", &self.normalized_name().is_some())
            .field("has_birth_date", &self.birth_date.is_some())
            .field("has_secondary", &self.has_secondary_identifier())
            .finish()
    }
}

/// A known patient with the demographics held for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub id: PatientId,
    pub demographics: Demographics,
}

/// Outcome of a patient match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched,
    Ambiguous,
    NoMatch,
}

impl fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchOutcome::Matched => write!(f, "matched"),
            MatchOutcome::Ambiguous => write!(f, "ambiguous"),
            MatchOutcome::NoMatch => write!(f, "no-match"),
        }
    }
}

/// A ranked match candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub patient_id: PatientId,
    pub score: f64,
}

/// Result of matching demographics against known patients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientMatchResult {
    pub outcome: MatchOutcome,

    /// Set only when the outcome is `Matched`
    pub patient_id: Option<PatientId>,

    /// Candidates ranked by score descending, then patient id
    pub candidates: Vec<MatchCandidate>,
}

impl PatientMatchResult {
    pub fn matched(patient_id: PatientId, candidates: Vec<MatchCandidate>) -> Self {
        Self {
            outcome: MatchOutcome::Matched,
            patient_id: Some(patient_id),
            candidates,
        }
    }

    pub fn ambiguous(candidates: Vec<MatchCandidate>) -> Self {
        Self {
            outcome: MatchOutcome::Ambiguous,
            patient_id: None,
            candidates,
        }
    }

    pub fn no_match() -> Self {
        Self {
            outcome: MatchOutcome::NoMatch,
            patient_id: None,
            candidates: Vec::new(),
        }
    }
}

/// Caller decision that releases a parked import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "patient_id")]
pub enum PatientResolution {
    /// Attach the import to an existing patient
    Existing(PatientId),
    /// Register the imported Patient resource as a new patient
    CreateNew,
}
