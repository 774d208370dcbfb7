//! Patient identity matching
//!
//! Incoming demographics are compared with the patients the index already
//! knows for the organization:
//!
//! 1. An exact medical record number match wins outright.
//! 2. Otherwise only candidates with the same birth date are scored. The
//!    score is `0.7 * name similarity + 0.3 * secondary identifier`, where name
//!    similarity is Jaro-Winkler over the normalized full names and the
//!    secondary term is 1 when postal code, phone or email agree.
//! 3. A single candidate at or above `match_threshold` that shares a secondary
//!    identifier is a match. Several such candidates, or any candidate at or
//!    above `review_threshold`, make the result ambiguous. Anything else is
//!    no-match.
//!
//! The matcher only reads from the index.

mod demographics;

pub use demographics::demographics_from_patient;

use crate::adapters::store::PatientIndex;
use crate::config::MatchingConfig;
use crate::domain::{
    Demographics, MatchCandidate, OrganizationId, PatientMatchResult, PatientRecord, Result,
};
use std::cmp::Ordering;
use std::sync::Arc;

const NAME_WEIGHT: f64 = 0.7;
const SECONDARY_WEIGHT: f64 = 0.3;

/// Resolves demographics to a known patient
#[derive(Clone)]
pub struct PatientMatcher {
    index: Arc<dyn PatientIndex + Send + Sync>,
    match_threshold: f64,
    review_threshold: f64,
}

impl PatientMatcher {
    pub fn new(index: Arc<dyn PatientIndex + Send + Sync>, config: &MatchingConfig) -> Self {
        Self {
            index,
            match_threshold: config.match_threshold,
            review_threshold: config.review_threshold,
        }
    }

    /// Match demographics against the patients of an organization
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the patient index cannot be read.
    pub async fn match_patient(
        &self,
        demographics: &Demographics,
        organization_id: &OrganizationId,
    ) -> Result<PatientMatchResult> {
        let records = self
            .index
            .find_candidates(organization_id, demographics)
            .await?;
        let result = self.evaluate(demographics, &records);

        tracing::info!(
            organization_id = %organization_id,
            outcome = %result.outcome,
            candidates = result.candidates.len(),
            "Patient match evaluated"
        );
        Ok(result)
    }

    /// Decide the match outcome for a set of candidate records
    pub fn evaluate(&self, incoming: &Demographics, records: &[PatientRecord]) -> PatientMatchResult {
        if let Some(mrn) = normalized_mrn(incoming) {
            let mut exact: Vec<MatchCandidate> = records
                .iter()
                .filter(|r| normalized_mrn(&r.demographics).as_deref() == Some(mrn.as_str()))
                .map(|r| MatchCandidate {
                    patient_id: r.id.clone(),
                    score: 1.0,
                })
                .collect();
            rank(&mut exact);
            match exact.len() {
                0 => {}
                1 => return PatientMatchResult::matched(exact[0].patient_id.clone(), exact),
                _ => return PatientMatchResult::ambiguous(exact),
            }
        }

        let mut scored: Vec<(MatchCandidate, bool)> = records
            .iter()
            .filter_map(|r| {
                score(incoming, &r.demographics).map(|score| {
                    let candidate = MatchCandidate {
                        patient_id: r.id.clone(),
                        score,
                    };
                    (candidate, incoming.shares_secondary_identifier(&r.demographics))
                })
            })
            .filter(|(c, _)| c.score >= self.review_threshold)
            .collect();
        scored.sort_by(|(a, _), (b, _)| compare(a, b));

        let confident: Vec<&MatchCandidate> = scored
            .iter()
            .filter(|(c, secondary)| *secondary && c.score >= self.match_threshold)
            .map(|(c, _)| c)
            .collect();
        let above_threshold = scored
            .iter()
            .filter(|(c, _)| c.score >= self.match_threshold)
            .count();

        let matched = match confident.as_slice() {
            [only] if above_threshold == 1 => Some(only.patient_id.clone()),
            _ => None,
        };
        let candidates: Vec<MatchCandidate> = scored.into_iter().map(|(c, _)| c).collect();

        match matched {
            Some(patient_id) => PatientMatchResult::matched(patient_id, candidates),
            None if candidates.is_empty() => PatientMatchResult::no_match(),
            None => PatientMatchResult::ambiguous(candidates),
        }
    }
}

fn normalized_mrn(demographics: &Demographics) -> Option<String> {
    demographics
        .mrn
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_uppercase)
}

/// Similarity of two demographic sets, or `None` when birth dates differ
///
/// A missing birth date on either side never matches.
pub fn score(incoming: &Demographics, known: &Demographics) -> Option<f64> {
    match (incoming.birth_date, known.birth_date) {
        (Some(a), Some(b)) if a == b => {}
        _ => return None,
    }
    let name = match (incoming.normalized_name(), known.normalized_name()) {
        (Some(a), Some(b)) => strsim::jaro_winkler(&a, &b),
        _ => 0.0,
    };
    let secondary = if incoming.shares_secondary_identifier(known) {
        1.0
    } else {
        0.0
    };
    Some((NAME_WEIGHT * name + SECONDARY_WEIGHT * secondary).clamp(0.0, 1.0))
}

fn compare(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.patient_id.cmp(&b.patient_id))
}

fn rank(candidates: &mut [MatchCandidate]) {
    candidates.sort_by(compare);
}
