//! Enumerated code tables used by transform rules
//!
//! A table is an ordered list of `(generation A code, generation B code)`
//! pairs. Lookups take the first matching pair, so when several A codes map
//! to one B code the first pair listed decides the reverse direction.

/// Ordered code table between generations
#[derive(Debug)]
pub struct Vocabulary {
    /// Name used in logs and tests
    pub name: &'static str,
    /// Code system the codes belong to, when they appear inside codings
    pub system: Option<&'static str>,
    pub pairs: &'static [(&'static str, &'static str)],
}

impl Vocabulary {
    /// Maps a generation A code to generation B
    pub fn forward(&self, code: &str) -> Option<&'static str> {
        self.pairs.iter().find(|(a, _)| *a == code).map(|(_, b)| *b)
    }

    /// Maps a generation B code to generation A
    pub fn backward(&self, code: &str) -> Option<&'static str> {
        self.pairs.iter().find(|(_, b)| *b == code).map(|(a, _)| *a)
    }

    /// Maps a code in the given direction
    pub fn lookup(&self, code: &str, reversed: bool) -> Option<&'static str> {
        if reversed {
            self.backward(code)
        } else {
            self.forward(code)
        }
    }

    /// Codes whose round trip A -> B -> A does not return the same code
    pub fn lossy_codes(&self) -> Vec<&'static str> {
        self.pairs
            .iter()
            .filter(|(a, b)| self.backward(b) != Some(*a))
            .map(|(a, _)| *a)
            .collect()
    }
}

pub static PATIENT_GENDER: Vocabulary = Vocabulary {
    name: "administrative-gender",
    system: None,
    pairs: &[
        ("male", "male"),
        ("female", "female"),
        ("other", "other"),
        ("unknown", "unknown"),
    ],
};

pub static PATIENT_LINK_TYPE: Vocabulary = Vocabulary {
    name: "link-type",
    system: None,
    pairs: &[
        ("replaced-by", "replaced-by"),
        ("replaces", "replaces"),
        ("refer", "refer"),
        ("seealso", "seealso"),
    ],
};

pub static CONDITION_CLINICAL_STATUS: Vocabulary = Vocabulary {
    name: "condition-clinical",
    system: Some("http://terminology.hl7.org/CodeSystem/condition-clinical"),
    pairs: &[
        ("active", "active"),
        ("recurrence", "recurrence"),
        ("relapse", "relapse"),
        ("inactive", "inactive"),
        ("remission", "remission"),
        ("resolved", "resolved"),
    ],
};

pub static CONDITION_VERIFICATION_STATUS: Vocabulary = Vocabulary {
    name: "condition-ver-status",
    system: Some("http://terminology.hl7.org/CodeSystem/condition-ver-status"),
    pairs: &[
        ("unconfirmed", "unconfirmed"),
        ("provisional", "provisional"),
        ("differential", "differential"),
        ("confirmed", "confirmed"),
        ("refuted", "refuted"),
        ("entered-in-error", "entered-in-error"),
    ],
};

pub static ALLERGY_CLINICAL_STATUS: Vocabulary = Vocabulary {
    name: "allergyintolerance-clinical",
    system: Some("http://terminology.hl7.org/CodeSystem/allergyintolerance-clinical"),
    pairs: &[
        ("active", "active"),
        ("inactive", "inactive"),
        ("resolved", "resolved"),
    ],
};

pub static ALLERGY_VERIFICATION_STATUS: Vocabulary = Vocabulary {
    name: "allergyintolerance-verification",
    system: Some("http://terminology.hl7.org/CodeSystem/allergyintolerance-verification"),
    pairs: &[
        ("unconfirmed", "unconfirmed"),
        ("presumed", "presumed"),
        ("confirmed", "confirmed"),
        ("refuted", "refuted"),
        ("entered-in-error", "entered-in-error"),
    ],
};

pub static ALLERGY_CRITICALITY: Vocabulary = Vocabulary {
    name: "allergy-intolerance-criticality",
    system: None,
    pairs: &[
        ("low", "low"),
        ("high", "high"),
        ("unable-to-assess", "unable-to-assess"),
    ],
};

/// Encounter status
///
/// Lossy: `arrived` and `triaged` both become `in-progress`, which maps back
/// to `in-progress`. Generation B `discharged` and `discontinued` have no
/// generation A equivalent.
pub static ENCOUNTER_STATUS: Vocabulary = Vocabulary {
    name: "encounter-status",
    system: None,
    pairs: &[
        ("planned", "planned"),
        ("in-progress", "in-progress"),
        ("arrived", "in-progress"),
        ("triaged", "in-progress"),
        ("onleave", "on-hold"),
        ("finished", "completed"),
        ("cancelled", "cancelled"),
        ("entered-in-error", "entered-in-error"),
        ("unknown", "unknown"),
    ],
};

pub static IMMUNIZATION_STATUS: Vocabulary = Vocabulary {
    name: "immunization-status",
    system: None,
    pairs: &[
        ("completed", "completed"),
        ("entered-in-error", "entered-in-error"),
        ("not-done", "not-done"),
    ],
};

/// Observation status
///
/// Generation B adds `specimen-in-process`, `appended` and
/// `cannot-be-obtained`, none of which exist in generation A.
pub static OBSERVATION_STATUS: Vocabulary = Vocabulary {
    name: "observation-status",
    system: None,
    pairs: &[
        ("registered", "registered"),
        ("preliminary", "preliminary"),
        ("final", "final"),
        ("amended", "amended"),
        ("corrected", "corrected"),
        ("cancelled", "cancelled"),
        ("entered-in-error", "entered-in-error"),
        ("unknown", "unknown"),
    ],
};

/// Medication statement status to medication usage adherence
///
/// Generation A folds adherence into `status`; generation B records the fact
/// as `recorded` and moves the adherence into its own element. The A codes
/// here all map to status `recorded`.
pub static MEDICATION_ADHERENCE: Vocabulary = Vocabulary {
    name: "medication-statement-adherence",
    system: Some("http://hl7.org/fhir/CodeSystem/medication-statement-adherence"),
    pairs: &[
        ("active", "taking"),
        ("completed", "taken"),
        ("stopped", "stopped"),
        ("on-hold", "on-hold"),
        ("not-taken", "not-taking"),
        ("unknown", "unknown"),
    ],
};

/// Medication statement status codes that keep a status of their own
pub static MEDICATION_STATUS: Vocabulary = Vocabulary {
    name: "medication-usage-status",
    system: None,
    pairs: &[
        ("intended", "draft"),
        ("entered-in-error", "entered-in-error"),
    ],
};

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("active", "taking")]
    #[test_case("completed", "taken")]
    #[test_case("not-taken", "not-taking")]
    #[test_case("on-hold", "on-hold")]
    fn test_medication_adherence_round_trip(a: &str, b: &str) {
        assert_eq!(MEDICATION_ADHERENCE.forward(a), Some(b));
        assert_eq!(MEDICATION_ADHERENCE.backward(b), Some(a));
    }

    #[test_case("finished", Some("completed"))]
    #[test_case("onleave", Some("on-hold"))]
    #[test_case("triaged", Some("in-progress"))]
    #[test_case("bogus", None)]
    fn test_encounter_status_forward(a: &str, expected: Option<&str>) {
        assert_eq!(ENCOUNTER_STATUS.forward(a), expected);
    }

    #[test]
    fn test_encounter_lossy_codes_are_enumerated() {
        assert_eq!(ENCOUNTER_STATUS.lossy_codes(), vec!["arrived", "triaged"]);
    }

    #[test]
    fn test_identity_tables_are_lossless() {
        for table in [
            &PATIENT_GENDER,
            &CONDITION_CLINICAL_STATUS,
            &CONDITION_VERIFICATION_STATUS,
            &OBSERVATION_STATUS,
            &MEDICATION_ADHERENCE,
            &MEDICATION_STATUS,
        ] {
            assert!(table.lossy_codes().is_empty(), "{} is lossy", table.name);
        }
    }

    #[test]
    fn test_b_only_codes_have_no_backward_entry() {
        assert_eq!(OBSERVATION_STATUS.backward("cannot-be-obtained"), None);
        assert_eq!(ENCOUNTER_STATUS.backward("discharged"), None);
    }
}
