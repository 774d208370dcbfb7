//! Domain identifier types with validation
//!
//! Newtype wrappers for the identifiers that flow through import and export
//! jobs. Each type keeps the different id spaces apart at compile time and
//! validates its format on construction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Maximum length of a resource logical id
const MAX_RESOURCE_ID_LEN: usize = 64;

/// Declares a string-backed identifier that only rejects blank input.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, rejecting blank input
            pub fn new(id: impl Into<String>) -> Result<Self, String> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(concat!($label, " cannot be empty").to_string());
                }
                Ok(Self(id))
            }

            /// Returns the identifier as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes self and returns the inner String
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

/// Declares a UUID-backed identifier that can be freshly generated.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a new random identifier
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|e| format!("Invalid {}: {e}", stringify!($name)))
            }
        }
    };
}

string_id!(
    /// Identifier of a patient in the clinical store
    ///
    /// # Examples
    ///
    /// ```
    /// use meridian::domain::ids::PatientId;
    /// use std::str::FromStr;
    ///
    /// let patient_id = PatientId::from_str("pat-001").unwrap();
    /// assert_eq!(patient_id.as_str(), "pat-001");
    /// ```
    PatientId,
    "Patient ID"
);

string_id!(
    /// Identifier of the organization that owns an import or export
    OrganizationId,
    "Organization ID"
);

uuid_id!(
    /// Identifier of an import or export job
    JobId
);

uuid_id!(
    /// Identifier of a provenance record
    ProvenanceId
);

/// Logical id of a clinical resource
///
/// Follows the FHIR id rules: 1-64 characters drawn from letters, digits,
/// `-` and `.`.
///
/// # Examples
///
/// ```
/// use meridian::domain::ids::ResourceId;
///
/// let id = ResourceId::new("cond-1").unwrap();
/// assert_eq!(id.as_str(), "cond-1");
/// assert!(ResourceId::new("has space").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Creates a new ResourceId, validating the FHIR id character set
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if id.is_empty() {
            return Err("Resource ID cannot be empty".to_string());
        }
        if id.len() > MAX_RESOURCE_ID_LEN {
            return Err(format!(
                "Resource ID exceeds {MAX_RESOURCE_ID_LEN} characters"
            ));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        {
            return Err(format!("Resource ID contains invalid characters: {id}"));
        }
        Ok(Self(id))
    }

    /// Derives a child id, used when one source resource expands into several
    ///
    /// The suffix is appended with a `-` separator and the result truncated
    /// from the front of the parent so the suffix always survives.
    pub fn derive(&self, suffix: &str) -> Self {
        let suffix: String = suffix
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '.')
            .collect();
        let budget = MAX_RESOURCE_ID_LEN.saturating_sub(suffix.len() + 1);
        let parent: String = self.0.chars().take(budget).collect();
        Self(format!("{parent}-{suffix}"))
    }

    /// Returns the resource ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes self and returns the inner String
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ResourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Content-addressed identifier of an imported source document
///
/// The value is the hex-encoded SHA-256 digest of the raw payload, so the
/// same document always maps to the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Creates a DocumentId from a 64 character hex digest
    pub fn new(digest: impl Into<String>) -> Result<Self, String> {
        let digest = digest.into();
        if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err("Document ID must be a 64 character hex digest".to_string());
        }
        Ok(Self(digest.to_ascii_lowercase()))
    }

    /// Derives the id of a raw payload
    pub fn from_payload(payload: &[u8]) -> Self {
        Self(super::deliverable::sha256_hex(payload))
    }

    /// Returns the document ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patient_id_rejects_blank() {
        assert!(PatientId::new("   ").is_err());
        assert_eq!(PatientId::new("p-1").unwrap().to_string(), "p-1");
    }

    #[test]
    fn test_resource_id_validation() {
        assert!(ResourceId::new("abc-123.v2").is_ok());
        assert!(ResourceId::new("").is_err());
        assert!(ResourceId::new("a/b").is_err());
        assert!(ResourceId::new("x".repeat(65)).is_err());
    }

    #[test]
    fn test_resource_id_derive_keeps_suffix() {
        let long = ResourceId::new("a".repeat(64)).unwrap();
        let derived = long.derive("timing-0");
        assert!(derived.as_str().ends_with("-timing-0"));
        assert!(derived.as_str().len() <= 64);
        assert!(ResourceId::new(derived.as_str()).is_ok());
    }

    #[test]
    fn test_job_id_round_trip_through_string() {
        let id = JobId::generate();
        let parsed = JobId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(JobId::from_str("not-a-uuid").is_err());
    }

    #[test]
    fn test_document_id_validation() {
        let digest = "A".repeat(64);
        let id = DocumentId::new(digest).unwrap();
        assert_eq!(id.as_str(), "a".repeat(64));
        assert!(DocumentId::new("abc").is_err());
    }

    #[test]
    fn test_id_serializes_transparently() {
        let id = PatientId::new("p-9").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"p-9\"");
    }

    #[test]
    fn test_document_id_is_content_addressed() {
        let a = DocumentId::from_payload(b"<ClinicalDocument/>");
        let b = DocumentId::from_payload(b"<ClinicalDocument/>");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_ne!(a, DocumentId::from_payload(b"MSH|"));
    }
}
