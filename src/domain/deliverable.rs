//! Packaged export output

use super::job::ExportFormat;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Serialized export ready to be published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deliverable {
    pub format: ExportFormat,
    pub bytes: Vec<u8>,
    pub resource_count: usize,

    /// Lowercase hex SHA-256 of `bytes`
    pub checksum: String,
}

impl Deliverable {
    /// Wraps serialized bytes and computes their checksum
    pub fn new(format: ExportFormat, bytes: Vec<u8>, resource_count: usize) -> Self {
        let checksum = sha256_hex(&bytes);
        Self {
            format,
            bytes,
            resource_count,
            checksum,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }
}

/// Where a published deliverable can be fetched and until when
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedDeliverable {
    pub location: String,
    pub expires_at: DateTime<Utc>,
}

/// Lowercase hex SHA-256 digest
pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_of_known_input() {
        let deliverable = Deliverable::new(ExportFormat::Ndjson, b"abc".to_vec(), 0);
        assert_eq!(
            deliverable.checksum,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(deliverable.size(), 3);
        assert_eq!(deliverable.content_type(), "application/fhir+ndjson");
    }
}
