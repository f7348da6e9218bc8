use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Cached entity payload sealed with a SHA-256 checksum.
///
/// The checksum is stored next to the serialized entity. A payload whose
/// checksum no longer matches, or that no longer decodes, is treated as a
/// cache miss and the entity is recomputed from the sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealedPayload {
    /// Serialized entity (JSON).
    pub data: String,
    /// SHA-256 of `data`, hex encoded.
    pub checksum: String,
}

impl SealedPayload {
    /// Serializes `value` and computes its checksum.
    pub fn seal<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let data = serde_json::to_string(value)?;
        Ok(Self::from_data(data))
    }

    pub fn from_data(data: String) -> Self {
        let checksum = Self::compute_checksum(&data);
        Self { data, checksum }
    }

    fn compute_checksum(data: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns true if the checksum matches the data.
    pub fn is_valid(&self) -> bool {
        Self::compute_checksum(&self.data) == self.checksum
    }

    /// Validates and decodes the payload. `None` if tampered or undecodable.
    pub fn open<T: DeserializeOwned>(&self) -> Option<T> {
        if !self.is_valid() {
            tracing::warn!("Cache checksum mismatch, discarding payload");
            return None;
        }

        match serde_json::from_str(&self.data) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Cached payload failed to decode: {}", e);
                None
            }
        }
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
