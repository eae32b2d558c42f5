use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Fixed-length face descriptor produced by the encoding engine.
pub type Embedding = Vec<f64>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub student_id: String,
    pub name: String,
    /// `None` until an enrollment photo has been captured.
    pub embedding: Option<Embedding>,
}

/// Serializes an embedding as little-endian f64 bytes for BLOB storage.
pub fn embedding_to_bytes(embedding: &[f64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 8);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub fn embedding_from_bytes(bytes: &[u8]) -> Result<Embedding> {
    if bytes.len() % 8 != 0 {
        bail!(
            "embedding blob length {} is not a multiple of 8",
            bytes.len()
        );
    }

    let mut embedding = Vec::with_capacity(bytes.len() / 8);
    for chunk in bytes.chunks_exact(8) {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        embedding.push(f64::from_le_bytes(raw));
    }
    Ok(embedding)
}
