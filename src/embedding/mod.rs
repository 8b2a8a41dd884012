//! Embedding generation and vector math
//!
//! - `EmbeddingProvider` trait for abstraction over local and remote models
//! - `FastEmbedProvider` for local embedding (all-MiniLM-L6-v2, 384-dim)
//! - Cosine similarity and blob encoding used by the stores
mod provider;

pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};

/// Cosine similarity between two vectors
///
/// Returns 0.0 for mismatched lengths or zero-magnitude vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Map a raw cosine similarity into the [0, 1] range used for scoring
pub fn normalize_similarity(raw: f32) -> f32 {
    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Encode an embedding as little-endian f32 bytes
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode little-endian f32 bytes; trailing partial values are ignored
pub fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Whether a vector is usable for similarity search
pub fn is_valid_vector(vector: &[f32]) -> bool {
    !vector.is_empty() && vector.iter().all(|v| v.is_finite())
}
