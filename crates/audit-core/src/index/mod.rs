//! Persistent, content-addressed chunk stores with hybrid search.
//!
//! One index per corpus. Cache validity is decided solely by the manifest's
//! content hash; rebuilds swap a freshly built state in atomically so
//! concurrent readers never observe a partial index.

pub mod email;
pub mod policy;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

pub use email::{EmailHit, EmailIndex};
pub use policy::PolicyIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorpusKind {
    Policy,
    Email,
}

impl CorpusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorpusKind::Policy => "policy",
            CorpusKind::Email => "email",
        }
    }
}

/// Smallest retrievable unit of indexed text.
///
/// Immutable once indexed; identity is `(corpus, sequence)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    /// Title of the originating section, kept for citation.
    pub section_title: String,
    pub corpus: CorpusKind,
    pub sequence: usize,
}

/// Persisted fingerprint deciding whether the cached index is still valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub corpus: CorpusKind,
    pub content_hash: String,
    pub chunk_count: usize,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f32,
}

/// Sha256 of the corpus file, hex-encoded.
pub fn content_hash(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("hashing corpus file {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

/// Ranks `vectors` against the query vector, best first, ties kept in
/// original order.
pub(crate) fn rank_by_cosine(query: &[f32], vectors: &[Vec<f32>], k: usize) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = vectors
        .iter()
        .enumerate()
        .map(|(i, v)| (i, cosine_similarity(query, v)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
}
