//! Contracts for the language-model collaborators the core depends on.
//!
//! The core only ever talks to classification, embedding and narrative
//! generation through these traits; concrete clients live in the binary
//! crate (or in tests).

use crate::error::AuditError;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Query categories the router understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Policy,
    Email,
    Transaction,
    Fraud,
    General,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Policy => "policy",
            QueryType::Email => "email",
            QueryType::Transaction => "transaction",
            QueryType::Fraud => "fraud",
            QueryType::General => "general",
        }
    }
}

impl Default for QueryType {
    fn default() -> Self {
        QueryType::General
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier output: a category plus the entities mentioned in the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub query_type: QueryType,
    #[serde(default)]
    pub entities: Vec<String>,
}

impl Classification {
    /// The degraded result used whenever classification fails.
    pub fn general() -> Self {
        Self {
            query_type: QueryType::General,
            entities: Vec::new(),
        }
    }
}

/// Strict decoder for classifier output.
///
/// Either the whole payload parses as the expected schema or the caller gets
/// a `Classification` error; partially-matched text is never accepted.
pub fn decode_classification(raw: &str) -> Result<Classification, AuditError> {
    serde_json::from_str(raw.trim())
        .map_err(|e| AuditError::Classification(format!("unparsable classifier output: {e}")))
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, query: &str) -> Result<Classification>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns one fixed-length vector per input text.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    /// Renders the final answer from the structured evidence payload.
    async fn generate(&self, payload: &crate::evidence::EvidencePayload) -> Result<String>;
}
