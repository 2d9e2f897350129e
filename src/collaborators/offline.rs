//! Deterministic collaborators that need no model server.
//!
//! They keep the pipeline fully functional offline: classification by
//! keyword tables, embeddings by token hashing, narration by template.

use anyhow::Result;
use async_trait::async_trait;
use audit_core::collaborators::{Classification, Classifier, Embedder, NarrativeGenerator, QueryType};
use audit_core::evidence::EvidencePayload;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const FRAUD_HINTS: &[&str] = &[
    "fraude", "fraud", "irregular", "smurfing", "investiga", "desvio", "esquema", "conflito",
    "suspeito",
];
const TRANSACTION_HINTS: &[&str] = &[
    "transa", "gasto", "despesa", "compra", "pagamento", "reembolso", "valor",
];
const EMAIL_HINTS: &[&str] = &["email", "e-mail", "mensagem", "comunica", "correspond"];
const POLICY_HINTS: &[&str] = &[
    "polít", "politica", "regra", "limite", "norma", "compliance", "permitido", "proibido",
    "procedimento",
];

/// Keyword-table classifier mirroring the category definitions the model
/// prompt uses.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, query: &str) -> Result<Classification> {
        let lower = query.to_lowercase();
        let hit = |hints: &[&str]| hints.iter().any(|h| lower.contains(h));

        let query_type = if hit(FRAUD_HINTS) {
            QueryType::Fraud
        } else if hit(TRANSACTION_HINTS) {
            QueryType::Transaction
        } else if hit(EMAIL_HINTS) {
            QueryType::Email
        } else if hit(POLICY_HINTS) {
            QueryType::Policy
        } else {
            QueryType::General
        };

        Ok(Classification {
            query_type,
            entities: extract_entities(query),
        })
    }
}

/// Capitalized words and dollar amounts, deduplicated in order.
fn extract_entities(query: &str) -> Vec<String> {
    let mut entities = Vec::new();
    for raw in query.split_whitespace() {
        let token = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '$');
        if token.is_empty() {
            continue;
        }
        let is_amount = token.starts_with('$') && token.len() > 1;
        let is_name = token.chars().next().is_some_and(|c| c.is_uppercase())
            && !token.chars().any(|c| c.is_ascii_digit());
        if (is_amount || is_name) && !entities.iter().any(|e| e == token) {
            entities.push(token.to_string());
        }
    }
    entities
}

/// Token-hash embedder with the usual sentence-embedding dimensionality.
/// Same text always maps to the same unit vector.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self { dimensions: 384 }
    }
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let lower = text.to_lowercase();
        for token in lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let mut h = hasher.finish();
            // A few pseudo-random buckets per token
            for _ in 0..3 {
                vector[(h % self.dimensions as u64) as usize] += 1.0;
                h = h.rotate_left(17).wrapping_mul(0x9E37_79B9_7F4A_7C15);
            }
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Renders the evidence payload as a compact markdown answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateNarrator;

#[async_trait]
impl NarrativeGenerator for TemplateNarrator {
    async fn generate(&self, payload: &EvidencePayload) -> Result<String> {
        let mut out = String::new();
        out.push_str(&format!("## {} audit\n\n", payload.query_type));
        out.push_str(&format!("**Question:** {}\n", payload.query));

        if !payload.fraud_alerts.is_empty() {
            out.push_str(&format!(
                "\n### Alerts ({} total)\n",
                payload.stats.fraud_alerts
            ));
            for alert in &payload.fraud_alerts {
                out.push_str(&format!(
                    "- **{}** [{}] {}: {} (${:.2})\n",
                    alert.kind, alert.severity, alert.employee, alert.description,
                    alert.total_amount
                ));
            }
        }

        if !payload.violated_transactions.is_empty() {
            out.push_str(&format!(
                "\n### Transactions with violations ({} of {})\n",
                payload.stats.transactions_with_violations, payload.stats.transactions
            ));
            for tx in &payload.violated_transactions {
                out.push_str(&format!(
                    "- **{}** {}: ${:.2}, {} [{}]\n",
                    tx.id, tx.employee, tx.amount, tx.description, tx.first_violation
                ));
            }
        }

        if !payload.emails.is_empty() {
            out.push_str(&format!("\n### Emails ({} total)\n", payload.stats.emails));
            for email in &payload.emails {
                out.push_str(&format!(
                    "- line {}: {} -> {}: {}\n",
                    email.source_line, email.from, email.to, email.subject
                ));
            }
        }

        if !payload.policy_excerpts.is_empty() {
            out.push_str("\n### Policy grounding\n");
            for excerpt in &payload.policy_excerpts {
                out.push_str(&format!("> {}\n", excerpt.replace('\n', " ")));
            }
        }

        if payload.fraud_alerts.is_empty()
            && payload.violated_transactions.is_empty()
            && payload.emails.is_empty()
        {
            out.push_str("\nNothing irregular surfaced for this query.\n");
        }

        Ok(out)
    }
}
