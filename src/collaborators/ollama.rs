//! Ollama-backed collaborators. Everything goes through the local HTTP API;
//! classification requests JSON-formatted output and is decoded strictly.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use audit_core::collaborators::{
    decode_classification, Classification, Classifier, Embedder, NarrativeGenerator,
};
use audit_core::evidence::EvidencePayload;
use serde::Deserialize;
use serde_json::json;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3.2";
const DEFAULT_KEEP_ALIVE: &str = "10m";

// Low temperature across the board: this is an auditor, not a novelist.
const NARRATIVE_TEMPERATURE: f32 = 0.1;
const NARRATIVE_NUM_CTX: u32 = 4096;
const NARRATIVE_NUM_PREDICT: u32 = 512;
// Classification wants short, deterministic output
const CLASSIFY_TEMPERATURE: f32 = 0.0;
const CLASSIFY_NUM_CTX: u32 = 2048;
const CLASSIFY_NUM_PREDICT: u32 = 256;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    keep_alive: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            keep_alive: DEFAULT_KEEP_ALIVE.to_string(),
        }
    }

    /// Reads `OLLAMA_BASE_URL` / `OLLAMA_MODEL`, with the usual local
    /// defaults.
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self::new(base_url, model)
    }

    async fn generate_raw(
        &self,
        prompt: &str,
        json_format: bool,
        temperature: f32,
        num_ctx: u32,
        num_predict: u32,
    ) -> Result<String> {
        let mut body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "keep_alive": self.keep_alive,
            "options": {
                "temperature": temperature,
                "num_ctx": num_ctx,
                "num_predict": num_predict,
            },
        });
        if json_format {
            body["format"] = json!("json");
        }

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .context("calling ollama /api/generate")?;

        if !response.status().is_success() {
            bail!("ollama generate returned {}", response.status());
        }

        let parsed: GenerateResponse = response.json().await?;
        Ok(parsed.response)
    }
}

#[async_trait]
impl Classifier for OllamaClient {
    async fn classify(&self, query: &str) -> Result<Classification> {
        let prompt = classification_prompt(query);
        let raw = self
            .generate_raw(
                &prompt,
                true,
                CLASSIFY_TEMPERATURE,
                CLASSIFY_NUM_CTX,
                CLASSIFY_NUM_PREDICT,
            )
            .await?;
        // Strict: either the whole payload matches the schema or we fail
        Ok(decode_classification(&raw)?)
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            let response = self
                .client
                .post(format!("{}/api/embeddings", self.base_url))
                .json(&json!({ "model": self.model, "prompt": text }))
                .send()
                .await
                .context("calling ollama /api/embeddings")?;

            if !response.status().is_success() {
                bail!("ollama embeddings returned {}", response.status());
            }

            let parsed: EmbeddingsResponse = response.json().await?;
            if parsed.embedding.is_empty() {
                bail!("ollama returned an empty embedding");
            }
            vectors.push(parsed.embedding);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl NarrativeGenerator for OllamaClient {
    async fn generate(&self, payload: &EvidencePayload) -> Result<String> {
        let prompt = narrative_prompt(payload)?;
        self.generate_raw(
            &prompt,
            false,
            NARRATIVE_TEMPERATURE,
            NARRATIVE_NUM_CTX,
            NARRATIVE_NUM_PREDICT,
        )
        .await
    }
}

fn classification_prompt(query: &str) -> String {
    format!(
        r#"You classify queries for a corporate audit system. The corpora are in Portuguese.

Pick exactly ONE category:
- "fraud": investigations, irregularities, smurfing, conflicts of interest, cross-referencing data for problems
- "transaction": financial transactions, spending, expenses, purchases, reimbursements, amounts
- "email": communications, emails, messages, correspondence
- "policy": rules, policies, limits, compliance, what is allowed or forbidden
- "general": anything else

Also extract entities: person names, dollar amounts, dates.

QUERY: {query}

Answer ONLY with valid JSON of the form:
{{"query_type": "category", "entities": ["list", "of", "entities"]}}
"#
    )
}

fn narrative_prompt(payload: &EvidencePayload) -> Result<String> {
    let evidence = serde_json::to_string_pretty(payload)?;
    Ok(format!(
        r#"You are a corporate auditor. Answer the question using ONLY the evidence below.

EVIDENCE (JSON):
{evidence}

INSTRUCTIONS:
- Answer in the language of the question
- Cite concrete evidence: transaction ids, amounts, email lines, policy sections
- If the question is about a specific person, focus on them
- Finish with an objective conclusion
"#
    ))
}
