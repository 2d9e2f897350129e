use super::{content_hash, rank_by_cosine, Chunk, CorpusKind, IndexManifest};
use crate::collaborators::Embedder;
use crate::config::AuditConfig;
use crate::corpus::chunker::truncate_chars;
use crate::corpus::{Email, EmailParser};
use crate::persistence::{load_bincode, load_json, save_bincode, save_json};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Over-fetch factor for entity-filtered search: pull more neighbors than
/// requested, then keep the ones that actually mention the entity.
const ENTITY_CANDIDATE_FACTOR: usize = 2;

#[derive(Debug, Clone)]
pub struct EmailHit {
    pub email: Email,
    pub score: f32,
}

#[derive(Debug, Default)]
struct IndexState {
    manifest: Option<IndexManifest>,
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
    records: Vec<Email>,
}

impl IndexState {
    fn matches(&self, hash: &str) -> bool {
        self.manifest
            .as_ref()
            .is_some_and(|m| m.content_hash == hash)
    }
}

/// Semantic index over the email dump, one chunk per message.
pub struct EmailIndex {
    state: RwLock<Arc<IndexState>>,
    rebuild_lock: tokio::sync::Mutex<()>,
    embedder: Arc<dyn Embedder>,
    source_file: PathBuf,
    storage_dir: PathBuf,
    embed_input_cap: usize,
}

impl EmailIndex {
    pub async fn open(config: &AuditConfig, embedder: Arc<dyn Embedder>) -> Self {
        let index = Self {
            state: RwLock::new(Arc::new(IndexState::default())),
            rebuild_lock: tokio::sync::Mutex::new(()),
            embedder,
            source_file: config.emails_file.clone(),
            storage_dir: config.storage_dir.join("email"),
            embed_input_cap: config.embed_input_cap,
        };
        if let Err(e) = index.ensure_ready().await {
            tracing::warn!("email index unavailable at startup: {e:#}");
        }
        index
    }

    pub fn chunk_count(&self) -> usize {
        self.state.read().unwrap().chunks.len()
    }

    /// Nearest-neighbor search over the whole dump.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<EmailHit>> {
        self.ensure_ready().await?;
        let state = self.state.read().unwrap().clone();
        self.semantic_search(&state, query, k).await
    }

    /// Entity-filtered search: the query is widened with the entity name,
    /// more candidates than requested are ranked, and only those whose
    /// sender, recipient or body mentions the entity survive.
    pub async fn search_by_entity(
        &self,
        query: &str,
        entity: &str,
        k: usize,
    ) -> Result<Vec<EmailHit>> {
        self.ensure_ready().await?;
        let state = self.state.read().unwrap().clone();

        let widened = format!("{query} {entity}");
        let candidates = self
            .semantic_search(&state, &widened, k * ENTITY_CANDIDATE_FACTOR)
            .await?;

        let needle = entity.to_lowercase();
        Ok(candidates
            .into_iter()
            .filter(|hit| {
                hit.email.from.to_lowercase().contains(&needle)
                    || hit.email.to.to_lowercase().contains(&needle)
                    || hit.email.body.to_lowercase().contains(&needle)
            })
            .take(k)
            .collect())
    }

    async fn semantic_search(
        &self,
        state: &IndexState,
        query: &str,
        k: usize,
    ) -> Result<Vec<EmailHit>> {
        if state.vectors.is_empty() {
            return Ok(Vec::new());
        }
        let input = truncate_chars(query, self.embed_input_cap).to_string();
        let mut embedded = self.embedder.embed(vec![input]).await?;
        let query_vec = embedded
            .pop()
            .context("embedder returned no vector for the query")?;

        Ok(rank_by_cosine(&query_vec, &state.vectors, k)
            .into_iter()
            .map(|(i, score)| EmailHit {
                email: state.records[i].clone(),
                score,
            })
            .collect())
    }

    async fn ensure_ready(&self) -> Result<()> {
        let hash = content_hash(&self.source_file)?;
        if self.state.read().unwrap().matches(&hash) {
            return Ok(());
        }

        let _guard = self.rebuild_lock.lock().await;
        if self.state.read().unwrap().matches(&hash) {
            return Ok(());
        }

        let state = match self.load_persisted(&hash) {
            Some(state) => state,
            None => {
                let state = self.build(&hash).await?;
                self.persist(&state)?;
                state
            }
        };

        *self.state.write().unwrap() = Arc::new(state);
        Ok(())
    }

    pub async fn rebuild(&self) -> Result<()> {
        let hash = content_hash(&self.source_file)?;
        let _guard = self.rebuild_lock.lock().await;
        let state = self.build(&hash).await?;
        self.persist(&state)?;
        *self.state.write().unwrap() = Arc::new(state);
        Ok(())
    }

    fn load_persisted(&self, hash: &str) -> Option<IndexState> {
        let manifest: IndexManifest = load_json(&self.storage_dir.join("manifest.json")).ok()?;
        if manifest.content_hash != hash {
            return None;
        }
        let chunks: Vec<Chunk> = load_bincode(&self.storage_dir.join("chunks.bin")).ok()?;
        let vectors: Vec<Vec<f32>> = load_bincode(&self.storage_dir.join("vectors.bin")).ok()?;
        let records: Vec<Email> = load_bincode(&self.storage_dir.join("emails.bin")).ok()?;
        if chunks.len() != manifest.chunk_count
            || vectors.len() != chunks.len()
            || records.len() != chunks.len()
        {
            return None;
        }
        Some(IndexState {
            manifest: Some(manifest),
            chunks,
            vectors,
            records,
        })
    }

    async fn build(&self, hash: &str) -> Result<IndexState> {
        let parser = EmailParser::from_file(&self.source_file)?;
        let records: Vec<Email> = parser.emails().to_vec();

        let chunks: Vec<Chunk> = records
            .iter()
            .enumerate()
            .map(|(sequence, email)| Chunk {
                id: format!("email_{sequence}"),
                text: render_email(email),
                section_title: email.subject.clone(),
                corpus: CorpusKind::Email,
                sequence,
            })
            .collect();

        let inputs: Vec<String> = chunks
            .iter()
            .map(|c| truncate_chars(&c.text, self.embed_input_cap).to_string())
            .collect();
        let vectors = if inputs.is_empty() {
            Vec::new()
        } else {
            self.embedder
                .embed(inputs)
                .await
                .context("embedding email chunks")?
        };
        anyhow::ensure!(
            vectors.len() == chunks.len(),
            "embedder returned {} vectors for {} chunks",
            vectors.len(),
            chunks.len()
        );

        Ok(IndexState {
            manifest: Some(IndexManifest {
                corpus: CorpusKind::Email,
                content_hash: hash.to_string(),
                chunk_count: chunks.len(),
            }),
            chunks,
            vectors,
            records,
        })
    }

    fn persist(&self, state: &IndexState) -> Result<()> {
        std::fs::create_dir_all(&self.storage_dir)?;
        save_bincode(&self.storage_dir.join("chunks.bin"), &state.chunks)?;
        save_bincode(&self.storage_dir.join("vectors.bin"), &state.vectors)?;
        save_bincode(&self.storage_dir.join("emails.bin"), &state.records)?;
        if let Some(manifest) = &state.manifest {
            save_json(&self.storage_dir.join("manifest.json"), manifest)?;
        }
        Ok(())
    }
}

/// Chunk text for one email: headers plus body, the same shape the dump has.
fn render_email(email: &Email) -> String {
    format!(
        "De: {}\nPara: {}\nData: {}\nAssunto: {}\n\n{}",
        email.from, email.to, email.date, email.subject, email.body
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_chunk_carries_headers_and_body() {
        let email = Email {
            from: "Ryan <ryan@dm.com>".into(),
            to: "Kelly <kelly@dm.com>".into(),
            date: "2024-03-10 14:22".into(),
            subject: "WUPHF".into(),
            body: "preciso de um aporte".into(),
            source_line: 12,
        };
        let text = render_email(&email);
        assert!(text.starts_with("De: Ryan"));
        assert!(text.contains("Assunto: WUPHF"));
        assert!(text.ends_with("preciso de um aporte"));
    }
}
