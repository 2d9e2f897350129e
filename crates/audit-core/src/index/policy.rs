use super::{content_hash, rank_by_cosine, Chunk, CorpusKind, IndexManifest, SearchHit};
use crate::collaborators::Embedder;
use crate::config::AuditConfig;
use crate::corpus::chunker::{truncate_chars, Chunker};
use crate::persistence::{load_bincode, load_json, save_bincode, save_json};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

// Question words and particles that carry no signal for keyword scoring.
const STOPWORDS: &[&str] = &[
    "qual", "como", "onde", "quando", "quem", "que", "para", "com", "por", "uma", "um", "os",
    "as", "de", "da", "do", "em", "no", "na", "é", "são",
];

// Composite category labels; a phrase hit dominates single-token matches.
const COMPOSITE_PHRASES: &[&str] = &["categoria a", "categoria b", "categoria c"];
const PHRASE_BONUS: usize = 10;

const MIN_TOKEN_CHARS: usize = 3;

#[derive(Debug, Default)]
struct IndexState {
    manifest: Option<IndexManifest>,
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
}

impl IndexState {
    fn matches(&self, hash: &str) -> bool {
        self.manifest
            .as_ref()
            .is_some_and(|m| m.content_hash == hash)
    }
}

/// Hybrid keyword+semantic index over the compliance policy.
///
/// Keyword scoring runs first; semantic nearest-neighbor search is only a
/// fallback when no chunk matches a single token. Exact terminology beats
/// embedding recall on this corpus.
pub struct PolicyIndex {
    state: RwLock<Arc<IndexState>>,
    // Rebuilds are exclusive with each other but never block readers:
    // the new state is built outside the RwLock and swapped in at the end.
    rebuild_lock: tokio::sync::Mutex<()>,
    embedder: Arc<dyn Embedder>,
    source_file: PathBuf,
    storage_dir: PathBuf,
    chunker: Chunker,
    embed_input_cap: usize,
}

impl PolicyIndex {
    /// Opens the index, loading or building the cache best-effort. A failed
    /// first build is retried on the next search rather than failing open.
    pub async fn open(config: &AuditConfig, embedder: Arc<dyn Embedder>) -> Self {
        let index = Self {
            state: RwLock::new(Arc::new(IndexState::default())),
            rebuild_lock: tokio::sync::Mutex::new(()),
            embedder,
            source_file: config.policy_file.clone(),
            storage_dir: config.storage_dir.join("policy"),
            chunker: Chunker::new(config.chunk_size, config.chunk_overlap),
            embed_input_cap: config.embed_input_cap,
        };
        if let Err(e) = index.ensure_ready().await {
            tracing::warn!("policy index unavailable at startup: {e:#}");
        }
        index
    }

    pub fn chunk_count(&self) -> usize {
        self.state.read().unwrap().chunks.len()
    }

    /// Hybrid search over the policy corpus.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        self.ensure_ready().await?;
        let state = self.state.read().unwrap().clone();

        let keyword_hits = keyword_search(&state.chunks, query, k);
        if !keyword_hits.is_empty() {
            return Ok(keyword_hits);
        }

        // Zero keyword matches: fall back to nearest-neighbor search.
        self.semantic_search(&state, query, k).await
    }

    async fn semantic_search(
        &self,
        state: &IndexState,
        query: &str,
        k: usize,
    ) -> Result<Vec<SearchHit>> {
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
            .map(|(i, score)| SearchHit {
                chunk: state.chunks[i].clone(),
                score,
            })
            .collect())
    }

    /// Revalidates the cache against the current corpus hash, rebuilding if
    /// the file changed or the persisted index is missing/corrupt.
    async fn ensure_ready(&self) -> Result<()> {
        let hash = content_hash(&self.source_file)?;
        if self.state.read().unwrap().matches(&hash) {
            return Ok(());
        }

        let _guard = self.rebuild_lock.lock().await;
        // Another rebuild may have landed while we waited
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

    /// Forces a full re-chunk and re-embed, ignoring the persisted cache.
    pub async fn rebuild(&self) -> Result<()> {
        let hash = content_hash(&self.source_file)?;
        let _guard = self.rebuild_lock.lock().await;
        let state = self.build(&hash).await?;
        self.persist(&state)?;
        *self.state.write().unwrap() = Arc::new(state);
        Ok(())
    }

    /// Loads the persisted state if its manifest matches `hash`. Any decode
    /// failure is treated as a missing cache.
    fn load_persisted(&self, hash: &str) -> Option<IndexState> {
        let manifest: IndexManifest = load_json(&self.storage_dir.join("manifest.json")).ok()?;
        if manifest.content_hash != hash {
            return None;
        }
        let chunks: Vec<Chunk> = load_bincode(&self.storage_dir.join("chunks.bin")).ok()?;
        let vectors: Vec<Vec<f32>> = load_bincode(&self.storage_dir.join("vectors.bin")).ok()?;
        if chunks.len() != manifest.chunk_count || vectors.len() != chunks.len() {
            return None;
        }
        Some(IndexState {
            manifest: Some(manifest),
            chunks,
            vectors,
        })
    }

    async fn build(&self, hash: &str) -> Result<IndexState> {
        let text = std::fs::read_to_string(&self.source_file)
            .with_context(|| format!("reading policy corpus {}", self.source_file.display()))?;

        let mut chunks = Vec::new();
        for section in Chunker::split_sections(&text) {
            for window in self.chunker.split_window(&section.body) {
                let sequence = chunks.len();
                chunks.push(Chunk {
                    id: format!("policy_{sequence}"),
                    text: window,
                    section_title: section.title.clone(),
                    corpus: CorpusKind::Policy,
                    sequence,
                });
            }
        }

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
                .context("embedding policy chunks")?
        };
        anyhow::ensure!(
            vectors.len() == chunks.len(),
            "embedder returned {} vectors for {} chunks",
            vectors.len(),
            chunks.len()
        );

        Ok(IndexState {
            manifest: Some(IndexManifest {
                corpus: CorpusKind::Policy,
                content_hash: hash.to_string(),
                chunk_count: chunks.len(),
            }),
            chunks,
            vectors,
        })
    }

    /// Writes chunks and vectors first, manifest last; every file goes
    /// through a temp-then-rename so a crash mid-persist leaves either the
    /// old cache or an invalid one, never a half-written valid one.
    fn persist(&self, state: &IndexState) -> Result<()> {
        std::fs::create_dir_all(&self.storage_dir)?;
        save_bincode(&self.storage_dir.join("chunks.bin"), &state.chunks)?;
        save_bincode(&self.storage_dir.join("vectors.bin"), &state.vectors)?;
        if let Some(manifest) = &state.manifest {
            save_json(&self.storage_dir.join("manifest.json"), manifest)?;
        }
        Ok(())
    }
}

/// Token-count scoring with a large bonus for recognized composite phrases.
fn keyword_search(chunks: &[Chunk], query: &str, k: usize) -> Vec<SearchHit> {
    let query_lower = query.to_lowercase();

    let terms: Vec<&str> = query_lower
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS && !STOPWORDS.contains(t))
        .collect();
    let phrases: Vec<&str> = COMPOSITE_PHRASES
        .iter()
        .copied()
        .filter(|p| query_lower.contains(p))
        .collect();

    if terms.is_empty() && phrases.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(usize, &Chunk)> = chunks
        .iter()
        .filter_map(|chunk| {
            let text = chunk.text.to_lowercase();
            let mut score = terms.iter().filter(|t| text.contains(*t)).count();
            score += phrases.iter().filter(|p| text.contains(*p)).count() * PHRASE_BONUS;
            (score > 0).then_some((score, chunk))
        })
        .collect();

    // Stable sort: ties stay in original chunk order
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    scored
        .into_iter()
        .take(k)
        .map(|(score, chunk)| SearchHit {
            chunk: chunk.clone(),
            score: score as f32,
        })
        .collect()
}
