//! Disk-backed behavior of the retrieval indices: cache validity by content
//! hash, atomic rebuilds, hybrid search ordering.

use anyhow::Result;
use async_trait::async_trait;
use audit_core::collaborators::Embedder;
use audit_core::config::AuditConfig;
use audit_core::index::{content_hash, EmailIndex, IndexManifest, PolicyIndex};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Deterministic token-hash embedder; counts calls so tests can assert
/// whether a rebuild re-embedded anything.
#[derive(Default)]
struct CountingEmbedder {
    calls: AtomicUsize,
}

impl CountingEmbedder {
    fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn embed_one(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; 64];
        let lower = text.to_lowercase();
        for token in lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            vector[(hasher.finish() % 64) as usize] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(texts.iter().map(|t| Self::embed_one(t)).collect())
    }
}

fn write_policy(path: &Path, extra: &str) {
    let rule = "=".repeat(78);
    let text = format!(
        "SEÇÃO 1: LIMITES DE ALÇADA\n\
         Categoria C: até $50.00, autonomia do funcionário para pequenas compras.\n\
         Categoria B: até $500.00, exige aprovação do gerente regional.\n\
         Categoria A: acima de $500.00, exige pedido de compra aprovado pelo CFO.{extra}\n\
         {rule}\n\
         SEÇÃO 2: REFEIÇÕES E ENTRETENIMENTO\n\
         Refeições de negócios devem ocorrer em locais aprovados pela diretoria.\n\
         {rule}\n\
         SEÇÃO 3: ITENS PROIBIDOS\n\
         Equipamentos de entretenimento e investimentos pessoais não são reembolsáveis.\n"
    );
    std::fs::write(path, text).unwrap();
}

fn write_emails(path: &Path) {
    let rule = "-".repeat(79);
    let dump = format!(
        "{rule}\n\
         De: Ryan Howard <ryan@dundermifflin.com>\n\
         Para: Kelly Kapoor <kelly@dundermifflin.com>\n\
         Data: 2024-03-10 14:22\n\
         Assunto: projeto pessoal\n\
         Mensagem:\n\
         O WUPHF vai decolar, só preciso de mais investimento.\n\
         {rule}\n\
         De: Angela Martin <angela@dundermifflin.com>\n\
         Para: Oscar Martinez <oscar@dundermifflin.com>\n\
         Data: 2024-03-11 09:05\n\
         Assunto: recibos\n\
         Mensagem:\n\
         Os recibos de março chegaram atrasados de novo.\n\
         {rule}\n"
    );
    std::fs::write(path, dump).unwrap();
}

fn test_config(dir: &TempDir) -> AuditConfig {
    let mut config = AuditConfig::new(dir.path(), dir.path().join("storage"));
    config.retriever_k = 3;
    config
}

#[tokio::test]
async fn unchanged_corpus_reuses_the_persisted_index() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    write_policy(&config.policy_file, "");

    let embedder = Arc::new(CountingEmbedder::default());
    let first = PolicyIndex::open(&config, embedder.clone()).await;
    let builds_after_first = embedder.call_count();
    assert!(builds_after_first >= 1);
    let first_results = first.search("refeições locais aprovados", 3).await.unwrap();

    // Second open with identical content: loaded as-is, no re-embedding
    let second = PolicyIndex::open(&config, embedder.clone()).await;
    assert_eq!(embedder.call_count(), builds_after_first);
    let second_results = second.search("refeições locais aprovados", 3).await.unwrap();

    let ids = |hits: &[audit_core::index::SearchHit]| -> Vec<String> {
        hits.iter().map(|h| h.chunk.id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&first_results), ids(&second_results));

    // Manifest hash matches the current file hash
    let manifest: IndexManifest = serde_json::from_str(
        &std::fs::read_to_string(config.storage_dir.join("policy/manifest.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(
        manifest.content_hash,
        content_hash(&config.policy_file).unwrap()
    );
}

#[tokio::test]
async fn single_byte_change_triggers_a_rebuild_before_the_next_search() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    write_policy(&config.policy_file, "");

    let embedder = Arc::new(CountingEmbedder::default());
    let index = PolicyIndex::open(&config, embedder.clone()).await;
    let old_manifest: IndexManifest = serde_json::from_str(
        &std::fs::read_to_string(config.storage_dir.join("policy/manifest.json")).unwrap(),
    )
    .unwrap();
    let builds = embedder.call_count();

    // One extra byte in the corpus
    write_policy(&config.policy_file, "!");
    let hits = index.search("pedido de compra aprovado", 3).await.unwrap();
    assert!(!hits.is_empty());
    assert!(embedder.call_count() > builds, "rebuild must re-embed");

    let new_manifest: IndexManifest = serde_json::from_str(
        &std::fs::read_to_string(config.storage_dir.join("policy/manifest.json")).unwrap(),
    )
    .unwrap();
    assert_ne!(new_manifest.content_hash, old_manifest.content_hash);
    assert!(hits.iter().any(|h| h.chunk.text.contains('!')));
}

#[tokio::test]
async fn corrupted_cache_is_rebuilt_on_next_access() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    write_policy(&config.policy_file, "");

    let embedder = Arc::new(CountingEmbedder::default());
    {
        let _ = PolicyIndex::open(&config, embedder.clone()).await;
    }
    let builds = embedder.call_count();

    // Truncate the chunk list; the manifest still matches the corpus hash
    std::fs::write(config.storage_dir.join("policy/chunks.bin"), b"garbage").unwrap();

    let index = PolicyIndex::open(&config, embedder.clone()).await;
    assert!(embedder.call_count() > builds);
    let hits = index.search("categoria b", 3).await.unwrap();
    assert!(!hits.is_empty());
}

#[tokio::test]
async fn composite_phrase_outranks_single_token_matches() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    write_policy(&config.policy_file, "");

    let index = PolicyIndex::open(&config, Arc::new(CountingEmbedder::default())).await;
    // "refeições" appears only in section 2; "categoria b" only in section 1
    let hits = index.search("qual o limite da categoria b para refeições", 3).await.unwrap();
    assert!(hits[0].chunk.text.to_lowercase().contains("categoria b"));
    assert!(hits[0].score > hits.last().unwrap().score);
}

#[tokio::test]
async fn semantic_fallback_only_runs_when_keywords_miss() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    write_policy(&config.policy_file, "");

    let index = PolicyIndex::open(&config, Arc::new(CountingEmbedder::default())).await;

    // No corpus token matches: falls back to nearest neighbor, still answers
    let hits = index.search("xyzzy plugh", 2).await.unwrap();
    assert!(!hits.is_empty());
    // Cosine scores, not keyword counts
    assert!(hits[0].score <= 1.0 + 1e-6);
}

#[tokio::test]
async fn email_entity_search_filters_to_the_entity() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    write_emails(&config.emails_file);

    let index = EmailIndex::open(&config, Arc::new(CountingEmbedder::default())).await;
    assert_eq!(index.chunk_count(), 2);

    let hits = index.search_by_entity("projeto pessoal", "Ryan", 5).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].email.from.contains("Ryan Howard"));

    let none = index.search_by_entity("projeto pessoal", "Stanley", 5).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn email_index_round_trips_records_through_the_cache() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    write_emails(&config.emails_file);

    let embedder = Arc::new(CountingEmbedder::default());
    let first = EmailIndex::open(&config, embedder.clone()).await;
    let original = first.search("recibos atrasados", 2).await.unwrap();

    // Reload from disk: same records come back
    let second = EmailIndex::open(&config, embedder).await;
    let reloaded = second.search("recibos atrasados", 2).await.unwrap();
    assert_eq!(original.len(), reloaded.len());
    for (a, b) in original.iter().zip(&reloaded) {
        assert_eq!(a.email, b.email);
    }
}

#[tokio::test]
async fn readers_keep_answering_while_an_index_rebuilds() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    write_policy(&config.policy_file, "");

    let index = Arc::new(PolicyIndex::open(&config, Arc::new(CountingEmbedder::default())).await);

    let mut readers = Vec::new();
    for _ in 0..4 {
        let index = index.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..20 {
                let hits = index.search("categoria b", 3).await.unwrap();
                // Never a partially built index: either results or nothing,
                // but the call itself always succeeds
                assert!(hits.iter().all(|h| !h.chunk.text.is_empty()));
            }
        }));
    }

    for _ in 0..3 {
        index.rebuild().await.unwrap();
    }
    for reader in readers {
        reader.await.unwrap();
    }
}

#[test]
fn persisted_chunk_list_round_trips() {
    use audit_core::index::{Chunk, CorpusKind};
    use audit_core::persistence::{load_bincode, save_bincode};

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("chunks.bin");
    let chunks: Vec<Chunk> = (0..4)
        .map(|sequence| Chunk {
            id: format!("policy_{sequence}"),
            text: format!("conteúdo da seção {sequence}"),
            section_title: "SEÇÃO 1".to_string(),
            corpus: CorpusKind::Policy,
            sequence,
        })
        .collect();

    save_bincode(&path, &chunks).unwrap();
    let loaded: Vec<Chunk> = load_bincode(&path).unwrap();
    assert_eq!(loaded, chunks);
}
