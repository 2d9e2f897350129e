//! Concrete collaborator clients: an Ollama-backed set for real runs and a
//! deterministic offline set for tests and air-gapped use.

pub mod offline;
pub mod ollama;

pub use offline::{HashEmbedder, KeywordClassifier, TemplateNarrator};
pub use ollama::OllamaClient;
