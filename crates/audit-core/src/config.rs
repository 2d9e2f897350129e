use crate::error::AuditError;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_RETRIEVER_K: usize = 5;
/// Maximum characters handed to the embedding collaborator. The same cap is
/// applied when indexing and when querying so vectors stay comparable.
pub const DEFAULT_EMBED_INPUT_CAP: usize = 2048;
pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 60;

/// Static configuration for one corpus set.
///
/// Built explicitly by the caller and passed into `AuditContext::new`; there
/// are no process-wide singletons.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub policy_file: PathBuf,
    pub emails_file: PathBuf,
    pub transactions_file: PathBuf,
    /// Where manifests, chunk lists and vectors are persisted.
    pub storage_dir: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub retriever_k: usize,
    pub embed_input_cap: usize,
    /// Upper bound for a single stage, collaborator calls included.
    pub stage_timeout: Duration,
}

impl AuditConfig {
    pub fn new(data_dir: impl AsRef<Path>, storage_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            policy_file: data_dir.join("politica_compliance.txt"),
            emails_file: data_dir.join("emails.txt"),
            transactions_file: data_dir.join("transacoes_bancarias.csv"),
            storage_dir: storage_dir.as_ref().to_path_buf(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            retriever_k: DEFAULT_RETRIEVER_K,
            embed_input_cap: DEFAULT_EMBED_INPUT_CAP,
            stage_timeout: Duration::from_secs(DEFAULT_STAGE_TIMEOUT_SECS),
        }
    }

    /// Reads `AUDIT_DATA_DIR` and `AUDIT_STORAGE_PATH`, defaulting to `data/`
    /// and `storage/` under the working directory.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("AUDIT_DATA_DIR").unwrap_or_else(|_| "data".to_string());
        let storage_dir =
            std::env::var("AUDIT_STORAGE_PATH").unwrap_or_else(|_| "storage".to_string());
        Self::new(data_dir, storage_dir)
    }

    /// Checks the fatal precondition: all three corpus files must exist.
    pub fn validate(&self) -> Result<(), AuditError> {
        let mut missing = Vec::new();
        for file in [&self.policy_file, &self.emails_file, &self.transactions_file] {
            if !file.exists() {
                missing.push(file.display().to_string());
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AuditError::Configuration(format!(
                "corpus files not found: {}",
                missing.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn validate_reports_every_missing_file() {
        let dir = tempdir().unwrap();
        let config = AuditConfig::new(dir.path(), dir.path().join("storage"));
        let err = config.validate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("politica_compliance.txt"));
        assert!(msg.contains("emails.txt"));
        assert!(msg.contains("transacoes_bancarias.csv"));
    }

    #[test]
    fn validate_accepts_complete_corpus_set() {
        let dir = tempdir().unwrap();
        let config = AuditConfig::new(dir.path(), dir.path().join("storage"));
        std::fs::write(&config.policy_file, "policy").unwrap();
        std::fs::write(&config.emails_file, "emails").unwrap();
        std::fs::write(&config.transactions_file, "transactions").unwrap();
        assert!(config.validate().is_ok());
    }
}
