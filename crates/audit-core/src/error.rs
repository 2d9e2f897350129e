use thiserror::Error;

/// Error taxonomy for the audit pipeline.
///
/// Everything except `Configuration` is non-fatal: the orchestration graph
/// records it into `SharedState.error` and keeps walking. `Configuration`
/// is raised before any query is accepted.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("classification failed: {0}")]
    Classification(String),

    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("narrative generation failed: {0}")]
    NarrativeGeneration(String),

    #[error("rule evaluation failed: {0}")]
    RuleEvaluation(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl AuditError {
    /// Only configuration errors stop the engine from serving queries.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AuditError::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_configuration_is_fatal() {
        assert!(AuditError::Configuration("missing file".into()).is_fatal());
        assert!(!AuditError::Retrieval("index offline".into()).is_fatal());
        assert!(!AuditError::Classification("bad json".into()).is_fatal());
    }
}
