//! The finite-state router that drives a query through its stages.

use crate::collaborators::{Classifier, Embedder, NarrativeGenerator, QueryType};
use crate::config::AuditConfig;
use crate::corpus::{EmailParser, Ledger};
use crate::error::AuditError;
use crate::evidence;
use crate::index::{EmailIndex, PolicyIndex};
use crate::progress::{ProgressBus, ProgressEvent};
use crate::rules::RuleEngine;
use crate::stages::run_stage;
use crate::state::{SharedState, StateUpdate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Hard backstop on the walk; the transition table alone already guarantees
/// termination in at most five transitions.
const MAX_STAGES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Router,
    PolicyRetrieval,
    EmailRetrieval,
    TransactionRetrieval,
    FraudCorrelation,
    Synthesis,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Router => "router",
            NodeKind::PolicyRetrieval => "policy_retrieval",
            NodeKind::EmailRetrieval => "email_retrieval",
            NodeKind::TransactionRetrieval => "transaction_retrieval",
            NodeKind::FraudCorrelation => "fraud_correlation",
            NodeKind::Synthesis => "synthesis",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic transition function, keyed only by the current node and the
/// classified query type. Every path starts with policy retrieval and ends
/// in synthesis; no node repeats within one query.
pub fn next_node(current: NodeKind, query_type: QueryType) -> Option<NodeKind> {
    match current {
        NodeKind::Router => Some(NodeKind::PolicyRetrieval),
        NodeKind::PolicyRetrieval => match query_type {
            QueryType::Policy | QueryType::General => Some(NodeKind::Synthesis),
            QueryType::Email | QueryType::Fraud => Some(NodeKind::EmailRetrieval),
            QueryType::Transaction => Some(NodeKind::TransactionRetrieval),
        },
        NodeKind::EmailRetrieval => match query_type {
            QueryType::Fraud => Some(NodeKind::TransactionRetrieval),
            _ => Some(NodeKind::Synthesis),
        },
        NodeKind::TransactionRetrieval => match query_type {
            QueryType::Fraud => Some(NodeKind::FraudCorrelation),
            _ => Some(NodeKind::Synthesis),
        },
        NodeKind::FraudCorrelation => Some(NodeKind::Synthesis),
        NodeKind::Synthesis => None,
    }
}

/// Everything a query execution needs, constructed once and shared.
///
/// Indices, parsers and the rule engine are read-mostly singletons behind
/// `Arc`; each query owns its own `SharedState`.
pub struct AuditContext {
    pub config: AuditConfig,
    pub policy_index: Arc<PolicyIndex>,
    pub email_index: Arc<EmailIndex>,
    pub email_parser: Arc<EmailParser>,
    pub ledger: Arc<Ledger>,
    pub rules: RuleEngine,
    pub classifier: Arc<dyn Classifier>,
    pub narrator: Arc<dyn NarrativeGenerator>,
    pub progress: ProgressBus,
}

impl AuditContext {
    /// Builds the context, failing only on the fatal precondition: corpus
    /// files missing or unreadable. Index build problems are degraded to
    /// retrieval errors at query time.
    pub async fn new(
        config: AuditConfig,
        classifier: Arc<dyn Classifier>,
        embedder: Arc<dyn Embedder>,
        narrator: Arc<dyn NarrativeGenerator>,
    ) -> Result<Self, AuditError> {
        config.validate()?;

        let email_parser = EmailParser::from_file(&config.emails_file)
            .map_err(|e| AuditError::Configuration(format!("{e:#}")))?;
        let ledger = Ledger::from_file(&config.transactions_file)
            .map_err(|e| AuditError::Configuration(format!("{e:#}")))?;

        let policy_index = PolicyIndex::open(&config, embedder.clone()).await;
        let email_index = EmailIndex::open(&config, embedder).await;

        Ok(Self {
            config,
            policy_index: Arc::new(policy_index),
            email_index: Arc::new(email_index),
            email_parser: Arc::new(email_parser),
            ledger: Arc::new(ledger),
            rules: RuleEngine::new(),
            classifier,
            narrator,
            progress: ProgressBus::default(),
        })
    }

    pub fn subscribe_progress(&self) -> tokio::sync::broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    /// Runs one query through the graph and returns the final state.
    ///
    /// No stage failure aborts the walk: failures become an empty update
    /// plus a recorded error, and the next node still runs.
    pub async fn run_query(&self, query: &str) -> SharedState {
        let query_id = Uuid::new_v4();
        let mut state = SharedState::new(query);
        self.progress.emit(ProgressEvent::QueryAccepted {
            query_id,
            query: query.to_string(),
        });

        let mut node = NodeKind::Router;
        for _ in 0..MAX_STAGES {
            self.progress.emit(ProgressEvent::StageStarted { query_id, node });
            let started = Instant::now();

            let update =
                match tokio::time::timeout(self.config.stage_timeout, run_stage(self, node, &state))
                    .await
                {
                    Ok(Ok(update)) => {
                        self.progress.emit(ProgressEvent::StageCompleted {
                            query_id,
                            node,
                            elapsed_ms: started.elapsed().as_millis() as u64,
                        });
                        update
                    }
                    Ok(Err(e)) => {
                        let error = format!("{e:#}");
                        tracing::warn!(stage = %node, "stage failed: {error}");
                        self.progress.emit(ProgressEvent::StageFailed {
                            query_id,
                            node,
                            error: error.clone(),
                        });
                        StateUpdate::failed(node, error)
                    }
                    Err(_) => {
                        let error = format!(
                            "{node} stage timed out after {:?}",
                            self.config.stage_timeout
                        );
                        tracing::warn!("{error}");
                        self.progress.emit(ProgressEvent::StageFailed {
                            query_id,
                            node,
                            error: error.clone(),
                        });
                        StateUpdate::failed(node, error)
                    }
                };

            state.apply(update);

            match next_node(node, state.query_type) {
                Some(next) => node = next,
                None => break,
            }
        }

        // Even a fully degraded walk produces an answer and a summary
        if state.final_response.is_empty() {
            state.final_response = evidence::fallback_answer(&state);
        }
        if state.evidence_summary.is_empty() {
            state.evidence_summary = evidence::plain_summary(&state);
        }

        self.progress.emit(ProgressEvent::QueryCompleted { query_id });
        state
    }
}
