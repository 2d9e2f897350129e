//! The mutable record threaded through the pipeline, and its merge rules.

use crate::collaborators::QueryType;
use crate::corpus::{Email, Transaction};
use crate::graph::NodeKind;
use crate::rules::{ComplianceViolation, Severity};
use serde::{Deserialize, Serialize};

/// A transaction together with the rule engine's verdict on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionFinding {
    pub transaction: Transaction,
    pub violations: Vec<ComplianceViolation>,
}

impl TransactionFinding {
    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudAlert {
    pub kind: String,
    pub severity: Severity,
    pub employee: String,
    pub description: String,
    pub evidence_transaction_ids: Vec<String>,
    pub evidence_email_lines: Vec<usize>,
    pub total_amount: f64,
    pub rule_ref: String,
}

/// Pipeline accumulator, created fresh per query.
///
/// List fields are append-only for the duration of one query; scalar fields
/// are last-write-wins. `error` is diagnostic and never halts the walk.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SharedState {
    pub query: String,
    pub query_type: QueryType,
    pub entities: Vec<String>,
    pub policy_context: Vec<String>,
    pub policy_sections: Vec<String>,
    pub email_results: Vec<Email>,
    pub transaction_results: Vec<TransactionFinding>,
    pub transactions_analyzed: usize,
    pub fraud_alerts: Vec<FraudAlert>,
    pub final_response: String,
    pub evidence_summary: String,
    pub nodes_visited: Vec<NodeKind>,
    pub error: Option<String>,
}

impl SharedState {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Merges a stage's partial update into the state.
    ///
    /// Append for lists, replace for scalars; applying the updates in the
    /// graph's execution order always reproduces the same final state.
    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(query_type) = update.query_type {
            self.query_type = query_type;
        }
        if let Some(entities) = update.entities {
            self.entities = entities;
        }
        self.policy_context.extend(update.policy_context);
        self.policy_sections.extend(update.policy_sections);
        self.email_results.extend(update.email_results);
        self.transaction_results.extend(update.transaction_results);
        if let Some(analyzed) = update.transactions_analyzed {
            self.transactions_analyzed = analyzed;
        }
        self.fraud_alerts.extend(update.fraud_alerts);
        if let Some(response) = update.final_response {
            self.final_response = response;
        }
        if let Some(summary) = update.evidence_summary {
            self.evidence_summary = summary;
        }
        self.nodes_visited.extend(update.nodes_visited);
        if let Some(error) = update.error {
            self.error = Some(error);
        }
    }

    pub fn violated_transactions(&self) -> impl Iterator<Item = &TransactionFinding> {
        self.transaction_results.iter().filter(|t| t.has_violations())
    }
}

/// Partial record produced by one stage.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub query_type: Option<QueryType>,
    pub entities: Option<Vec<String>>,
    pub policy_context: Vec<String>,
    pub policy_sections: Vec<String>,
    pub email_results: Vec<Email>,
    pub transaction_results: Vec<TransactionFinding>,
    pub transactions_analyzed: Option<usize>,
    pub fraud_alerts: Vec<FraudAlert>,
    pub final_response: Option<String>,
    pub evidence_summary: Option<String>,
    pub nodes_visited: Vec<NodeKind>,
    pub error: Option<String>,
}

impl StateUpdate {
    /// The empty contribution a failed or timed-out stage makes, still
    /// recording its visit and the failure.
    pub fn failed(node: NodeKind, error: impl Into<String>) -> Self {
        Self {
            nodes_visited: vec![node],
            error: Some(error.into()),
            ..Self::default()
        }
    }
}
