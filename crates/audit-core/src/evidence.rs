//! Deterministic selection of accumulated results into a bounded payload.
//!
//! Truncation is always "first N by append order"; nothing here is sampled
//! or re-scored, and nothing here can fail.

use crate::state::SharedState;
use serde::Serialize;

pub const MAX_FRAUD_ALERTS: usize = 5;
pub const MAX_VIOLATED_TRANSACTIONS: usize = 5;
pub const MAX_EMAILS: usize = 3;
pub const MAX_POLICY_EXCERPTS: usize = 2;
pub const POLICY_EXCERPT_CHARS: usize = 250;
pub const EMAIL_EXCERPT_CHARS: usize = 200;

/// Structured input for the narrative collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct EvidencePayload {
    pub query: String,
    pub query_type: String,
    pub policy_excerpts: Vec<String>,
    pub emails: Vec<EmailEvidence>,
    pub violated_transactions: Vec<TransactionEvidence>,
    pub fraud_alerts: Vec<FraudAlertEvidence>,
    pub stats: EvidenceStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailEvidence {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub source_line: usize,
    pub excerpt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionEvidence {
    pub id: String,
    pub employee: String,
    pub amount: f64,
    pub description: String,
    pub first_violation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FraudAlertEvidence {
    pub kind: String,
    pub severity: String,
    pub employee: String,
    pub total_amount: f64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvidenceStats {
    pub policy_excerpts: usize,
    pub emails: usize,
    pub transactions: usize,
    pub transactions_with_violations: usize,
    pub fraud_alerts: usize,
}

/// Selects capped, ordered prefixes of every state list.
pub fn build_payload(state: &SharedState) -> EvidencePayload {
    let violated: Vec<_> = state.violated_transactions().collect();

    EvidencePayload {
        query: state.query.clone(),
        query_type: state.query_type.to_string(),
        policy_excerpts: state
            .policy_context
            .iter()
            .take(MAX_POLICY_EXCERPTS)
            .map(|p| excerpt(p, POLICY_EXCERPT_CHARS))
            .collect(),
        emails: state
            .email_results
            .iter()
            .take(MAX_EMAILS)
            .map(|e| EmailEvidence {
                from: e.from.clone(),
                to: e.to.clone(),
                subject: e.subject.clone(),
                source_line: e.source_line,
                excerpt: excerpt(&e.body, EMAIL_EXCERPT_CHARS),
            })
            .collect(),
        violated_transactions: violated
            .iter()
            .take(MAX_VIOLATED_TRANSACTIONS)
            .map(|t| TransactionEvidence {
                id: t.transaction.id.clone(),
                employee: t.transaction.employee.clone(),
                amount: t.transaction.amount,
                description: t.transaction.description.clone(),
                first_violation: t
                    .violations
                    .first()
                    .map(|v| v.description.clone())
                    .unwrap_or_default(),
            })
            .collect(),
        fraud_alerts: state
            .fraud_alerts
            .iter()
            .take(MAX_FRAUD_ALERTS)
            .map(|a| FraudAlertEvidence {
                kind: a.kind.clone(),
                severity: a.severity.to_string(),
                employee: a.employee.clone(),
                total_amount: a.total_amount,
                description: a.description.clone(),
            })
            .collect(),
        stats: EvidenceStats {
            policy_excerpts: state.policy_context.len(),
            emails: state.email_results.len(),
            transactions: state.transaction_results.len(),
            transactions_with_violations: violated.len(),
            fraud_alerts: state.fraud_alerts.len(),
        },
    }
}

/// Plain-text summary of what was consulted; usable standalone when
/// narrative generation fails.
pub fn plain_summary(state: &SharedState) -> String {
    let mut parts = Vec::new();

    let visited: Vec<&str> = state.nodes_visited.iter().map(|n| n.as_str()).collect();
    parts.push(format!("Sources consulted: {}", visited.join(" -> ")));

    let mut stats = Vec::new();
    if !state.policy_context.is_empty() {
        stats.push(format!("{} policy excerpts", state.policy_context.len()));
    }
    if !state.email_results.is_empty() {
        stats.push(format!("{} emails", state.email_results.len()));
    }
    if !state.transaction_results.is_empty() {
        stats.push(format!("{} transactions", state.transaction_results.len()));
    }
    if !state.fraud_alerts.is_empty() {
        stats.push(format!("{} fraud alerts", state.fraud_alerts.len()));
    }

    if stats.is_empty() {
        parts.push("Evidence collected: none".to_string());
    } else {
        parts.push(format!("Evidence collected: {}", stats.join(", ")));
    }

    if let Some(error) = &state.error {
        parts.push(format!("Warning: {error}"));
    }

    parts.join("\n")
}

/// Templated markdown answer used whenever the narrator fails or returns
/// nothing usable.
pub fn fallback_answer(state: &SharedState) -> String {
    let mut out = String::new();
    out.push_str("## Audit result\n\n");
    out.push_str(&format!("**Query:** {}\n", state.query));

    if !state.fraud_alerts.is_empty() {
        out.push_str(&format!(
            "\n### Fraud alerts ({})\n",
            state.fraud_alerts.len()
        ));
        for alert in state.fraud_alerts.iter().take(MAX_FRAUD_ALERTS) {
            out.push_str(&format!(
                "- **{}** [{}] {}: {} (${:.2})\n",
                alert.kind, alert.severity, alert.employee, alert.description, alert.total_amount
            ));
        }
    }

    let violated: Vec<_> = state
        .violated_transactions()
        .take(MAX_VIOLATED_TRANSACTIONS)
        .collect();
    if !violated.is_empty() {
        out.push_str(&format!(
            "\n### Transactions with violations ({})\n",
            state.violated_transactions().count()
        ));
        for finding in violated {
            out.push_str(&format!(
                "- **{}** {}: ${:.2}, {}\n",
                finding.transaction.id,
                finding.transaction.employee,
                finding.transaction.amount,
                finding.transaction.description
            ));
        }
    }

    if state.fraud_alerts.is_empty() && state.violated_transactions().count() == 0 {
        out.push_str("\nNo violations or alerts were found for this query.\n");
    }

    out.push_str(&format!("\n---\n{}\n", plain_summary(state)));
    out
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let prefix = crate::corpus::chunker::truncate_chars(text, max_chars);
    if prefix.len() < text.len() {
        format!("{prefix}...")
    } else {
        prefix.to_string()
    }
}
