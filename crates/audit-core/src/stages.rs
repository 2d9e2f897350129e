//! Per-node stage behavior. Each stage reads the shared state and returns a
//! partial update; it never mutates the state directly.

use crate::corpus::{Email, Transaction};
use crate::error::AuditError;
use crate::evidence;
use crate::graph::{AuditContext, NodeKind};
use crate::rules::{Severity, SMURFING_THRESHOLD};
use crate::state::{FraudAlert, SharedState, StateUpdate, TransactionFinding};
use anyhow::Result;
use std::collections::HashSet;

/// Entity searches fan out over at most this many entities.
const MAX_ENTITY_SEARCHES: usize = 3;
const ENTITY_SEARCH_K: usize = 2;
const MAX_EMAIL_RESULTS: usize = 10;
const MAX_TRANSACTION_RESULTS: usize = 30;
/// For fraud queries the sweep also pulls higher-value transactions.
const FRAUD_SWEEP_FLOOR: f64 = 200.0;
const FRAUD_SWEEP_TARGET: usize = 20;

// First names that show up in the corpora; used to decide whether an entity
// is worth a person-scoped search.
const KNOWN_NAMES: &[&str] = &[
    "michael", "dwight", "jim", "pam", "ryan", "angela", "kevin", "oscar", "stanley", "phyllis",
    "andy", "creed", "meredith", "kelly", "toby", "jan", "david", "holly",
];

pub(crate) async fn run_stage(
    ctx: &AuditContext,
    node: NodeKind,
    state: &SharedState,
) -> Result<StateUpdate> {
    match node {
        NodeKind::Router => router_stage(ctx, state).await,
        NodeKind::PolicyRetrieval => policy_stage(ctx, state).await,
        NodeKind::EmailRetrieval => email_stage(ctx, state).await,
        NodeKind::TransactionRetrieval => transaction_stage(ctx, state),
        NodeKind::FraudCorrelation => Ok(fraud_stage(ctx, state)),
        NodeKind::Synthesis => synthesis_stage(ctx, state).await,
    }
}

/// Classifies the query. On failure the runner records the error and the
/// state keeps its `general` default, so the walk still reaches Synthesis.
async fn router_stage(ctx: &AuditContext, state: &SharedState) -> Result<StateUpdate> {
    let classification = ctx
        .classifier
        .classify(&state.query)
        .await
        .map_err(|e| AuditError::Classification(format!("{e:#}")))?;

    Ok(StateUpdate {
        query_type: Some(classification.query_type),
        entities: Some(classification.entities),
        nodes_visited: vec![NodeKind::Router],
        ..StateUpdate::default()
    })
}

/// Always the first retrieval stage: every answer carries policy grounding.
async fn policy_stage(ctx: &AuditContext, state: &SharedState) -> Result<StateUpdate> {
    let k = ctx.config.retriever_k;
    let mut hits = ctx
        .policy_index
        .search(&state.query, k)
        .await
        .map_err(|e| AuditError::Retrieval(format!("{e:#}")))?;

    for entity in state.entities.iter().take(MAX_ENTITY_SEARCHES) {
        let extra = ctx
            .policy_index
            .search(entity, ENTITY_SEARCH_K)
            .await
            .map_err(|e| AuditError::Retrieval(format!("{e:#}")))?;
        hits.extend(extra);
    }

    // Dedup by chunk identity, first occurrence wins
    let mut seen = HashSet::new();
    let mut context = Vec::new();
    let mut sections = Vec::new();
    for hit in hits {
        if seen.insert(hit.chunk.sequence) {
            if !sections.contains(&hit.chunk.section_title) {
                sections.push(hit.chunk.section_title.clone());
            }
            context.push(hit.chunk.text);
        }
    }

    Ok(StateUpdate {
        policy_context: context,
        policy_sections: sections,
        nodes_visited: vec![NodeKind::PolicyRetrieval],
        ..StateUpdate::default()
    })
}

async fn email_stage(ctx: &AuditContext, state: &SharedState) -> Result<StateUpdate> {
    let mut update = StateUpdate {
        nodes_visited: vec![NodeKind::EmailRetrieval],
        ..StateUpdate::default()
    };

    let mut seen_lines = HashSet::new();
    let mut emails: Vec<Email> = Vec::new();

    match indexed_email_search(ctx, state).await {
        Ok(found) => {
            for email in found {
                if seen_lines.insert(email.source_line) {
                    emails.push(email);
                }
            }
        }
        Err(e) => {
            // Degraded path: the parser still works when the index does not
            update.error = Some(AuditError::Retrieval(format!("{e:#}")).to_string());
            for entity in person_entities(&state.entities) {
                for email in ctx.email_parser.search_by_person(&entity) {
                    if seen_lines.insert(email.source_line) {
                        emails.push(email.clone());
                    }
                }
            }
        }
    }

    emails.truncate(MAX_EMAIL_RESULTS);
    update.email_results = emails;
    Ok(update)
}

async fn indexed_email_search(ctx: &AuditContext, state: &SharedState) -> Result<Vec<Email>> {
    let k = ctx.config.retriever_k;
    let mut found: Vec<Email> = ctx
        .email_index
        .search(&state.query, k)
        .await?
        .into_iter()
        .map(|hit| hit.email)
        .collect();

    for entity in person_entities(&state.entities) {
        let hits = ctx
            .email_index
            .search_by_entity(&state.query, &entity, ctx.config.retriever_k)
            .await?;
        found.extend(hits.into_iter().map(|hit| hit.email));
    }

    Ok(found)
}

/// Selects relevant ledger rows and runs the rule engine over each.
fn transaction_stage(ctx: &AuditContext, state: &SharedState) -> Result<StateUpdate> {
    let ledger = &ctx.ledger;

    let mut seen = HashSet::new();
    let mut selected: Vec<Transaction> = Vec::new();

    for entity in person_entities(&state.entities) {
        for tx in ledger.search_by_employee(&entity) {
            if seen.insert(tx.id.clone()) {
                selected.push(tx.clone());
            }
        }
    }

    // Fraud sweeps also look at everything expensive
    if state.query_type == crate::collaborators::QueryType::Fraud
        && selected.len() < FRAUD_SWEEP_TARGET
    {
        for tx in ledger.high_value(FRAUD_SWEEP_FLOOR).into_iter().take(FRAUD_SWEEP_TARGET) {
            if seen.insert(tx.id.clone()) {
                selected.push(tx.clone());
            }
        }
    }

    if selected.is_empty() {
        selected = ledger
            .transactions()
            .iter()
            .take(MAX_TRANSACTION_RESULTS)
            .cloned()
            .collect();
    }
    selected.truncate(MAX_TRANSACTION_RESULTS);

    let findings: Vec<TransactionFinding> = selected
        .into_iter()
        .map(|tx| TransactionFinding {
            violations: ctx.rules.evaluate(&tx),
            transaction: tx,
        })
        .collect();

    // Rows the ledger had to skip are surfaced as a rule-evaluation error
    let error = ledger
        .parse_errors()
        .last()
        .map(|e| AuditError::RuleEvaluation(e.clone()).to_string());

    Ok(StateUpdate {
        transaction_results: findings,
        transactions_analyzed: Some(ledger.len()),
        nodes_visited: vec![NodeKind::TransactionRetrieval],
        error,
        ..StateUpdate::default()
    })
}

/// Deterministic cross-record correlation: smurfing groups plus per-employee
/// aggregation of severe violations, with email lines attached as evidence.
fn fraud_stage(ctx: &AuditContext, state: &SharedState) -> StateUpdate {
    let transactions: Vec<Transaction> = state
        .transaction_results
        .iter()
        .map(|f| f.transaction.clone())
        .collect();

    let mut alerts: Vec<FraudAlert> = Vec::new();

    // 1. Same-day smurfing sweep, one probe per (employee, date) group
    let mut probed = HashSet::new();
    for finding in &state.transaction_results {
        let tx = &finding.transaction;
        if !probed.insert((tx.employee.to_lowercase(), tx.date)) {
            continue;
        }
        let hits =
            ctx.rules
                .detect_smurfing(&transactions, &tx.employee, tx.date, SMURFING_THRESHOLD);
        if hits.is_empty() {
            continue;
        }

        let ids: Vec<String> = hits.iter().map(|(id, _)| id.clone()).collect();
        let total: f64 = transactions
            .iter()
            .filter(|t| ids.contains(&t.id))
            .map(|t| t.amount)
            .sum();
        alerts.push(FraudAlert {
            kind: "smurfing".to_string(),
            severity: Severity::Critical,
            employee: tx.employee.clone(),
            description: hits[0].1.description.clone(),
            evidence_transaction_ids: ids,
            evidence_email_lines: email_evidence_lines(&state.email_results, &tx.employee),
            total_amount: total,
            rule_ref: hits[0].1.rule_ref.clone(),
        });
    }

    // 2. Employees with high/critical per-record violations
    let mut grouped: Vec<String> = Vec::new();
    for finding in state.transaction_results.iter().filter(|f| {
        f.violations
            .iter()
            .any(|v| v.severity >= Severity::High)
    }) {
        let employee = finding.transaction.employee.clone();
        if grouped.contains(&employee) {
            continue;
        }
        grouped.push(employee.clone());

        let implicated: Vec<&TransactionFinding> = state
            .transaction_results
            .iter()
            .filter(|f| {
                f.transaction.employee == employee
                    && f.violations.iter().any(|v| v.severity >= Severity::High)
            })
            .collect();

        let Some(worst) = implicated
            .iter()
            .flat_map(|f| f.violations.iter())
            .max_by_key(|v| v.severity)
        else {
            continue;
        };

        let ids: Vec<String> = implicated.iter().map(|f| f.transaction.id.clone()).collect();
        let total: f64 = implicated.iter().map(|f| f.transaction.amount).sum();

        alerts.push(FraudAlert {
            kind: worst.kind.as_str().to_string(),
            severity: worst.severity,
            employee: employee.clone(),
            description: format!(
                "{} transaction(s) by {} violating {}: {}",
                implicated.len(),
                employee,
                worst.rule_ref,
                worst.description
            ),
            evidence_transaction_ids: ids,
            evidence_email_lines: email_evidence_lines(&state.email_results, &employee),
            total_amount: total,
            rule_ref: worst.rule_ref.clone(),
        });
    }

    StateUpdate {
        fraud_alerts: alerts,
        nodes_visited: vec![NodeKind::FraudCorrelation],
        ..StateUpdate::default()
    }
}

/// Builds the capped evidence payload and asks the narrator for the final
/// answer, falling back to the templated summary on any unusable output.
async fn synthesis_stage(ctx: &AuditContext, state: &SharedState) -> Result<StateUpdate> {
    let payload = evidence::build_payload(state);
    let mut update = StateUpdate {
        evidence_summary: Some(evidence::plain_summary(state)),
        nodes_visited: vec![NodeKind::Synthesis],
        ..StateUpdate::default()
    };

    match ctx.narrator.generate(&payload).await {
        Ok(text) if !text.trim().is_empty() => {
            update.final_response = Some(text);
        }
        Ok(_) => {
            update.final_response = Some(evidence::fallback_answer(state));
            update.error =
                Some(AuditError::NarrativeGeneration("empty narrator output".into()).to_string());
        }
        Err(e) => {
            update.final_response = Some(evidence::fallback_answer(state));
            update.error = Some(AuditError::NarrativeGeneration(format!("{e:#}")).to_string());
        }
    }

    Ok(update)
}

/// Emails naming the employee (first name is enough), as citation lines.
fn email_evidence_lines(emails: &[Email], employee: &str) -> Vec<usize> {
    let first_name = employee
        .split_whitespace()
        .next()
        .unwrap_or(employee)
        .to_lowercase();
    emails
        .iter()
        .filter(|e| {
            e.from.to_lowercase().contains(&first_name)
                || e.to.to_lowercase().contains(&first_name)
                || e.body.to_lowercase().contains(&first_name)
        })
        .map(|e| e.source_line)
        .collect()
}

fn person_entities(entities: &[String]) -> Vec<String> {
    entities
        .iter()
        .filter(|e| is_person_name(e))
        .cloned()
        .collect()
}

/// Cheap heuristic for "this entity is a person, search by them".
fn is_person_name(entity: &str) -> bool {
    if entity.is_empty() {
        return false;
    }
    let lower = entity.to_lowercase();
    if KNOWN_NAMES.iter().any(|name| lower.contains(name)) {
        return true;
    }
    entity.chars().next().is_some_and(|c| c.is_uppercase())
        && !entity.chars().any(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn person_heuristic_accepts_names_and_rejects_amounts() {
        assert!(is_person_name("Ryan"));
        assert!(is_person_name("dwight schrute"));
        assert!(is_person_name("Unknown Person"));
        assert!(!is_person_name("$700"));
        assert!(!is_person_name("2024-03-10"));
        assert!(!is_person_name(""));
    }

    #[test]
    fn email_evidence_matches_on_first_name() {
        let emails = vec![
            Email {
                from: "Ryan Howard <ryan@dm.com>".into(),
                to: "Kelly <kelly@dm.com>".into(),
                date: "2024-03-10".into(),
                subject: "WUPHF".into(),
                body: "aporte".into(),
                source_line: 12,
            },
            Email {
                from: "Angela <angela@dm.com>".into(),
                to: "Oscar <oscar@dm.com>".into(),
                date: "2024-03-11".into(),
                subject: "Relatório".into(),
                body: "recibos".into(),
                source_line: 40,
            },
        ];
        assert_eq!(email_evidence_lines(&emails, "Ryan Howard"), vec![12]);
        assert!(email_evidence_lines(&emails, "Stanley Hudson").is_empty());
    }
}
