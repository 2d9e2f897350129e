//! Full pipeline runs over temp corpora with the offline collaborators.

use anyhow::{bail, Result};
use async_trait::async_trait;
use audit_core::collaborators::{Classification, Classifier};
use audit_core::rules::{Severity, ViolationKind};
use audit_core::{AuditConfig, AuditContext, AuditError, NodeKind, QueryType};
use hawkeye::collaborators::{HashEmbedder, KeywordClassifier, TemplateNarrator};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn write_corpora(dir: &Path) -> AuditConfig {
    let config = AuditConfig::new(dir, dir.join("storage"));

    let rule = "=".repeat(78);
    std::fs::write(
        &config.policy_file,
        format!(
            "SEÇÃO 1: LIMITES DE ALÇADA\n\
             Categoria B: despesas até $500.00 exigem aprovação do gerente.\n\
             Categoria A: acima de $500.00, exige pedido de compra aprovado pelo CFO.\n\
             {rule}\n\
             SEÇÃO 3: ITENS PROIBIDOS\n\
             Investimentos em negócios paralelos de funcionários são proibidos.\n"
        ),
    )
    .unwrap();

    let dash = "-".repeat(79);
    std::fs::write(
        &config.emails_file,
        format!(
            "{dash}\n\
             De: Ryan Howard <ryan@dundermifflin.com>\n\
             Para: Kelly Kapoor <kelly@dundermifflin.com>\n\
             Data: 2024-03-14 18:40\n\
             Assunto: meu projeto\n\
             Mensagem:\n\
             O WUPHF vai mudar tudo. Consegui pagar a assinatura pelo cartão corporativo.\n\
             {dash}\n\
             De: Angela Martin <angela@dundermifflin.com>\n\
             Para: Oscar Martinez <oscar@dundermifflin.com>\n\
             Data: 2024-03-15 08:12\n\
             Assunto: auditoria trimestral\n\
             Mensagem:\n\
             Precisamos fechar os números até sexta.\n\
             {dash}\n"
        ),
    )
    .unwrap();

    std::fs::write(
        &config.transactions_file,
        "id_transacao,data,funcionario,cargo,descricao,valor,categoria,departamento\n\
         TX-101,2024-03-15,Ryan Howard,Temp,Assinatura WUPHF premium,700.00,Tecnologia,Vendas\n\
         TX-102,2024-03-15,Pam Beesly,Recepcionista,Material de escritório,35.00,Suprimentos,Recepção\n\
         TX-201,2024-03-16,Dwight Schrute,Vendedor,Equipamento agrícola A,250.00,Equipamentos,Vendas\n\
         TX-202,2024-03-16,Dwight Schrute,Vendedor,Equipamento agrícola B,250.00,Equipamentos,Vendas\n\
         TX-203,2024-03-16,Dwight Schrute,Vendedor,Equipamento agrícola C,250.00,Equipamentos,Vendas\n",
    )
    .unwrap();

    config
}

async fn offline_context(config: AuditConfig) -> AuditContext {
    AuditContext::new(
        config,
        Arc::new(KeywordClassifier),
        Arc::new(HashEmbedder::default()),
        Arc::new(TemplateNarrator),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn fraud_query_correlates_emails_and_transactions() {
    let dir = TempDir::new().unwrap();
    let context = offline_context(write_corpora(dir.path())).await;

    let state = context
        .run_query("Investigue possível fraude do Ryan com gastos da empresa")
        .await;

    assert_eq!(state.query_type, QueryType::Fraud);
    assert_eq!(
        state.nodes_visited,
        vec![
            NodeKind::Router,
            NodeKind::PolicyRetrieval,
            NodeKind::EmailRetrieval,
            NodeKind::TransactionRetrieval,
            NodeKind::FraudCorrelation,
            NodeKind::Synthesis,
        ]
    );

    // The correlation stage saw Ryan's email...
    assert!(state
        .email_results
        .iter()
        .any(|e| e.from.contains("Ryan Howard") && e.body.contains("WUPHF")));

    // ...and the $700 transaction, flagged independently by the value rule
    // and the banned-keyword rule before any fraud-specific logic
    let finding = state
        .transaction_results
        .iter()
        .find(|f| f.transaction.id == "TX-101")
        .expect("TX-101 must be selected");
    assert!(finding
        .violations
        .iter()
        .any(|v| v.kind == ViolationKind::LimitExceeded));
    assert!(finding
        .violations
        .iter()
        .any(|v| v.kind == ViolationKind::BannedItem && v.rule_ref == "Seção 3.3"));

    // Ryan gets an alert citing the transaction and the email line
    let ryan_alert = state
        .fraud_alerts
        .iter()
        .find(|a| a.employee == "Ryan Howard")
        .expect("alert for Ryan");
    assert!(ryan_alert
        .evidence_transaction_ids
        .contains(&"TX-101".to_string()));
    assert!(!ryan_alert.evidence_email_lines.is_empty());
    assert!(ryan_alert.severity >= Severity::High);

    // Dwight's same-day split purchases surface as smurfing
    let smurfing = state
        .fraud_alerts
        .iter()
        .find(|a| a.kind == "smurfing")
        .expect("smurfing alert");
    assert_eq!(smurfing.evidence_transaction_ids.len(), 3);
    assert_eq!(smurfing.severity, Severity::Critical);
    assert!((smurfing.total_amount - 750.0).abs() < 1e-6);

    assert!(!state.final_response.is_empty());
    assert!(!state.evidence_summary.is_empty());
}

struct FailingClassifier;

#[async_trait]
impl Classifier for FailingClassifier {
    async fn classify(&self, _query: &str) -> Result<Classification> {
        bail!("model server unreachable")
    }
}

#[tokio::test]
async fn classifier_failure_degrades_to_general_and_still_synthesizes() {
    let dir = TempDir::new().unwrap();
    let context = AuditContext::new(
        write_corpora(dir.path()),
        Arc::new(FailingClassifier),
        Arc::new(HashEmbedder::default()),
        Arc::new(TemplateNarrator),
    )
    .await
    .unwrap();

    let state = context.run_query("qualquer coisa").await;

    assert_eq!(state.query_type, QueryType::General);
    assert_eq!(state.nodes_visited.last(), Some(&NodeKind::Synthesis));
    assert!(state.error.as_deref().is_some_and(|e| e.contains("classification")));
    assert!(!state.final_response.is_empty());
}

struct SlowClassifier;

#[async_trait]
impl Classifier for SlowClassifier {
    async fn classify(&self, _query: &str) -> Result<Classification> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Classification::general())
    }
}

#[tokio::test]
async fn timed_out_stage_contributes_an_empty_update_and_the_walk_continues() {
    let dir = TempDir::new().unwrap();
    let mut config = write_corpora(dir.path());
    config.stage_timeout = Duration::from_millis(100);

    let context = AuditContext::new(
        config,
        Arc::new(SlowClassifier),
        Arc::new(HashEmbedder::default()),
        Arc::new(TemplateNarrator),
    )
    .await
    .unwrap();

    let state = context.run_query("demorada").await;

    assert_eq!(state.query_type, QueryType::General);
    assert!(state.error.as_deref().is_some_and(|e| e.contains("timed out")));
    assert_eq!(state.nodes_visited.last(), Some(&NodeKind::Synthesis));
}

#[tokio::test]
async fn missing_corpus_file_is_fatal_at_startup() {
    let dir = TempDir::new().unwrap();
    let config = write_corpora(dir.path());
    std::fs::remove_file(&config.transactions_file).unwrap();

    let result = AuditContext::new(
        config,
        Arc::new(KeywordClassifier),
        Arc::new(HashEmbedder::default()),
        Arc::new(TemplateNarrator),
    )
    .await;

    match result {
        Err(AuditError::Configuration(msg)) => {
            assert!(msg.contains("transacoes_bancarias.csv"))
        }
        Err(e) => panic!("expected a configuration error, got {e}"),
        Ok(_) => panic!("context must not build without the ledger"),
    }
}

#[tokio::test]
async fn policy_query_skips_record_stages_but_keeps_grounding() {
    let dir = TempDir::new().unwrap();
    let context = offline_context(write_corpora(dir.path())).await;

    let state = context
        .run_query("qual o limite da categoria b na politica?")
        .await;

    assert_eq!(state.query_type, QueryType::Policy);
    assert_eq!(
        state.nodes_visited,
        vec![
            NodeKind::Router,
            NodeKind::PolicyRetrieval,
            NodeKind::Synthesis,
        ]
    );
    assert!(state
        .policy_context
        .iter()
        .any(|c| c.to_lowercase().contains("categoria b")));
    assert!(state.transaction_results.is_empty());
    assert!(state.fraud_alerts.is_empty());
}
