use audit_core::progress::ProgressEvent;
use audit_core::{AuditConfig, AuditContext, AuditError, SharedState};
use hawkeye::collaborators::{HashEmbedder, KeywordClassifier, OllamaClient, TemplateNarrator};
use std::io::{BufRead, Write};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let offline = args.iter().any(|a| a == "--offline")
        || std::env::var("AUDIT_OFFLINE").is_ok_and(|v| v == "1");
    let rebuild = args.iter().any(|a| a == "--rebuild");
    let stats = args.iter().any(|a| a == "--stats");
    let query = args
        .iter()
        .position(|a| a == "--query" || a == "-q")
        .and_then(|i| args.get(i + 1))
        .cloned();

    let config = AuditConfig::from_env();

    let context = match build_context(config, offline).await {
        Ok(context) => context,
        Err(e @ AuditError::Configuration(_)) => {
            // Fatal precondition: refuse to accept queries at all
            eprintln!("cannot start: {e}");
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    println!("hawkeye audit engine ({} mode)", if offline { "offline" } else { "ollama" });
    tracing::info!(
        policy_chunks = context.policy_index.chunk_count(),
        email_chunks = context.email_index.chunk_count(),
        "corpora ready"
    );

    if rebuild {
        println!("rebuilding indices...");
        context.policy_index.rebuild().await?;
        context.email_index.rebuild().await?;
    }

    if stats {
        println!(
            "policy chunks: {}\nemail chunks: {}\nledger rows: {}",
            context.policy_index.chunk_count(),
            context.email_index.chunk_count(),
            context.ledger.len(),
        );
        println!("spend by employee:");
        for (employee, total) in context.ledger.totals_by_employee() {
            println!("  {employee}: ${total:.2}");
        }
        if !rebuild && query.is_none() {
            return Ok(());
        }
    }

    // Progress lines go to stderr so stdout stays clean for answers
    let mut progress = context.subscribe_progress();
    tokio::spawn(async move {
        while let Ok(event) = progress.recv().await {
            match event {
                ProgressEvent::StageStarted { node, .. } => eprintln!("  .. {node}"),
                ProgressEvent::StageFailed { node, error, .. } => {
                    eprintln!("  !! {node}: {error}")
                }
                _ => {}
            }
        }
    });

    if let Some(query) = query {
        let state = context.run_query(&query).await;
        print_result(&state);
        return Ok(());
    }

    // Interactive loop
    let stdin = std::io::stdin();
    loop {
        print!("audit> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }
        let state = context.run_query(line).await;
        print_result(&state);
    }

    Ok(())
}

async fn build_context(config: AuditConfig, offline: bool) -> Result<AuditContext, AuditError> {
    if offline {
        AuditContext::new(
            config,
            Arc::new(KeywordClassifier),
            Arc::new(HashEmbedder::default()),
            Arc::new(TemplateNarrator),
        )
        .await
    } else {
        let ollama = Arc::new(OllamaClient::from_env());
        AuditContext::new(config, ollama.clone(), ollama.clone(), ollama).await
    }
}

fn print_result(state: &SharedState) {
    println!("\n{}", state.final_response);
    println!("---");
    println!("{}\n", state.evidence_summary);
}
