//! The `replicore` binary: a one-shot rule runner, a rule validator, and the
//! demonstration HTTP server, all driven by the same scheduler.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use replicore::cli::{ReplicoreArgs, ReplicoreSubcommand, RunSpec};
use replicore::config::GlobalConfig;
use replicore::model::{ProgressPhase, ReplicationRule};
use replicore::scheduler::{Scheduler, SqliteExecutionStore};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = ReplicoreArgs::parse();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match args.subcommand {
        ReplicoreSubcommand::Run { spec_file } => run_one_shot(spec_file).await,
        ReplicoreSubcommand::Validate { rule_file } => validate_rule(rule_file),
        ReplicoreSubcommand::Serve { config } => serve(config).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_one_shot(spec_file: std::path::PathBuf) -> replicore::ReplicoreResult<ExitCode> {
    let raw = std::fs::read_to_string(&spec_file)?;
    let spec: RunSpec = serde_json::from_str(&raw)?;
    spec.rule.validate()?;

    let store = Arc::new(SqliteExecutionStore::connect(":memory:").await?);
    let scheduler = Arc::new(Scheduler::new(store, GlobalConfig::default().concurrency));
    let mut progress = scheduler.subscribe();

    let execution_id = scheduler.execute_rule(spec.rule, spec.source, spec.target).await?;
    eprintln!("started execution {execution_id}");

    loop {
        match progress.recv().await {
            Ok(event) if event.execution_id == execution_id => {
                eprintln!(
                    "[{}] synced={} skipped={} failed={} total={}",
                    Scheduler::progress_phase_name(event.phase),
                    event.counters.synced_blobs,
                    event.counters.skipped_blobs,
                    event.counters.failed_blobs,
                    event.counters.total_blobs,
                );
                if event.phase == ProgressPhase::Complete {
                    break;
                }
            }
            Ok(_) => continue,
            Err(_) => break,
        }
    }

    for entry in scheduler.tail_log(&execution_id).await? {
        eprintln!("{:?} {}: {}", entry.level, entry.timestamp, entry.message);
    }

    replicore::Ok(ExitCode::SUCCESS)
}

fn validate_rule(rule_file: std::path::PathBuf) -> replicore::ReplicoreResult<ExitCode> {
    let raw = std::fs::read_to_string(&rule_file)?;
    let rule: ReplicationRule = serde_json::from_str(&raw)?;

    match rule.validate() {
        Ok(()) => {
            println!("rule '{}' is valid", rule.get_id());
            replicore::Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("{e}");
            replicore::Ok(ExitCode::FAILURE)
        }
    }
}

async fn serve(config_path: Option<std::path::PathBuf>) -> replicore::ReplicoreResult<ExitCode> {
    let config = match config_path {
        Some(path) => GlobalConfig::load(path)?,
        None => GlobalConfig::default(),
    };
    config.validate()?;

    let store = Arc::new(SqliteExecutionStore::connect(&config.sqlite_path).await?);
    let scheduler = Arc::new(Scheduler::new(store, config.concurrency));
    let state = replicore::server::ServerState::new(scheduler);
    let router = replicore::server::create_router(state);

    tracing::info!(addr = %config.bind_addr, "starting replicore server");
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, router).await?;

    replicore::Ok(ExitCode::SUCCESS)
}
