//! Chain Sleuth - strategy-driven address investigation over block explorers

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use chain_sleuth::{
    Investigation, StrategyId,
    automation::{Automation, HttpAutomation, ScriptedAutomation},
    classify,
    cli::{Cli, Command},
    config::Config,
    events::{EventEnvelope, InvestigationEvent},
    setup_tracing,
    strategy::catalog,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Classify { address } => run_classify(&address),
        Command::Resolve { chain, category } => run_resolve(config_path, &chain, &category),
        Command::Explorers => run_explorers(config_path),
        Command::Strategies => run_strategies(),
        Command::Investigate {
            address,
            strategies,
            limit,
            fixture,
            output,
            json,
        } => {
            let options = InvestigateOptions {
                strategies,
                limit,
                fixture,
                output,
                json,
            };
            match run_investigate(config_path, &address, options).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("Investigation failed: {e:#}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

fn load_config(path: Option<&Path>) -> Option<Config> {
    match Config::load(path) {
        Ok(config) => Some(config),
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            None
        }
    }
}

fn run_classify(address: &str) -> ExitCode {
    let classification = classify(address);
    println!("Family: {}", classification.family);
    if classification.strategies.is_empty() {
        println!("No applicable strategies");
        return ExitCode::SUCCESS;
    }
    println!("Strategies:");
    for id in &classification.strategies {
        println!("  {:<22} {}", id.as_str(), catalog::definition(*id).name);
    }
    ExitCode::SUCCESS
}

fn run_resolve(config_path: Option<&Path>, chain: &str, category: &str) -> ExitCode {
    let Some(config) = load_config(config_path) else {
        return ExitCode::FAILURE;
    };
    let registry = match config.explorers.load_registry() {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Failed to load explorer registry: {e}");
            return ExitCode::FAILURE;
        }
    };

    match registry.resolve_named(chain, category) {
        Ok(explorer) => {
            println!("{} ({})", explorer.name, explorer.url);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run_explorers(config_path: Option<&Path>) -> ExitCode {
    let Some(config) = load_config(config_path) else {
        return ExitCode::FAILURE;
    };
    let registry = match config.explorers.load_registry() {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Failed to load explorer registry: {e}");
            return ExitCode::FAILURE;
        }
    };

    for explorer in registry.explorers() {
        println!(
            "{:<24} {:<14} {:<10} {}",
            explorer.name,
            explorer.category.as_str(),
            explorer.chain.as_deref().unwrap_or("*"),
            explorer.url
        );
    }
    ExitCode::SUCCESS
}

fn run_strategies() -> ExitCode {
    for def in catalog::catalog() {
        let scope = if def.id.is_chain_agnostic() {
            "any chain"
        } else {
            "ethereum"
        };
        println!(
            "{:<22} {:<28} {:<10} {}",
            def.id.as_str(),
            def.name,
            scope,
            def.description
        );
    }
    ExitCode::SUCCESS
}

struct InvestigateOptions {
    strategies: Vec<String>,
    limit: Option<usize>,
    fixture: Option<PathBuf>,
    output: Option<PathBuf>,
    json: bool,
}

async fn run_investigate(
    config_path: Option<&Path>,
    address: &str,
    options: InvestigateOptions,
) -> anyhow::Result<()> {
    let config = Config::load(config_path).context("loading configuration")?;

    let requested = options
        .strategies
        .iter()
        .map(|s| s.parse::<StrategyId>().map_err(anyhow::Error::msg))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let automation: Arc<dyn Automation> = match &options.fixture {
        Some(path) => {
            info!(fixture = %path.display(), "Replaying recorded site fixture");
            Arc::new(
                ScriptedAutomation::from_fixture_file(path)
                    .with_context(|| format!("loading fixture {}", path.display()))?,
            )
        }
        None => Arc::new(
            HttpAutomation::new(&config.automation).context("building automation client")?,
        ),
    };

    let mut investigation = Investigation::from_config(&config, automation)?;
    if let Some(limit) = options.limit {
        investigation = investigation.with_limit(limit);
    }
    let investigation = Arc::new(investigation);

    let classification = investigation.submit(address)?;
    if requested.is_empty() {
        let added = investigation.add_applicable_strategies()?;
        if added.is_empty() {
            bail!("no strategies apply to {} addresses", classification.family);
        }
    } else {
        for id in requested {
            investigation.add_strategy(id)?;
        }
    }

    let mut events = investigation.events().subscribe();
    investigation.start()?;

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(envelope) => {
                    print_event(&envelope, options.json)?;
                    if matches!(envelope.event, InvestigationEvent::InvestigationCompleted { .. }) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event output fell behind"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping investigation");
                investigation.stop();
                break;
            }
        }
    }

    if let Some(path) = options.output {
        let snapshot = investigation.snapshot();
        let body = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "Graph snapshot written");
    }

    Ok(())
}

fn print_event(envelope: &EventEnvelope, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(envelope)?);
        return Ok(());
    }

    let line = match &envelope.event {
        InvestigationEvent::StateChanged { from, to } => format!("state {from} -> {to}"),
        InvestigationEvent::StrategyStarted { strategy } => format!("[{strategy}] started"),
        InvestigationEvent::StepStarted { strategy, step } => format!("[{strategy}] {step}"),
        InvestigationEvent::StepLog { strategy: Some(s), message } => format!("[{s}] {message}"),
        InvestigationEvent::StepLog { strategy: None, message } => message.clone(),
        InvestigationEvent::TransactionsFound {
            strategy,
            explorer,
            count,
            total,
        } => format!("[{strategy}] {count} transactions from {explorer} ({total} seen)"),
        InvestigationEvent::CategorizationComplete {
            strategy,
            categorized,
            failed,
        } => format!("[{strategy}] categorized {categorized} addresses ({failed} failed)"),
        InvestigationEvent::StrategyCompleted {
            strategy,
            status,
            discovered,
            error,
        } => match error {
            Some(error) => format!("[{strategy}] {status}: {error}"),
            None => format!("[{strategy}] {status}, {discovered} addresses discovered"),
        },
        InvestigationEvent::InvestigationCompleted {
            completed,
            failed,
            nodes,
            edges,
        } => format!(
            "investigation completed: {completed} strategies succeeded, {failed} failed, \
             graph has {nodes} nodes and {edges} edges"
        ),
        InvestigationEvent::Error {
            strategy: Some(s),
            message,
        } => format!("[{s}] error: {message}"),
        InvestigationEvent::Error {
            strategy: None,
            message,
        } => format!("error: {message}"),
    };
    println!("{:>4} {} {line}", envelope.seq, envelope.timestamp.format("%H:%M:%S"));
    Ok(())
}
