//! Command-line interface for socflow.
//!
//! Provides commands for running the triage pipeline over a capture file,
//! browsing committed reports, and checking collaborator health.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::{
    generator_for, HistoryRetriever, JsonlSink, LlmJudge, RuleRetriever, ThresholdDetector,
    TracingObserver,
};
use crate::config::PipelineConfig;
use crate::core::{Collaborators, Runtime, RunOutcome};

/// socflow - event-driven triage pipeline for network anomaly reports
#[derive(Parser, Debug)]
#[command(name = "socflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.socflow/config.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline over a raw flow-log capture
    Run {
        /// Input file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Override the run deadline in seconds
        #[arg(long)]
        timeout_seconds: Option<u64>,
    },

    /// Show recently committed incident reports
    History {
        /// Maximum number of reports to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Check collaborator health (LLM backend, knowledge base, report pool)
    Doctor,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = PipelineConfig::load(self.config.as_deref())?;

        match self.command {
            Commands::Run {
                input,
                timeout_seconds,
            } => run_pipeline(&config, input, timeout_seconds).await,
            Commands::History { limit } => show_history(&config, limit).await,
            Commands::Doctor => doctor(&config).await,
            Commands::Config => {
                println!("{config:#?}");
                Ok(())
            }
        }
    }
}

fn read_input(input: Option<PathBuf>) -> Result<String> {
    match input {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read input file: {}", path.display())),
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read from stdin")?;
            Ok(buffer)
        }
    }
}

async fn build_collaborators(config: &PipelineConfig) -> Result<Collaborators> {
    let generator = generator_for(&config.ollama).await;

    Ok(Collaborators {
        judge: Arc::new(LlmJudge::new(generator.clone())),
        generator,
        domain_retriever: Arc::new(RuleRetriever::load(config.knowledge_path.as_deref())?),
        history_retriever: Arc::new(HistoryRetriever::new(config.report_pool_path.clone())),
        detector: Arc::new(ThresholdDetector::new(
            config.detector.bytes_per_second_threshold,
            config.detector.scan_port_threshold,
        )),
        sink: Arc::new(JsonlSink::new(config.report_pool_path.clone())),
        observer: Arc::new(TracingObserver),
    })
}

async fn run_pipeline(
    config: &PipelineConfig,
    input: Option<PathBuf>,
    timeout_seconds: Option<u64>,
) -> Result<()> {
    let raw_logs = read_input(input)?;
    let collaborators = build_collaborators(config).await?;
    let runtime = Runtime::assemble(config, collaborators);

    let deadline = Duration::from_secs(timeout_seconds.unwrap_or(config.run_timeout_seconds));
    let outcome = runtime.run_with_deadline(raw_logs, deadline).await?;

    match outcome {
        RunOutcome::Completed => {
            println!("Workflow completed");
            println!("Accepted reports are in: {}", config.report_pool_path.display());
        }
        RunOutcome::Fatal {
            reason,
            last_feedback,
            retry_count,
        } => {
            println!("Workflow completed with fatal reason: {reason}");
            println!("  retries spent: {retry_count}");
            if let Some(feedback) = last_feedback {
                println!("  last feedback: {feedback}");
            }
            println!("Nothing was committed.");
        }
    }
    Ok(())
}

async fn show_history(config: &PipelineConfig, limit: usize) -> Result<()> {
    let pool = JsonlSink::new(config.report_pool_path.clone());
    let reports = pool.read_all().await?;

    if reports.is_empty() {
        println!("No committed reports.");
        return Ok(());
    }

    for report in reports.iter().rev().take(limit) {
        println!(
            "{}  {}  {}",
            report.committed_at.format("%Y-%m-%d %H:%M:%S"),
            report.trace_id,
            truncate(&report.report, 100),
        );
    }
    Ok(())
}

fn truncate(text: &str, max: usize) -> String {
    let one_line = text.replace('\n', " ");
    if one_line.chars().count() <= max {
        one_line
    } else {
        let cut: String = one_line.chars().take(max).collect();
        format!("{cut}…")
    }
}

async fn doctor(config: &PipelineConfig) -> Result<()> {
    use crate::adapters::{Generator, OllamaGenerator};

    let ollama = OllamaGenerator::from_config(&config.ollama);
    match ollama.health_check().await {
        Ok(()) => println!(
            "✓ Ollama reachable at {} (model {})",
            config.ollama.base_url, config.ollama.model
        ),
        Err(e) => println!("✗ Ollama: {e} (pipeline will use the scripted fallback)"),
    }

    match &config.knowledge_path {
        Some(path) if path.exists() => match RuleRetriever::from_file(path) {
            Ok(_) => println!("✓ Knowledge base: {}", path.display()),
            Err(e) => println!("✗ Knowledge base: {e}"),
        },
        Some(path) => println!("✗ Knowledge base missing: {} (built-in rules will be used)", path.display()),
        None => println!("✓ Knowledge base: built-in rules"),
    }

    let pool = JsonlSink::new(config.report_pool_path.clone());
    match pool.read_all().await {
        Ok(reports) => println!(
            "✓ Report pool: {} ({} committed reports)",
            config.report_pool_path.display(),
            reports.len()
        ),
        Err(e) => println!("✗ Report pool: {e}"),
    }

    Ok(())
}
