//! Kiln CLI - self-correcting code generation
//!
//! Usage:
//!   kiln run <task>               Generate, execute and repair until it works
//!   kiln memory list              Show remembered runs
//!   kiln memory search <task>     Show the lessons a task would receive
//!   kiln config init              Write the default .kiln/config.toml

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kiln_core::config::CONFIG_PATH;
use kiln_core::{KilnConfig, KilnError, RunOutcome, RunResult, Task};
use kiln_memory::{format_lessons, EvolvingMemory};
use kiln_orchestrator::AgentRuntime;
use kiln_provider::OpenAiCompatibleProvider;
use kiln_sandbox::{ProcessSandbox, SandboxPool};
use kiln_trace::{to_html, visualize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Memory file used when the config names none
const DEFAULT_MEMORY_PATH: &str = ".kiln/memory.jsonl";

#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about = "Self-correcting code generation")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory holding .kiln/ (defaults to current directory)
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one task through the attempt loop
    Run {
        /// Task description
        task: String,

        /// Override loop.max_attempts
        #[arg(short = 'n', long)]
        max_attempts: Option<usize>,

        /// Write the run's trace as an HTML report
        #[arg(long, value_name = "FILE")]
        html: Option<PathBuf>,

        /// Print the text timeline of the trace
        #[arg(long)]
        timeline: bool,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect the evolving memory
    Memory {
        #[command(subcommand)]
        action: MemoryCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum MemoryCommands {
    /// List remembered runs
    List,

    /// Show the lessons a task would be given
    Search {
        /// Task description
        task: String,

        /// Number of lessons
        #[arg(short, long, default_value = "3")]
        k: usize,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write the default configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            task,
            max_attempts,
            html,
            timeline,
            json,
        } => cmd_run(&cli.root, task, max_attempts, html, timeline, json).await,
        Commands::Memory { action } => cmd_memory(&cli.root, action).await,
        Commands::Config { action } => cmd_config(&cli.root, action),
    }
}

fn load_config(root: &Path) -> Result<KilnConfig> {
    KilnConfig::load_or_default(root)
        .with_context(|| format!("Failed to load {}", root.join(CONFIG_PATH).display()))
}

async fn open_memory(root: &Path, config: &KilnConfig) -> Result<EvolvingMemory> {
    let path = config
        .memory
        .path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MEMORY_PATH));
    let path = if path.is_absolute() {
        path
    } else {
        root.join(path)
    };

    EvolvingMemory::open(&path)
        .await
        .with_context(|| format!("Failed to open memory at {}", path.display()))
}

async fn cmd_run(
    root: &Path,
    description: String,
    max_attempts: Option<usize>,
    html: Option<PathBuf>,
    timeline: bool,
    json: bool,
) -> Result<()> {
    let mut config = load_config(root)?;
    if let Some(max) = max_attempts {
        config.run_loop.max_attempts = max;
        config.validate()?;
    }

    let provider = OpenAiCompatibleProvider::from_settings(&config.provider)
        .context("Failed to configure completion provider")?;
    let process = ProcessSandbox::from_settings(&config.sandbox);
    let sandbox = SandboxPool::new(Arc::new(process), config.sandbox.pool_size);
    let memory = open_memory(root, &config).await?;

    let runtime = AgentRuntime::from_config(
        &config,
        Arc::new(provider),
        Arc::new(sandbox),
        Arc::new(memory),
    );

    // Ctrl-C cancels the run instead of killing the process
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    let task = Task::new(description);
    info!("Running task: {}", task.title());
    let result = runtime.run_with_cancel(&task, cancel).await?;

    let trace = match &result.trace_id {
        Some(id) => runtime.recorder().get(id).await,
        None => None,
    };

    if let (Some(path), Some(trace)) = (&html, &trace) {
        tokio::fs::write(path, to_html(trace))
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Trace report: {}", path.display());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        if timeline {
            if let Some(trace) = &trace {
                println!("{}", visualize(trace));
            }
        }
        print_result(&result);
    }

    if result.outcome == RunOutcome::Cancelled {
        return Err(KilnError::Cancelled.into());
    }
    Ok(())
}

fn print_result(result: &RunResult) {
    println!();
    println!(
        "Run {} ({})",
        if result.success { "succeeded" } else { "failed" },
        result.outcome
    );
    println!("  Attempts: {}", result.attempts);
    println!("  Elapsed: {}ms", result.elapsed_ms);
    println!("  Tokens: {}", result.usage.total_tokens);
    if let Some(id) = &result.trace_id {
        println!("  Trace: {}", id);
    }

    for attempt in &result.history {
        let status = attempt
            .result
            .as_ref()
            .map(|r| r.exit_status.to_string())
            .unwrap_or_else(|| "skipped".to_string());
        match &attempt.verdict {
            Some(verdict) if !verdict.is_pass() => println!(
                "  #{} {} -> {}: {}",
                attempt.index, status, verdict.category, verdict.hint
            ),
            _ => println!("  #{} {}", attempt.index, status),
        }
    }

    if !result.code.is_empty() {
        println!();
        println!("Code:");
        for line in result.code.lines() {
            println!("  {}", line);
        }
    }
    if !result.output.trim().is_empty() {
        println!();
        println!("Output:");
        for line in result.output.trim_end().lines() {
            println!("  {}", line);
        }
    }
}

async fn cmd_memory(root: &Path, action: MemoryCommands) -> Result<()> {
    let config = load_config(root)?;
    let memory = open_memory(root, &config).await?;

    match action {
        MemoryCommands::List => {
            let records = memory.records().await;
            if records.is_empty() {
                println!("Memory is empty");
                return Ok(());
            }

            println!("Memory ({} records):", records.len());
            for record in &records {
                println!(
                    "  {} [{}] {} attempt(s) - {}",
                    record.timestamp.format("%Y-%m-%d %H:%M"),
                    if record.success { "ok" } else { "failed" },
                    record.attempts,
                    record.task.lines().next().unwrap_or_default()
                );
            }

            let stats = memory.stats().await;
            println!();
            println!(
                "Success rate: {:.0}%  Average attempts: {:.1}",
                stats.success_rate * 100.0,
                stats.average_attempts
            );
        }

        MemoryCommands::Search { task, k } => {
            let lessons = memory.get_lessons_for_task(&task, k).await;
            if lessons.is_empty() {
                println!("No similar tasks remembered");
            } else {
                print!("{}", format_lessons(&lessons));
            }
        }
    }

    Ok(())
}

fn cmd_config(root: &Path, action: ConfigCommands) -> Result<()> {
    match action {
        ConfigCommands::Init => {
            let target = root.join(CONFIG_PATH);
            if target.exists() {
                println!("Config already exists: {}", target.display());
                return Ok(());
            }

            let path = KilnConfig::write_default(root).context("Failed to write config")?;
            println!("Created {}", path.display());
            println!("Set the provider's API key in the environment, then run 'kiln run <task>'");
        }
    }
    Ok(())
}
