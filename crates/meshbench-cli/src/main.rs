//! Meshbench - handler generation challenge harness
//!
//! The `meshbench` command evaluates LLM-generated message handlers
//! against the five challenge levels.
//!
//! ## Commands
//!
//! - `levels`: list the challenge levels and their rubrics
//! - `evaluate`: score a handler source file against one level
//! - `challenge`: generate handlers with a live model and score them

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use meshbench_core::domain::Level;
use meshbench_harness::{
    append_result, ChallengeConfig, ChallengeEngine, ChallengeRunner, OllamaClient,
    ProcessSandbox, SandboxPolicy, SourceSet,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "meshbench")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Handler generation challenge harness", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the challenge levels with their rubric weights
    Levels,

    /// Evaluate a handler source file against one level
    Evaluate {
        /// Challenge level (1-5)
        #[arg(short, long)]
        level: u8,

        /// Handler source file
        #[arg(short, long)]
        source: PathBuf,

        /// Separate sync-role source for level 5 (defaults to the
        /// same handler playing both roles)
        #[arg(long)]
        sync_source: Option<PathBuf>,

        /// Model name recorded in the result
        #[arg(short, long, default_value = "local")]
        model: String,

        /// Append the record to this results file
        #[arg(long)]
        results: Option<PathBuf>,

        /// Python interpreter for the handler driver
        #[arg(long, default_value = "python3", env = "MESHBENCH_PYTHON")]
        python: String,
    },

    /// Generate handlers with a live model and score them
    Challenge {
        /// Model to test (e.g. qwen2.5-coder:1.5b)
        #[arg(short, long)]
        model: String,

        /// Challenge level (1-5); omit with --all-levels
        #[arg(short, long)]
        level: Option<u8>,

        /// Run all five levels in order
        #[arg(long)]
        all_levels: bool,

        /// Generation attempts per challenge
        #[arg(long, default_value_t = 3)]
        max_attempts: u32,

        /// Directory generated handlers are saved under
        #[arg(long, default_value = "generated")]
        output_dir: PathBuf,

        /// Results file every attempt is appended to
        #[arg(long, default_value = "evaluation/results.json")]
        results: PathBuf,

        /// Prompt template file overriding the built-in level brief
        #[arg(long)]
        prompt_file: Option<PathBuf>,

        /// Ollama host (or set OLLAMA_HOST)
        #[arg(long)]
        ollama_host: Option<String>,

        /// Python interpreter for the handler driver
        #[arg(long, default_value = "python3", env = "MESHBENCH_PYTHON")]
        python: String,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let default_directive = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn parse_level(n: u8) -> Result<Level> {
    Level::try_from(n).map_err(|e| anyhow::anyhow!(e))
}

fn engine_for(level: Level, python: String) -> ChallengeEngine {
    let policy = SandboxPolicy::for_level(level);
    let sandbox = ProcessSandbox::with_launcher(
        policy,
        meshbench_harness::Launcher::PythonDriver { python },
    );
    ChallengeEngine::new(Arc::new(sandbox))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json);
    tracing::debug!(version = meshbench_core::VERSION, "meshbench starting");

    match cli.command {
        Commands::Levels => {
            for level in Level::ALL {
                let rubric = level.rubric();
                println!(
                    "{} (functionality {}, quality {})",
                    level.challenge_name(),
                    rubric.functionality_max(),
                    rubric.quality_max()
                );
                for criterion in &rubric.criteria {
                    println!("  {:<12} {:>3} pts", criterion.name, criterion.weight);
                }
            }
        }

        Commands::Evaluate {
            level,
            source,
            sync_source,
            model,
            results,
            python,
        } => {
            let level = parse_level(level)?;
            let source_text = std::fs::read_to_string(&source)
                .with_context(|| format!("reading handler source {}", source.display()))?;

            let sources = match (&sync_source, level.dual_role()) {
                (Some(sync_path), true) => {
                    let sync_text = std::fs::read_to_string(sync_path)
                        .with_context(|| format!("reading sync source {}", sync_path.display()))?;
                    SourceSet::dual(source_text, sync_text)
                }
                _ => SourceSet::for_level(level, &source_text),
            };

            let engine = engine_for(level, python);
            let mut record = engine.evaluate(&model, level, &sources).await;
            record.handler_path = Some(source);

            if let Some(results_path) = results {
                append_result(&results_path, &record)?;
            }

            println!("{}", serde_json::to_string_pretty(&record)?);
            if !record.passed() {
                std::process::exit(1);
            }
        }

        Commands::Challenge {
            model,
            level,
            all_levels,
            max_attempts,
            output_dir,
            results,
            prompt_file,
            ollama_host,
            python,
        } => {
            let client = Arc::new(match ollama_host {
                Some(host) => OllamaClient::new(host),
                None => OllamaClient::from_env(),
            });

            let levels: Vec<Level> = if all_levels {
                Level::ALL.to_vec()
            } else {
                let n = level.context("pass --level N or --all-levels")?;
                vec![parse_level(n)?]
            };

            let config = ChallengeConfig {
                max_attempts,
                output_dir,
                results_path: results,
                prompt_path: prompt_file,
                ..Default::default()
            };

            let mut total = 0u32;
            let mut passed = 0u32;
            for level in &levels {
                let engine = engine_for(*level, python.clone());
                let runner = ChallengeRunner::new(engine, client.clone())
                    .with_config(config.clone());
                let record = runner.run(&model, *level).await?;

                let status = if record.passed() { "PASS" } else { "FAIL" };
                println!(
                    "{} {:>3}/100 - {}",
                    record.challenge, record.scores.total, status
                );
                total += record.scores.total;
                passed += u32::from(record.passed());
            }

            if levels.len() > 1 {
                println!(
                    "total {}/{} - {}/{} challenges passed",
                    total,
                    100 * levels.len(),
                    passed,
                    levels.len()
                );
            }
        }
    }

    Ok(())
}
