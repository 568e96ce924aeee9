// SPDX-License-Identifier: MIT

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use refinery_rs::adk::store::FileStore;
use refinery_rs::refinery::builder::build_research_engine;
use refinery_rs::refinery::config::Settings;
use refinery_rs::refinery::engine::{EngineEvent, RunOptions};
use refinery_rs::refinery::research::export::{export_report, render_markdown};
use refinery_rs::refinery::state::{Phase, WorkflowState};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Research a question with the quality-gated pipeline
    Research {
        /// The research question
        #[arg(short, long)]
        query: String,

        /// Override the maximum number of passes
        #[arg(short, long)]
        max_iterations: Option<u32>,

        /// Override the quality threshold (0-100)
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Optional YAML settings file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Save the markdown report to the output directory
        #[arg(short, long)]
        export: bool,

        /// Print the full final state as JSON instead of markdown
        #[arg(long)]
        json: bool,
    },
    /// Print the effective settings with API keys masked
    Config {
        /// Optional YAML settings file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn load_settings(path: Option<&PathBuf>) -> anyhow::Result<Settings> {
    Settings::load(path.map(PathBuf::as_path)).context("failed to load settings")
}

/// Log progress events as they arrive
fn spawn_progress(mut rx: mpsc::Receiver<EngineEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                EngineEvent::PassStarted { iteration } => {
                    eprintln!("== pass {} ==", iteration + 1)
                }
                EngineEvent::StageFinished {
                    stage,
                    degraded,
                    elapsed_ms,
                    ..
                } => eprintln!(
                    "  {:<11} {:>6} ms{}",
                    stage,
                    elapsed_ms,
                    if degraded { "  (degraded)" } else { "" }
                ),
                EngineEvent::GateDecided {
                    score, decision, ..
                } => eprintln!("  gate: {:?} at score {:.0}", decision, score),
                _ => {}
            }
        }
    })
}

fn print_summary(state: &WorkflowState) {
    eprintln!(
        "\nOutcome: {:?} | score {:.0} | refinement passes {} | {} LLM calls, {} tokens, {} searches",
        state.phase(),
        state.score(),
        state.iteration(),
        state.usage().total_llm_calls(),
        state.usage().total_tokens(),
        state.usage().total_search_calls()
    );
    if !state.errors().is_empty() {
        eprintln!("Errors:");
        for e in state.errors() {
            eprintln!("  - {}", e);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Research {
            query,
            max_iterations,
            threshold,
            config,
            export,
            json,
        } => {
            let mut settings = load_settings(config.as_ref())?;
            if let Some(n) = max_iterations {
                settings.max_iterations = n;
            }
            if let Some(t) = threshold {
                settings.quality_threshold = t;
            }

            let engine = build_research_engine(&settings)?;

            let cancel = Arc::new(AtomicBool::new(false));
            let flag = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("Interrupt received, finishing after the current stage");
                    flag.store(true, Ordering::SeqCst);
                }
            });

            let (tx, rx) = mpsc::channel(64);
            let progress = spawn_progress(rx);

            let state = engine
                .run_with(
                    &query,
                    RunOptions {
                        max_iterations: None,
                        events: Some(tx),
                        cancel: Some(cancel),
                    },
                )
                .await;
            let _ = progress.await;

            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else if state.phase() != Phase::Failed {
                println!("{}", render_markdown(&state));
            }
            print_summary(&state);

            if export && state.phase() != Phase::Failed {
                let store = FileStore::new(&settings.output_dir);
                let location = export_report(&store, &state)
                    .await
                    .context("failed to export report")?;
                eprintln!("Report saved to {}", location);
            }

            if state.phase() == Phase::Failed {
                anyhow::bail!("research run failed");
            }
        }
        Commands::Config { config } => {
            let settings = load_settings(config.as_ref())?;
            print!("{}", serde_yaml::to_string(&settings.redacted())?);
            if let Err(e) = settings.validate() {
                eprintln!("\nWarning: {}", e);
            }
        }
    }

    Ok(())
}
