//! # HaleAI CLI (`haleai`)
//!
//! Ingests the medical reference PDF into a vector index, answers one-off
//! questions from the terminal, and serves the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! haleai --config ./config/haleai.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `haleai ingest` | Extract, chunk, and embed the corpus PDF; write the index snapshot |
//! | `haleai ask "<question>"` | Answer one question from the index |
//! | `haleai serve` | Start the HTTP server |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use haleai::config::load_config;
use haleai::pipeline::{Orchestrator, Pipeline};
use haleai::response::QueryResponse;
use haleai::{ingest, server};

/// HaleAI: retrieval-augmented answers to medical questions, grounded in
/// a reference PDF.
#[derive(Parser)]
#[command(name = "haleai", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/haleai.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the vector index from the corpus PDF.
    ///
    /// Reads `<data_dir>/<pdf_name>`, splits each page into overlapping
    /// chunks, embeds them, and writes the snapshot to `[index].path`.
    /// Do not run while a server is using the same snapshot.
    Ingest,

    /// Answer a single question and print the answer with its sources.
    Ask {
        question: String,

        /// Skip the reranking pass and keep retrieval order.
        #[arg(long)]
        no_rerank: bool,
    },

    /// Start the HTTP server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest => {
            ingest::run_ingest(&config).await?;
        }
        Commands::Ask {
            question,
            no_rerank,
        } => {
            let orchestrator = Orchestrator::ready(Pipeline::build(&config).await?);
            let use_reranking = config.retrieval.use_reranking && !no_rerank;
            let answer = orchestrator
                .answer_query(&question, Vec::new(), use_reranking)
                .await?;
            print_answer(&QueryResponse::from(answer));
        }
        Commands::Serve => {
            server::run_server(&config).await?;
        }
    }

    Ok(())
}

fn print_answer(response: &QueryResponse) {
    println!("{}", response.answer);
    println!();
    println!("status: {}", response.status);
    println!("time:   {}", response.processing_time);
    if response.sources.is_empty() {
        return;
    }
    println!("sources:");
    for (i, source) in response.sources.iter().enumerate() {
        println!("  [{}] {} (page {})", i + 1, source.source, source.page);
        println!("      {}", source.content.replace('\n', " "));
    }
}
