//! Veritas CLI: ask questions against an indexed corpus, ingest documents,
//! and record feedback on answers.

mod commands;
mod progress;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use veritas_core::OutputMode;

/// Veritas: retrieval-augmented answers that critique and revise themselves
#[derive(Parser, Debug)]
#[command(name = "veritas", version, about, long_about = None)]
struct Cli {
    /// Override `llm.model`
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Directory holding `.veritas/` and the default data paths
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Log more to stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only print the answer; no progress lines
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Answer a question from the indexed corpus
    Ask {
        /// The question to answer
        question: String,
        /// Output mode: plain, structured, typed
        #[arg(long)]
        mode: Option<OutputMode>,
        /// Maximum critique rounds
        #[arg(long)]
        max_iterations: Option<usize>,
        /// Number of passages to retrieve
        #[arg(long)]
        top_k: Option<usize>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
        /// Rate the answer 0-10 and save it to the feedback log
        #[arg(long)]
        rate: Option<u8>,
        /// Corrected answer to save with --rate (defaults to the answer given)
        #[arg(long, requires = "rate")]
        corrected: Option<String>,
    },
    /// Index documents from a JSONL file, a text file, or a directory
    Ingest {
        /// Path to ingest
        path: PathBuf,
    },
    /// Record and review feedback on answers
    Feedback {
        #[command(subcommand)]
        action: FeedbackAction,
    },
    /// Create or print the workspace config
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum FeedbackAction {
    /// Record feedback on an answer
    Add {
        #[arg(long)]
        question: String,
        /// The answer that was given
        #[arg(long)]
        answer: String,
        /// What the answer should have been
        #[arg(long)]
        corrected: String,
        /// Quality score, 0-10
        #[arg(long)]
        score: u8,
        /// Extra metadata as key=value pairs
        #[arg(long = "meta")]
        meta: Vec<String>,
    },
    /// Show recorded entries, newest last
    List {
        /// Only the last N entries
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Summarize the feedback log
    Stats,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Write `.veritas/config.toml` with defaults, unless it exists
    Init,
    /// Print the effective config after all layers
    Show,
}

/// Global options every subcommand sees.
#[derive(Debug, Clone, Default)]
pub(crate) struct GlobalOptions {
    pub model: Option<String>,
    pub quiet: bool,
    /// `-v` count; any value above zero also prints raw model output.
    pub verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // API keys often live in .env
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "veritas", "veritas")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "veritas.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let options = GlobalOptions {
        model: cli.model,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };
    commands::handle_command(cli.command, &workspace, &options).await
}
