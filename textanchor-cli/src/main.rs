//! textanchor CLI: anchor explanations for text classifiers from the terminal.

mod classifier;
mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// textanchor: explain text classifier predictions with anchors
#[derive(Parser, Debug)]
#[command(name = "textanchor", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Also write JSON logs to the data directory
    #[arg(long)]
    log_file: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Explain the prediction of a classifier on a text
    Explain(ExplainArgs),
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug, Default)]
pub struct ExplainArgs {
    /// Text to explain; `-` reads it from stdin
    pub text: String,

    /// Sampling strategy: unknown, similarity, language_model
    #[arg(short, long)]
    pub strategy: Option<String>,

    /// Random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Perturbation option as key=json (repeatable), e.g. sample_proba=0.3
    #[arg(short = 'o', long = "option", value_name = "KEY=JSON")]
    pub options: Vec<String>,

    /// Embedding lexicon file for the similarity strategy
    #[arg(long)]
    pub lexicon: Option<PathBuf>,

    /// Keyword mapped to the positive class (repeatable)
    #[arg(short, long = "keyword")]
    pub keywords: Vec<String>,

    /// External classifier command reading a JSON array of texts on stdin
    #[arg(long, num_args = 1.., value_name = "PROGRAM [ARGS]...", allow_hyphen_values = true)]
    pub classifier_cmd: Option<Vec<String>>,

    /// Minimum anchor precision
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Candidate anchors kept per size
    #[arg(long)]
    pub beam_size: Option<usize>,

    /// Maximum number of words in the anchor
    #[arg(long)]
    pub max_anchor_size: Option<usize>,

    /// Samples per bandit pull
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Size of the coverage pool
    #[arg(long)]
    pub coverage_samples: Option<usize>,

    /// Print single-line JSON
    #[arg(long)]
    pub compact: bool,
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigAction {
    /// Create a default workspace configuration file
    Init,
    /// Show the effective merged configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr (always active)
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)));

    // JSON file layer for structured logging
    let (json_layer, _guard) = if cli.log_file {
        let log_dir = directories::ProjectDirs::from("dev", "textanchor", "textanchor")
            .map(|d| d.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("."));
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "textanchor.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_filter(EnvFilter::new("debug"));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.config.as_deref())
}
