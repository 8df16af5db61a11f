//! CLI for the PDF desk: classification, OCR and sidecar state.

mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{batch, classify, config, langs, ocr, state, status};

/// PDF desk - classify scanned PDFs, run OCR and track per-document state
#[derive(Parser)]
#[command(name = "pdfdesk")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify PDFs as image or text and show their sidecar state
    Classify(classify::ClassifyArgs),

    /// Run OCR on a single document
    Ocr(ocr::OcrArgs),

    /// Run OCR on every eligible document of a selection
    Batch(batch::BatchArgs),

    /// Set a document's state by hand (text, skipped, unprocessed)
    State(state::StateArgs),

    /// Show sidecar states or folders with pending documents
    Status(status::StatusArgs),

    /// List installed Tesseract languages
    Langs(langs::LangsArgs),

    /// Manage configuration
    Config(config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Classify(args) => classify::run(args, config_path).await,
        Commands::Ocr(args) => ocr::run(args, config_path).await,
        Commands::Batch(args) => batch::run(args, config_path).await,
        Commands::State(args) => state::run(args, config_path).await,
        Commands::Status(args) => status::run(args, config_path).await,
        Commands::Langs(args) => langs::run(args, config_path).await,
        Commands::Config(args) => config::run(args, config_path).await,
    }
}
