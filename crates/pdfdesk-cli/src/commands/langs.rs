//! Langs command - installed Tesseract languages.

use clap::Args;
use console::style;

use pdfdesk_core::ocr::{LanguageCatalog, TesseractCatalog, narrow};

use super::load_config;

/// Arguments for the langs command.
#[derive(Args)]
pub struct LangsArgs {
    /// Show how this spec would be narrowed (default: configured language)
    #[arg(short, long)]
    resolve: Option<String>,
}

pub async fn run(args: LangsArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let catalog = TesseractCatalog::from_config(&config.tools);

    let installed = catalog
        .installed()
        .await
        .map_err(|e| anyhow::anyhow!("Could not list Tesseract languages: {}", e))?;

    println!("Installed languages ({}):", installed.len());
    for language in &installed {
        println!("  {}", language);
    }

    let requested = args.resolve.unwrap_or(config.ocr.language);
    let resolved = narrow(&requested, &installed);
    println!();
    println!(
        "{} {} -> {}",
        style("ℹ").blue(),
        requested,
        style(&resolved.spec).bold()
    );
    if !resolved.english_available {
        println!(
            "{} eng is not installed; no English retry is possible",
            style("⚠").yellow()
        );
    }

    Ok(())
}
