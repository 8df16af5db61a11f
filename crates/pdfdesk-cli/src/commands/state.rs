//! State command - operator overrides of a document's sidecar state.

use std::path::PathBuf;

use clap::Args;
use console::style;

use pdfdesk_core::OcrState;
use pdfdesk_core::sidecar::UpdateOutcome;

use super::{load_config, state_machine};

/// Arguments for the state command.
#[derive(Args)]
pub struct StateArgs {
    /// Document whose sidecar is updated
    #[arg(required = true)]
    document: PathBuf,

    /// New state: text, skipped or unprocessed
    state: OcrState,
}

pub async fn run(args: StateArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    if !args.document.exists() {
        anyhow::bail!("Document not found: {}", args.document.display());
    }

    let machine = state_machine(&config, false);
    let outcome = machine.override_state(&args.document, args.state)?;

    let note = match outcome {
        UpdateOutcome::Created => " (new sidecar)",
        UpdateOutcome::Updated => "",
        UpdateOutcome::Replaced => " (unreadable sidecar replaced)",
    };
    println!(
        "{} {} -> {}{}",
        style("✓").green(),
        args.document.display(),
        args.state,
        note
    );

    Ok(())
}
