//! Status command - sidecar states without touching any file.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Args;
use console::style;

use pdfdesk_core::SidecarError;
use pdfdesk_core::workflow::pending_folders;

use super::{expand_inputs, load_config, state_machine};

/// Arguments for the status command.
#[derive(Args)]
pub struct StatusArgs {
    /// Input files, directories or glob patterns
    #[arg(required_unless_present = "pending")]
    inputs: Vec<String>,

    /// List folders under this root holding documents that await OCR
    #[arg(long, conflicts_with = "inputs")]
    pending: Option<PathBuf>,
}

pub async fn run(args: StatusArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let machine = state_machine(&config, false);
    let store = machine.store();

    if let Some(root) = &args.pending {
        let folders = pending_folders(root, store)?;
        if folders.is_empty() {
            println!("{} No pending documents under {}", style("ℹ").blue(), root.display());
        }
        for folder in &folders {
            println!(
                "{} ({} pending)",
                style(folder.dir.display()).bold(),
                folder.documents.len()
            );
            for document in &folder.documents {
                println!("  - {}", document.display());
            }
        }
        return Ok(());
    }

    let files = expand_inputs(&args.inputs)?;
    let mut totals: BTreeMap<String, usize> = BTreeMap::new();

    for path in &files {
        let label = match store.state_of(path) {
            Ok(Some(state)) => state.to_string(),
            Ok(None) => "-".to_string(),
            Err(SidecarError::Malformed { .. }) => "malformed".to_string(),
            Err(e) => return Err(e.into()),
        };
        println!("{:<12} {}", label, path.display());
        *totals.entry(label).or_default() += 1;
    }

    if !totals.is_empty() {
        println!();
        for (label, count) in &totals {
            println!("   {}: {}", label, count);
        }
    }

    Ok(())
}
