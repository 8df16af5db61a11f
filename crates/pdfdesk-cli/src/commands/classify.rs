//! Classify command - image/text classification of PDFs.

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use console::style;
use serde::Serialize;
use tracing::warn;

use pdfdesk_core::{Classification, Decision, DocumentInspector, DocumentKind, OcrState};

use super::{expand_inputs, load_config, state_machine};

/// Arguments for the classify command.
#[derive(Args)]
pub struct ClassifyArgs {
    /// Input files, directories or glob patterns
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Apply the document policy and write sidecars (first classification,
    /// locks, generated outputs)
    #[arg(long)]
    record: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    /// One line per document
    Text,
    /// JSON array
    Json,
}

#[derive(Debug, Serialize)]
struct ClassifyRow {
    path: PathBuf,
    classification: Option<Classification>,
    locked: bool,
    state: Option<OcrState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    decision: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub async fn run(args: ClassifyArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let files = expand_inputs(&args.inputs)?;
    if files.is_empty() {
        anyhow::bail!("No PDF files found for: {}", args.inputs.join(" "));
    }

    let machine = state_machine(&config, false);
    let mut rows = Vec::with_capacity(files.len());

    for path in files {
        let mut sidecar_error = None;
        let decision = if args.record {
            match machine.evaluate(&path) {
                Ok(decision) => Some(decision),
                Err(e) => {
                    warn!("{}: {}", path.display(), e);
                    sidecar_error = Some(e.to_string());
                    None
                }
            }
        } else {
            None
        };

        let locked = machine.inspector().is_locked(&path);
        let (classification, error) = if locked {
            (None, sidecar_error)
        } else {
            match machine.inspector().classify(&path) {
                Ok(c) => (Some(c), sidecar_error),
                Err(e) => {
                    let error = match sidecar_error {
                        Some(sidecar) => format!("{}; {}", sidecar, e),
                        None => e.to_string(),
                    };
                    (None, Some(error))
                }
            }
        };
        // A malformed sidecar reads as no state here.
        let state = machine.store().state_of(&path).ok().flatten();

        rows.push(ClassifyRow {
            path,
            classification,
            locked,
            state,
            decision,
            error,
        });
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Text => {
            for row in &rows {
                print_row(row);
            }
        }
    }

    Ok(())
}

fn print_row(row: &ClassifyRow) {
    let kind = match (&row.classification, row.locked) {
        (_, true) => style("locked".to_string()).red(),
        (Some(c), _) if c.kind == DocumentKind::Image => style(format!(
            "image {}p {:.0}%",
            c.pages,
            c.text_ratio * 100.0
        ))
        .yellow(),
        (Some(c), _) => style(format!("text {}p {:.0}%", c.pages, c.text_ratio * 100.0)).green(),
        (None, false) => style("unreadable".to_string()).red(),
    };
    let state = row.state.map(|s| s.as_str()).unwrap_or("-");

    print!("{:<20} {:<12} {}", kind, state, row.path.display());
    if let Some(decision) = &row.decision {
        print!("  [{}]", decision.label());
    }
    if let Some(error) = &row.error {
        print!("  ({})", error);
    }
    println!();
}
