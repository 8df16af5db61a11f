//! Batch command - OCR over many documents with a summary.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Args;
use console::style;
use indicatif::{MultiProgress, ProgressBar};
use tracing::debug;

use pdfdesk_core::ocr::{FallbackController, ProgressSink};
use pdfdesk_core::workflow::{BatchEntry, BatchRunner, BatchSummary, EntryStatus, pending_folders};

use super::{cancel_on_ctrl_c, expand_inputs, files_style, job_style, load_config, state_machine};

const STATUS_ORDER: [EntryStatus; 12] = [
    EntryStatus::Created,
    EntryStatus::AlreadyPresent,
    EntryStatus::SkippedByName,
    EntryStatus::SkippedBySidecar,
    EntryStatus::Locked,
    EntryStatus::NotImage,
    EntryStatus::Unclassifiable,
    EntryStatus::GeneratedOutput,
    EntryStatus::Held,
    EntryStatus::Failed,
    EntryStatus::Cancelled,
    EntryStatus::PersistenceError,
];

/// Arguments for the batch command.
#[derive(Args)]
pub struct BatchArgs {
    /// Input files, directories or glob patterns
    #[arg(required_unless_present = "pending")]
    inputs: Vec<String>,

    /// Process every document under this root whose sidecar says unprocessed
    #[arg(long, conflicts_with = "inputs")]
    pending: Option<PathBuf>,

    /// Tesseract language spec (e.g. "jpn+eng")
    #[arg(short, long)]
    language: Option<String>,

    /// Treat `failed` sidecars as eligible again
    #[arg(long)]
    retry_failed: bool,

    /// Write a per-document summary CSV
    #[arg(long)]
    summary: Option<PathBuf>,

    /// No progress bars; the Python API runs first, the ocrmypdf command
    /// only as its fallback
    #[arg(short, long)]
    quiet: bool,
}

pub async fn run(args: BatchArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut config = load_config(config_path)?;
    if let Some(language) = &args.language {
        config.ocr.language = language.clone();
    }

    let machine = state_machine(&config, args.retry_failed);

    let files: Vec<PathBuf> = match &args.pending {
        Some(root) => pending_folders(root, machine.store())?
            .into_iter()
            .flat_map(|folder| folder.documents)
            .collect(),
        None => expand_inputs(&args.inputs)?,
    };

    if files.is_empty() {
        println!("{} Nothing to process", style("ℹ").blue());
        return Ok(());
    }

    println!(
        "{} Found {} documents to check",
        style("ℹ").blue(),
        files.len()
    );

    let controller = FallbackController::from_config(&config)?;
    let cancel = cancel_on_ctrl_c();

    let multi_progress = MultiProgress::new();
    if args.quiet {
        multi_progress.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }
    let overall_pb = multi_progress.add(ProgressBar::new(files.len() as u64));
    overall_pb.set_style(files_style()?);
    let job_pb = multi_progress.add(ProgressBar::new(100));
    job_pb.set_style(job_style()?);

    let bar = job_pb.clone();
    let mut sink = move |message: &str, fraction: Option<f64>| {
        if let Some(fraction) = fraction {
            bar.set_position((fraction * 100.0).round() as u64);
        }
        bar.set_message(message.to_string());
    };
    let progress: Option<&mut dyn ProgressSink> = if args.quiet { None } else { Some(&mut sink) };

    let runner = BatchRunner::new(&machine, &controller, &config.ocr);
    let summary = runner
        .run(&files, progress, &cancel, |_, entry| {
            job_pb.reset();
            job_pb.set_message(String::new());
            overall_pb.inc(1);
            let _ = multi_progress.println(format!(
                "{:<18} {}",
                entry.status.as_str(),
                entry.path.display()
            ));
        })
        .await;

    job_pb.finish_and_clear();
    overall_pb.finish_with_message("Complete");

    if let Some(path) = &args.summary {
        write_summary(path, &summary.entries)?;
        println!(
            "{} Summary written to {}",
            style("✓").green(),
            path.display()
        );
    }

    print_summary(&summary, start);
    Ok(())
}

fn print_summary(summary: &BatchSummary, start: Instant) {
    println!();
    println!(
        "{} Checked {} documents in {:.1}s",
        style("✓").green(),
        summary.entries.len(),
        start.elapsed().as_secs_f64()
    );
    for status in STATUS_ORDER {
        let count = summary.count(status);
        if count > 0 {
            println!("   {}: {}", status.as_str(), count);
        }
    }
    if summary.cancelled {
        println!("{}", style("Batch was cancelled").yellow());
    }

    let failed: Vec<&BatchEntry> = summary.failures().collect();
    if !failed.is_empty() {
        println!();
        println!("{}", style("Failed documents:").red());
        for entry in failed {
            println!(
                "  - {}: {}",
                entry.path.display(),
                entry.detail.as_deref().unwrap_or("unknown error")
            );
        }
    }

    let unrecorded: Vec<&BatchEntry> = summary
        .entries
        .iter()
        .filter(|e| e.persistence_error.is_some())
        .collect();
    if !unrecorded.is_empty() {
        println!();
        println!("{}", style("Results not recorded in sidecars:").yellow());
        for entry in unrecorded {
            println!(
                "  - {}: {}",
                entry.path.display(),
                entry.persistence_error.as_deref().unwrap_or_default()
            );
        }
    }
}

fn write_summary(path: &Path, entries: &[BatchEntry]) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    for entry in entries {
        wtr.serialize(entry)?;
    }
    wtr.flush()?;
    debug!("Wrote summary to {}", path.display());
    Ok(())
}
