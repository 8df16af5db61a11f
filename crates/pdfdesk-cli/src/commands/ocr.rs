//! OCR command - convert a single document.

use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use console::style;
use indicatif::ProgressBar;

use pdfdesk_core::models::config::DeskConfig;
use pdfdesk_core::ocr::{FallbackController, JobOutcome, OcrJob, ProgressSink};
use pdfdesk_core::{Decision, OcrError};

use super::{cancel_on_ctrl_c, job_style, load_config, state_machine};

/// Arguments for the ocr command.
#[derive(Args)]
pub struct OcrArgs {
    /// Input PDF
    #[arg(required = true)]
    input: PathBuf,

    /// Tesseract language spec (e.g. "jpn+eng")
    #[arg(short, long)]
    language: Option<String>,

    /// Run OCR regardless of the sidecar state; no sidecar is written
    #[arg(long)]
    force: bool,

    /// Output file, only with --force (default: <name>_ocr.pdf)
    #[arg(short, long, requires = "force")]
    output: Option<PathBuf>,

    /// Treat a `failed` sidecar as eligible again
    #[arg(long)]
    retry_failed: bool,

    /// Also write the recognized text next to the output
    #[arg(long)]
    text: bool,

    /// No progress bar; the Python API runs first, the ocrmypdf command
    /// only as its fallback
    #[arg(short, long)]
    quiet: bool,
}

pub async fn run(args: OcrArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut config = load_config(config_path)?;
    if let Some(language) = &args.language {
        config.ocr.language = language.clone();
    }
    if args.text {
        config.ocr.write_text = true;
    }

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }

    let controller = FallbackController::from_config(&config)?;
    let cancel = cancel_on_ctrl_c();

    let pb = if args.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(100);
        pb.set_style(job_style()?);
        pb
    };
    let bar = pb.clone();
    let mut sink = move |message: &str, fraction: Option<f64>| {
        if let Some(fraction) = fraction {
            bar.set_position((fraction * 100.0).round() as u64);
        }
        bar.set_message(message.to_string());
    };
    let progress: Option<&mut dyn ProgressSink> = if args.quiet { None } else { Some(&mut sink) };

    let result = if args.force {
        run_forced(&args, &config, &controller, progress, &cancel).await
    } else {
        let machine = state_machine(&config, args.retry_failed);
        let report = machine
            .process(&args.input, &config.ocr, &controller, progress, &cancel)
            .await?;
        if let Some(e) = &report.persistence_error {
            eprintln!(
                "{} OCR finished but the sidecar was not updated: {}",
                style("⚠").yellow(),
                e
            );
        }
        match report.ocr {
            Some(result) => result,
            None => {
                pb.finish_and_clear();
                print_decision(&report.decision, &args.input);
                return Ok(());
            }
        }
    };
    pb.finish_and_clear();

    match result {
        Ok(JobOutcome::Converted {
            backend, language, ..
        }) => {
            println!(
                "{} {} via {} ({}) in {:.1}s",
                style("✓").green(),
                args.input.display(),
                backend,
                language,
                start.elapsed().as_secs_f64()
            );
            Ok(())
        }
        Ok(JobOutcome::AlreadyPresent) => {
            println!(
                "{} {}: OCR output already exists",
                style("ℹ").blue(),
                args.input.display()
            );
            Ok(())
        }
        Err(OcrError::Cancelled) => anyhow::bail!("Cancelled"),
        Err(e) => Err(e.into()),
    }
}

async fn run_forced(
    args: &OcrArgs,
    config: &DeskConfig,
    controller: &FallbackController,
    progress: Option<&mut dyn ProgressSink>,
    cancel: &tokio_util::sync::CancellationToken,
) -> Result<JobOutcome, OcrError> {
    controller.run(&forced_job(args, config), progress, cancel).await
}

/// Job for `--force`; a custom output carries its text file along.
fn forced_job(args: &OcrArgs, config: &DeskConfig) -> OcrJob {
    let job = OcrJob::for_document(&args.input, &config.ocr);
    match &args.output {
        Some(output) => job
            .with_destination(output.clone())
            .with_text_output(config.ocr.write_text.then(|| output.with_extension("txt"))),
        None => job,
    }
}

fn print_decision(decision: &Decision, input: &std::path::Path) {
    let reason = match decision {
        Decision::Unclassifiable { reason } => format!("{} ({})", decision.label(), reason),
        _ => decision.label().to_string(),
    };
    println!(
        "{} {}: not converted, {}",
        style("ℹ").blue(),
        input.display(),
        reason
    );
}
