//! Sequential batch processing with a per-document summary.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::state_machine::{Decision, DocumentReport, DocumentStateMachine};
use crate::error::{OcrError, SidecarError};
use crate::models::config::OcrConfig;
use crate::models::state::OcrState;
use crate::ocr::{FallbackController, JobOutcome, ProgressSink, reborrow_sink};
use crate::pdf::DocumentInspector;

/// Output lines kept per failure in the summary.
const SUMMARY_TAIL_LINES: usize = 5;

/// Outcome category of one batch entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// A new OCR output was written.
    Created,
    /// The OCR output already existed.
    AlreadyPresent,
    SkippedByName,
    SkippedBySidecar,
    Locked,
    /// Text-class, or marked `text` by an operator.
    NotImage,
    Unclassifiable,
    /// The document is itself an OCR output.
    GeneratedOutput,
    /// The sidecar state is not eligible (`done`, `failed`, `locked`).
    Held,
    Failed,
    Cancelled,
    /// The sidecar could not be read or written.
    PersistenceError,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Created => "created",
            EntryStatus::AlreadyPresent => "already_present",
            EntryStatus::SkippedByName => "skipped_by_name",
            EntryStatus::SkippedBySidecar => "skipped_by_sidecar",
            EntryStatus::Locked => "locked",
            EntryStatus::NotImage => "not_image",
            EntryStatus::Unclassifiable => "unclassifiable",
            EntryStatus::GeneratedOutput => "generated_output",
            EntryStatus::Held => "held",
            EntryStatus::Failed => "failed",
            EntryStatus::Cancelled => "cancelled",
            EntryStatus::PersistenceError => "persistence_error",
        }
    }
}

/// One row of the batch summary.
#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub path: PathBuf,
    pub status: EntryStatus,
    /// Error message (with output tail), backend used, or held state.
    pub detail: Option<String>,
    /// Set when OCR ran but its result could not be recorded.
    pub persistence_error: Option<String>,
}

impl BatchEntry {
    fn new(path: &Path, status: EntryStatus, detail: Option<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            status,
            detail,
            persistence_error: None,
        }
    }

    fn from_report(report: DocumentReport) -> Self {
        let path = report.document.as_path();
        let mut entry = match (&report.decision, &report.ocr) {
            (Decision::SkippedByName, _) => Self::new(path, EntryStatus::SkippedByName, None),
            (Decision::GeneratedArtifact { .. }, _) => {
                Self::new(path, EntryStatus::GeneratedOutput, None)
            }
            (Decision::HumanOverride { state: OcrState::Text }, _) => {
                Self::new(path, EntryStatus::NotImage, Some("operator override".into()))
            }
            (Decision::HumanOverride { .. }, _) => {
                Self::new(path, EntryStatus::SkippedBySidecar, None)
            }
            (Decision::Locked, _) => Self::new(path, EntryStatus::Locked, None),
            (Decision::NotImage, _) => Self::new(path, EntryStatus::NotImage, None),
            (Decision::Unclassifiable { reason }, _) => {
                Self::new(path, EntryStatus::Unclassifiable, Some(reason.clone()))
            }
            (Decision::AlreadyProcessed { .. }, _) => {
                Self::new(path, EntryStatus::AlreadyPresent, None)
            }
            (Decision::Held { state }, _) => {
                Self::new(path, EntryStatus::Held, Some(state.to_string()))
            }
            (Decision::Eligible { .. }, Some(Ok(JobOutcome::Converted { backend, language, elapsed }))) => {
                Self::new(
                    path,
                    EntryStatus::Created,
                    Some(format!("{} ({}) {:.1}s", backend, language, elapsed.as_secs_f64())),
                )
            }
            (Decision::Eligible { .. }, Some(Ok(JobOutcome::AlreadyPresent))) => {
                Self::new(path, EntryStatus::AlreadyPresent, None)
            }
            (Decision::Eligible { .. }, Some(Err(OcrError::Cancelled))) => {
                Self::new(path, EntryStatus::Cancelled, None)
            }
            (Decision::Eligible { .. }, Some(Err(e))) => {
                Self::new(path, EntryStatus::Failed, Some(failure_detail(e)))
            }
            (Decision::Eligible { .. }, None) => Self::new(path, EntryStatus::Cancelled, None),
        };
        entry.persistence_error = report.persistence_error.map(|e| e.to_string());
        entry
    }

    fn persistence(path: &Path, error: SidecarError) -> Self {
        Self::new(path, EntryStatus::PersistenceError, Some(error.to_string()))
    }
}

/// Error headline plus the last lines of the tool output.
fn failure_detail(error: &OcrError) -> String {
    let message = error.to_string();
    let headline = message.lines().next().unwrap_or_default();
    match error.output_tail() {
        Some(tail) if !tail.trim().is_empty() => {
            let lines: Vec<&str> = tail.lines().collect();
            let start = lines.len().saturating_sub(SUMMARY_TAIL_LINES);
            format!("{}\n{}", headline, lines[start..].join("\n"))
        }
        _ => headline.to_string(),
    }
}

/// Everything a batch did, in input order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub entries: Vec<BatchEntry>,
    /// The batch stopped early on cancellation.
    pub cancelled: bool,
}

impl BatchSummary {
    pub fn count(&self, status: EntryStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    /// Entries whose sidecar could not be read or written.
    pub fn persistence_errors(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == EntryStatus::PersistenceError || e.persistence_error.is_some())
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries
            .iter()
            .filter(|e| e.status == EntryStatus::Failed)
    }
}

/// Runs the state machine over a list of documents, one at a time.
///
/// One document's failure never stops the batch; only cancellation does.
pub struct BatchRunner<'a, I> {
    machine: &'a DocumentStateMachine<I>,
    controller: &'a FallbackController,
    config: &'a OcrConfig,
}

impl<'a, I: DocumentInspector> BatchRunner<'a, I> {
    pub fn new(
        machine: &'a DocumentStateMachine<I>,
        controller: &'a FallbackController,
        config: &'a OcrConfig,
    ) -> Self {
        Self {
            machine,
            controller,
            config,
        }
    }

    /// Process `documents` in order. `on_entry` sees each finished entry.
    pub async fn run<F>(
        &self,
        documents: &[PathBuf],
        mut progress: Option<&mut dyn ProgressSink>,
        cancel: &CancellationToken,
        mut on_entry: F,
    ) -> BatchSummary
    where
        F: FnMut(usize, &BatchEntry),
    {
        let mut summary = BatchSummary::default();

        for (index, document) in documents.iter().enumerate() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let entry = match self
                .machine
                .process(
                    document,
                    self.config,
                    self.controller,
                    reborrow_sink(&mut progress),
                    cancel,
                )
                .await
            {
                Ok(report) => BatchEntry::from_report(report),
                Err(e) => {
                    warn!("{}: {}", document.display(), e);
                    BatchEntry::persistence(document, e)
                }
            };

            if entry.status == EntryStatus::Cancelled {
                summary.cancelled = true;
            }
            on_entry(index, &entry);
            summary.entries.push(entry);
            if summary.cancelled {
                break;
            }
        }

        info!(
            "Batch finished: {} created, {} failed, {} already present, {} persistence errors",
            summary.count(EntryStatus::Created),
            summary.count(EntryStatus::Failed),
            summary.count(EntryStatus::AlreadyPresent),
            summary.persistence_errors()
        );
        summary
    }
}
