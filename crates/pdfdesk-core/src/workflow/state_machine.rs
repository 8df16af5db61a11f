//! Per-document policy: which documents get OCR and what the sidecar says.
//!
//! Facts are gathered lazily in priority order, so a `*_skip.pdf` is never
//! opened and a human override is honoured before classification runs.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DeskError, OcrError, SidecarError};
use crate::models::config::OcrConfig;
use crate::models::state::OcrState;
use crate::naming;
use crate::ocr::{FallbackController, JobOutcome, OcrJob, ProgressSink};
use crate::pdf::{DocumentInspector, DocumentKind};
use crate::sidecar::{CreateOutcome, SidecarStore, TransitionOutcome, UpdateOutcome};

/// What the policy decided for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// `*_skip.pdf`: excluded without looking at the file.
    SkippedByName,
    /// `*_ocr.pdf`: a generated output, never OCR'd again.
    GeneratedArtifact { marked_done: bool },
    /// The sidecar carries an operator override (`skipped` or `text`).
    HumanOverride { state: OcrState },
    /// Password protected; the sidecar now says `locked`.
    Locked,
    /// Text-class; no sidecar is written.
    NotImage,
    /// The inspector could not read the document.
    Unclassifiable { reason: String },
    /// The derived output already exists.
    AlreadyProcessed { sidecar_created: bool },
    /// The sidecar holds a state that is not eligible for OCR.
    Held { state: OcrState },
    /// Eligible for OCR, currently in `from`.
    Eligible { from: OcrState, sidecar_created: bool },
}

impl Decision {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Decision::Eligible { .. })
    }

    /// Short label for listings.
    pub fn label(&self) -> &'static str {
        match self {
            Decision::SkippedByName => "skipped (name)",
            Decision::GeneratedArtifact { .. } => "ocr output",
            Decision::HumanOverride { state: OcrState::Text } => "text (override)",
            Decision::HumanOverride { .. } => "skipped (sidecar)",
            Decision::Locked => "locked",
            Decision::NotImage => "text",
            Decision::Unclassifiable { .. } => "unclassifiable",
            Decision::AlreadyProcessed { .. } => "already processed",
            Decision::Held { state } => state.as_str(),
            Decision::Eligible { .. } => "pending",
        }
    }
}

/// Result of processing one document end to end.
#[derive(Debug)]
pub struct DocumentReport {
    pub document: PathBuf,
    pub decision: Decision,
    /// Set when OCR ran.
    pub ocr: Option<Result<JobOutcome, OcrError>>,
    /// State written after the OCR attempt.
    pub recorded: Option<OcrState>,
    /// Sidecar write that failed after OCR ran.
    pub persistence_error: Option<SidecarError>,
}

/// Applies the document policy against a sidecar store.
#[derive(Debug, Clone)]
pub struct DocumentStateMachine<I> {
    inspector: I,
    store: SidecarStore,
    retry_failed: bool,
}

impl<I: DocumentInspector> DocumentStateMachine<I> {
    pub fn new(inspector: I, store: SidecarStore) -> Self {
        Self {
            inspector,
            store,
            retry_failed: false,
        }
    }

    /// Make `failed` documents eligible again.
    pub fn with_retry_failed(mut self, retry_failed: bool) -> Self {
        self.retry_failed = retry_failed;
        self
    }

    pub fn store(&self) -> &SidecarStore {
        &self.store
    }

    pub fn inspector(&self) -> &I {
        &self.inspector
    }

    /// Decide what to do with `document`, writing the sidecar where the
    /// policy requires it (generated output, lock, first classification).
    pub fn evaluate(&self, document: &Path) -> Result<Decision, SidecarError> {
        if naming::is_skip_name(document) {
            debug!("{}: skip suffix", document.display());
            return Ok(Decision::SkippedByName);
        }

        if naming::is_ocr_name(document) {
            let marked_done = match self.inspector.classify(document) {
                Ok(c) if c.kind == DocumentKind::Image => {
                    if !matches!(self.store.state_of(document), Ok(Some(OcrState::Done))) {
                        self.store.claim(document, OcrState::Done)?;
                    }
                    true
                }
                _ => false,
            };
            return Ok(Decision::GeneratedArtifact { marked_done });
        }

        let stored = match self.store.state_of(document) {
            Ok(state) => state,
            Err(SidecarError::Malformed { reason, .. }) => {
                warn!("{}: unreadable sidecar ({}), treating as absent", document.display(), reason);
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(state) = stored.filter(OcrState::is_human_override) {
            debug!("{}: operator override {}", document.display(), state);
            return Ok(Decision::HumanOverride { state });
        }

        if self.inspector.is_locked(document) {
            self.store.claim(document, OcrState::Locked)?;
            info!("{}: password protected, marked locked", document.display());
            return Ok(Decision::Locked);
        }

        match self.inspector.classify(document) {
            Ok(c) if c.kind == DocumentKind::Text => return Ok(Decision::NotImage),
            Ok(_) => {}
            Err(e) => {
                return Ok(Decision::Unclassifiable {
                    reason: e.to_string(),
                });
            }
        }

        let output_exists = naming::dest_ocr_path(document).exists();
        let Some(state) = stored else {
            let initial = if output_exists {
                OcrState::Done
            } else {
                OcrState::Unprocessed
            };
            let sidecar_created = self.create_sidecar(document, initial)?;
            return Ok(if output_exists {
                Decision::AlreadyProcessed { sidecar_created }
            } else {
                Decision::Eligible {
                    from: OcrState::Unprocessed,
                    sidecar_created,
                }
            });
        };

        Ok(match state {
            _ if output_exists => Decision::AlreadyProcessed {
                sidecar_created: false,
            },
            OcrState::Unprocessed => Decision::Eligible {
                from: state,
                sidecar_created: false,
            },
            OcrState::Failed if self.retry_failed => Decision::Eligible {
                from: state,
                sidecar_created: false,
            },
            other => Decision::Held { state: other },
        })
    }

    fn create_sidecar(&self, document: &Path, initial: OcrState) -> Result<bool, SidecarError> {
        match self.store.create_if_absent(document, initial) {
            Ok(CreateOutcome::Created) => Ok(true),
            Ok(CreateOutcome::AlreadyExists) => {
                // Present but not ours to read; rewrite it with the classification result.
                let path = self.store.path_for(document);
                match self.store.read(&path) {
                    Ok(Some(record)) => warn!(
                        "Overwriting sidecar {} (type={}, ocr={}) with ocr={}",
                        path.display(),
                        record.kind().unwrap_or("-"),
                        record.raw_state().unwrap_or("-"),
                        initial
                    ),
                    Ok(None) => {}
                    Err(e) => warn!("Overwriting sidecar {}: {}", path.display(), e),
                }
                self.store.claim(document, initial)?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Persist the result of an OCR attempt.
    ///
    /// Success becomes `done`, an exhausted fallback `failed`. A cancelled
    /// job leaves the sidecar untouched. The write is a compare-and-swap
    /// from `from`, so a concurrent operator override wins.
    pub fn record_outcome(
        &self,
        document: &Path,
        from: OcrState,
        result: &Result<JobOutcome, OcrError>,
    ) -> Result<Option<OcrState>, SidecarError> {
        let target = match result {
            Ok(_) => OcrState::Done,
            Err(OcrError::Cancelled) => return Ok(None),
            Err(_) => OcrState::Failed,
        };
        match self.store.transition(document, Some(from), target)? {
            TransitionOutcome::Applied(_) => Ok(Some(target)),
            TransitionOutcome::Conflict { current } => {
                warn!(
                    "{}: sidecar changed to {:?} during OCR, not recording {}",
                    document.display(),
                    current,
                    target
                );
                Ok(None)
            }
        }
    }

    /// Operator path: set `text`, `skipped`, or reset to `unprocessed`.
    pub fn override_state(
        &self,
        document: &Path,
        state: OcrState,
    ) -> Result<UpdateOutcome, DeskError> {
        if !matches!(
            state,
            OcrState::Text | OcrState::Skipped | OcrState::Unprocessed
        ) {
            return Err(DeskError::InvalidOverride(state));
        }
        let outcome = self.store.claim(document, state)?;
        info!("{}: operator set {}", document.display(), state);
        Ok(outcome)
    }

    /// Evaluate `document` and, when eligible, run OCR and record the result.
    pub async fn process(
        &self,
        document: &Path,
        config: &OcrConfig,
        controller: &FallbackController,
        progress: Option<&mut dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<DocumentReport, SidecarError> {
        let decision = self.evaluate(document)?;
        let mut report = DocumentReport {
            document: document.to_path_buf(),
            decision,
            ocr: None,
            recorded: None,
            persistence_error: None,
        };

        let Decision::Eligible { from, .. } = report.decision else {
            return Ok(report);
        };

        let job = OcrJob::for_document(document, config);
        let result = controller.run(&job, progress, cancel).await;
        match &result {
            Ok(outcome) => info!("{}: OCR ok ({:?})", document.display(), outcome),
            Err(e) => warn!("{}: OCR failed: {}", document.display(), e),
        }

        match self.record_outcome(document, from, &result) {
            Ok(recorded) => report.recorded = recorded,
            Err(e) => {
                warn!("{}: could not record OCR result: {}", document.display(), e);
                report.persistence_error = Some(e);
            }
        }
        report.ocr = Some(result);
        Ok(report)
    }
}
