//! Core library for pdfdesk: OCR execution and document state tracking.
//!
//! This crate provides:
//! - PDF inspection (image/text classification, password detection)
//! - Per-document sidecar records with atomic, field-preserving updates
//! - OCR execution through OCRmyPDF with supervision, progress and fallbacks
//! - The document state machine and a sequential batch runner

pub mod error;
pub mod models;
pub mod naming;
pub mod ocr;
pub mod pdf;
pub mod sidecar;
pub mod workflow;

pub use error::{DeskError, OcrError, PdfError, Result, SidecarError};
pub use models::{DeskConfig, OcrState};
pub use ocr::{FallbackController, JobOutcome, OcrJob, ProgressSink};
pub use pdf::{CachedInspector, Classification, DocumentInspector, DocumentKind, LopdfInspector};
pub use sidecar::{SidecarRecord, SidecarStore};
pub use workflow::{BatchRunner, BatchSummary, Decision, DocumentStateMachine};
