//! Error types for the pdfdesk-core library.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::models::state::OcrState;

/// Main error type for the pdfdesk library.
#[derive(Error, Debug)]
pub enum DeskError {
    /// PDF inspection error.
    #[error("PDF error: {0}")]
    Pdf(#[from] PdfError),

    /// OCR execution error.
    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    /// Sidecar persistence error.
    #[error("sidecar error: {0}")]
    Sidecar(#[from] SidecarError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The state is reserved for automatic transitions.
    #[error("state '{0}' cannot be set manually (use text, skipped or unprocessed)")]
    InvalidOverride(OcrState),
}

/// Errors related to PDF inspection.
#[derive(Error, Debug)]
pub enum PdfError {
    /// Failed to open/parse the PDF file.
    #[error("failed to parse PDF: {0}")]
    Parse(String),

    /// The PDF is encrypted and cannot be opened without a password.
    #[error("PDF is encrypted")]
    Encrypted,

    /// The PDF is empty or has no pages.
    #[error("PDF has no pages")]
    NoPages,

    /// Failed to read the file or its metadata.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while running an OCR job.
#[derive(Error, Debug)]
pub enum OcrError {
    /// The external executable could not be found.
    #[error("{0} not found (install ocrmypdf / tesseract-ocr or set the tool path)")]
    ToolNotFound(String),

    /// The process could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The hard wall-clock limit elapsed; the process was killed.
    #[error("OCR timed out (> {}s): {program}", .limit.as_secs())]
    Timeout { program: String, limit: Duration },

    /// The process exited unsuccessfully.
    #[error("{program} exit code {}\n{tail}", .code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    ProcessFailed {
        program: String,
        code: Option<i32>,
        tail: String,
    },

    /// The job was cancelled by the caller.
    #[error("OCR cancelled")]
    Cancelled,

    /// Job input could not be prepared.
    #[error("invalid job: {0}")]
    InvalidJob(String),

    /// I/O error while supervising the process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OcrError {
    /// Whether a fallback attempt may follow this error.
    ///
    /// Timeouts and cancellations end the job; everything else is handed to
    /// the next backend in the chain.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, OcrError::Timeout { .. } | OcrError::Cancelled)
    }

    /// Captured output tail, when the error came from a failed process.
    pub fn output_tail(&self) -> Option<&str> {
        match self {
            OcrError::ProcessFailed { tail, .. } => Some(tail),
            _ => None,
        }
    }
}

/// Errors related to sidecar persistence.
#[derive(Error, Debug)]
pub enum SidecarError {
    /// Reading or writing the sidecar failed.
    #[error("sidecar I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The sidecar exists but is not a usable JSON object.
    #[error("malformed sidecar {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    /// Serialization failed.
    #[error("failed to serialize sidecar: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Another writer holds the advisory lock.
    #[error("sidecar {0} is locked by another writer")]
    Locked(PathBuf),
}

impl SidecarError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SidecarError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for the pdfdesk library.
pub type Result<T> = std::result::Result<T, DeskError>;
