//! The conversion interface shared by both execution paths.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{OcrJob, ProgressSink};
use crate::error::OcrError;

/// Which execution path performed a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The OCRmyPDF Python API.
    Library,
    /// The `ocrmypdf` command line.
    Command,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Library => write!(f, "python-api"),
            BackendKind::Command => write!(f, "cli"),
        }
    }
}

/// Converts one document.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether page progress reaches the sink.
    fn reports_progress(&self) -> bool;

    /// Convert `job.source` into `job.destination` using `language`
    /// (already narrowed to installed packs).
    async fn convert(
        &self,
        job: &OcrJob,
        language: &str,
        progress: Option<&mut dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<(), OcrError>;
}
