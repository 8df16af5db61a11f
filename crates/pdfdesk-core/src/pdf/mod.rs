//! PDF inspection: image/text classification and password detection.

mod cache;
mod inspector;

pub use cache::{CacheKey, CachedInspector, ClassificationCache, FileClock, MemoryCache, SystemClock};
pub use inspector::LopdfInspector;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PdfError;

/// Kind of PDF content, as far as OCR is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// Pages carry machine-extractable text.
    Text,
    /// Pages are scans without a text layer.
    Image,
}

/// Result of classifying one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Image or text class.
    pub kind: DocumentKind,
    /// Total page count.
    pub pages: u32,
    /// Share of sampled pages that carried text.
    pub text_ratio: f64,
    /// Number of pages actually sampled.
    pub checked: u32,
}

/// Result type for PDF operations.
pub type Result<T> = std::result::Result<T, PdfError>;

/// Collaborator interface consumed by the state machine.
pub trait DocumentInspector: Send + Sync {
    /// Classify a document as image- or text-class.
    fn classify(&self, path: &Path) -> Result<Classification>;

    /// Whether the document needs a password to open.
    fn is_locked(&self, path: &Path) -> bool;
}

impl<T: DocumentInspector + ?Sized> DocumentInspector for std::sync::Arc<T> {
    fn classify(&self, path: &Path) -> Result<Classification> {
        (**self).classify(path)
    }

    fn is_locked(&self, path: &Path) -> bool {
        (**self).is_locked(path)
    }
}
