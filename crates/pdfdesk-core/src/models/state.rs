//! Document processing state as stored in the sidecar `ocr` field.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Processing state of an image-class document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrState {
    /// Classified as image-class, OCR not yet attempted.
    Unprocessed,
    /// OCR succeeded, or a derived output already exists.
    Done,
    /// Human override: misclassified, the document carries text.
    Text,
    /// Human override: excluded from OCR and downstream indexing.
    Skipped,
    /// The document requires a password.
    Locked,
    /// OCR was attempted and every fallback failed.
    Failed,
}

impl OcrState {
    pub const ALL: [OcrState; 6] = [
        OcrState::Unprocessed,
        OcrState::Done,
        OcrState::Text,
        OcrState::Skipped,
        OcrState::Locked,
        OcrState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OcrState::Unprocessed => "unprocessed",
            OcrState::Done => "done",
            OcrState::Text => "text",
            OcrState::Skipped => "skipped",
            OcrState::Locked => "locked",
            OcrState::Failed => "failed",
        }
    }

    /// Terminal for automated processing.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OcrState::Unprocessed)
    }

    /// Set only by an operator; no automatic transition leaves these.
    pub fn is_human_override(&self) -> bool {
        matches!(self, OcrState::Text | OcrState::Skipped)
    }
}

impl fmt::Display for OcrState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown state name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownState(pub String);

impl fmt::Display for UnknownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown OCR state '{}'", self.0)
    }
}

impl std::error::Error for UnknownState {}

impl FromStr for OcrState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OcrState::ALL
            .into_iter()
            .find(|state| state.as_str() == s.trim())
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}
