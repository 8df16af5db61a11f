//! Configuration structures for the OCR engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for pdfdesk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeskConfig {
    /// OCR job configuration.
    pub ocr: OcrConfig,

    /// External tool locations.
    pub tools: ToolsConfig,

    /// Image/text classification configuration.
    pub classify: ClassifyConfig,

    /// Sidecar file configuration.
    pub sidecar: SidecarConfig,
}

/// OCR job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Requested Tesseract language spec (e.g. "jpn+eng").
    pub language: String,

    /// OCRmyPDF optimization level (0 = off, 1 = default, 2-3 = aggressive).
    pub optimize: u8,

    /// Parallelism hint passed to the OCR engine.
    pub jobs: usize,

    /// Auto-rotate pages.
    pub rotate_pages: bool,

    /// Also write the recognized text to `<stem>_ocr.txt`.
    pub write_text: bool,

    /// DPI assumed for images lacking resolution metadata.
    pub image_dpi: u32,

    /// Oversampling DPI for low resolution pages.
    pub oversample: u32,

    /// Per-page Tesseract timeout in seconds.
    pub tesseract_timeout_secs: u64,

    /// Hard wall-clock limit for one job, in seconds.
    pub hard_timeout_secs: u64,

    /// Seconds without output before a heartbeat notice is emitted.
    pub idle_notice_secs: u64,

    /// Interval of the supervisor's liveness checks, in milliseconds.
    pub poll_interval_ms: u64,

    /// Number of trailing output lines kept for diagnostics.
    pub tail_lines: usize,

    /// Retry English-only after the command fallback when no progress is reported.
    pub english_retry_without_progress: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            language: "jpn+eng".to_string(),
            optimize: 1,
            jobs: 2,
            rotate_pages: true,
            write_text: false,
            image_dpi: 300,
            oversample: 300,
            tesseract_timeout_secs: 60,
            hard_timeout_secs: 3600,
            idle_notice_secs: 180,
            poll_interval_ms: 200,
            tail_lines: 50,
            english_retry_without_progress: false,
        }
    }
}

impl OcrConfig {
    pub fn hard_timeout(&self) -> Duration {
        Duration::from_secs(self.hard_timeout_secs)
    }

    pub fn idle_notice(&self) -> Duration {
        Duration::from_secs(self.idle_notice_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn tesseract_timeout(&self) -> Duration {
        Duration::from_secs(self.tesseract_timeout_secs)
    }
}

/// Locations of the external tools. `None` means "look up on PATH".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// The `ocrmypdf` executable.
    pub ocrmypdf: Option<PathBuf>,

    /// The `tesseract` executable.
    pub tesseract: Option<PathBuf>,

    /// Python interpreter with the `ocrmypdf` package installed.
    pub python: Option<PathBuf>,
}

/// Classification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifyConfig {
    /// Number of leading pages sampled.
    pub sample_pages: u32,

    /// Minimum trimmed characters for a page to count as text-bearing.
    pub min_page_chars: usize,

    /// Ratio of text-bearing sampled pages at or above which a PDF is text-class.
    pub text_ratio_threshold: f64,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            sample_pages: 6,
            min_page_chars: 20,
            text_ratio_threshold: 0.3,
        }
    }
}

/// Sidecar configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    /// UTC offset of `created_at` timestamps, in minutes.
    pub utc_offset_minutes: i32,

    /// Age after which an abandoned `.lock` file is ignored, in seconds.
    pub stale_lock_secs: u64,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 9 * 60,
            stale_lock_secs: 30,
        }
    }
}

impl DeskConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        std::fs::write(path, content)
    }
}
