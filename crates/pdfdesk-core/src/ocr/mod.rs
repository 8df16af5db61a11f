//! OCR execution through OCRmyPDF and Tesseract.

mod backend;
mod command;
mod fallback;
mod language;
mod library;
mod progress;
mod supervisor;

pub use backend::{BackendKind, OcrBackend};
pub use command::CommandBackend;
pub use fallback::{FallbackController, FallbackControllerBuilder};
pub use language::{
    LanguageCatalog, LanguageResolver, ResolvedLanguage, StaticCatalog, TesseractCatalog, narrow,
    parse_language_list,
};
pub use library::LibraryBackend;
pub use progress::{ProgressTracker, TESSERACT_PREFIX, display_line, parse_page_progress};
pub use supervisor::{CommandSpec, ProcessSupervisor, RunReport, SupervisorEvent, SupervisorLimits};

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::config::OcrConfig;
use crate::naming;

/// Numeric and boolean options of one conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrOptions {
    /// Optimization level (0-3).
    pub optimize: u8,
    /// Parallelism hint.
    pub jobs: usize,
    /// Auto-rotate pages.
    pub rotate_pages: bool,
    /// DPI assumed for images without resolution metadata.
    pub image_dpi: u32,
    /// Oversampling DPI.
    pub oversample: u32,
    /// Per-page recognition timeout.
    pub tesseract_timeout: Duration,
}

impl Default for OcrOptions {
    fn default() -> Self {
        Self::from(&OcrConfig::default())
    }
}

impl From<&OcrConfig> for OcrOptions {
    fn from(config: &OcrConfig) -> Self {
        Self {
            optimize: config.optimize,
            jobs: config.jobs.max(1),
            rotate_pages: config.rotate_pages,
            image_dpi: config.image_dpi,
            oversample: config.oversample,
            tesseract_timeout: config.tesseract_timeout(),
        }
    }
}

/// One document conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrJob {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Requested language spec, before narrowing.
    pub language: String,
    pub options: OcrOptions,
    /// Optional plain-text output.
    pub text_output: Option<PathBuf>,
}

impl OcrJob {
    /// Job for `source` writing `<stem>_ocr.pdf` next to it.
    pub fn for_document(source: &Path, config: &OcrConfig) -> Self {
        Self {
            source: source.to_path_buf(),
            destination: naming::dest_ocr_path(source),
            language: config.language.clone(),
            options: OcrOptions::from(config),
            text_output: config
                .write_text
                .then(|| naming::text_output_path(source)),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = destination.into();
        self
    }

    pub fn with_text_output(mut self, path: Option<PathBuf>) -> Self {
        self.text_output = path;
        self
    }
}

/// Receives `(message, fraction)` while a job runs.
pub trait ProgressSink: Send {
    fn report(&mut self, message: &str, fraction: Option<f64>);
}

impl<F> ProgressSink for F
where
    F: FnMut(&str, Option<f64>) + Send,
{
    fn report(&mut self, message: &str, fraction: Option<f64>) {
        self(message, fraction)
    }
}

/// Reborrow an optional sink so it can be handed to a nested call and used
/// again afterwards.
pub fn reborrow_sink<'a>(
    sink: &'a mut Option<&mut dyn ProgressSink>,
) -> Option<&'a mut dyn ProgressSink> {
    match sink {
        Some(inner) => Some(&mut **inner),
        None => None,
    }
}

/// How a job ended successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// A backend produced the output.
    Converted {
        backend: BackendKind,
        language: String,
        elapsed: Duration,
    },
    /// The output already existed; nothing ran.
    AlreadyPresent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_job_for_document() {
        let config = OcrConfig {
            write_text: true,
            jobs: 0,
            ..OcrConfig::default()
        };
        let job = OcrJob::for_document(Path::new("/docs/scan.pdf"), &config);
        assert_eq!(job.destination, PathBuf::from("/docs/scan_ocr.pdf"));
        assert_eq!(job.text_output, Some(PathBuf::from("/docs/scan_ocr.txt")));
        assert_eq!(job.language, "jpn+eng");
        assert_eq!(job.options.jobs, 1);
        assert_eq!(job.options.tesseract_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_closures_are_sinks() {
        let mut seen = Vec::new();
        {
            let mut sink = |message: &str, fraction: Option<f64>| {
                seen.push((message.to_string(), fraction));
            };
            let dyn_sink: &mut dyn ProgressSink = &mut sink;
            dyn_sink.report("Page 1/2", Some(0.5));
        }
        assert_eq!(seen, vec![("Page 1/2".to_string(), Some(0.5))]);
    }
}
