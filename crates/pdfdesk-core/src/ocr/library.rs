//! The OCRmyPDF Python API backend.
//!
//! The keyword arguments of `ocrmypdf.ocr()` are serialized to JSON and passed
//! to a small interpreter stub, so the call runs under the same supervisor
//! limits as the command backend. The API reports no page progress.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::backend::{BackendKind, OcrBackend};
use super::supervisor::{CommandSpec, ProcessSupervisor, SupervisorEvent, SupervisorLimits};
use super::{OcrJob, ProgressSink};
use crate::error::OcrError;
use crate::models::config::DeskConfig;

const OCR_STUB: &str = r#"import json, sys
import ocrmypdf
kwargs = json.loads(sys.argv[1])
src = kwargs.pop("input_file")
dst = kwargs.pop("output_file")
ocrmypdf.ocr(src, dst, **kwargs)
"#;

/// Calls `ocrmypdf.ocr()` through a Python interpreter.
#[derive(Debug)]
pub struct LibraryBackend {
    python: PathBuf,
    supervisor: ProcessSupervisor,
}

impl LibraryBackend {
    pub fn new(python: impl Into<PathBuf>, limits: SupervisorLimits) -> Self {
        Self {
            python: python.into(),
            supervisor: ProcessSupervisor::new(limits),
        }
    }

    pub fn from_config(config: &DeskConfig) -> Self {
        let python = config
            .tools
            .python
            .clone()
            .unwrap_or_else(|| PathBuf::from("python3"));
        Self::new(python, SupervisorLimits::from(&config.ocr))
    }

    /// Keyword arguments for `ocrmypdf.ocr()`.
    pub fn api_arguments(job: &OcrJob, language: &str) -> Map<String, Value> {
        let options = &job.options;
        let mut kwargs = Map::new();
        kwargs.insert("input_file".into(), json!(job.source.to_string_lossy()));
        kwargs.insert("output_file".into(), json!(job.destination.to_string_lossy()));
        kwargs.insert("language".into(), json!(language));
        kwargs.insert("output_type".into(), json!("pdf"));
        kwargs.insert("optimize".into(), json!(options.optimize));
        kwargs.insert("deskew".into(), json!(true));
        kwargs.insert("clean".into(), json!(true));
        kwargs.insert("progress_bar".into(), json!(false));
        kwargs.insert("jobs".into(), json!(options.jobs));
        kwargs.insert("force_ocr".into(), json!(true));
        kwargs.insert("image_dpi".into(), json!(options.image_dpi));
        kwargs.insert("oversample".into(), json!(options.oversample));
        kwargs.insert(
            "tesseract_timeout".into(),
            json!(options.tesseract_timeout.as_secs()),
        );
        kwargs.insert("pdf_renderer".into(), json!("sandwich"));
        if options.rotate_pages {
            kwargs.insert("rotate_pages".into(), json!(true));
        }
        if let Some(text) = &job.text_output {
            kwargs.insert("sidecar".into(), json!(text.to_string_lossy()));
        }
        kwargs
    }

    fn build_command(&self, program: PathBuf, job: &OcrJob, language: &str) -> CommandSpec {
        let kwargs = Value::Object(Self::api_arguments(job, language));
        CommandSpec::new(program)
            .arg("-c")
            .arg(OCR_STUB)
            .arg(kwargs.to_string())
    }
}

impl Default for LibraryBackend {
    fn default() -> Self {
        Self::from_config(&DeskConfig::default())
    }
}

#[async_trait]
impl OcrBackend for LibraryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Library
    }

    fn reports_progress(&self) -> bool {
        false
    }

    async fn convert(
        &self,
        job: &OcrJob,
        language: &str,
        _progress: Option<&mut dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<(), OcrError> {
        let program = which::which(&self.python).map_err(|_| {
            OcrError::ToolNotFound(self.python.to_string_lossy().into_owned())
        })?;
        let spec = self.build_command(program, job, language);

        info!(
            "Running OCR via Python API: {} -> {}",
            job.source.display(),
            job.destination.display()
        );
        let report = self
            .supervisor
            .run(&spec, cancel, |event| match event {
                SupervisorEvent::Line(line) => debug!("[python-api] {}", line),
                SupervisorEvent::Idle(quiet) => {
                    debug!("[python-api] {}", SupervisorEvent::heartbeat_message(quiet))
                }
            })
            .await?;

        info!("OCR finished in {:.1}s", report.elapsed.as_secs_f64());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::OcrConfig;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    #[test]
    fn test_api_arguments() {
        let job = OcrJob::for_document(Path::new("/docs/scan.pdf"), &OcrConfig::default());
        let kwargs = LibraryBackend::api_arguments(&job, "jpn");
        assert_eq!(kwargs["language"], "jpn");
        assert_eq!(kwargs["force_ocr"], true);
        assert_eq!(kwargs["pdf_renderer"], "sandwich");
        assert_eq!(kwargs["tesseract_timeout"], 60);
        assert_eq!(kwargs["rotate_pages"], true);
        assert_eq!(kwargs["output_file"], "/docs/scan_ocr.pdf");
        assert!(!kwargs.contains_key("sidecar"));
    }

    #[test]
    fn test_stub_receives_json_argument() {
        let backend = LibraryBackend::default();
        let job = OcrJob::for_document(Path::new("/docs/scan.pdf"), &OcrConfig::default());
        let spec = backend.build_command(PathBuf::from("/usr/bin/python3"), &job, "eng");
        let args = spec.get_args();
        assert_eq!(args.len(), 3);
        assert_eq!(args[0], "-c");
        let parsed: Value = serde_json::from_str(&args[2].to_string_lossy()).unwrap();
        assert_eq!(parsed["input_file"], "/docs/scan.pdf");
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_tool_not_found() {
        let backend = LibraryBackend::new("/nonexistent/python3", SupervisorLimits::default());
        let job = OcrJob::for_document(Path::new("/docs/scan.pdf"), &OcrConfig::default());
        let err = backend
            .convert(&job, "eng", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::ToolNotFound(_)));
    }
}
