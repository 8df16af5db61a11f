//! The `ocrmypdf` command-line backend.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::backend::{BackendKind, OcrBackend};
use super::progress::{ProgressTracker, display_line};
use super::supervisor::{CommandSpec, ProcessSupervisor, SupervisorEvent, SupervisorLimits};
use super::{OcrJob, ProgressSink};
use crate::error::OcrError;
use crate::models::config::DeskConfig;

const HELP_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs `ocrmypdf` under the process supervisor and streams page progress.
#[derive(Debug)]
pub struct CommandBackend {
    program: PathBuf,
    supervisor: ProcessSupervisor,
    progress_flag: OnceCell<bool>,
}

impl CommandBackend {
    pub fn new(program: impl Into<PathBuf>, limits: SupervisorLimits) -> Self {
        Self {
            program: program.into(),
            supervisor: ProcessSupervisor::new(limits),
            progress_flag: OnceCell::new(),
        }
    }

    pub fn from_config(config: &DeskConfig) -> Self {
        let program = config
            .tools
            .ocrmypdf
            .clone()
            .unwrap_or_else(|| PathBuf::from("ocrmypdf"));
        Self::new(program, SupervisorLimits::from(&config.ocr))
    }

    /// Skip the `--help` probe and use the given answer.
    pub fn with_progress_bar_support(self, supported: bool) -> Self {
        Self {
            progress_flag: OnceCell::new_with(Some(supported)),
            ..self
        }
    }

    fn locate(&self) -> Result<PathBuf, OcrError> {
        which::which(&self.program).map_err(|_| {
            OcrError::ToolNotFound(self.program.to_string_lossy().into_owned())
        })
    }

    async fn supports_progress_bar(&self, program: &Path) -> bool {
        *self
            .progress_flag
            .get_or_init(|| async {
                let probe = tokio::time::timeout(
                    HELP_TIMEOUT,
                    Command::new(program).arg("--help").kill_on_drop(true).output(),
                )
                .await;
                let supported = match probe {
                    Ok(Ok(output)) => {
                        String::from_utf8_lossy(&output.stdout).contains("--progress-bar")
                            || String::from_utf8_lossy(&output.stderr).contains("--progress-bar")
                    }
                    _ => false,
                };
                debug!("ocrmypdf --progress-bar supported: {}", supported);
                supported
            })
            .await
    }

    /// Build the full command line for `job`.
    pub fn build_command(
        program: &Path,
        job: &OcrJob,
        language: &str,
        progress_bar: bool,
    ) -> CommandSpec {
        let options = &job.options;
        let mut spec = CommandSpec::new(program)
            .args(["--language", language])
            .args(["--output-type", "pdf"])
            .args(["--deskew", "--clean"])
            .arg("--optimize")
            .arg(options.optimize.to_string())
            .arg("--jobs")
            .arg(options.jobs.to_string())
            .arg("--force-ocr")
            .arg("--image-dpi")
            .arg(options.image_dpi.to_string())
            .arg("--oversample")
            .arg(options.oversample.to_string())
            .arg("--tesseract-timeout")
            .arg(options.tesseract_timeout.as_secs().to_string())
            .args(["--pdf-renderer", "sandwich"]);

        if progress_bar {
            spec = spec.args(["--progress-bar", "plain"]);
        }
        if options.rotate_pages {
            spec = spec.arg("--rotate-pages");
        }
        if let Some(text) = &job.text_output {
            spec = spec.arg("--sidecar").arg(text);
        }
        spec.arg(&job.source).arg(&job.destination)
    }
}

impl Default for CommandBackend {
    fn default() -> Self {
        Self::from_config(&DeskConfig::default())
    }
}

#[async_trait]
impl OcrBackend for CommandBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Command
    }

    fn reports_progress(&self) -> bool {
        true
    }

    async fn convert(
        &self,
        job: &OcrJob,
        language: &str,
        mut progress: Option<&mut dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<(), OcrError> {
        let program = self.locate()?;
        let progress_bar = self.supports_progress_bar(&program).await;
        let spec = Self::build_command(&program, job, language, progress_bar);

        info!("Running OCR: {}", spec.display());
        if let Some(sink) = progress.as_deref_mut() {
            sink.report(&format!("$ {}", spec.display()), None);
        }

        let mut tracker = ProgressTracker::new();
        let report = self
            .supervisor
            .run(&spec, cancel, |event| {
                let fraction = match event {
                    SupervisorEvent::Line(line) => tracker.observe(line),
                    SupervisorEvent::Idle(_) => tracker.last(),
                };
                let Some(sink) = progress.as_deref_mut() else {
                    return;
                };
                match event {
                    SupervisorEvent::Line(line) => sink.report(&display_line(line), fraction),
                    SupervisorEvent::Idle(quiet) => {
                        sink.report(&SupervisorEvent::heartbeat_message(quiet), fraction)
                    }
                }
            })
            .await?;

        info!(
            "OCR finished in {:.1}s: {}",
            report.elapsed.as_secs_f64(),
            job.destination.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::OcrConfig;
    use pretty_assertions::assert_eq;

    fn rendered(spec: &CommandSpec) -> Vec<String> {
        spec.get_args()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_command_line_flags() {
        let config = OcrConfig {
            write_text: true,
            ..OcrConfig::default()
        };
        let job = OcrJob::for_document(Path::new("/docs/scan.pdf"), &config);
        let spec = CommandBackend::build_command(Path::new("/usr/bin/ocrmypdf"), &job, "jpn+eng", true);
        assert_eq!(
            rendered(&spec),
            vec![
                "--language", "jpn+eng", "--output-type", "pdf", "--deskew", "--clean",
                "--optimize", "1", "--jobs", "2", "--force-ocr", "--image-dpi", "300",
                "--oversample", "300", "--tesseract-timeout", "60", "--pdf-renderer",
                "sandwich", "--progress-bar", "plain", "--rotate-pages", "--sidecar",
                "/docs/scan_ocr.txt", "/docs/scan.pdf", "/docs/scan_ocr.pdf",
            ]
        );
    }

    #[test]
    fn test_optional_flags_are_omitted() {
        let config = OcrConfig {
            rotate_pages: false,
            ..OcrConfig::default()
        };
        let job = OcrJob::for_document(Path::new("/docs/scan.pdf"), &config);
        let args = rendered(&CommandBackend::build_command(
            Path::new("ocrmypdf"),
            &job,
            "eng",
            false,
        ));
        assert!(!args.iter().any(|a| a == "--progress-bar"));
        assert!(!args.iter().any(|a| a == "--rotate-pages"));
        assert!(!args.iter().any(|a| a == "--sidecar"));
        assert_eq!(args.last().map(String::as_str), Some("/docs/scan_ocr.pdf"));
    }

    #[tokio::test]
    async fn test_missing_tool_is_reported() {
        let backend = CommandBackend::new("/nonexistent/ocrmypdf", SupervisorLimits::default());
        let job = OcrJob::for_document(Path::new("/docs/scan.pdf"), &OcrConfig::default());
        let err = backend
            .convert(&job, "eng", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::ToolNotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_progress_is_streamed_through_a_fake_tool() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("fake-ocrmypdf");
        std::fs::write(
            &tool,
            "#!/bin/sh\necho 'Page 1/4'\necho '[tesseract] warning' >&2\necho 'Page 4/4'\n",
        )
        .unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let backend = CommandBackend::new(&tool, SupervisorLimits::default())
            .with_progress_bar_support(false);
        let job = OcrJob::for_document(&dir.path().join("scan.pdf"), &OcrConfig::default());

        let mut seen: Vec<(String, Option<f64>)> = Vec::new();
        let mut sink = |message: &str, fraction: Option<f64>| {
            seen.push((message.to_string(), fraction));
        };
        backend
            .convert(&job, "eng", Some(&mut sink), &CancellationToken::new())
            .await
            .unwrap();

        assert!(seen[0].0.starts_with("$ "));
        assert!(seen.iter().any(|(m, _)| m == "Tesseract: warning"));
        assert_eq!(seen.last().and_then(|(_, f)| *f), Some(1.0));
        let fractions: Vec<f64> = seen.iter().filter_map(|(_, f)| *f).collect();
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    }
}
