//! Backend selection and the retry chain for one job.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backend::{BackendKind, OcrBackend};
use super::command::CommandBackend;
use super::language::{LanguageCatalog, LanguageResolver, ResolvedLanguage, TesseractCatalog};
use super::library::LibraryBackend;
use super::{JobOutcome, OcrJob, ProgressSink, reborrow_sink};
use crate::error::{DeskError, OcrError};
use crate::models::config::DeskConfig;

const ENGLISH: &str = "eng";

/// Chooses a backend per job and applies the fallback policy.
///
/// With a progress sink the command backend runs first (it is the only one
/// that reports pages) and a failure is retried once in English. Without a
/// sink the library backend runs first and a failure falls back to the
/// command backend with the same languages. Timeouts and cancellations end
/// the job immediately.
pub struct FallbackController {
    resolver: LanguageResolver,
    library: Arc<dyn OcrBackend>,
    command: Arc<dyn OcrBackend>,
    english_retry_without_progress: bool,
}

/// Builder for [`FallbackController`].
pub struct FallbackControllerBuilder {
    catalog: Option<Arc<dyn LanguageCatalog>>,
    library: Option<Arc<dyn OcrBackend>>,
    command: Option<Arc<dyn OcrBackend>>,
    english_retry_without_progress: bool,
}

impl FallbackControllerBuilder {
    pub fn new() -> Self {
        Self {
            catalog: None,
            library: None,
            command: None,
            english_retry_without_progress: false,
        }
    }

    /// Set the installed-language source.
    pub fn with_catalog(mut self, catalog: Arc<dyn LanguageCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Set the backend used first when no progress is requested.
    pub fn with_library_backend(mut self, backend: Arc<dyn OcrBackend>) -> Self {
        self.library = Some(backend);
        self
    }

    /// Set the progress-reporting backend.
    pub fn with_command_backend(mut self, backend: Arc<dyn OcrBackend>) -> Self {
        self.command = Some(backend);
        self
    }

    /// Also retry in English when no progress sink is attached.
    pub fn english_retry_without_progress(mut self, enabled: bool) -> Self {
        self.english_retry_without_progress = enabled;
        self
    }

    /// Fails when the progress slot holds a backend that reports no pages.
    pub fn build(self) -> Result<FallbackController, DeskError> {
        let command: Arc<dyn OcrBackend> = self
            .command
            .unwrap_or_else(|| Arc::new(CommandBackend::default()));
        if !command.reports_progress() {
            return Err(DeskError::Config(format!(
                "the {} backend does not report progress and cannot serve progress requests",
                command.kind()
            )));
        }

        Ok(FallbackController {
            resolver: LanguageResolver::new(
                self.catalog
                    .unwrap_or_else(|| Arc::new(TesseractCatalog::default())),
            ),
            library: self
                .library
                .unwrap_or_else(|| Arc::new(LibraryBackend::default())),
            command,
            english_retry_without_progress: self.english_retry_without_progress,
        })
    }
}

impl Default for FallbackControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackController {
    pub fn builder() -> FallbackControllerBuilder {
        FallbackControllerBuilder::new()
    }

    /// Controller wired to the real tools named in `config`.
    pub fn from_config(config: &DeskConfig) -> Result<Self, DeskError> {
        Self::builder()
            .with_catalog(Arc::new(TesseractCatalog::from_config(&config.tools)))
            .with_library_backend(Arc::new(LibraryBackend::from_config(config)))
            .with_command_backend(Arc::new(CommandBackend::from_config(config)))
            .english_retry_without_progress(config.ocr.english_retry_without_progress)
            .build()
    }

    pub fn resolver(&self) -> &LanguageResolver {
        &self.resolver
    }

    /// Run one job through the fallback chain.
    pub async fn run(
        &self,
        job: &OcrJob,
        mut progress: Option<&mut dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, OcrError> {
        if job.destination == job.source {
            return Err(OcrError::InvalidJob(format!(
                "output would overwrite the source {}",
                job.source.display()
            )));
        }
        if job.destination.exists() {
            info!("Output already present: {}", job.destination.display());
            return Ok(JobOutcome::AlreadyPresent);
        }

        let started = Instant::now();
        let resolved = self.resolver.resolve(&job.language).await;
        let converted = |backend: BackendKind, language: &str| JobOutcome::Converted {
            backend,
            language: language.to_string(),
            elapsed: started.elapsed(),
        };

        if progress.is_some() {
            let first = self
                .command
                .convert(job, &resolved.spec, reborrow_sink(&mut progress), cancel)
                .await;
            return match first {
                Ok(()) => Ok(converted(self.command.kind(), &resolved.spec)),
                Err(e) if english_retry_allowed(&e, &resolved) => {
                    let message = format!(
                        "[{}] failed with lang={}: {}. retry with eng only",
                        self.command.kind(),
                        resolved.spec,
                        e
                    );
                    warn!("{}", message);
                    if let Some(sink) = progress.as_deref_mut() {
                        sink.report(&message, None);
                    }
                    self.command
                        .convert(job, ENGLISH, progress, cancel)
                        .await?;
                    Ok(converted(self.command.kind(), ENGLISH))
                }
                Err(e) => Err(e),
            };
        }

        match self.library.convert(job, &resolved.spec, None, cancel).await {
            Ok(()) => return Ok(converted(self.library.kind(), &resolved.spec)),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => warn!("[{}] failed: {}. fallback to CLI", self.library.kind(), e),
        }

        match self.command.convert(job, &resolved.spec, None, cancel).await {
            Ok(()) => Ok(converted(self.command.kind(), &resolved.spec)),
            Err(e) if self.english_retry_without_progress && english_retry_allowed(&e, &resolved) => {
                warn!(
                    "[{}] failed with lang={}: {}. retry with eng only",
                    self.command.kind(),
                    resolved.spec,
                    e
                );
                self.command.convert(job, ENGLISH, None, cancel).await?;
                Ok(converted(self.command.kind(), ENGLISH))
            }
            Err(e) => {
                debug!("No further fallback for {}", job.source.display());
                Err(e)
            }
        }
    }
}

fn english_retry_allowed(error: &OcrError, resolved: &ResolvedLanguage) -> bool {
    error.is_retryable() && !resolved.is_english() && resolved.english_available
}

impl std::fmt::Debug for FallbackController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackController")
            .field("library", &self.library.kind())
            .field("command", &self.command.kind())
            .field(
                "english_retry_without_progress",
                &self.english_retry_without_progress,
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::OcrConfig;
    use crate::ocr::StaticCatalog;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Backend that replays scripted results and records the languages used.
    pub(crate) struct ScriptedBackend {
        kind: BackendKind,
        results: Mutex<VecDeque<Result<(), OcrError>>>,
        pub(crate) languages: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        pub(crate) fn new(kind: BackendKind, results: Vec<Result<(), OcrError>>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                results: Mutex::new(results.into()),
                languages: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.languages.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OcrBackend for ScriptedBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn reports_progress(&self) -> bool {
            self.kind == BackendKind::Command
        }

        async fn convert(
            &self,
            _job: &OcrJob,
            language: &str,
            progress: Option<&mut dyn ProgressSink>,
            _cancel: &CancellationToken,
        ) -> Result<(), OcrError> {
            self.languages.lock().unwrap().push(language.to_string());
            if let Some(sink) = progress {
                sink.report("Page 1/1", Some(1.0));
            }
            self.results.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    pub(crate) fn failed() -> OcrError {
        OcrError::ProcessFailed {
            program: "ocrmypdf".to_string(),
            code: Some(2),
            tail: "error".to_string(),
        }
    }

    fn timeout() -> OcrError {
        OcrError::Timeout {
            program: "ocrmypdf".to_string(),
            limit: Duration::from_secs(1),
        }
    }

    fn controller(
        installed: &[&str],
        library: &Arc<ScriptedBackend>,
        command: &Arc<ScriptedBackend>,
    ) -> FallbackControllerBuilder {
        FallbackController::builder()
            .with_catalog(Arc::new(StaticCatalog::new(installed.iter().copied())))
            .with_library_backend(library.clone())
            .with_command_backend(command.clone())
    }

    fn job(language: &str) -> OcrJob {
        OcrJob::for_document(Path::new("/nonexistent-dir/scan.pdf"), &OcrConfig::default())
            .with_language(language)
    }

    #[tokio::test]
    async fn test_existing_output_does_no_work() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("scan.pdf");
        std::fs::write(dir.path().join("scan_ocr.pdf"), b"%PDF").unwrap();

        let library = ScriptedBackend::new(BackendKind::Library, vec![]);
        let command = ScriptedBackend::new(BackendKind::Command, vec![]);
        let controller = controller(&["eng"], &library, &command).build()
            .unwrap();
        let job = OcrJob::for_document(&source, &OcrConfig::default());

        let outcome = controller.run(&job, None, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, JobOutcome::AlreadyPresent);
        assert!(library.calls().is_empty());
        assert!(command.calls().is_empty());
    }

    #[tokio::test]
    async fn test_progress_branch_retries_in_english() {
        let library = ScriptedBackend::new(BackendKind::Library, vec![]);
        let command = ScriptedBackend::new(BackendKind::Command, vec![Err(failed()), Ok(())]);
        let controller = controller(&["eng", "jpn"], &library, &command).build()
            .unwrap();

        let mut messages = Vec::new();
        let mut sink = |message: &str, _: Option<f64>| messages.push(message.to_string());
        let outcome = controller
            .run(&job("jpn+eng"), Some(&mut sink), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            JobOutcome::Converted { backend: BackendKind::Command, ref language, .. } if language == "eng"
        ));
        assert_eq!(command.calls(), vec!["jpn+eng", "eng"]);
        assert!(library.calls().is_empty());
        assert!(messages.iter().any(|m| m.contains("retry with eng only")));
    }

    #[tokio::test]
    async fn test_english_retry_failure_propagates() {
        let library = ScriptedBackend::new(BackendKind::Library, vec![]);
        let command =
            ScriptedBackend::new(BackendKind::Command, vec![Err(failed()), Err(failed())]);
        let controller = controller(&["eng", "jpn"], &library, &command).build()
            .unwrap();

        let mut sink = |_: &str, _: Option<f64>| {};
        let err = controller
            .run(&job("jpn"), Some(&mut sink), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::ProcessFailed { .. }));
        assert_eq!(command.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_never_retried() {
        let library = ScriptedBackend::new(BackendKind::Library, vec![Err(timeout())]);
        let command = ScriptedBackend::new(BackendKind::Command, vec![Err(timeout())]);
        let controller = controller(&["eng", "jpn"], &library, &command).build()
            .unwrap();

        let mut sink = |_: &str, _: Option<f64>| {};
        let err = controller
            .run(&job("jpn"), Some(&mut sink), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::Timeout { .. }));
        assert_eq!(command.calls().len(), 1);

        let err = controller
            .run(&job("jpn"), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::Timeout { .. }));
        assert_eq!(library.calls().len(), 1);
        assert_eq!(command.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_no_retry_when_already_english() {
        let library = ScriptedBackend::new(BackendKind::Library, vec![]);
        let command = ScriptedBackend::new(BackendKind::Command, vec![Err(failed())]);
        let controller = controller(&["eng"], &library, &command).build()
            .unwrap();

        let mut sink = |_: &str, _: Option<f64>| {};
        let result = controller
            .run(&job("jpn"), Some(&mut sink), &CancellationToken::new())
            .await;
        assert!(result.is_err());
        assert_eq!(command.calls(), vec!["eng"]);
    }

    #[tokio::test]
    async fn test_silent_branch_falls_back_with_same_language() {
        let library = ScriptedBackend::new(BackendKind::Library, vec![Err(failed())]);
        let command = ScriptedBackend::new(BackendKind::Command, vec![Ok(())]);
        let controller = controller(&["eng", "jpn"], &library, &command).build()
            .unwrap();

        let outcome = controller
            .run(&job("jpn+deu+eng"), None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            JobOutcome::Converted { backend: BackendKind::Command, ref language, .. } if language == "jpn+eng"
        ));
        assert_eq!(library.calls(), vec!["jpn+eng"]);
        assert_eq!(command.calls(), vec!["jpn+eng"]);
    }

    #[tokio::test]
    async fn test_silent_branch_has_no_english_retry_by_default() {
        let library = ScriptedBackend::new(BackendKind::Library, vec![Err(failed())]);
        let command = ScriptedBackend::new(BackendKind::Command, vec![Err(failed()), Ok(())]);
        let controller = controller(&["eng", "jpn"], &library, &command).build()
            .unwrap();

        let result = controller
            .run(&job("jpn"), None, &CancellationToken::new())
            .await;
        assert!(result.is_err());
        assert_eq!(command.calls(), vec!["jpn"]);
    }

    #[tokio::test]
    async fn test_silent_branch_english_retry_when_enabled() {
        let library = ScriptedBackend::new(BackendKind::Library, vec![Err(failed())]);
        let command = ScriptedBackend::new(BackendKind::Command, vec![Err(failed()), Ok(())]);
        let controller = controller(&["eng", "jpn"], &library, &command)
            .english_retry_without_progress(true)
            .build()
            .unwrap();

        let outcome = controller
            .run(&job("jpn"), None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, JobOutcome::Converted { .. }));
        assert_eq!(command.calls(), vec!["jpn", "eng"]);
    }

    #[tokio::test]
    async fn test_library_success_is_used_directly() {
        let library = ScriptedBackend::new(BackendKind::Library, vec![Ok(())]);
        let command = ScriptedBackend::new(BackendKind::Command, vec![]);
        let controller = controller(&["eng", "jpn"], &library, &command).build()
            .unwrap();

        let outcome = controller
            .run(&job("jpn+eng"), None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            JobOutcome::Converted { backend: BackendKind::Library, .. }
        ));
        assert!(command.calls().is_empty());
    }

    #[test]
    fn test_progress_slot_requires_progress_backend() {
        let library = ScriptedBackend::new(BackendKind::Library, vec![]);
        let result = FallbackController::builder()
            .with_catalog(Arc::new(StaticCatalog::new(["eng"])))
            .with_command_backend(library)
            .build();
        assert!(matches!(result, Err(DeskError::Config(_))));
    }

    #[tokio::test]
    async fn test_job_writing_over_its_source_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("scan.pdf");
        std::fs::write(&source, b"%PDF").unwrap();

        let library = ScriptedBackend::new(BackendKind::Library, vec![]);
        let command = ScriptedBackend::new(BackendKind::Command, vec![]);
        let controller = controller(&["eng"], &library, &command).build().unwrap();
        let job = OcrJob::for_document(&source, &OcrConfig::default()).with_destination(&source);

        let result = controller.run(&job, None, &CancellationToken::new()).await;
        assert!(matches!(result, Err(OcrError::InvalidJob(_))));
        assert!(library.calls().is_empty());
        assert!(command.calls().is_empty());
    }
}
