//! Narrowing a requested Tesseract language spec to what is installed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::models::config::ToolsConfig;

const ENGLISH: &str = "eng";
const LIST_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of the installed language list.
#[async_trait]
pub trait LanguageCatalog: Send + Sync {
    async fn installed(&self) -> std::io::Result<Vec<String>>;
}

/// Queries `tesseract --list-langs`.
#[derive(Debug, Clone)]
pub struct TesseractCatalog {
    program: PathBuf,
}

impl TesseractCatalog {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_config(tools: &ToolsConfig) -> Self {
        Self::new(
            tools
                .tesseract
                .clone()
                .unwrap_or_else(|| PathBuf::from("tesseract")),
        )
    }
}

impl Default for TesseractCatalog {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

#[async_trait]
impl LanguageCatalog for TesseractCatalog {
    async fn installed(&self) -> std::io::Result<Vec<String>> {
        let output = tokio::time::timeout(
            LIST_TIMEOUT,
            Command::new(&self.program)
                .arg("--list-langs")
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "tesseract --list-langs"))??;

        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "tesseract --list-langs exited with {}",
                output.status
            )));
        }

        // Older tesseract releases print the list on stderr.
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push('\n');
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(parse_language_list(&text))
    }
}

/// A fixed language list.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    languages: Vec<String>,
}

impl StaticCatalog {
    pub fn new<I, S>(languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            languages: languages.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl LanguageCatalog for StaticCatalog {
    async fn installed(&self) -> std::io::Result<Vec<String>> {
        Ok(self.languages.clone())
    }
}

/// Parse the output of `tesseract --list-langs`.
pub fn parse_language_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of"))
        .map(str::to_string)
        .collect()
}

/// Outcome of narrowing a language spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLanguage {
    /// Spec handed to the OCR engine.
    pub spec: String,
    /// Whether `eng` is installed.
    pub english_available: bool,
}

impl ResolvedLanguage {
    pub fn is_english(&self) -> bool {
        self.spec == ENGLISH
    }
}

/// Keep the installed subset of `requested` in order.
///
/// With nothing installed, falls back to `eng` when available, otherwise to
/// the first requested token.
pub fn narrow(requested: &str, installed: &[String]) -> ResolvedLanguage {
    let english_available = installed.iter().any(|l| l == ENGLISH);
    let tokens: Vec<&str> = requested
        .split('+')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();

    let kept: Vec<&str> = tokens
        .iter()
        .copied()
        .filter(|t| installed.iter().any(|l| l == t))
        .collect();

    let spec = if !kept.is_empty() {
        kept.join("+")
    } else if english_available {
        ENGLISH.to_string()
    } else {
        tokens.first().copied().unwrap_or(ENGLISH).to_string()
    };

    ResolvedLanguage {
        spec,
        english_available,
    }
}

/// Resolves language specs against a catalog. Never fails.
#[derive(Clone)]
pub struct LanguageResolver {
    catalog: Arc<dyn LanguageCatalog>,
}

impl LanguageResolver {
    pub fn new(catalog: Arc<dyn LanguageCatalog>) -> Self {
        Self { catalog }
    }

    pub async fn resolve(&self, requested: &str) -> ResolvedLanguage {
        let installed = match self.catalog.installed().await {
            Ok(list) => list,
            Err(e) => {
                warn!("Could not list installed OCR languages: {}", e);
                Vec::new()
            }
        };
        let resolved = narrow(requested, &installed);
        debug!(
            "Language '{}' resolved to '{}' (installed: {})",
            requested,
            resolved.spec,
            installed.join(",")
        );
        resolved
    }
}

impl std::fmt::Debug for LanguageResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageResolver").finish_non_exhaustive()
    }
}
