//! Subcommands and the helpers they share.

pub mod batch;
pub mod classify;
pub mod config;
pub mod langs;
pub mod ocr;
pub mod state;
pub mod status;

use std::path::{Path, PathBuf};

use glob::glob;
use indicatif::ProgressStyle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use pdfdesk_core::models::config::DeskConfig;
use pdfdesk_core::naming;
use pdfdesk_core::workflow::list_pdfs;
use pdfdesk_core::{CachedInspector, DocumentStateMachine, LopdfInspector, SidecarStore};

/// Inspector used by every command: lopdf with an in-memory cache.
pub type DeskInspector = CachedInspector<LopdfInspector>;

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pdfdesk")
        .join("config.json")
}

/// The `--config` path if given, otherwise the per-user default.
pub fn config_file(explicit: Option<&str>) -> PathBuf {
    explicit.map(PathBuf::from).unwrap_or_else(default_config_path)
}

/// Load the configuration. An explicit path must exist; the default path
/// falls back to built-in defaults when absent.
pub fn load_config(explicit: Option<&str>) -> anyhow::Result<DeskConfig> {
    if let Some(path) = explicit {
        let path = Path::new(path);
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        return Ok(DeskConfig::from_file(path)?);
    }

    let path = default_config_path();
    if path.exists() {
        Ok(DeskConfig::from_file(&path)?)
    } else {
        Ok(DeskConfig::default())
    }
}

pub fn state_machine(config: &DeskConfig, retry_failed: bool) -> DocumentStateMachine<DeskInspector> {
    let inspector = CachedInspector::new(LopdfInspector::from_config(&config.classify));
    DocumentStateMachine::new(inspector, SidecarStore::new(&config.sidecar))
        .with_retry_failed(retry_failed)
}

/// Expand inputs into PDF paths. Directories contribute their PDFs, other
/// inputs are treated as glob patterns. Order is kept, duplicates dropped.
pub fn expand_inputs(inputs: &[String]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = Vec::new();

    for input in inputs {
        let path = Path::new(input);
        let found = if path.is_dir() {
            list_pdfs(path)?
        } else {
            glob(input)?
                .filter_map(|r| match r {
                    Ok(p) => Some(p),
                    Err(e) => {
                        warn!("Skipping unreadable path: {}", e);
                        None
                    }
                })
                .filter(|p| p.is_file() && naming::is_pdf(p))
                .collect()
        };

        for file in found {
            if !files.contains(&file) {
                files.push(file);
            }
        }
    }

    Ok(files)
}

/// Token cancelled on Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current document");
            token.cancel();
        }
    });
    cancel
}

pub fn job_style() -> anyhow::Result<ProgressStyle> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {msg}")?
        .progress_chars("=>-"))
}

pub fn files_style() -> anyhow::Result<ProgressStyle> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files")?
        .progress_chars("=>-"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_expand_inputs_dir_and_glob() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.pdf"), "").unwrap();
        fs::write(dir.path().join("b.pdf"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        let dir_input = dir.path().to_string_lossy().into_owned();
        let glob_input = dir.path().join("*.pdf").to_string_lossy().into_owned();
        let files = expand_inputs(&[dir_input, glob_input]).unwrap();

        assert_eq!(files, vec![dir.path().join("a.pdf"), dir.path().join("b.pdf")]);
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(load_config(Some(missing.to_str().unwrap())).is_err());
    }
}
