//! Per-document sidecar records (`<stem>_side.json`).
//!
//! A sidecar is a small JSON object written next to an image-class PDF:
//!
//! ```json
//! { "type": "image_pdf", "created_at": "2025-10-07T08:42:00.000000+09:00", "ocr": "unprocessed" }
//! ```
//!
//! Other tools may add their own fields; updates keep them in place. Writes
//! go through a temporary file in the same directory and a rename, so a
//! reader never observes a half-written record.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{FixedOffset, Offset, SecondsFormat, Utc};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::SidecarError;
use crate::models::config::SidecarConfig;
use crate::models::state::OcrState;
use crate::naming;

/// Value of the `type` field for image-class documents.
pub const IMAGE_PDF_TAG: &str = "image_pdf";

const TYPE_KEY: &str = "type";
const CREATED_AT_KEY: &str = "created_at";
const STATE_KEY: &str = "ocr";

type SidecarResult<T> = std::result::Result<T, SidecarError>;

/// A parsed sidecar record. Field order and unknown fields are kept.
#[derive(Debug, Clone, PartialEq)]
pub struct SidecarRecord {
    fields: Map<String, Value>,
}

impl SidecarRecord {
    /// A fresh record with the standard fields.
    pub fn new(state: OcrState, created_at: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(TYPE_KEY.to_string(), Value::from(IMAGE_PDF_TAG));
        fields.insert(CREATED_AT_KEY.to_string(), Value::from(created_at.into()));
        fields.insert(STATE_KEY.to_string(), Value::from(state.as_str()));
        Self { fields }
    }

    fn from_value(path: &Path, value: Value) -> SidecarResult<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(SidecarError::Malformed {
                path: path.to_path_buf(),
                reason: format!("expected a JSON object, found {}", json_kind(&other)),
            }),
        }
    }

    /// The `type` tag.
    pub fn kind(&self) -> Option<&str> {
        self.fields.get(TYPE_KEY).and_then(Value::as_str)
    }

    pub fn is_image_pdf(&self) -> bool {
        self.kind() == Some(IMAGE_PDF_TAG)
    }

    pub fn created_at(&self) -> Option<&str> {
        self.fields.get(CREATED_AT_KEY).and_then(Value::as_str)
    }

    /// The raw `ocr` value, even when it is not a known state.
    pub fn raw_state(&self) -> Option<&str> {
        self.fields.get(STATE_KEY).and_then(Value::as_str)
    }

    /// The `ocr` state; `None` when missing or unrecognised.
    pub fn state(&self) -> Option<OcrState> {
        self.raw_state().and_then(|s| s.parse().ok())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Add `type` / `created_at` when absent.
    fn fill_defaults(&mut self, created_at: &str) {
        if !self.fields.contains_key(TYPE_KEY) {
            self.fields
                .insert(TYPE_KEY.to_string(), Value::from(IMAGE_PDF_TAG));
        }
        if !self.fields.contains_key(CREATED_AT_KEY) {
            self.fields
                .insert(CREATED_AT_KEY.to_string(), Value::from(created_at));
        }
    }

    fn set_kind(&mut self, tag: &str) {
        self.fields.insert(TYPE_KEY.to_string(), Value::from(tag));
    }

    fn set_state(&mut self, state: OcrState) {
        self.fields
            .insert(STATE_KEY.to_string(), Value::from(state.as_str()));
    }

    /// Indented JSON with non-ASCII characters kept literally.
    pub fn to_json(&self) -> SidecarResult<String> {
        Ok(serde_json::to_string_pretty(&self.fields)?)
    }
}

/// Result of [`SidecarStore::create_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Result of [`SidecarStore::update_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// No sidecar existed; a standard record was written.
    Created,
    /// The existing record was updated in place.
    Updated,
    /// The existing file was unparseable and has been overwritten.
    Replaced,
}

/// Result of [`SidecarStore::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied(UpdateOutcome),
    /// The stored state differed from the expected one; nothing was written.
    Conflict { current: Option<OcrState> },
}

/// Reads and writes sidecar records.
#[derive(Debug, Clone)]
pub struct SidecarStore {
    offset: FixedOffset,
    stale_lock: Duration,
}

impl Default for SidecarStore {
    fn default() -> Self {
        Self::new(&SidecarConfig::default())
    }
}

impl SidecarStore {
    pub fn new(config: &SidecarConfig) -> Self {
        let offset = FixedOffset::east_opt(config.utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix());
        Self {
            offset,
            stale_lock: Duration::from_secs(config.stale_lock_secs),
        }
    }

    /// Sidecar path for a document. No I/O.
    pub fn path_for(&self, document: &Path) -> PathBuf {
        naming::sidecar_path_for(document)
    }

    /// Current time in the configured offset, ISO-8601.
    pub fn timestamp(&self) -> String {
        Utc::now()
            .with_timezone(&self.offset)
            .to_rfc3339_opts(SecondsFormat::Micros, false)
    }

    /// Read a sidecar file.
    ///
    /// Returns `Ok(None)` when the file does not exist. Curly quotes are
    /// normalised and the parse retried once; any other failure is an error.
    pub fn read(&self, sidecar_path: &Path) -> SidecarResult<Option<SidecarRecord>> {
        let raw = match fs::read_to_string(sidecar_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                return Err(SidecarError::Malformed {
                    path: sidecar_path.to_path_buf(),
                    reason: "not valid UTF-8".to_string(),
                });
            }
            Err(e) => return Err(SidecarError::io(sidecar_path, e)),
        };
        let raw = raw.trim_start_matches('\u{feff}');

        let value = match serde_json::from_str::<Value>(raw) {
            Ok(value) => value,
            Err(first) => {
                let normalized = normalize_quotes(raw);
                if normalized == raw {
                    return Err(malformed(sidecar_path, &first));
                }
                let value = serde_json::from_str::<Value>(&normalized)
                    .map_err(|e| malformed(sidecar_path, &e))?;
                debug!("Repaired curly quotes in {}", sidecar_path.display());
                value
            }
        };

        SidecarRecord::from_value(sidecar_path, value).map(Some)
    }

    /// Read the sidecar belonging to a document.
    pub fn read_for(&self, document: &Path) -> SidecarResult<Option<SidecarRecord>> {
        self.read(&self.path_for(document))
    }

    /// The `ocr` state of a document's image-class sidecar, if any.
    pub fn state_of(&self, document: &Path) -> SidecarResult<Option<OcrState>> {
        Ok(observed_state(self.read_for(document)?))
    }

    /// Write a standard record unless one already exists.
    pub fn create_if_absent(
        &self,
        document: &Path,
        initial_state: OcrState,
    ) -> SidecarResult<CreateOutcome> {
        let path = self.path_for(document);
        let record = SidecarRecord::new(initial_state, self.timestamp());
        if write_record(&path, &record, false)? {
            debug!("Created {} (ocr={})", path.display(), initial_state);
            Ok(CreateOutcome::Created)
        } else {
            Ok(CreateOutcome::AlreadyExists)
        }
    }

    /// Set the `ocr` state, creating the record when missing.
    pub fn update_state(
        &self,
        document: &Path,
        new_state: OcrState,
    ) -> SidecarResult<UpdateOutcome> {
        self.write_state(document, new_state, false)
    }

    /// Like [`update_state`](Self::update_state), but also tags the record
    /// `image_pdf` so a record written by another tool becomes ours.
    pub fn claim(&self, document: &Path, new_state: OcrState) -> SidecarResult<UpdateOutcome> {
        self.write_state(document, new_state, true)
    }

    fn write_state(
        &self,
        document: &Path,
        new_state: OcrState,
        claim: bool,
    ) -> SidecarResult<UpdateOutcome> {
        let path = self.path_for(document);
        let (mut record, outcome) = match self.read(&path) {
            Ok(Some(record)) => (record, UpdateOutcome::Updated),
            Ok(None) => (SidecarRecord { fields: Map::new() }, UpdateOutcome::Created),
            Err(SidecarError::Malformed { reason, .. }) => {
                warn!("Replacing malformed sidecar {}: {}", path.display(), reason);
                (SidecarRecord { fields: Map::new() }, UpdateOutcome::Replaced)
            }
            Err(e) => return Err(e),
        };

        if claim {
            record.set_kind(IMAGE_PDF_TAG);
        }
        record.fill_defaults(&self.timestamp());
        record.set_state(new_state);
        write_record(&path, &record, true)?;
        debug!("Sidecar {} -> ocr={} ({:?})", path.display(), new_state, outcome);
        Ok(outcome)
    }

    /// Compare-and-swap update guarded by an advisory lock file.
    ///
    /// The write happens only if the stored state, as [`state_of`](Self::state_of)
    /// would report it, equals `expected` (`None` meaning "no sidecar, a
    /// foreign record or no recognised state").
    pub fn transition(
        &self,
        document: &Path,
        expected: Option<OcrState>,
        new_state: OcrState,
    ) -> SidecarResult<TransitionOutcome> {
        let path = self.path_for(document);
        let _lock = LockGuard::acquire(&path, self.stale_lock)?;

        let current = match self.read(&path) {
            Ok(record) => observed_state(record),
            Err(SidecarError::Malformed { .. }) => None,
            Err(e) => return Err(e),
        };
        if current != expected {
            debug!(
                "Sidecar {} transition refused: expected {:?}, found {:?}",
                path.display(),
                expected,
                current
            );
            return Ok(TransitionOutcome::Conflict { current });
        }

        self.claim(document, new_state)
            .map(TransitionOutcome::Applied)
    }

    /// Locate the PDF a sidecar belongs to, tolerating extension case.
    pub fn find_document(&self, sidecar_path: &Path) -> Option<PathBuf> {
        let stem = naming::document_stem_for_sidecar(sidecar_path)?;
        let dir = sidecar_path.parent()?;

        for ext in ["pdf", "PDF", "Pdf"] {
            let candidate = dir.join(format!("{stem}.{ext}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        fs::read_dir(dir)
            .ok()?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .find(|p| {
                p.is_file()
                    && naming::is_pdf(p)
                    && p.file_stem().and_then(|s| s.to_str()) == Some(stem)
            })
    }
}

/// The state a record stands for; foreign `type` tags count as no record.
fn observed_state(record: Option<SidecarRecord>) -> Option<OcrState> {
    record
        .filter(SidecarRecord::is_image_pdf)
        .and_then(|record| record.state())
}

/// Replace typographic quotes with their ASCII equivalents.
pub fn normalize_quotes(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '\u{201c}' | '\u{201d}' | '\u{201e}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect()
}

fn malformed(path: &Path, err: &serde_json::Error) -> SidecarError {
    SidecarError::Malformed {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Write `record` atomically. Returns `false` when `clobber` is off and the
/// target already exists.
fn write_record(path: &Path, record: &SidecarRecord, clobber: bool) -> SidecarResult<bool> {
    let json = record.to_json()?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| SidecarError::io(path, e))?;
    tmp.write_all(json.as_bytes())
        .map_err(|e| SidecarError::io(path, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o777)
            .unwrap_or(0o644);
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(mode))
            .map_err(|e| SidecarError::io(path, e))?;
    }

    if clobber {
        tmp.persist(path)
            .map_err(|e| SidecarError::io(path, e.error))?;
        return Ok(true);
    }
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(SidecarError::io(path, e.error)),
    }
}

/// Advisory `<sidecar>.lock` file, removed on drop.
struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    fn acquire(sidecar: &Path, stale_after: Duration) -> SidecarResult<Self> {
        let mut lock_name = sidecar.as_os_str().to_os_string();
        lock_name.push(".lock");
        let path = PathBuf::from(lock_name);

        for attempt in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists && attempt == 0 => {
                    let stale = fs::metadata(&path)
                        .and_then(|m| m.modified())
                        .ok()
                        .and_then(|t| SystemTime::now().duration_since(t).ok())
                        .is_some_and(|age| age > stale_after);
                    if !stale {
                        return Err(SidecarError::Locked(sidecar.to_path_buf()));
                    }
                    warn!("Removing stale sidecar lock {}", path.display());
                    let _ = fs::remove_file(&path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    return Err(SidecarError::Locked(sidecar.to_path_buf()));
                }
                Err(e) => return Err(SidecarError::io(&path, e)),
            }
        }
        Err(SidecarError::Locked(sidecar.to_path_buf()))
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
