//! Filename conventions shared by the dashboard tools.
//!
//! - `<stem>_ocr.pdf` is a generated OCR output (and marks its source as processed).
//! - `<stem>_skip.pdf` is excluded by the operator before any classification.
//! - `<stem>_side.json` is the sidecar record of `<stem>.pdf`.
//!
//! Stem suffixes are case-sensitive; the `.pdf` extension is not.

use std::path::{Path, PathBuf};

/// Suffix appended to the stem of a generated OCR output.
pub const OCR_SUFFIX: &str = "_ocr";

/// Suffix marking an operator-level exclusion.
pub const SKIP_SUFFIX: &str = "_skip";

/// Suffix (including extension) of a sidecar file.
pub const SIDECAR_SUFFIX: &str = "_side.json";

fn stem(path: &Path) -> &str {
    path.file_stem().and_then(|s| s.to_str()).unwrap_or("")
}

/// Whether the path has a `.pdf` extension (any case).
pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// `*_skip.pdf`
pub fn is_skip_name(path: &Path) -> bool {
    is_pdf(path) && stem(path).ends_with(SKIP_SUFFIX)
}

/// `*_ocr.pdf`
pub fn is_ocr_name(path: &Path) -> bool {
    is_pdf(path) && stem(path).ends_with(OCR_SUFFIX)
}

/// Destination of the OCR output for `source`: `<stem>_ocr.pdf`.
pub fn dest_ocr_path(source: &Path) -> PathBuf {
    source.with_file_name(format!("{}{}.pdf", stem(source), OCR_SUFFIX))
}

/// Text output written next to the OCR output: `<stem>_ocr.txt`.
pub fn text_output_path(source: &Path) -> PathBuf {
    dest_ocr_path(source).with_extension("txt")
}

/// Sidecar path for a document: `<stem>_side.json`.
pub fn sidecar_path_for(document: &Path) -> PathBuf {
    document.with_file_name(format!("{}{}", stem(document), SIDECAR_SUFFIX))
}

/// Whether the path names a sidecar file.
pub fn is_sidecar_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(SIDECAR_SUFFIX) && n.len() > SIDECAR_SUFFIX.len())
}

/// Stem of the document a sidecar belongs to.
pub fn document_stem_for_sidecar(sidecar: &Path) -> Option<&str> {
    sidecar
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_suffix(SIDECAR_SUFFIX))
        .filter(|s| !s.is_empty())
}
