//! Quick PDF inspection using lopdf.

use std::path::Path;

use lopdf::encryption::{self, DecryptionError};
use lopdf::{Document, Object};
use tracing::{debug, trace};

use super::{Classification, DocumentInspector, DocumentKind, Result};
use crate::error::PdfError;
use crate::models::config::ClassifyConfig;

/// Classifies PDFs by sampling the extractable text of their leading pages.
#[derive(Debug, Clone)]
pub struct LopdfInspector {
    sample_pages: u32,
    min_page_chars: usize,
    text_ratio_threshold: f64,
}

impl LopdfInspector {
    /// Create an inspector with default thresholds.
    pub fn new() -> Self {
        Self::from_config(&ClassifyConfig::default())
    }

    pub fn from_config(config: &ClassifyConfig) -> Self {
        Self {
            sample_pages: config.sample_pages.max(1),
            min_page_chars: config.min_page_chars,
            text_ratio_threshold: config.text_ratio_threshold,
        }
    }

    /// Set how many leading pages are sampled.
    pub fn with_sample_pages(mut self, pages: u32) -> Self {
        self.sample_pages = pages.max(1);
        self
    }

    fn open(&self, path: &Path) -> Result<Document> {
        let mut doc = Document::load(path).map_err(|e| PdfError::Parse(e.to_string()))?;

        // Owner-password-only files open with the empty user password.
        if doc.is_encrypted() {
            match doc.decrypt("") {
                Ok(()) => debug!("Decrypted {} with empty password", path.display()),
                Err(lopdf::Error::Decryption(DecryptionError::IncorrectPassword)) => {
                    return Err(PdfError::Encrypted);
                }
                Err(e) => {
                    debug!("{}: {}, retrying as RC4", path.display(), e);
                    decrypt_rc4(&mut doc, "").map_err(|e| match e {
                        DecryptionError::IncorrectPassword => PdfError::Encrypted,
                        other => PdfError::Parse(other.to_string()),
                    })?;
                }
            }
        }
        Ok(doc)
    }
}

/// Decrypt a document using the standard RC4 handler (V1/V2), which has no
/// `/CF` crypt filter dictionary.
fn decrypt_rc4(doc: &mut Document, password: &str) -> std::result::Result<(), DecryptionError> {
    let key = encryption::get_encryption_key(doc, password, true)?;
    let encrypt_id = doc
        .trailer
        .get(b"Encrypt")
        .and_then(Object::as_reference)
        .map_err(|_| DecryptionError::MissingEncryptDictionary)?;

    for (&id, object) in doc.objects.iter_mut() {
        if id == encrypt_id {
            continue;
        }
        let plain = match encryption::decrypt_object(&key, id, &*object, false) {
            Ok(plain) => plain,
            Err(DecryptionError::NotDecryptable) => continue,
            Err(e) => return Err(e),
        };
        match object {
            Object::Stream(stream) => stream.set_content(plain),
            Object::String(content, _) => *content = plain,
            _ => {}
        }
    }

    doc.trailer.remove(b"Encrypt");
    Ok(())
}

impl Default for LopdfInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentInspector for LopdfInspector {
    fn classify(&self, path: &Path) -> Result<Classification> {
        let doc = self.open(path)?;
        let pages = doc.get_pages();
        let page_count = pages.len() as u32;
        if page_count == 0 {
            return Err(PdfError::NoPages);
        }

        let checked = self.sample_pages.min(page_count);
        let text_pages = pages
            .keys()
            .take(checked as usize)
            .filter(|&&number| {
                let chars = doc
                    .extract_text(&[number])
                    .map(|text| text.trim().chars().count())
                    .unwrap_or(0);
                trace!("Page {} of {}: {} chars", number, path.display(), chars);
                chars >= self.min_page_chars
            })
            .count();

        let text_ratio = text_pages as f64 / checked as f64;
        let kind = if text_ratio >= self.text_ratio_threshold {
            DocumentKind::Text
        } else {
            DocumentKind::Image
        };

        debug!(
            "PDF analysis: {} pages, {}/{} sampled pages with text -> {:?}",
            page_count, text_pages, checked, kind
        );

        Ok(Classification {
            kind,
            pages: page_count,
            text_ratio,
            checked,
        })
    }

    fn is_locked(&self, path: &Path) -> bool {
        matches!(self.open(path), Err(PdfError::Encrypted))
    }
}
