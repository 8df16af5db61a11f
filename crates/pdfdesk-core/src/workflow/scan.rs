//! Folder listing helpers used to pick batch inputs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::models::state::OcrState;
use crate::naming;
use crate::sidecar::SidecarStore;

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

fn sort_by_name(paths: &mut [PathBuf]) {
    paths.sort_by_key(|p| {
        p.file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    });
}

/// Non-hidden PDFs directly inside `dir`, sorted case-insensitively.
pub fn list_pdfs(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut pdfs: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && !is_hidden(p) && naming::is_pdf(p))
        .collect();
    sort_by_name(&mut pdfs);
    Ok(pdfs)
}

/// Non-hidden subdirectories of `dir`, sorted case-insensitively.
pub fn list_dirs(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir() && !is_hidden(p))
        .collect();
    sort_by_name(&mut dirs);
    Ok(dirs)
}

/// A folder holding documents that still await OCR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFolder {
    pub dir: PathBuf,
    pub documents: Vec<PathBuf>,
}

/// Walk `root` and collect, per folder, the documents whose sidecar says
/// `unprocessed`. Starts from the sidecars; the PDFs are not classified.
pub fn pending_folders(root: &Path, store: &SidecarStore) -> io::Result<Vec<PendingFolder>> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut documents = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.is_file() || !naming::is_sidecar_name(&path) {
                continue;
            }
            match store.read(&path) {
                Ok(Some(record))
                    if record.is_image_pdf() && record.state() == Some(OcrState::Unprocessed) =>
                {
                    if let Some(document) = store.find_document(&path) {
                        if !naming::is_skip_name(&document) {
                            documents.push(document);
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => debug!("Ignoring sidecar {}: {}", path.display(), e),
            }
        }
        if !documents.is_empty() {
            sort_by_name(&mut documents);
            found.push(PendingFolder {
                dir: dir.clone(),
                documents,
            });
        }

        let mut children = list_dirs(&dir)?;
        children.reverse();
        stack.extend(children);
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn touch(path: &Path, body: &str) {
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_list_pdfs_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.pdf"), "");
        touch(&dir.path().join("A.PDF"), "");
        touch(&dir.path().join(".hidden.pdf"), "");
        touch(&dir.path().join("notes.txt"), "");
        fs::create_dir(dir.path().join("sub.pdf")).unwrap();

        let names: Vec<String> = list_pdfs(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["A.PDF", "b.pdf"]);
    }

    #[test]
    fn test_pending_folders() {
        let root = tempfile::tempdir().unwrap();
        let first = root.path().join("2024").join("site-a");
        let second = root.path().join("2024").join("site-b");
        fs::create_dir_all(&first).unwrap();
        fs::create_dir_all(&second).unwrap();

        touch(&first.join("scan.pdf"), "");
        touch(
            &first.join("scan_side.json"),
            r#"{"type": "image_pdf", "created_at": "x", "ocr": "unprocessed"}"#,
        );
        touch(&first.join("old.pdf"), "");
        touch(
            &first.join("old_side.json"),
            r#"{"type": "image_pdf", "created_at": "x", "ocr": "done"}"#,
        );
        touch(&second.join("orphan_side.json"), r#"{"type": "image_pdf", "ocr": "unprocessed"}"#);

        let found = pending_folders(root.path(), &SidecarStore::default()).unwrap();
        assert_eq!(
            found,
            vec![PendingFolder {
                dir: first.clone(),
                documents: vec![first.join("scan.pdf")],
            }]
        );
    }
}
