//! Classification memoization keyed by path and modification time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use tracing::trace;

use super::{Classification, DocumentInspector, Result};
use crate::error::PdfError;

/// A document identity: editing the file invalidates the entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub path: PathBuf,
    pub mtime: SystemTime,
}

/// Storage for classification results.
pub trait ClassificationCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<Classification>;
    fn put(&self, key: CacheKey, value: Classification);
}

/// Process-local cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<CacheKey, Classification>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ClassificationCache for MemoryCache {
    fn get(&self, key: &CacheKey) -> Option<Classification> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn put(&self, key: CacheKey, value: Classification) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, value);
    }
}

/// Source of file modification times.
pub trait FileClock: Send + Sync {
    fn modified(&self, path: &Path) -> std::io::Result<SystemTime>;
}

/// Reads modification times from the filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl FileClock for SystemClock {
    fn modified(&self, path: &Path) -> std::io::Result<SystemTime> {
        std::fs::metadata(path)?.modified()
    }
}

/// Wraps an inspector so each (path, mtime) is classified once.
///
/// Only successful classifications are cached. Lock detection always
/// goes to the inner inspector.
pub struct CachedInspector<I, C = MemoryCache, K = SystemClock> {
    inner: I,
    cache: C,
    clock: K,
}

impl<I: DocumentInspector> CachedInspector<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            cache: MemoryCache::new(),
            clock: SystemClock,
        }
    }
}

impl<I, C, K> CachedInspector<I, C, K>
where
    I: DocumentInspector,
    C: ClassificationCache,
    K: FileClock,
{
    pub fn with_parts(inner: I, cache: C, clock: K) -> Self {
        Self { inner, cache, clock }
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }
}

impl<I, C, K> DocumentInspector for CachedInspector<I, C, K>
where
    I: DocumentInspector,
    C: ClassificationCache,
    K: FileClock,
{
    fn classify(&self, path: &Path) -> Result<Classification> {
        let mtime = self.clock.modified(path).map_err(PdfError::Io)?;
        let key = CacheKey {
            path: path.to_path_buf(),
            mtime,
        };
        if let Some(hit) = self.cache.get(&key) {
            trace!("Classification cache hit: {}", path.display());
            return Ok(hit);
        }
        let result = self.inner.classify(path)?;
        self.cache.put(key, result.clone());
        Ok(result)
    }

    fn is_locked(&self, path: &Path) -> bool {
        self.inner.is_locked(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::DocumentKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingInspector {
        calls: AtomicUsize,
    }

    impl DocumentInspector for CountingInspector {
        fn classify(&self, _path: &Path) -> Result<Classification> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Classification {
                kind: DocumentKind::Image,
                pages: 2,
                text_ratio: 0.0,
                checked: 2,
            })
        }

        fn is_locked(&self, _path: &Path) -> bool {
            false
        }
    }

    struct FixedClock(Mutex<SystemTime>);

    impl FileClock for FixedClock {
        fn modified(&self, _path: &Path) -> std::io::Result<SystemTime> {
            Ok(*self.0.lock().unwrap())
        }
    }

    impl FileClock for &FixedClock {
        fn modified(&self, path: &Path) -> std::io::Result<SystemTime> {
            (**self).modified(path)
        }
    }

    #[test]
    fn test_same_mtime_hits_cache() {
        let clock = FixedClock(Mutex::new(SystemTime::UNIX_EPOCH));
        let inner = CountingInspector {
            calls: AtomicUsize::new(0),
        };
        let cached = CachedInspector::with_parts(inner, MemoryCache::new(), &clock);
        let path = Path::new("/docs/a.pdf");

        cached.classify(path).unwrap();
        cached.classify(path).unwrap();
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cached.cache().len(), 1);

        *clock.0.lock().unwrap() = SystemTime::UNIX_EPOCH + Duration::from_secs(60);
        cached.classify(path).unwrap();
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let inner = CountingInspector {
            calls: AtomicUsize::new(0),
        };
        let cached = CachedInspector::new(inner);
        let result = cached.classify(Path::new("/definitely/not/here.pdf"));
        assert!(matches!(result, Err(PdfError::Io(_))));
        assert!(cached.cache().is_empty());
    }
}
