//! Loader capability
//!
//! The runtime never loads code itself; it depends on a [`Loader`] that
//! exposes the host's module cache and can (re)load a file into an exported
//! value graph. Alternate source kinds are handled through fallback loaders
//! registered per file extension on the runtime.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::value::ExportValue;

/// Loader error types
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The loader cannot handle this source kind directly; the runtime may
    /// retry through a registered fallback loader
    #[error("unsupported module format: {kind}")]
    UnsupportedFormat { kind: String },

    #[error("module not found: {0}")]
    NotFound(PathBuf),

    #[error("load failed for {path}: {reason}")]
    Failed { path: PathBuf, reason: String },
}

/// Host loader capability
#[async_trait]
pub trait Loader: Send + Sync {
    /// Absolute paths of every file currently in the loader's cache
    fn loaded(&self) -> Vec<PathBuf>;

    /// Whether the loader's cache holds this file
    fn contains(&self, path: &Path) -> bool;

    /// The cached exports of a loaded file, without (re)loading it
    fn cached_exports(&self, path: &Path) -> Option<ExportValue>;

    /// Evict a file from the cache so the next load re-evaluates it
    fn invalidate(&self, path: &Path);

    /// (Re)load a file and return its exported value graph
    async fn load(&self, path: &Path) -> Result<ExportValue, LoadError>;

    /// The process entry point, if the loader knows one
    fn main(&self) -> Option<PathBuf> {
        None
    }
}

/// Per-file export factory: evaluated on every load, standing in for the
/// file's compiled source
pub type ExportFactory = Arc<dyn Fn() -> ExportValue + Send + Sync>;

#[derive(Default)]
struct MemoryLoaderInner {
    sources: HashMap<PathBuf, ExportFactory>,
    cache: HashMap<PathBuf, ExportValue>,
    main: Option<PathBuf>,
}

/// An in-process loader whose sources are export factories.
///
/// Registering a source does not load it; [`MemoryLoader::import`] evaluates
/// the factory and caches the result, the way a host loader caches a
/// required file. Replacing a factory models editing the file's source: the
/// cached exports stay stale until the runtime invalidates and reloads.
#[derive(Default)]
pub struct MemoryLoader {
    inner: RwLock<MemoryLoaderInner>,
}

impl MemoryLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a source for `path`
    pub fn register(&self, path: &Path, factory: ExportFactory) {
        self.inner.write().sources.insert(path.to_path_buf(), factory);
    }

    /// Replace the source for `path`, leaving any cached exports stale
    pub fn replace(&self, path: &Path, factory: ExportFactory) {
        self.register(path, factory);
    }

    /// Evaluate the source for `path` and cache its exports
    pub fn import(&self, path: &Path) -> Result<ExportValue, LoadError> {
        let factory = self
            .inner
            .read()
            .sources
            .get(path)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(path.to_path_buf()))?;
        let exports = factory();
        self.inner.write().cache.insert(path.to_path_buf(), exports.clone());
        Ok(exports)
    }

    /// Mark `path` as the process entry point
    pub fn set_main(&self, path: &Path) {
        self.inner.write().main = Some(path.to_path_buf());
    }
}

#[async_trait]
impl Loader for MemoryLoader {
    fn loaded(&self) -> Vec<PathBuf> {
        self.inner.read().cache.keys().cloned().collect()
    }

    fn contains(&self, path: &Path) -> bool {
        self.inner.read().cache.contains_key(path)
    }

    fn cached_exports(&self, path: &Path) -> Option<ExportValue> {
        self.inner.read().cache.get(path).cloned()
    }

    fn invalidate(&self, path: &Path) {
        if self.inner.write().cache.remove(path).is_some() {
            debug!("evicted {:?} from loader cache", path);
        }
    }

    async fn load(&self, path: &Path) -> Result<ExportValue, LoadError> {
        self.import(path)
    }

    fn main(&self) -> Option<PathBuf> {
        self.inner.read().main.clone()
    }
}
