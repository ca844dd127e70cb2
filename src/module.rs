//! Tracked file modules
//!
//! A [`Module`] owns one file's current type registry, its filesystem
//! snapshot, and every previous generation of the registry. Reloading
//! re-invokes the loader, extracts a fresh registry, and patches each
//! previous generation in place by swapping the arena record behind every
//! still-matching type handle.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::info;

use crate::arena::{Provenance, TypeHandle};
use crate::error::RuntimeError;
use crate::extract::exported_types;
use crate::loader::LoadError;
use crate::package::Package;
use crate::runtime::RuntimeInner;

/// Filesystem snapshot of a tracked file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub mtime: SystemTime,
    pub len: u64,
}

impl FileStat {
    pub fn read(path: &Path) -> std::io::Result<FileStat> {
        let meta = std::fs::metadata(path)?;
        Ok(FileStat { mtime: meta.modified()?, len: meta.len() })
    }
}

/// What a reload invocation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The file's mtime has not changed; duplicate or metadata-only
    /// notification, nothing was done
    Unchanged,
    /// The module has no tracked types, so there is nothing to patch and
    /// re-loading it gains nothing
    NoTypes,
    /// Fresh exports were loaded; `patched` previous-generation types were
    /// updated in place
    Reloaded { patched: usize },
}

struct ModuleState {
    stat: FileStat,
    version: u64,
    types: BTreeMap<String, TypeHandle>,
    /// Previous registries, oldest first; append-only
    generations: Vec<BTreeMap<String, TypeHandle>>,
    renamed: bool,
}

/// The tracked state of one source file
pub struct Module {
    file: PathBuf,
    package: Weak<Package>,
    state: RwLock<ModuleState>,
    /// Serializes overlapping reloads for this file: a second change
    /// notification queues behind an in-flight reload and then usually
    /// no-ops on the mtime check
    reload_gate: Mutex<()>,
}

impl Module {
    pub(crate) fn new(
        file: &Path,
        package: &Arc<Package>,
        runtime: &RuntimeInner,
    ) -> Result<Arc<Module>, RuntimeError> {
        let stat = FileStat::read(file)?;
        let types = match runtime.loader.cached_exports(file) {
            Some(exports) => exported_types(&exports, &runtime.config.nested_name_policy),
            None => BTreeMap::new(),
        };
        let module = Arc::new(Module {
            file: file.to_path_buf(),
            package: Arc::downgrade(package),
            state: RwLock::new(ModuleState {
                stat,
                version: 0,
                types: types.clone(),
                generations: Vec::new(),
                renamed: false,
            }),
            reload_gate: Mutex::new(()),
        });
        for handle in types.values() {
            handle.set_provenance(Provenance {
                module: Arc::downgrade(&module),
                package: Arc::downgrade(package),
                version: 0,
            });
        }
        Ok(module)
    }

    /// Absolute path of the tracked file
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// The owning package, if still alive
    pub fn package(&self) -> Option<Arc<Package>> {
        self.package.upgrade()
    }

    /// Number of successful reloads that patched at least one type
    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    /// Snapshot of the current type registry
    pub fn types(&self) -> BTreeMap<String, TypeHandle> {
        self.state.read().types.clone()
    }

    /// Lookup one tracked type by its export path key
    pub fn get_type(&self, key: &str) -> Option<TypeHandle> {
        self.state.read().types.get(key).cloned()
    }

    /// Number of retained previous generations
    pub fn generation_count(&self) -> usize {
        self.state.read().generations.len()
    }

    /// Last observed filesystem snapshot
    pub fn stat(&self) -> FileStat {
        self.state.read().stat
    }

    /// Whether the watcher reported a rename/delete for this file
    pub fn is_renamed(&self) -> bool {
        self.state.read().renamed
    }

    pub(crate) fn mark_renamed(&self) {
        self.state.write().renamed = true;
    }

    /// Reload this module and patch every previous generation of its types.
    ///
    /// No-ops when the file's mtime is unchanged or the module has no
    /// tracked types. A loader failure aborts the reload: no generation
    /// pushed, no version bump, no event. The new mtime is still retained,
    /// so the next attempt waits for a further save.
    pub async fn reload(self: &Arc<Self>) -> Result<ReloadOutcome, RuntimeError> {
        let runtime = self
            .package
            .upgrade()
            .and_then(|p| p.runtime())
            .ok_or_else(|| RuntimeError::Invariant("runtime was dropped".to_string()))?;
        let _gate = self.reload_gate.lock().await;

        let fresh_stat = FileStat::read(&self.file)?;
        {
            let mut st = self.state.write();
            if fresh_stat.mtime == st.stat.mtime {
                return Ok(ReloadOutcome::Unchanged);
            }
            st.stat = fresh_stat;
            if st.types.is_empty() {
                if !runtime.config.quiet {
                    info!(
                        "package '{}' not reloading, no types in module {:?}",
                        self.package_name(),
                        self.file
                    );
                }
                return Ok(ReloadOutcome::NoTypes);
            }
        }

        runtime.loader.invalidate(&self.file);
        let exports = match runtime.loader.load(&self.file).await {
            Ok(exports) => exports,
            Err(LoadError::UnsupportedFormat { kind }) => {
                let fallback = self
                    .file
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .and_then(|ext| runtime.fallback_for(ext));
                match fallback {
                    Some(loader) => loader.load(&self.file).await?,
                    None => return Err(LoadError::UnsupportedFormat { kind }.into()),
                }
            }
            Err(error) => return Err(error.into()),
        };

        let fresh = exported_types(&exports, &runtime.config.nested_name_policy);
        let package = self.package.upgrade();
        let weak_package = package.as_ref().map(Arc::downgrade).unwrap_or_default();
        for handle in fresh.values() {
            handle.set_provenance(Provenance {
                module: Arc::downgrade(self),
                package: weak_package.clone(),
                version: 0,
            });
        }

        let patched = {
            let mut guard = self.state.write();
            let st = &mut *guard;
            let old_types = std::mem::replace(&mut st.types, fresh.clone());
            st.generations.push(old_types);

            let mut patched = 0usize;
            for generation in &st.generations {
                for (key, old_handle) in generation {
                    let Some(new_handle) = fresh.get(key) else { continue };
                    if old_handle == new_handle {
                        continue;
                    }
                    let old_version =
                        old_handle.provenance().map(|p| p.version).unwrap_or(0);
                    let mut merged = old_handle.snapshot().patched_with(&new_handle.snapshot());
                    merged.provenance = Some(Provenance {
                        module: Arc::downgrade(self),
                        package: weak_package.clone(),
                        version: old_version + 1,
                    });
                    old_handle.replace(merged);
                    new_handle.set_provenance_version(old_version + 1);
                    patched += 1;
                }
            }
            if patched > 0 {
                st.version += 1;
            }
            patched
        };

        if patched > 0 {
            if !runtime.config.quiet {
                let summary: Vec<String> = self
                    .types()
                    .iter()
                    .map(|(key, handle)| {
                        let label = if key.is_empty() { handle.name() } else { key.clone() };
                        let version = handle.provenance().map(|p| p.version).unwrap_or(0);
                        format!("{label}@{version}")
                    })
                    .collect();
                info!(
                    "package '{}' reloaded module {:?} ({})",
                    self.package_name(),
                    self.file,
                    summary.join(", ")
                );
            }
            runtime.emit(crate::events::RuntimeEvent::Reloaded {
                path: self.file.clone(),
                module: self.clone(),
            });
        }
        Ok(ReloadOutcome::Reloaded { patched })
    }

    fn package_name(&self) -> String {
        self.package
            .upgrade()
            .map(|p| p.name().to_string())
            .unwrap_or_else(|| "?".to_string())
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.read();
        f.debug_struct("Module")
            .field("file", &self.file)
            .field("version", &st.version)
            .field("types", &st.types.len())
            .field("generations", &st.generations.len())
            .finish()
    }
}
