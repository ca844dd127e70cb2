//! Package groups
//!
//! A [`Package`] is one manifest-rooted directory: the tracked modules
//! under it, its named dependency edges to other packages, and (for local
//! packages) the recursive watcher that drives reloads.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::RuntimeError;
use crate::events::RuntimeEvent;
use crate::manifest::{Manifest, ProviderMap};
use crate::module::Module;
use crate::runtime::RuntimeInner;
use crate::watcher::{DirWatcher, WatchEvent, WatchEventKind};

#[derive(Default)]
struct PackageState {
    /// Tracked modules, keyed by path relative to the package root
    modules: HashMap<PathBuf, Arc<Module>>,
    /// Dependency edges, keyed by the dependency's package name
    dependencies: HashMap<String, Arc<Package>>,
}

struct WatchHandle {
    watcher: DirWatcher,
    task: JoinHandle<()>,
}

/// One manifest-rooted directory and the modules it owns
pub struct Package {
    dir: PathBuf,
    name: String,
    version: Option<String>,
    manifest: Option<Manifest>,
    runtime: Weak<RuntimeInner>,
    state: RwLock<PackageState>,
    watch: Mutex<Option<WatchHandle>>,
}

impl Package {
    pub(crate) fn new(
        dir: PathBuf,
        runtime: Weak<RuntimeInner>,
        manifest_file: &str,
    ) -> Arc<Package> {
        let manifest = Manifest::read(&dir, manifest_file);
        let basename = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.to_string_lossy().into_owned());
        let name = manifest
            .as_ref()
            .and_then(|m| m.name.clone())
            .unwrap_or(basename);
        let version = manifest.as_ref().and_then(|m| m.version.clone());
        Arc::new(Package {
            dir,
            name,
            version,
            manifest,
            runtime,
            state: RwLock::new(PackageState::default()),
            watch: Mutex::new(None),
        })
    }

    /// The package root directory (identity key)
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The package name from the manifest, or the directory basename
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The package version from the manifest, if any
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    /// Providers declared for `name` in the manifest, or an empty map
    pub fn providers(&self, name: &str) -> ProviderMap {
        self.manifest
            .as_ref()
            .map(|m| m.providers(name))
            .unwrap_or_default()
    }

    /// Snapshot of the tracked modules
    pub fn modules(&self) -> Vec<Arc<Module>> {
        self.state.read().modules.values().cloned().collect()
    }

    /// Snapshot of the dependency edges
    pub fn dependencies(&self) -> HashMap<String, Arc<Package>> {
        self.state.read().dependencies.clone()
    }

    pub(crate) fn runtime(&self) -> Option<Arc<RuntimeInner>> {
        self.runtime.upgrade()
    }

    /// Return the module for `file`, creating and registering it on first
    /// sight. `file` must be located under this package's directory.
    pub fn module(self: &Arc<Self>, file: &Path) -> Result<Arc<Module>, RuntimeError> {
        let runtime = self
            .runtime
            .upgrade()
            .ok_or_else(|| RuntimeError::Invariant("runtime was dropped".to_string()))?;
        let subpath = file
            .strip_prefix(&self.dir)
            .map_err(|_| {
                RuntimeError::Invariant(format!(
                    "module {:?} is not inside package {:?}",
                    file, self.dir
                ))
            })?
            .to_path_buf();

        if let Some(module) = self.state.read().modules.get(&subpath) {
            return Ok(module.clone());
        }

        let module = Module::new(file, self, &runtime)?;
        self.state.write().modules.insert(subpath, module.clone());
        runtime.register_module(file, module.clone());
        runtime.emit(RuntimeEvent::Module {
            path: file.to_path_buf(),
            module: module.clone(),
        });
        Ok(module)
    }

    /// Record a named dependency edge. Recording the same package twice is
    /// a no-op; two different packages under one dependency name violates
    /// the ownership invariants.
    pub fn dependency(&self, pack: &Arc<Package>) -> Result<Arc<Package>, RuntimeError> {
        let mut state = self.state.write();
        match state.dependencies.get(pack.name()) {
            Some(existing) if Arc::ptr_eq(existing, pack) => Ok(existing.clone()),
            Some(existing) => Err(RuntimeError::Invariant(format!(
                "dependency '{}' resolves to both {:?} and {:?}",
                pack.name(),
                existing.dir(),
                pack.dir()
            ))),
            None => {
                state.dependencies.insert(pack.name().to_string(), pack.clone());
                Ok(pack.clone())
            }
        }
    }

    /// Whether the watcher is currently attached
    pub fn is_attached(&self) -> bool {
        self.watch.lock().is_some()
    }

    /// Start watching this package's directory. Attaching twice violates
    /// the toggle invariants and fails.
    pub fn attach(self: &Arc<Self>) -> Result<(), RuntimeError> {
        let mut watch = self.watch.lock();
        if watch.is_some() {
            return Err(RuntimeError::Invariant(format!(
                "watcher already attached for {:?}",
                self.dir
            )));
        }

        let mut watcher = DirWatcher::new(&self.dir);
        let mut rx = watcher.start()?;
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(package) = weak.upgrade() else { return };
                package.route(event).await;
            }
        });
        *watch = Some(WatchHandle { watcher, task });
        drop(watch);

        if let Some(runtime) = self.runtime.upgrade() {
            runtime.emit(RuntimeEvent::Watching {
                path: self.dir.clone(),
                package: self.clone(),
            });
        }
        Ok(())
    }

    /// Stop watching; a no-op when not attached
    pub fn detach(self: &Arc<Self>) {
        let handle = self.watch.lock().take();
        let Some(mut handle) = handle else { return };
        handle.watcher.stop();
        handle.task.abort();

        if let Some(runtime) = self.runtime.upgrade() {
            runtime.emit(RuntimeEvent::Unwatched {
                path: self.dir.clone(),
                package: self.clone(),
            });
        }
    }

    /// Route one watch notification. Errors are logged, never propagated;
    /// a single bad notification must not take down the watch.
    async fn route(self: &Arc<Self>, event: WatchEvent) {
        if let Err(error) = self.dispatch(event).await {
            let quiet = self
                .runtime
                .upgrade()
                .map(|r| r.config.quiet)
                .unwrap_or(true);
            if !quiet {
                warn!("change routing failed for package '{}': {}", self.name, error);
            }
        }
    }

    async fn dispatch(self: &Arc<Self>, event: WatchEvent) -> Result<(), RuntimeError> {
        let Some(runtime) = self.runtime.upgrade() else { return Ok(()) };
        match event.kind {
            WatchEventKind::Modified => {
                let module = match runtime.lookup_module(&event.path) {
                    Some(module) => Some(module),
                    // A change for an untracked file the loader has already
                    // cached: a dynamic import sync has not seen yet
                    None if runtime.loader.contains(&event.path) => {
                        Some(self.module(&event.path)?)
                    }
                    None => None,
                };
                if let Some(module) = module {
                    module.reload().await?;
                }
            }
            WatchEventKind::Removed | WatchEventKind::Renamed => {
                if let Some(module) = runtime.lookup_module(&event.path) {
                    module.mark_renamed();
                }
            }
            WatchEventKind::Created => {
                // becomes visible at the next sync once loaded
                debug!("ignoring creation of {:?}", event.path);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Package")
            .field("dir", &self.dir)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("modules", &self.state.read().modules.len())
            .field("attached", &self.is_attached())
            .finish()
    }
}
