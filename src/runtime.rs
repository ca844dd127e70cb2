//! Process-wide runtime
//!
//! The [`Runtime`] reconciles against the host loader's cache to discover
//! newly loaded files, assigns each to the package that owns it, toggles
//! watching for local packages, and broadcasts lifecycle events. It is
//! constructed explicitly and torn down with [`Runtime::shutdown`]; there
//! is no ambient global instance.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::warn;

use crate::arena::{Instance, TypeHandle};
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::events::RuntimeEvent;
use crate::loader::Loader;
use crate::module::Module;
use crate::package::Package;

#[derive(Default)]
struct RuntimeState {
    /// Every known package root
    packages: HashMap<PathBuf, Arc<Package>>,
    /// Packages that are part of the user's own project tree
    locals: HashMap<PathBuf, Arc<Package>>,
    /// Every tracked file
    modules: HashMap<PathBuf, Arc<Module>>,
    /// The process entry point, resolved lazily
    main: Option<Arc<Module>>,
}

pub(crate) struct RuntimeInner {
    pub(crate) config: RuntimeConfig,
    pub(crate) loader: Arc<dyn Loader>,
    fallbacks: RwLock<HashMap<String, Arc<dyn Loader>>>,
    state: RwLock<RuntimeState>,
    events: broadcast::Sender<RuntimeEvent>,
    /// Set during the bootstrap sync; suppresses all event emission
    pending: AtomicBool,
    reload_enabled: AtomicBool,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl RuntimeInner {
    pub(crate) fn emit(&self, event: RuntimeEvent) {
        if !self.pending.load(Ordering::SeqCst) {
            let _ = self.events.send(event);
        }
    }

    pub(crate) fn fallback_for(&self, ext: &str) -> Option<Arc<dyn Loader>> {
        self.fallbacks.read().get(ext).cloned()
    }

    pub(crate) fn lookup_module(&self, file: &Path) -> Option<Arc<Module>> {
        self.state.read().modules.get(file).cloned()
    }

    pub(crate) fn register_module(&self, file: &Path, module: Arc<Module>) {
        self.state.write().modules.insert(file.to_path_buf(), module);
    }

    /// Reconcile against the loader's cache. Never panics; failures are
    /// logged (unless quiet) and retried on the next tick.
    fn sync(self: &Arc<Self>) {
        if let Err(error) = self.try_sync() {
            if !self.config.quiet {
                warn!("sync failed: {}", error);
            }
        }
    }

    fn try_sync(self: &Arc<Self>) -> Result<(), RuntimeError> {
        let mut added = Vec::new();
        for file in self.loader.loaded() {
            if self.state.read().modules.contains_key(&file) {
                continue;
            }
            let module = match split_vendor(&file, &self.config.vendor_dir) {
                Some(split) => {
                    // Register both the dependency and its parent, but only
                    // track the file under the innermost dependency boundary
                    let parent = self.package_at(&split.parent_root)?;
                    let dep = self.package_at(&split.dep_root)?;
                    parent.dependency(&dep)?;
                    if split.nested {
                        None
                    } else {
                        Some(dep.module(&file)?)
                    }
                }
                None => match self.package_for(&file)? {
                    Some(package) => Some(package.module(&file)?),
                    None => None,
                },
            };
            if let Some(module) = module {
                added.push(module);
            }
        }

        if self.state.read().main.is_none() {
            if let Some(main) = self.loader.main() {
                let module = self.lookup_module(&main);
                if let Some(module) = module {
                    self.state.write().main = Some(module);
                }
            }
        }

        if !added.is_empty() {
            self.emit(RuntimeEvent::Updated { modules: added });
        }
        Ok(())
    }

    /// Resolve the package owning `start`, walking ancestor directories for
    /// an already-registered package or a manifest; when neither is found,
    /// the package is created at `start` itself (manifest-less dependency
    /// roots are tolerated). A file path with no manifest-bearing ancestor
    /// roots at its parent directory.
    fn package_at(self: &Arc<Self>, start: &Path) -> Result<Arc<Package>, RuntimeError> {
        let mut root = None;
        for dir in start.ancestors() {
            if let Some(existing) = self.state.read().packages.get(dir) {
                return Ok(existing.clone());
            }
            if dir.join(&self.config.manifest_file).is_file() {
                root = Some(dir.to_path_buf());
                break;
            }
        }
        let root = root.unwrap_or_else(|| {
            if start.is_dir() {
                start.to_path_buf()
            } else {
                start.parent().unwrap_or(start).to_path_buf()
            }
        });
        self.create_package(root)
    }

    /// Resolve the package owning `file`, requiring a manifest-rooted
    /// ancestor; files with no package root are not tracked.
    fn package_for(self: &Arc<Self>, file: &Path) -> Result<Option<Arc<Package>>, RuntimeError> {
        let Some(start) = file.parent() else { return Ok(None) };
        for dir in start.ancestors() {
            if let Some(existing) = self.state.read().packages.get(dir) {
                return Ok(Some(existing.clone()));
            }
            if dir.join(&self.config.manifest_file).is_file() {
                return self.create_package(dir.to_path_buf()).map(Some);
            }
        }
        Ok(None)
    }

    fn create_package(self: &Arc<Self>, root: PathBuf) -> Result<Arc<Package>, RuntimeError> {
        let package = Package::new(root.clone(), Arc::downgrade(self), &self.config.manifest_file);
        let local = !has_component(&root, &self.config.vendor_dir);
        {
            let mut state = self.state.write();
            if let Some(existing) = state.packages.get(&root) {
                return Ok(existing.clone());
            }
            state.packages.insert(root.clone(), package.clone());
            if local {
                state.locals.insert(root.clone(), package.clone());
            }
        }
        if local && self.reload_enabled.load(Ordering::SeqCst) {
            package.attach()?;
        }
        self.emit(RuntimeEvent::Package { path: root, package: package.clone() });
        Ok(package)
    }

    fn set_reload_enabled(self: &Arc<Self>, enabled: bool) {
        if self.reload_enabled.swap(enabled, Ordering::SeqCst) == enabled {
            return;
        }
        let locals: Vec<Arc<Package>> = self.state.read().locals.values().cloned().collect();
        for package in locals {
            if enabled {
                if let Err(error) = package.attach() {
                    if !self.config.quiet {
                        warn!("failed to watch {:?}: {}", package.dir(), error);
                    }
                }
            } else {
                package.detach();
            }
        }
    }
}

/// The live-reload runtime
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Construct a runtime over `loader`: performs one eager, silent sync
    /// and starts the periodic reconciliation task. Must be called within a
    /// tokio runtime.
    pub fn new(config: RuntimeConfig, loader: Arc<dyn Loader>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        let reload_enabled = config.reload_enabled;
        let interval = config.sync_interval;
        let inner = Arc::new(RuntimeInner {
            config,
            loader,
            fallbacks: RwLock::new(HashMap::new()),
            state: RwLock::new(RuntimeState::default()),
            events,
            pending: AtomicBool::new(true),
            reload_enabled: AtomicBool::new(reload_enabled),
            sync_task: Mutex::new(None),
        });

        inner.sync();
        inner.pending.store(false, Ordering::SeqCst);

        // The task holds only a weak reference, so dropping the runtime
        // also stops the ticker.
        let weak = Arc::downgrade(&inner);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { return };
                inner.sync();
            }
        });
        *inner.sync_task.lock() = Some(task);

        Runtime { inner }
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.inner.events.subscribe()
    }

    /// Run one reconciliation pass now
    pub fn sync(&self) {
        self.inner.sync();
    }

    /// Resolve (creating lazily) the package owning `path`
    pub fn package(&self, path: &Path) -> Result<Arc<Package>, RuntimeError> {
        self.inner.package_at(path)
    }

    /// The tracked module for `path`, if any
    pub fn module(&self, path: &Path) -> Option<Arc<Module>> {
        self.inner.lookup_module(path)
    }

    /// The package recorded in a type's provenance
    pub fn package_of(&self, handle: &TypeHandle) -> Option<Arc<Package>> {
        handle.provenance().and_then(|p| p.package.upgrade())
    }

    /// The module recorded in a type's provenance
    pub fn module_of(&self, handle: &TypeHandle) -> Option<Arc<Module>> {
        handle.provenance().and_then(|p| p.module.upgrade())
    }

    /// The package recorded in the provenance of an instance's type
    pub fn package_of_instance(&self, instance: &Instance) -> Option<Arc<Package>> {
        self.package_of(instance.ty())
    }

    /// The module recorded in the provenance of an instance's type
    pub fn module_of_instance(&self, instance: &Instance) -> Option<Arc<Module>> {
        self.module_of(instance.ty())
    }

    /// The process entry point's module, once resolved
    pub fn main(&self) -> Option<Arc<Module>> {
        self.inner.state.read().main.clone()
    }

    /// Snapshot of every known package
    pub fn packages(&self) -> Vec<Arc<Package>> {
        self.inner.state.read().packages.values().cloned().collect()
    }

    /// Snapshot of the local (watchable) packages
    pub fn locals(&self) -> Vec<Arc<Package>> {
        self.inner.state.read().locals.values().cloned().collect()
    }

    /// Snapshot of every tracked module
    pub fn modules(&self) -> Vec<Arc<Module>> {
        self.inner.state.read().modules.values().cloned().collect()
    }

    pub fn is_reload_enabled(&self) -> bool {
        self.inner.reload_enabled.load(Ordering::SeqCst)
    }

    /// Toggle watching for every local package; a no-op when unchanged
    pub fn set_reload_enabled(&self, enabled: bool) {
        self.inner.set_reload_enabled(enabled);
    }

    /// Register a fallback loader for an alternate source kind, keyed by
    /// file extension; consulted when the primary loader reports an
    /// unsupported format
    pub fn register_fallback(&self, ext: &str, loader: Arc<dyn Loader>) {
        self.inner.fallbacks.write().insert(ext.to_string(), loader);
    }

    /// Cancel the reconciliation task and detach every watcher
    pub async fn shutdown(&self) {
        if let Some(task) = self.inner.sync_task.lock().take() {
            task.abort();
        }
        let locals: Vec<Arc<Package>> = self.inner.state.read().locals.values().cloned().collect();
        for package in locals {
            package.detach();
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("Runtime")
            .field("packages", &state.packages.len())
            .field("modules", &state.modules.len())
            .field("locals", &state.locals.len())
            .field("reload_enabled", &self.is_reload_enabled())
            .finish()
    }
}

struct VendorSplit {
    /// Project root above the vendor directory
    parent_root: PathBuf,
    /// Root of the dependency package inside the vendor directory
    dep_root: PathBuf,
    /// Whether the remainder crosses another vendor boundary
    nested: bool,
}

/// Split a path at its first vendor-directory boundary. Returns `None` when
/// there is no boundary, or no file below the dependency root.
fn split_vendor(file: &Path, vendor: &str) -> Option<VendorSplit> {
    let needle = OsStr::new(vendor);
    let comps: Vec<Component<'_>> = file.components().collect();
    let idx = comps
        .iter()
        .position(|c| matches!(c, Component::Normal(n) if **n == *needle))?;
    if comps.len() < idx + 3 {
        return None;
    }
    let parent_root: PathBuf = comps[..idx].iter().map(|c| c.as_os_str()).collect();
    let dep_root: PathBuf = comps[..idx + 2].iter().map(|c| c.as_os_str()).collect();
    let nested = comps[idx + 2..]
        .iter()
        .any(|c| matches!(c, Component::Normal(n) if **n == *needle));
    Some(VendorSplit { parent_root, dep_root, nested })
}

fn has_component(path: &Path, name: &str) -> bool {
    let needle = OsStr::new(name);
    path.components()
        .any(|c| matches!(c, Component::Normal(n) if *n == *needle))
}
