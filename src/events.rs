//! Lifecycle events
//!
//! Broadcast on the runtime's event channel. All events are suppressed
//! during the initial bootstrap sync performed at construction.

use std::path::PathBuf;
use std::sync::Arc;

use crate::module::Module;
use crate::package::Package;

/// Lifecycle events emitted by the runtime
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A package root was discovered and registered
    Package { path: PathBuf, package: Arc<Package> },
    /// A file was tracked for the first time
    Module { path: PathBuf, module: Arc<Module> },
    /// A local package's watcher was attached
    Watching { path: PathBuf, package: Arc<Package> },
    /// A local package's watcher was detached
    Unwatched { path: PathBuf, package: Arc<Package> },
    /// A module was reloaded and at least one type was patched
    Reloaded { path: PathBuf, module: Arc<Module> },
    /// A reconciliation pass tracked new modules
    Updated { modules: Vec<Arc<Module>> },
}
