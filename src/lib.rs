//! Live-reload type registry
//!
//! Tracks which packages and files contributed the currently loaded type
//! definitions, watches local packages for changes, and hot-patches type
//! definitions in place when a file is reloaded:
//! - Every loaded file is assigned to the package that owns it
//! - Local (non-vendored) packages are watched recursively
//! - A changed file is reloaded through the host [`Loader`] and its fresh
//!   member definitions are swapped under every previous generation of the
//!   same logical type, so existing handles and instances keep working
//! - Each tracked type carries a provenance record `{module, package, version}`
//!
//! The [`Runtime`] is constructed explicitly and passed to whatever needs
//! reload awareness; there is no ambient global instance.

mod arena;
mod config;
mod error;
mod events;
mod extract;
mod loader;
mod manifest;
mod module;
mod package;
mod runtime;
mod value;
mod watcher;

pub use arena::{
    Instance, Member, MemberValue, NativeFn, Provenance, TypeArena, TypeBuilder, TypeHandle,
    TypeImpl, RESERVED_MEMBERS,
};
pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use events::RuntimeEvent;
pub use extract::{default_name_policy, exported_types, NamePolicy};
pub use loader::{ExportFactory, LoadError, Loader, MemoryLoader};
pub use manifest::Manifest;
pub use module::{FileStat, Module, ReloadOutcome};
pub use package::Package;
pub use runtime::Runtime;
pub use value::{ExportMap, ExportValue, Value};
pub use watcher::{DirWatcher, WatchEvent, WatchEventKind};
