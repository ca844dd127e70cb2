//! Directory watcher
//!
//! One recursive watcher per package directory, bridging raw filesystem
//! notifications into a tokio channel for the package's routing task.

use std::path::{Path, PathBuf};

use notify::{
    event::{ModifyKind, RemoveKind},
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Watch event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// File created
    Created,
    /// File content modified
    Modified,
    /// File removed
    Removed,
    /// File renamed
    Renamed,
}

/// Watch event
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    /// Absolute path of the affected file
    pub path: PathBuf,
}

/// Recursive watcher over one directory
pub struct DirWatcher {
    dir: PathBuf,
    watcher: Option<RecommendedWatcher>,
}

impl DirWatcher {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self { dir: dir.as_ref().to_path_buf(), watcher: None }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Start watching; returns the event receiver. Notifications are sent
    /// from the watcher's own thread, so the bridge uses a blocking send.
    pub fn start(&mut self) -> Result<mpsc::Receiver<WatchEvent>, notify::Error> {
        let (tx, rx) = mpsc::channel(1024);
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                let event = match result {
                    Ok(event) => event,
                    Err(error) => {
                        warn!("watcher error: {}", error);
                        return;
                    }
                };
                let Some(kind) = convert(&event.kind) else {
                    debug!("ignoring event kind {:?}", event.kind);
                    return;
                };
                for path in event.paths {
                    if tx.blocking_send(WatchEvent { kind, path }).is_err() {
                        return;
                    }
                }
            },
            Config::default(),
        )?;
        watcher.watch(&self.dir, RecursiveMode::Recursive)?;
        self.watcher = Some(watcher);
        Ok(rx)
    }

    /// Stop watching; dropping the inner watcher closes the channel
    pub fn stop(&mut self) {
        self.watcher = None;
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }
}

fn convert(kind: &EventKind) -> Option<WatchEventKind> {
    match kind {
        EventKind::Create(_) => Some(WatchEventKind::Created),
        EventKind::Modify(ModifyKind::Name(_)) => Some(WatchEventKind::Renamed),
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            Some(WatchEventKind::Modified)
        }
        EventKind::Remove(RemoveKind::File) | EventKind::Remove(RemoveKind::Any) => {
            Some(WatchEventKind::Removed)
        }
        _ => None,
    }
}
