//! Filesystem watcher for template directories.
//!
//! [`TemplateWatcher::start`] watches a directory tree with a `notify`
//! recommended watcher and forwards each event to a tokio task. The task
//! classifies events into [`ChangeEvent`]s, refreshes the raw
//! [`TemplateStore`] if one is attached, and calls the change callback. A
//! periodic tick calls an optional tick callback; returning `false` from it
//! stops the watcher. Store refreshes and callbacks do blocking work, so
//! they run on tokio's blocking pool rather than on the watcher task.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tplex_core::error::TplexError;
use tracing::{debug, error, info};

use crate::store::{FilePatterns, TemplateStore};

/// Whether a change concerns a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

/// What happened to the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Create,
    Delete,
    Modify,
    Rename,
}

/// One change under the watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Path relative to the root, with `/` separators.
    pub name: String,
    pub kind: EntryKind,
    pub op: ChangeOp,
}

/// Called for every change that is not ignored.
pub type ChangeCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Called on every tick; returning `false` stops the watcher.
pub type TickCallback = Arc<dyn Fn() -> bool + Send + Sync>;

/// Everything a watcher needs.
pub struct WatchConfig {
    /// The directory to watch recursively.
    pub root: PathBuf,
    /// Interval between tick callbacks.
    pub tick: Duration,
    /// Globs whose events are dropped.
    pub ignores: FilePatterns,
    /// Raw store to refresh before the change callback runs.
    pub store: Option<Arc<TemplateStore>>,
    pub on_change: ChangeCallback,
    pub on_tick: Option<TickCallback>,
}

/// Converts one `notify` event into changes relative to `root`.
///
/// Access events and paths outside `root` produce nothing.
pub fn classify(event: &Event, root: &Path) -> Vec<ChangeEvent> {
    event
        .paths
        .iter()
        .filter_map(|path| {
            let (kind, op) = match event.kind {
                EventKind::Create(CreateKind::Folder) => (EntryKind::Dir, ChangeOp::Create),
                EventKind::Create(_) => (entry_kind(path), ChangeOp::Create),
                EventKind::Remove(RemoveKind::Folder) => (EntryKind::Dir, ChangeOp::Delete),
                EventKind::Remove(_) => (EntryKind::File, ChangeOp::Delete),
                EventKind::Modify(ModifyKind::Name(_)) => (entry_kind(path), ChangeOp::Rename),
                EventKind::Modify(_) => (entry_kind(path), ChangeOp::Modify),
                EventKind::Access(_) | EventKind::Any | EventKind::Other => return None,
            };
            Some(ChangeEvent {
                name: relative_name(path, root)?,
                kind,
                op,
            })
        })
        .collect()
}

fn entry_kind(path: &Path) -> EntryKind {
    if path.is_dir() {
        EntryKind::Dir
    } else {
        EntryKind::File
    }
}

fn relative_name(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let name = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    (!name.is_empty()).then_some(name)
}

/// Starts watchers for template directories.
pub struct TemplateWatcher;

impl TemplateWatcher {
    /// Starts watching `config.root` on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a `WatchError` if there is no tokio runtime or the directory
    /// cannot be watched.
    pub fn start(config: WatchConfig) -> Result<WatchHandle, TplexError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TplexError::WatchError(format!("no tokio runtime: {e}")))?;
        let root = config
            .root
            .canonicalize()
            .map_err(|e| watch_error(&config.root, e))?;

        let (tx, mut rx) = mpsc::channel::<notify::Result<Event>>(256);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // The callback runs on notify's own thread.
            let _ = tx.blocking_send(res);
        })
        .map_err(|e| watch_error(&root, e))?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| watch_error(&root, e))?;

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        info!(root = %root.display(), "template watcher started");

        let config = Arc::new(config);
        let root: Arc<Path> = Arc::from(root);
        let task = runtime.spawn(async move {
            let _watcher = watcher;
            let mut ticker = tokio::time::interval(config.tick);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    Some(res) = rx.recv() => match res {
                        Ok(event) => {
                            let config = Arc::clone(&config);
                            let root = Arc::clone(&root);
                            let done = tokio::task::spawn_blocking(move || {
                                dispatch(&event, &root, &config);
                            })
                            .await;
                            if let Err(e) = done {
                                error!(error = %e, "template change handler failed");
                            }
                        }
                        Err(e) => error!(error = %e, "template watcher error"),
                    },
                    _ = ticker.tick() => {
                        if let Some(on_tick) = config.on_tick.clone() {
                            match tokio::task::spawn_blocking(move || on_tick()).await {
                                Ok(true) => {}
                                Ok(false) => break,
                                Err(e) => {
                                    error!(error = %e, "template tick handler failed");
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            info!(root = %root.display(), "template watcher stopped");
        });

        Ok(WatchHandle {
            stop: Some(stop_tx),
            task: Some(task),
        })
    }
}

fn dispatch(event: &Event, root: &Path, config: &WatchConfig) {
    for change in classify(event, root) {
        if config.ignores.matches(&change.name) {
            continue;
        }
        debug!(name = %change.name, kind = ?change.kind, op = ?change.op, "template change");
        if let Some(store) = &config.store {
            store.apply_event(&change);
        }
        (config.on_change)(&change);
    }
}

fn watch_error(root: &Path, e: impl std::fmt::Display) -> TplexError {
    TplexError::WatchError(format!("cannot watch '{}': {e}", root.display()))
}

/// Controls a running watcher. Dropping the handle stops the watcher.
#[derive(Debug)]
pub struct WatchHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// Asks the watcher to stop.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    /// Returns `true` once the watcher task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stops the watcher and waits for its task to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
