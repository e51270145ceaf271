//! Filesystem subscriptions for coverage data files.
//!
//! coverage.py replaces its data file rather than editing it in place, so
//! the file itself is a poor thing to watch. Each subscription instead
//! watches the file's parent directory (non-recursively) and filters events
//! down to the one file name. All subscriptions share one notify watcher
//! and one dispatch thread. Directories are reference counted through the
//! handler table: the first subscription in a directory adds the watch and
//! the last one removes it.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

use crate::error::{CovwatchError, Result};

/// Invoked with the subscribed file path when that file changes.
pub type EventHandler = Arc<dyn Fn(&Path) + Send + Sync>;

struct Subscription {
    file: PathBuf,
    handler: EventHandler,
}

/// Watched directory -> (event path of the target file -> subscription).
type HandlerTable = HashMap<PathBuf, HashMap<PathBuf, Subscription>>;

pub struct WatchService {
    watcher: Option<RecommendedWatcher>,
    handlers: Arc<Mutex<HandlerTable>>,
    /// Subscribed file -> (watched directory, event path).
    by_file: HashMap<PathBuf, (PathBuf, PathBuf)>,
    thread: Option<JoinHandle<()>>,
}

impl WatchService {
    pub fn start() -> Result<Self> {
        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            },
            Config::default(),
        )?;

        let handlers: Arc<Mutex<HandlerTable>> = Arc::new(Mutex::new(HashMap::new()));
        let table = Arc::clone(&handlers);
        let thread = thread::Builder::new()
            .name("covwatch-watch".to_string())
            .spawn(move || dispatch_events(rx, table))?;

        tracing::debug!("Watch service started");
        Ok(Self {
            watcher: Some(watcher),
            handlers,
            by_file: HashMap::new(),
            thread: Some(thread),
        })
    }

    /// Call `handler` whenever `file` is created, modified or removed.
    /// Subscribing the same file again replaces its handler.
    pub fn subscribe(&mut self, file: &Path, handler: EventHandler) -> Result<()> {
        let (dir, target) = event_path(file)?;
        let watcher = self
            .watcher
            .as_mut()
            .ok_or_else(|| CovwatchError::Data("watch service is stopped".to_string()))?;

        let mut handlers = self.handlers.lock();
        if !handlers.contains_key(&dir) {
            watcher.watch(&dir, RecursiveMode::NonRecursive)?;
            tracing::debug!(dir = %dir.display(), "Watching directory");
        }
        handlers.entry(dir.clone()).or_default().insert(
            target.clone(),
            Subscription {
                file: file.to_path_buf(),
                handler,
            },
        );
        self.by_file.insert(file.to_path_buf(), (dir, target));
        Ok(())
    }

    pub fn unsubscribe(&mut self, file: &Path) -> bool {
        let Some((dir, target)) = self.by_file.remove(file) else {
            return false;
        };

        let mut handlers = self.handlers.lock();
        let now_empty = match handlers.get_mut(&dir) {
            Some(files) => {
                files.remove(&target);
                files.is_empty()
            }
            None => false,
        };
        if now_empty {
            handlers.remove(&dir);
            if let Some(watcher) = self.watcher.as_mut() {
                // The directory may already be gone; the watch went with it.
                if let Err(e) = watcher.unwatch(&dir) {
                    tracing::debug!(dir = %dir.display(), error = %e, "Unwatch failed");
                }
            }
            tracing::debug!(dir = %dir.display(), "Stopped watching directory");
        }
        true
    }

    pub fn subscription_count(&self) -> usize {
        self.by_file.len()
    }

    pub fn watched_dir_count(&self) -> usize {
        self.handlers.lock().len()
    }
}

impl Drop for WatchService {
    fn drop(&mut self) {
        // Dropping the watcher drops the channel sender, which ends the
        // dispatch loop.
        self.watcher.take();
        if let Some(handle) = self.thread.take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::warn!("Watch dispatch thread panicked");
            }
        }
        tracing::debug!("Watch service stopped");
    }
}

/// The directory to watch for `file` and the path events for it will carry.
fn event_path(file: &Path) -> Result<(PathBuf, PathBuf)> {
    let name = file
        .file_name()
        .ok_or_else(|| CovwatchError::Data(format!("not a file path: {}", file.display())))?;
    let parent = match file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let dir = parent.canonicalize()?;
    let target = dir.join(name);
    Ok((dir, target))
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn dispatch_events(rx: Receiver<notify::Result<Event>>, handlers: Arc<Mutex<HandlerTable>>) {
    for res in rx {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Watch error");
                continue;
            }
        };
        if !is_relevant(&event.kind) {
            continue;
        }

        let matched: Vec<(PathBuf, EventHandler)> = {
            let table = handlers.lock();
            let mut matched: Vec<(PathBuf, EventHandler)> = Vec::new();
            for path in &event.paths {
                let Some(dir) = path.parent() else { continue };
                let Some(sub) = table.get(dir).and_then(|files| files.get(path)) else {
                    continue;
                };
                if !matched.iter().any(|(file, _)| *file == sub.file) {
                    matched.push((sub.file.clone(), Arc::clone(&sub.handler)));
                }
            }
            matched
        };

        for (file, handler) in matched {
            tracing::trace!(file = %file.display(), kind = ?event.kind, "Coverage file changed");
            if catch_unwind(AssertUnwindSafe(|| handler(&file))).is_err() {
                tracing::error!(file = %file.display(), "Watch handler panicked");
            }
        }
    }
}
