//! The coverage coordinator.
//!
//! `CoverageManager` owns every tracked coverage root, the shared watch
//! service, the debounced refresh scheduler and the set of views that want
//! to re-render when coverage changes. The editor shell constructs one at
//! startup and drops (or shuts down) it on exit.
//!
//! Lock order: `lifecycle` -> `roots` -> `watch`. The scheduler and consumer
//! locks are leaves. Watch and refresh callbacks never take `lifecycle`
//! except through `remove_root` on the refresh thread, and `shutdown` stops
//! that thread before taking `lifecycle`.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::config::{CoverageConfig, ResolvePolicy};
use crate::debounce::{RefreshFn, RefreshScheduler};
use crate::model::{ConsumerId, LoadStatus, RootStatus};
use crate::record::CoverageRecord;
use crate::watch::{EventHandler, WatchService};

/// Something that redraws coverage annotations when told to.
pub trait RenderConsumer: Send + Sync {
    fn rerender(&self);
}

impl<F> RenderConsumer for F
where
    F: Fn() + Send + Sync,
{
    fn rerender(&self) {
        self()
    }
}

/// One-time user-facing notification for conditions that disable live
/// updates altogether.
pub type Notifier = Box<dyn Fn(&str) + Send + Sync>;

/// A resolved coverage root. Stays usable after the root is removed; it
/// then answers from the last data it loaded.
#[derive(Clone)]
pub struct RootHandle {
    path: PathBuf,
    record: Arc<CoverageRecord>,
}

impl RootHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self) -> &CoverageRecord {
        &self.record
    }
}

impl std::fmt::Debug for RootHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootHandle").field("path", &self.path).finish()
    }
}

struct TrackedRoot {
    path: PathBuf,
    dir: PathBuf,
    record: Arc<CoverageRecord>,
    watched: bool,
}

pub struct CoverageManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    this: Weak<ManagerInner>,
    config: CoverageConfig,
    lifecycle: Mutex<()>,
    roots: RwLock<Vec<TrackedRoot>>,
    watch: Mutex<Option<WatchService>>,
    scheduler: RefreshScheduler,
    consumers: Mutex<HashMap<ConsumerId, Weak<dyn RenderConsumer>>>,
    notifier: Option<Notifier>,
    notified: AtomicBool,
}

impl CoverageManager {
    pub fn new(config: CoverageConfig) -> Self {
        Self::build(config, None)
    }

    /// Like `new`, with a callback for the one-time notification raised when
    /// the filesystem watch backend is unavailable.
    pub fn with_notifier(config: CoverageConfig, notifier: Notifier) -> Self {
        Self::build(config, Some(notifier))
    }

    fn build(config: CoverageConfig, notifier: Option<Notifier>) -> Self {
        let inner = Arc::new_cyclic(|this: &Weak<ManagerInner>| {
            let weak = this.clone();
            let on_fire: RefreshFn = Arc::new(move |path: &Path| {
                if let Some(inner) = weak.upgrade() {
                    inner.fire_refresh(path);
                }
            });
            ManagerInner {
                this: this.clone(),
                scheduler: RefreshScheduler::new(config.debounce(), on_fire),
                config,
                lifecycle: Mutex::new(()),
                roots: RwLock::new(Vec::new()),
                watch: Mutex::new(None),
                consumers: Mutex::new(HashMap::new()),
                notifier,
                notified: AtomicBool::new(false),
            }
        });
        Self { inner }
    }

    pub fn config(&self) -> &CoverageConfig {
        &self.inner.config
    }

    /// Start tracking a coverage data file. False when it is already
    /// tracked, does not exist, or cannot be loaded.
    pub fn add_root(&self, path: &Path) -> bool {
        self.inner.add_root(path)
    }

    /// Stop tracking a coverage data file. False when it was not tracked.
    pub fn remove_root(&self, path: &Path) -> bool {
        self.inner.remove_root(path)
    }

    /// The root responsible for `file`: its directory contains the file and
    /// its data measures it. Overlaps are settled by the configured policy.
    pub fn resolve(&self, file: &Path) -> Option<RootHandle> {
        self.inner.resolve(file)
    }

    /// Missing statement lines of `file` according to `root`, highest first.
    pub fn missing_lines(&self, root: &RootHandle, file: &Path, text: &str) -> Option<Vec<u32>> {
        root.record.missing_lines(file, text)
    }

    /// `resolve` followed by `missing_lines`.
    pub fn missing_lines_for(&self, file: &Path, text: &str) -> Option<Vec<u32>> {
        let root = self.resolve(file)?;
        self.missing_lines(&root, file, text)
    }

    /// Debounced reload of a tracked root. False when the root is unknown.
    pub fn schedule_refresh(&self, root: &Path) -> bool {
        self.inner.schedule_refresh(root)
    }

    /// Drop roots whose data file no longer exists. Returns how many went.
    pub fn cleanup_stale(&self) -> usize {
        self.inner.cleanup_stale()
    }

    /// Track `<folder>/<coverage_file_name>` for each project folder that has
    /// one. Does nothing unless the feature is enabled.
    pub fn sync_project_folders(&self, folders: &[PathBuf]) -> usize {
        if !self.inner.config.show_missing_lines {
            return 0;
        }
        folders
            .iter()
            .map(|folder| self.inner.config.coverage_file_for(folder))
            .filter(|candidate| candidate.is_file() && self.add_root(candidate))
            .count()
    }

    /// Forget the roots of folders being closed, then sweep stale roots.
    pub fn close_project_folders(&self, folders: &[PathBuf]) -> usize {
        let closed = folders
            .iter()
            .map(|folder| self.inner.config.coverage_file_for(folder))
            .filter(|candidate| self.remove_root(candidate))
            .count();
        closed + self.cleanup_stale()
    }

    pub fn register_consumer<C>(&self, id: ConsumerId, consumer: &Arc<C>)
    where
        C: RenderConsumer + 'static,
    {
        let weak = Arc::downgrade(consumer);
        let weak: Weak<dyn RenderConsumer> = weak;
        self.inner.consumers.lock().insert(id, weak);
        tracing::debug!(consumer = %id, "Consumer registered");
    }

    pub fn unregister_consumer(&self, id: ConsumerId) -> bool {
        self.inner.consumers.lock().remove(&id).is_some()
    }

    /// Ask every live consumer to re-render. Returns how many were reached.
    pub fn notify_consumers(&self) -> usize {
        self.inner.notify_consumers()
    }

    pub fn consumer_count(&self) -> usize {
        self.inner.consumers.lock().len()
    }

    /// Tracked data files in registration order.
    pub fn roots(&self) -> Vec<PathBuf> {
        self.inner.roots.read().iter().map(|r| r.path.clone()).collect()
    }

    pub fn is_tracked(&self, path: &Path) -> bool {
        self.inner.is_tracked(&normalize(path))
    }

    pub fn root_status(&self, path: &Path) -> Option<RootStatus> {
        self.inner.root_status(&normalize(path))
    }

    /// Whether the shared filesystem watch service is running.
    pub fn is_watching(&self) -> bool {
        self.inner.watch.lock().is_some()
    }

    pub fn pending_refreshes(&self) -> usize {
        self.inner.scheduler.pending_count()
    }

    /// Cancel pending refreshes, release every root and the watch service,
    /// and forget all consumers. Idempotent; the manager can be reused.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Drop for CoverageManager {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl ManagerInner {
    fn add_root(&self, path: &Path) -> bool {
        let path = match path.canonicalize() {
            Ok(p) if p.is_file() => p,
            _ => {
                tracing::debug!(path = %path.display(), "Not a coverage file, not tracking");
                return false;
            }
        };
        let dir = match path.parent() {
            Some(dir) => dir.to_path_buf(),
            None => return false,
        };

        let _lifecycle = self.lifecycle.lock();
        if self.is_tracked(&path) {
            return false;
        }

        let record = match CoverageRecord::open(&path, &self.config) {
            Ok(record) => Arc::new(record),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to open coverage file");
                return false;
            }
        };
        let watched = self.subscribe(&path);
        self.roots.write().push(TrackedRoot {
            path: path.clone(),
            dir,
            record,
            watched,
        });
        tracing::info!(path = %path.display(), watched, "Tracking coverage file");
        true
    }

    /// Subscribe a root to filesystem events, starting the watch service if
    /// this is the first one. False when live updates are unavailable.
    fn subscribe(&self, path: &Path) -> bool {
        let mut watch = self.watch.lock();
        if watch.is_none() {
            match WatchService::start() {
                Ok(service) => *watch = Some(service),
                Err(e) => {
                    tracing::error!(error = %e, "Filesystem watching unavailable");
                    self.notify_once(&format!(
                        "Coverage files cannot be watched for changes ({e}); \
                         annotations will not update automatically."
                    ));
                    return false;
                }
            }
        }
        let Some(service) = watch.as_mut() else {
            return false;
        };

        let weak = self.this.clone();
        let handler: EventHandler = Arc::new(move |file: &Path| {
            if let Some(inner) = weak.upgrade() {
                inner.schedule_refresh(file);
            }
        });
        match service.subscribe(path, handler) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to watch coverage file");
                if service.subscription_count() == 0 {
                    *watch = None;
                }
                false
            }
        }
    }

    fn remove_root(&self, path: &Path) -> bool {
        let path = normalize(path);
        let _lifecycle = self.lifecycle.lock();

        let (removed, now_empty) = {
            let mut roots = self.roots.write();
            let removed = roots
                .iter()
                .position(|r| r.path == path)
                .map(|i| roots.remove(i));
            (removed, roots.is_empty())
        };
        let Some(root) = removed else {
            return false;
        };

        self.scheduler.cancel(&root.path);
        let stopped = {
            let mut watch = self.watch.lock();
            if let Some(service) = watch.as_mut() {
                service.unsubscribe(&root.path);
            }
            if now_empty {
                watch.take()
            } else {
                None
            }
        };
        // Dropping the service joins its thread; do it after releasing the lock.
        let watch_stopped = stopped.is_some();
        drop(stopped);

        tracing::info!(path = %root.path.display(), watch_stopped, "Stopped tracking coverage file");
        true
    }

    fn resolve(&self, file: &Path) -> Option<RootHandle> {
        let normalized = normalize(file);
        let roots = self.roots.read();
        let mut candidates = roots.iter().filter(|root| {
            normalized.starts_with(&root.dir)
                && (root.record.source().is_measured(file)
                    || root.record.source().is_measured(&normalized))
        });

        let chosen = match self.config.resolve_policy {
            ResolvePolicy::FirstRegistered => candidates.next(),
            ResolvePolicy::DeepestRoot => candidates.fold(None, |best: Option<&TrackedRoot>, root| {
                match best {
                    Some(b) if b.dir.components().count() >= root.dir.components().count() => {
                        Some(b)
                    }
                    _ => Some(root),
                }
            }),
        };
        chosen.map(|root| RootHandle {
            path: root.path.clone(),
            record: Arc::clone(&root.record),
        })
    }

    fn schedule_refresh(&self, path: &Path) -> bool {
        let path = normalize(path);
        if !self.is_tracked(&path) {
            tracing::debug!(path = %path.display(), "Ignoring refresh for untracked file");
            return false;
        }
        self.scheduler.schedule(&path);
        true
    }

    /// Runs on the scheduler thread when a root's debounce window closes.
    fn fire_refresh(&self, path: &Path) {
        let record = {
            let roots = self.roots.read();
            roots
                .iter()
                .find(|r| r.path == path)
                .map(|r| Arc::clone(&r.record))
        };
        let Some(record) = record else {
            return;
        };

        if !path.exists() {
            tracing::info!(path = %path.display(), "Coverage file deleted");
            self.remove_root(path);
            self.notify_consumers();
            return;
        }

        match record.refresh() {
            Ok(()) => {
                tracing::info!(path = %path.display(), "Coverage data refreshed");
            }
            Err(e) if e.is_missing() => {
                tracing::info!(path = %path.display(), "Coverage file gone after retries");
                self.remove_root(path);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Refresh failed, keeping previous data");
            }
        }
        self.notify_consumers();
    }

    fn cleanup_stale(&self) -> usize {
        let stale: Vec<PathBuf> = self
            .roots
            .read()
            .iter()
            .filter(|r| !r.path.is_file())
            .map(|r| r.path.clone())
            .collect();
        stale.iter().filter(|path| self.remove_root(path)).count()
    }

    fn is_tracked(&self, path: &Path) -> bool {
        self.roots.read().iter().any(|r| r.path == path)
    }

    fn root_status(&self, path: &Path) -> Option<RootStatus> {
        let roots = self.roots.read();
        let root = roots.iter().find(|r| r.path == path)?;
        let snapshot = root.record.source().snapshot();
        let status = if self.scheduler.is_pending(&root.path) {
            LoadStatus::RefreshPending
        } else if snapshot.is_some() {
            LoadStatus::Loaded
        } else {
            LoadStatus::NotLoaded
        };
        Some(RootStatus {
            path: root.path.clone(),
            status,
            measured_files: snapshot.as_ref().map_or(0, |s| s.files.len()),
            cached_statements: root.record.cached_statements(),
            loaded_at: snapshot.map(|s| s.loaded_at),
            watched: root.watched,
        })
    }

    fn notify_consumers(&self) -> usize {
        let live: Vec<(ConsumerId, Arc<dyn RenderConsumer>)> = {
            let mut consumers = self.consumers.lock();
            consumers.retain(|_, weak| weak.strong_count() > 0);
            consumers
                .iter()
                .filter_map(|(id, weak)| weak.upgrade().map(|c| (*id, c)))
                .collect()
        };
        for (id, consumer) in &live {
            if catch_unwind(AssertUnwindSafe(|| consumer.rerender())).is_err() {
                tracing::error!(consumer = %id, "Consumer panicked during re-render");
            }
        }
        live.len()
    }

    fn notify_once(&self, message: &str) {
        if self.notified.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(notifier) = &self.notifier {
            notifier(message);
        }
    }

    fn shutdown(&self) {
        self.scheduler.cancel_all();
        let (removed, service) = {
            let _lifecycle = self.lifecycle.lock();
            let removed = std::mem::take(&mut *self.roots.write());
            let service = self.watch.lock().take();
            (removed, service)
        };
        drop(service);
        // A refresh that was mid-flight may have rescheduled.
        self.scheduler.cancel_all();
        self.consumers.lock().clear();
        if !removed.is_empty() {
            tracing::info!(roots = removed.len(), "Coverage manager shut down");
        }
    }
}

/// Canonical form of `path` when it exists; otherwise its parent is
/// canonicalized (for data files deleted since), falling back to the
/// absolute path.
fn normalize(path: &Path) -> PathBuf {
    if let Ok(p) = path.canonicalize() {
        return p;
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        if let Ok(dir) = parent.canonicalize() {
            return dir.join(name);
        }
    }
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_notify_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let manager = CoverageManager::with_notifier(
            CoverageConfig::default(),
            Box::new(move |_msg: &str| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        manager.inner.notify_once("first");
        manager.inner.notify_once("second");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_normalize_deleted_file_keeps_canonical_parent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let gone = dir.path().join("sub").join("..").join(".coverage");
        assert_eq!(
            normalize(&gone),
            dir.path().canonicalize().unwrap().join(".coverage")
        );
    }

    #[test]
    fn test_closure_consumer() {
        let manager = CoverageManager::new(CoverageConfig::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let consumer = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        manager.register_consumer(ConsumerId(1), &consumer);
        assert_eq!(manager.notify_consumers(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        drop(consumer);
        assert_eq!(manager.notify_consumers(), 0);
        assert_eq!(manager.consumer_count(), 0);
    }
}
