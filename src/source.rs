//! Loading of one coverage data file.
//!
//! coverage.py rewrites its data file by deleting, recreating and then
//! filling it, so a read can land on a missing, empty or half-written
//! file. `CoverageSource::load` retries with a growing delay and only
//! swaps in a new snapshot when a read fully succeeds.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::config::CoverageConfig;
use crate::detect::{sniff_file, Sniffed};
use crate::error::{CovwatchError, LoadError};
use crate::model::{DataSnapshot, LineSet};
use crate::parsers::reader_for;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CoverageConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            base_delay: config.retry_base_delay(),
        }
    }

    /// Pause after the failed attempt numbered `attempt` (0-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * (attempt + 1)
    }
}

#[derive(Debug)]
pub struct CoverageSource {
    path: PathBuf,
    retry: RetryPolicy,
    snapshot: RwLock<Option<Arc<DataSnapshot>>>,
}

impl CoverageSource {
    pub fn new(path: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            path: path.into(),
            retry,
            snapshot: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the data file, retrying transient failures. On success the new
    /// snapshot replaces the old one; on failure the old one stays.
    pub fn load(&self) -> Result<Arc<DataSnapshot>, LoadError> {
        let attempts = self.retry.attempts.max(1);
        let mut last_err = LoadError::Missing(self.path.clone());

        for attempt in 0..attempts {
            match self.load_once() {
                Ok(snapshot) => {
                    let snapshot = Arc::new(snapshot);
                    *self.snapshot.write() = Some(Arc::clone(&snapshot));
                    tracing::debug!(
                        path = %self.path.display(),
                        files = snapshot.files.len(),
                        format = %snapshot.format,
                        "Loaded coverage data"
                    );
                    return Ok(snapshot);
                }
                Err(e) => {
                    if attempt + 1 < attempts {
                        tracing::debug!(
                            path = %self.path.display(),
                            attempt = attempt + 1,
                            attempts,
                            error = %e,
                            "Coverage data not ready, retrying"
                        );
                        std::thread::sleep(self.retry.delay_after(attempt));
                    }
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    fn load_once(&self) -> Result<DataSnapshot, LoadError> {
        let sniffed = sniff_file(&self.path).map_err(|e| self.io_error(e))?;
        let format = match sniffed {
            Sniffed::Known(format) => format,
            Sniffed::Empty => return Err(LoadError::NotReady(self.path.clone())),
            Sniffed::Unknown => {
                return Err(LoadError::Unreadable {
                    path: self.path.clone(),
                    reason: CovwatchError::UnknownFormat.to_string(),
                })
            }
        };
        reader_for(format).read(&self.path).map_err(|e| match e {
            CovwatchError::Io(io) => self.io_error(io),
            other => LoadError::Unreadable {
                path: self.path.clone(),
                reason: other.to_string(),
            },
        })
    }

    fn io_error(&self, e: std::io::Error) -> LoadError {
        if e.kind() == ErrorKind::NotFound {
            LoadError::Missing(self.path.clone())
        } else {
            LoadError::Unreadable {
                path: self.path.clone(),
                reason: e.to_string(),
            }
        }
    }

    /// The most recent successfully loaded snapshot.
    pub fn snapshot(&self) -> Option<Arc<DataSnapshot>> {
        self.snapshot.read().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot.read().is_some()
    }

    pub fn measured_files(&self) -> BTreeSet<PathBuf> {
        self.snapshot()
            .map(|s| s.files.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Executed lines for `path`; `None` when not measured or nothing loaded.
    pub fn executed_lines(&self, path: &Path) -> Option<LineSet> {
        let snapshot = self.snapshot()?;
        lookup(&snapshot, path).cloned()
    }

    pub fn is_measured(&self, path: &Path) -> bool {
        self.snapshot()
            .is_some_and(|s| lookup(&s, path).is_some())
    }
}

/// Measured paths are recorded as coverage.py saw them; try the path as
/// given, then its canonical form.
fn lookup<'a>(snapshot: &'a DataSnapshot, path: &Path) -> Option<&'a LineSet> {
    if let Some(lines) = snapshot.executed_lines(path) {
        return Some(lines);
    }
    let canonical = std::fs::canonicalize(path).ok()?;
    snapshot.executed_lines(&canonical)
}
