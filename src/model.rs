//! Uniform in-memory representation of loaded coverage data, independent of
//! the on-disk format. Readers produce a `DataSnapshot` which the data source
//! swaps in atomically.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::detect::Format;

/// A set of 1-based source line numbers.
pub type LineSet = BTreeSet<u32>;

/// Everything one coverage data file says about the files it measured.
#[derive(Debug, Clone)]
pub struct DataSnapshot {
    /// Measured file path -> executed lines. A measured file with no
    /// executed lines maps to an empty set.
    pub files: HashMap<PathBuf, LineSet>,
    /// Whether the data was recorded with branch (arc) measurement.
    pub has_arcs: bool,
    pub format: Format,
    pub loaded_at: DateTime<Utc>,
}

impl DataSnapshot {
    pub fn new(format: Format) -> Self {
        Self {
            files: HashMap::new(),
            has_arcs: false,
            format,
            loaded_at: Utc::now(),
        }
    }

    pub fn is_measured(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    /// Executed lines for `path`, or `None` when the file was not measured.
    pub fn executed_lines(&self, path: &Path) -> Option<&LineSet> {
        self.files.get(path)
    }

    /// Record executed lines for a file, merging with anything already there.
    pub fn add_lines(&mut self, path: PathBuf, lines: impl IntoIterator<Item = u32>) {
        self.files.entry(path).or_default().extend(lines);
    }
}

/// Load state of one coverage root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    NotLoaded,
    Loaded,
    /// A debounced refresh is scheduled but has not fired yet.
    RefreshPending,
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadStatus::NotLoaded => "not-loaded",
            LoadStatus::Loaded => "loaded",
            LoadStatus::RefreshPending => "refresh-pending",
        };
        f.write_str(s)
    }
}

/// Point-in-time description of a tracked root.
#[derive(Debug, Clone)]
pub struct RootStatus {
    pub path: PathBuf,
    pub status: LoadStatus,
    pub measured_files: usize,
    pub cached_statements: usize,
    pub loaded_at: Option<DateTime<Utc>>,
    /// False when the filesystem subscription failed and only on-demand
    /// refreshes are possible.
    pub watched: bool,
}

/// Opaque identifier of a view or session that wants re-render callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(pub u64);

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view#{}", self.0)
    }
}
