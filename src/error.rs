use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CovwatchError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unknown coverage data format")]
    UnknownFormat,

    #[error("Coverage data error: {0}")]
    Data(String),
}

pub type Result<T> = std::result::Result<T, CovwatchError>;

/// Source text could not be tokenized into Python logical lines.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: u32,
    pub message: String,
}

impl ParseError {
    pub fn new(line: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Why a coverage data file could not be loaded after the retry budget.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("coverage file does not exist: {}", .0.display())]
    Missing(PathBuf),

    #[error("coverage file is empty or still being written: {}", .0.display())]
    NotReady(PathBuf),

    #[error("failed to read {}: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },
}

impl LoadError {
    /// True when the data file is confirmed gone rather than unreadable.
    pub fn is_missing(&self) -> bool {
        matches!(self, LoadError::Missing(_))
    }
}
