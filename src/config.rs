//! Externally supplied settings.
//!
//! The editor shell owns persistence; covwatch only reads a
//! `CoverageConfig`, usually deserialized from the shell's JSON settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CovwatchError, Result};

/// coverage.py's default exclusion pattern.
pub const DEFAULT_EXCLUDE: &str = r"#\s*(pragma|PRAGMA)[:\s]?\s*(no|NO)\s*(cover|COVER)";

pub const DEFAULT_COVERAGE_FILE: &str = ".coverage";

/// Which root wins when several tracked roots contain and measure a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvePolicy {
    /// Earliest registered root.
    #[default]
    FirstRegistered,
    /// Root whose directory is nested deepest; registration order breaks ties.
    DeepestRoot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    pub show_missing_lines: bool,
    pub coverage_file_name: String,
    pub debounce_ms: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub exclude_lines: Vec<String>,
    pub resolve_policy: ResolvePolicy,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            show_missing_lines: false,
            coverage_file_name: DEFAULT_COVERAGE_FILE.to_string(),
            debounce_ms: 500,
            retry_attempts: 3,
            retry_base_delay_ms: 100,
            exclude_lines: vec![DEFAULT_EXCLUDE.to_string()],
            resolve_policy: ResolvePolicy::FirstRegistered,
        }
    }
}

impl CoverageConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        let name = self.coverage_file_name.trim();
        if name.is_empty() {
            return Err(CovwatchError::Config(
                "coverage_file_name must not be empty".to_string(),
            ));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(CovwatchError::Config(format!(
                "coverage_file_name must be a bare file name, got '{}'",
                self.coverage_file_name
            )));
        }
        if self.retry_attempts == 0 {
            return Err(CovwatchError::Config(
                "retry_attempts must be at least 1".to_string(),
            ));
        }
        for pattern in &self.exclude_lines {
            Regex::new(pattern).map_err(|e| {
                CovwatchError::Config(format!("invalid exclude pattern '{pattern}': {e}"))
            })?;
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// The data file expected inside a project folder.
    pub fn coverage_file_for(&self, folder: &Path) -> PathBuf {
        folder.join(&self.coverage_file_name)
    }
}

/// Whether missing-line overlays apply to a view with the given syntax name.
pub fn is_applicable(config: &CoverageConfig, syntax: &str) -> bool {
    config.show_missing_lines && syntax.contains("Python")
}
