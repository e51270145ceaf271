//! One tracked coverage data file plus the statement cache for the source
//! files it measures.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::config::CoverageConfig;
use crate::error::{CovwatchError, LoadError, ParseError, Result};
use crate::model::LineSet;
use crate::source::{CoverageSource, RetryPolicy};
use crate::statements::StatementParser;

type CacheKey = (PathBuf, [u8; 32]);

#[derive(Debug)]
pub struct CoverageRecord {
    source: CoverageSource,
    parser: StatementParser,
    cache: Mutex<HashMap<CacheKey, Arc<LineSet>>>,
}

impl CoverageRecord {
    pub fn new(source: CoverageSource, parser: StatementParser) -> Self {
        Self {
            source,
            parser,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Build a record for `path` and attempt the first load.
    ///
    /// A data file that is missing or empty right now is accepted (coverage.py
    /// may be mid-rewrite; the next change event loads it). Anything else that
    /// survives the retry budget fails construction.
    pub fn open(path: &Path, config: &CoverageConfig) -> Result<Self> {
        let parser = StatementParser::new(&config.exclude_lines)
            .map_err(|e| CovwatchError::Config(format!("invalid exclude pattern: {e}")))?;
        let source = CoverageSource::new(path, RetryPolicy::from_config(config));
        let record = Self::new(source, parser);

        match record.source.load() {
            Ok(_) => {}
            Err(e @ (LoadError::Missing(_) | LoadError::NotReady(_))) => {
                tracing::debug!(path = %path.display(), error = %e, "Coverage data not loaded yet");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(record)
    }

    pub fn path(&self) -> &Path {
        self.source.path()
    }

    pub fn source(&self) -> &CoverageSource {
        &self.source
    }

    /// Statement lines of `file` that were never executed, highest line
    /// first. `Some(vec![])` means fully covered; `None` means there is
    /// nothing to show (not measured, no data loaded, or unparseable text).
    pub fn missing_lines(&self, file: &Path, text: &str) -> Option<Vec<u32>> {
        let executed = self.source.executed_lines(file)?;
        let statements = match self.statements_for(file, text) {
            Ok(statements) => statements,
            Err(e) => {
                tracing::debug!(file = %file.display(), error = %e, "Could not parse source");
                return None;
            }
        };
        Some(
            statements
                .iter()
                .rev()
                .filter(|line| !executed.contains(*line))
                .copied()
                .collect(),
        )
    }

    /// Statement set for `text`, cached by file path and content hash.
    pub fn statements_for(
        &self,
        file: &Path,
        text: &str,
    ) -> std::result::Result<Arc<LineSet>, ParseError> {
        let key = (file.to_path_buf(), fingerprint(text));
        if let Some(hit) = self.cache.lock().get(&key) {
            return Ok(Arc::clone(hit));
        }

        // Parse outside the lock; a racing insert of the same key is harmless.
        let statements = Arc::new(self.parser.parse(text)?);
        self.cache.lock().insert(key, Arc::clone(&statements));
        Ok(statements)
    }

    /// Reload the data file. The statement cache is dropped only when the
    /// reload succeeds.
    pub fn refresh(&self) -> std::result::Result<(), LoadError> {
        self.source.load()?;
        self.cache.lock().clear();
        tracing::debug!(path = %self.path().display(), "Refreshed coverage data");
        Ok(())
    }

    pub fn cached_statements(&self) -> usize {
        self.cache.lock().len()
    }
}

fn fingerprint(text: &str) -> [u8; 32] {
    Sha256::digest(text.as_bytes()).into()
}
