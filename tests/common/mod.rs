#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use covwatch::parsers::sqlite::lines_to_numbits;
use covwatch::CoverageConfig;
use rusqlite::{params, Connection};
use tempfile::TempDir;

const SCHEMA: &str = include_str!("../../coverage_schema.sql");

/// Write a coverage.py-shaped SQLite data file at `path` with line data
/// for each `(source file, executed lines)` pair. Replaces any existing file
/// the way coverage.py does.
pub fn write_coverage(path: &Path, files: &[(&Path, &[u32])]) {
    let _ = std::fs::remove_file(path);
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(SCHEMA).unwrap();
    conn.execute("INSERT INTO coverage_schema (version) VALUES (7)", [])
        .unwrap();
    conn.execute("INSERT INTO meta (key, value) VALUES ('has_arcs', '0')", [])
        .unwrap();
    conn.execute("INSERT INTO context (id, context) VALUES (1, '')", [])
        .unwrap();
    for (i, (file, lines)) in files.iter().enumerate() {
        let id = i as i64 + 1;
        conn.execute(
            "INSERT INTO file (id, path) VALUES (?1, ?2)",
            params![id, file.to_string_lossy().into_owned()],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO line_bits (file_id, context_id, numbits) VALUES (?1, 1, ?2)",
            params![id, lines_to_numbits(lines.iter().copied())],
        )
        .unwrap();
    }
}

/// A project directory with one source file and a `.coverage` next to it.
pub struct Project {
    pub dir: TempDir,
    pub root: PathBuf,
    pub data: PathBuf,
}

impl Project {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let data = root.join(".coverage");
        Self { dir, root, data }
    }

    /// Create `rel` with `text` and return its canonical path.
    pub fn source(&self, rel: &str, text: &str) -> PathBuf {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, text).unwrap();
        path
    }
}

/// Numbered assignments, one statement per line.
pub fn numbered_source(n: u32) -> String {
    (1..=n).map(|i| format!("v{i} = {i}\n")).collect()
}

/// Short delays so tests do not wait on production timings.
pub fn fast_config() -> CoverageConfig {
    CoverageConfig {
        show_missing_lines: true,
        debounce_ms: 50,
        retry_attempts: 2,
        retry_base_delay_ms: 5,
        ..CoverageConfig::default()
    }
}

pub fn wait() {
    std::thread::sleep(Duration::from_millis(300));
}
