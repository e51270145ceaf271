/// Reader for coverage.py's SQLite data files (coverage.py 5.0 and later).
///
/// Relevant tables:
///   file(id, path)                         every measured file
///   meta(key, value)                       `has_arcs` = "0" | "1"
///   line_bits(file_id, context_id, numbits) line data, one bitmap per context
///   arc(file_id, context_id, fromno, tono)  branch data; negative = entry/exit
///
/// Line data and arc data are mutually exclusive within one file.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use super::CoverageReader;
use crate::detect::Format;
use crate::error::{CovwatchError, Result};
use crate::model::DataSnapshot;

/// How long to wait on a writer holding the database lock.
const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

pub struct SqliteReader;

impl CoverageReader for SqliteReader {
    fn read(&self, path: &Path) -> Result<DataSnapshot> {
        let conn = open(path)?;
        read_snapshot(&conn)
    }
}

/// Open a data file read-only. coverage.py may be writing it concurrently.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

/// Read every measured file and its executed lines.
pub fn read_snapshot(conn: &Connection) -> Result<DataSnapshot> {
    if !table_exists(conn, "file")? {
        return Err(CovwatchError::Data(
            "not a coverage.py data file (no 'file' table)".to_string(),
        ));
    }
    if let Some(version) = schema_version(conn)? {
        tracing::trace!(version, "coverage data schema");
    }

    let mut snapshot = DataSnapshot::new(Format::Sqlite);
    snapshot.has_arcs = has_arcs(conn)?;

    let files = file_paths(conn)?;
    for path in files.values() {
        snapshot.add_lines(path.clone(), []);
    }

    if snapshot.has_arcs {
        if table_exists(conn, "arc")? {
            let mut stmt = conn.prepare("SELECT file_id, fromno, tono FROM arc")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;
            for row in rows {
                let (file_id, from, to) = row?;
                if let Some(path) = files.get(&file_id) {
                    snapshot.add_lines(path.clone(), arc_lines(from, to));
                }
            }
        }
    } else if table_exists(conn, "line_bits")? {
        let mut stmt = conn.prepare("SELECT file_id, numbits FROM line_bits")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        for row in rows {
            let (file_id, numbits) = row?;
            if let Some(path) = files.get(&file_id) {
                snapshot.add_lines(path.clone(), numbits_to_lines(&numbits));
            }
        }
    }

    Ok(snapshot)
}

fn file_paths(conn: &Connection) -> Result<HashMap<i64, PathBuf>> {
    let mut stmt = conn.prepare("SELECT id, path FROM file")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut result = HashMap::new();
    for row in rows {
        let (id, path) = row?;
        result.insert(id, PathBuf::from(path));
    }
    Ok(result)
}

fn has_arcs(conn: &Connection) -> Result<bool> {
    if !table_exists(conn, "meta")? {
        return Ok(false);
    }
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'has_arcs'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .is_some_and(|v| v != 0))
}

fn schema_version(conn: &Connection) -> Result<Option<u32>> {
    if !table_exists(conn, "coverage_schema")? {
        return Ok(None);
    }
    let version = conn
        .query_row("SELECT version FROM coverage_schema LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(version)
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Positive endpoints of an arc are executed lines; negative ones mark code
/// object entry and exit.
fn arc_lines(from: i64, to: i64) -> impl Iterator<Item = u32> {
    [from, to]
        .into_iter()
        .filter(|&l| l > 0)
        .filter_map(|l| u32::try_from(l).ok())
}

/// Decode a coverage.py "numbits" bitmap: bit `i` of byte `j` set means line
/// `8 * j + i` was executed.
pub fn numbits_to_lines(numbits: &[u8]) -> impl Iterator<Item = u32> + '_ {
    numbits.iter().enumerate().flat_map(|(byte_i, &byte)| {
        (0..8u32).filter_map(move |bit_i| {
            if byte & (1 << bit_i) != 0 {
                Some(byte_i as u32 * 8 + bit_i)
            } else {
                None
            }
        })
    })
}

/// Encode line numbers as a numbits bitmap.
pub fn lines_to_numbits(lines: impl IntoIterator<Item = u32>) -> Vec<u8> {
    let mut bits = Vec::new();
    for line in lines {
        let byte = (line / 8) as usize;
        if bits.len() <= byte {
            bits.resize(byte + 1, 0u8);
        }
        bits[byte] |= 1 << (line % 8);
    }
    bits
}
