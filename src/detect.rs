/// Detection of the coverage data file format.
///
/// coverage.py has written two formats over its lifetime:
///   1. SQLite databases (coverage.py 5.0 and later)
///   2. A JSON document behind a fixed banner (coverage.py 4.x and earlier)
///
/// Detection looks only at the leading bytes; file names are configurable
/// and say nothing about the format.
use std::path::Path;

const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";
pub const LEGACY_BANNER: &str = "!coverage.py: This is a private format, don't read it directly!";

/// Supported coverage data formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Sqlite,
    LegacyJson,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Sqlite => "sqlite",
            Format::LegacyJson => "legacy-json",
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of sniffing a data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sniffed {
    Known(Format),
    /// Zero bytes so far; coverage.py creates the file before writing it.
    Empty,
    Unknown,
}

/// Detect the format from the first bytes of the file content.
pub fn detect_format(head: &[u8]) -> Sniffed {
    if head.is_empty() {
        return Sniffed::Empty;
    }
    if head.starts_with(SQLITE_MAGIC) {
        return Sniffed::Known(Format::Sqlite);
    }
    if head.starts_with(LEGACY_BANNER.as_bytes()) {
        return Sniffed::Known(Format::LegacyJson);
    }
    Sniffed::Unknown
}

/// Read just enough of `path` to detect its format.
pub fn sniff_file(path: &Path) -> std::io::Result<Sniffed> {
    use std::io::Read;

    let mut head = Vec::with_capacity(LEGACY_BANNER.len());
    std::fs::File::open(path)?
        .take(LEGACY_BANNER.len() as u64)
        .read_to_end(&mut head)?;
    Ok(detect_format(&head))
}
