pub mod legacy_json;
pub mod sqlite;

use std::path::Path;

use crate::detect::Format;
use crate::error::Result;
use crate::model::DataSnapshot;

/// Every coverage data format reader implements this trait.
pub trait CoverageReader: Send + Sync {
    /// Read the whole data file into a fresh snapshot.
    fn read(&self, path: &Path) -> Result<DataSnapshot>;
}

/// The reader responsible for `format`.
pub fn reader_for(format: Format) -> &'static dyn CoverageReader {
    match format {
        Format::Sqlite => &sqlite::SqliteReader,
        Format::LegacyJson => &legacy_json::LegacyJsonReader,
    }
}
