/// Reader for the pre-5.0 coverage.py data file.
///
/// The file is a fixed banner followed by one JSON object:
///   {"lines": {"/abs/path.py": [1, 2, 5]}}                  line measurement
///   {"arcs":  {"/abs/path.py": [[-1, 1], [1, 2], [2, -1]]}} branch measurement
///
/// Other keys (`file_tracers`, `runs`) are ignored.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::CoverageReader;
use crate::detect::{Format, LEGACY_BANNER};
use crate::error::{CovwatchError, Result};
use crate::model::DataSnapshot;

pub struct LegacyJsonReader;

#[derive(Debug, Default, Deserialize)]
struct LegacyData {
    #[serde(default)]
    lines: Option<HashMap<String, Vec<i64>>>,
    #[serde(default)]
    arcs: Option<HashMap<String, Vec<(i64, i64)>>>,
}

impl CoverageReader for LegacyJsonReader {
    fn read(&self, path: &Path) -> Result<DataSnapshot> {
        let content = std::fs::read_to_string(path)?;
        parse(&content)
    }
}

/// Parse legacy coverage data from the full file content.
pub fn parse(content: &str) -> Result<DataSnapshot> {
    let body = content.strip_prefix(LEGACY_BANNER).ok_or_else(|| {
        CovwatchError::Data("missing coverage.py banner".to_string())
    })?;
    let data: LegacyData = serde_json::from_str(body)?;

    let mut snapshot = DataSnapshot::new(Format::LegacyJson);
    if let Some(arcs) = data.arcs {
        snapshot.has_arcs = true;
        for (path, pairs) in arcs {
            let lines = pairs.into_iter().flat_map(|(from, to)| [from, to]);
            snapshot.add_lines(PathBuf::from(path), positive(lines));
        }
    }
    if let Some(lines) = data.lines {
        for (path, nums) in lines {
            snapshot.add_lines(PathBuf::from(path), positive(nums));
        }
    }
    Ok(snapshot)
}

fn positive(lines: impl IntoIterator<Item = i64>) -> impl Iterator<Item = u32> {
    lines
        .into_iter()
        .filter(|&l| l > 0)
        .filter_map(|l| u32::try_from(l).ok())
}
