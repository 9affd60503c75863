use std::path::Path;

use serde::Deserialize;

use super::DatasetError;

/// Relative location of the metadata table inside the dataset root.
pub const METADATA_RELATIVE_PATH: &str = "meta/esc50.csv";

/// One row of `esc50.csv`. Columns other than these are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MetadataRow {
    pub filename: String,
    pub fold: u32,
    pub target: u32,
    #[serde(default)]
    pub category: Option<String>,
}

/// Parse the metadata table, failing on the first malformed row.
pub fn read_metadata(path: &Path) -> Result<Vec<MetadataRow>, DatasetError> {
    let mut reader = csv::Reader::from_path(path).map_err(|source| DatasetError::OpenMetadata {
        path: path.to_path_buf(),
        source,
    })?;
    let mut rows = Vec::new();
    for record in reader.deserialize::<MetadataRow>() {
        let row = record.map_err(|source| DatasetError::MalformedRow {
            path: path.to_path_buf(),
            line: source.position().map(|pos| pos.line()),
            source,
        })?;
        rows.push(row);
    }
    Ok(rows)
}
