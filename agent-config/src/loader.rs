//! Reads configuration tables from JSON files.
//!
//! Tables are arrays of row objects keyed by the spreadsheet column headers,
//! e.g. `[{"Tool": "Echo", "On": true, "Class": "echo(x=5)"}]`.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::schema::{ModelsTable, ToolConfigRow};

/// Loads the tool configuration table.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read and
/// [`ConfigError::Parse`] if it is not an array of tool rows.
pub fn load_tool_rows(path: impl AsRef<Path>) -> ConfigResult<Vec<ToolConfigRow>> {
    let rows: Vec<ToolConfigRow> = read_json(path.as_ref())?;
    debug!(path = %path.as_ref().display(), rows = rows.len(), "loaded tool table");
    Ok(rows)
}

/// Loads the models table.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read and
/// [`ConfigError::Parse`] if it is not an array of model rows.
pub fn load_models(path: impl AsRef<Path>) -> ConfigResult<ModelsTable> {
    let table: ModelsTable = read_json(path.as_ref())?;
    debug!(path = %path.as_ref().display(), rows = table.len(), "loaded models table");
    Ok(table)
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> ConfigResult<T> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
