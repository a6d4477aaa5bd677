//! Configuration file loading.
//!
//! Files are parsed by extension: `.json` as JSON, `.toml` as TOML.

use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{Error, Result};

/// Load and deserialize a configuration file.
///
/// # Errors
///
/// Returns `Error::FileReadFailed` if the file cannot be read,
/// `Error::UnsupportedFormat` for an unknown extension, and
/// `Error::JsonParseFailed` / `Error::TomlParseFailed` if parsing fails.
pub fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::file_read_failed(path, e.to_string()))?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    debug!(path = %path.display(), format = %extension, "Loading config file");

    match extension.as_str() {
        "json" => parse_json(path, &content),
        "toml" => parse_toml(path, &content),
        _ => Err(Error::UnsupportedFormat {
            path: path.to_path_buf(),
            extension,
        }),
    }
}

/// Parse TOML content; `path` is only used for error reporting.
///
/// # Errors
///
/// Returns `Error::TomlParseFailed` if the content is not valid for `T`.
pub fn parse_toml<T: DeserializeOwned>(path: &Path, content: &str) -> Result<T> {
    toml::from_str(content).map_err(|e| Error::toml_parse_failed(path, e.to_string()))
}

/// Parse JSON content; `path` is only used for error reporting.
///
/// # Errors
///
/// Returns `Error::JsonParseFailed` if the content is not valid for `T`.
pub fn parse_json<T: DeserializeOwned>(path: &Path, content: &str) -> Result<T> {
    serde_json::from_str(content).map_err(|e| Error::json_parse_failed(path, e.to_string()))
}
