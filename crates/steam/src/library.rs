//! Steam library folders, read from `steamapps/libraryfolders.vdf`.

use std::fs;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Serialize;

use crate::SteamError;
use crate::locator::InstallPath;
use crate::vdf::{self, ParseError, Record, Value};

/// Top-level section of `libraryfolders.vdf`.
pub const LIBRARY_FOLDERS_KEY: &str = "libraryfolders";

/// A library root registered with the Steam client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryFolder {
    pub path: PathBuf,
    pub label: String,
    pub content_id: i64,
    pub total_size: i64,
    pub update_clean_bytes_tally: i64,
    pub time_last_update_verified: i64,
    /// App ID to size on disk in bytes, in file order.
    pub apps: IndexMap<String, i64>,
}

impl LibraryFolder {
    /// Builds a library from one entry of the `libraryfolders` section.
    /// Only `path` is required; other fields default to zero or empty.
    pub fn from_record(entry_key: &str, entry: &Record) -> Result<Self, CatalogFormatError> {
        let path = entry
            .get_str("path")
            .filter(|p| !p.is_empty())
            .ok_or_else(|| CatalogFormatError::MissingPath {
                entry: entry_key.to_owned(),
            })?;

        let apps: IndexMap<String, i64> = entry
            .get_record("apps")
            .map(|apps| {
                apps.iter()
                    .filter_map(|(id, size)| {
                        let size = size.as_str()?.trim().parse::<i64>().unwrap_or(0);
                        Some((id.to_owned(), size))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            path: PathBuf::from(path),
            label: entry.get_str("label").unwrap_or_default().to_owned(),
            content_id: entry.get_i64("contentid").unwrap_or(0),
            total_size: entry.get_i64("totalsize").unwrap_or(0),
            update_clean_bytes_tally: entry.get_i64("update_clean_bytes_tally").unwrap_or(0),
            time_last_update_verified: entry.get_i64("time_last_update_verified").unwrap_or(0),
            apps,
        })
    }
}

/// Structural problems in `libraryfolders.vdf`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogFormatError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("missing top-level \"libraryfolders\" section")]
    MissingRoot,

    #[error("library entry {entry:?} has no path")]
    MissingPath { entry: String },
}

/// Lists the library folders of a Steam installation, in file order.
///
/// Invalid UTF-8 in the index is replaced with U+FFFD, so a library path
/// holding such bytes comes back altered rather than rejected.
pub fn list_libraries(install: &InstallPath) -> Result<Vec<LibraryFolder>, SteamError> {
    let file = install.library_folders_file();
    let data = fs::read(&file).map_err(|source| SteamError::CatalogRead {
        path: file.clone(),
        source,
    })?;

    let text = String::from_utf8_lossy(&data);
    let libraries = parse_library_folders(&text).map_err(|source| SteamError::CatalogFormat {
        path: file.clone(),
        source,
    })?;

    tracing::debug!(
        file = %file.display(),
        count = libraries.len(),
        "library folders loaded"
    );
    Ok(libraries)
}

/// Parses the text of a `libraryfolders.vdf` file.
///
/// Besides the current layout (one section per library), the older layout
/// that maps numeric keys straight to a path string is accepted. Other
/// string entries such as `ContentStatsID` are ignored.
pub fn parse_library_folders(text: &str) -> Result<Vec<LibraryFolder>, CatalogFormatError> {
    let root = vdf::parse(text)?;
    let section = root
        .get_ignore_case(LIBRARY_FOLDERS_KEY)
        .and_then(Value::as_record)
        .ok_or(CatalogFormatError::MissingRoot)?;

    let mut libraries = Vec::with_capacity(section.len());
    for (key, value) in section.iter() {
        match value {
            Value::Record(entry) => libraries.push(LibraryFolder::from_record(key, entry)?),
            Value::String(path) if key.parse::<u32>().is_ok() && !path.is_empty() => {
                libraries.push(LibraryFolder {
                    path: PathBuf::from(path),
                    ..LibraryFolder::default()
                });
            }
            Value::String(_) => tracing::debug!(key, "skipping non-library entry"),
        }
    }

    Ok(libraries)
}
