//! Local folder import
//!
//! Scans a source folder recursively. A file at the top level is its own
//! element, named by its stem. Files inside a subfolder are grouped into one
//! element named after that subfolder. Hidden files and folders are left
//! out.

pub mod plugin;

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use walkdir::WalkDir;

/// Marker file left by batch tooling, never imported
pub const BATCH_MARKER: &str = ".mtbatch";

/// Path column value for the single row of an aggregate index
pub const AGGREGATE_MARKER: &str = "IS_AGGREGATE";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalConfig {
    /// Folder to import from
    pub source: PathBuf,

    /// File names to leave out
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Import everything as a single element
    #[serde(default)]
    pub aggregate: bool,
}

#[derive(Error, Debug)]
pub enum LocalError {
    #[error("The 'source' folder {0} could not be found")]
    SourceNotFound(PathBuf),

    #[error("Failed to scan {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// One element found in the source folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub id: String,

    /// A top-level file, or the subfolder holding the element's files
    pub path: PathBuf,
}

fn is_skipped(name: &str, exclude: &[String]) -> bool {
    name.starts_with('.') || name == BATCH_MARKER || exclude.iter().any(|e| e == name)
}

/// Every importable file under `source`, sorted by path
pub fn scan_files(source: &Path, exclude: &[String]) -> Result<Vec<PathBuf>, LocalError> {
    if !source.is_dir() {
        return Err(LocalError::SourceNotFound(source.to_path_buf()));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(source)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
    {
        let entry = entry.map_err(|e| LocalError::Walk {
            path: source.to_path_buf(),
            source: e,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if is_skipped(&entry.file_name().to_string_lossy(), exclude) {
            continue;
        }
        files.push(entry.into_path());
    }
    Ok(files)
}

/// Group the files under `source` into elements
pub fn scan_source(source: &Path, exclude: &[String]) -> Result<Vec<SourceEntry>, LocalError> {
    let mut entries: Vec<SourceEntry> = Vec::new();
    let mut seen: HashMap<String, PathBuf> = HashMap::new();

    for file in scan_files(source, exclude)? {
        let parent = file.parent().unwrap_or(source);
        let (id, path) = if parent == source {
            let stem = file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            (stem, file.clone())
        } else {
            let folder = parent
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            (folder, parent.to_path_buf())
        };
        if id.is_empty() {
            continue;
        }

        match seen.get(&id) {
            Some(existing) if *existing == path => continue,
            Some(existing) => {
                warn!(
                    "Element id '{}' for {} already used by {}, skipping",
                    id,
                    path.display(),
                    existing.display()
                );
                continue;
            }
            None => {
                seen.insert(id.clone(), path.clone());
                entries.push(SourceEntry { id, path });
            }
        }
    }
    Ok(entries)
}

/// Files making up one element: the file itself, or a folder's direct files
pub fn entry_files(path: &Path, exclude: &[String]) -> std::io::Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if is_skipped(&entry.file_name().to_string_lossy(), exclude) {
            continue;
        }
        files.push(entry.path());
    }
    files.sort();
    Ok(files)
}
