//! Keep only files with configured extensions

pub mod plugin;

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractTypesConfig {
    /// Extensions to keep, with or without a leading dot
    #[serde(default)]
    pub exts: Vec<String>,
}

impl ExtractTypesConfig {
    pub fn matches(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().map(|e| e.to_string_lossy()) else {
            return false;
        };
        self.exts
            .iter()
            .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(&ext))
    }

    pub fn filter(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        paths.iter().filter(|p| self.matches(p)).cloned().collect()
    }
}
