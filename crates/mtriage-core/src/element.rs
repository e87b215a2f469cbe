//! Elements: an id plus the files that make it up

use crate::etype::Etype;
use std::path::{Path, PathBuf};

/// A typed element backed by files on local disk
#[derive(Debug, Clone, PartialEq)]
pub struct LocalElement {
    /// Unique within one selector
    pub id: String,

    pub paths: Vec<PathBuf>,

    pub etype: Etype,

    /// Free-form text carried alongside the element
    pub query: Option<String>,
}

impl LocalElement {
    pub fn new(id: impl Into<String>, paths: Vec<PathBuf>, etype: Etype) -> Self {
        Self {
            id: id.into(),
            paths,
            etype,
            query: None,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn first_path(&self) -> Option<&Path> {
        self.paths.first().map(PathBuf::as_path)
    }
}
