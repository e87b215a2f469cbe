//! Error types for the pipeline engine

use std::path::PathBuf;
use thiserror::Error;

/// A set of paths that does not satisfy an etype's filter or arity rule
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("could not cast element '{id}' to {etype}: {reason}")]
pub struct EtypeCastError {
    /// Element id the cast was attempted for
    pub id: String,

    /// Display form of the target etype
    pub etype: String,

    /// What went wrong
    pub reason: String,
}

impl EtypeCastError {
    pub fn new(id: impl Into<String>, etype: impl ToString, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            etype: etype.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Element index error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Element index has no 'id' column")]
    MissingIdColumn,

    #[error("Element index row {row} has {found} fields, expected {expected}")]
    RowLength {
        row: usize,
        found: usize,
        expected: usize,
    },

    #[error("No element index found at {0}")]
    IndexNotFound(PathBuf),

    #[error("Element '{0}' has no paths to write")]
    EmptyElement(String),

    #[error("Invalid element id '{0}'")]
    InvalidId(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid run configuration: {0}")]
    InvalidRun(String),

    #[error("No {kind} named '{name}' is registered")]
    UnknownModule { kind: &'static str, name: String },

    #[error(
        "The config you specified does not contain all the required arguments for the '{module}' {kind}: missing '{arg}'"
    )]
    MissingArgument {
        kind: &'static str,
        module: String,
        arg: String,
    },

    #[error("Invalid config for '{module}': {reason}")]
    InvalidModuleConfig { module: String, reason: String },

    #[error("Invalid elements_in component '{component}': {reason}")]
    InvalidElementsIn { component: String, reason: String },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error raised while retrieving or analysing a single element
///
/// The variant decides what the engine does next: `Skip` and `Cast` drop the
/// element, `Retry` runs it again up to the attempt ceiling, and anything else
/// is an unknown failure that is skipped in production and re-raised in
/// development mode.
#[derive(Error, Debug)]
pub enum ElementError {
    #[error("{0} - skipping element")]
    Skip(String),

    #[error("{0} - attempt retry")]
    Retry(String),

    #[error(transparent)]
    Cast(#[from] EtypeCastError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ElementError {
    pub fn skip(msg: impl Into<String>) -> Self {
        Self::Skip(msg.into())
    }

    pub fn retry(msg: impl Into<String>) -> Self {
        Self::Retry(msg.into())
    }

    /// Whether this failure is outside the skip/retry/cast contract
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Other(_))
    }
}

/// An id storage refuses is the element's fault and is skipped; other
/// storage failures stay unknown
impl From<StorageError> for ElementError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidId(id) => Self::Skip(format!("invalid element id '{id}'")),
            StorageError::Io(err) => Self::Io(err),
            other => Self::Other(other.into()),
        }
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Ledger writer thread panicked")]
    WriterPanicked,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("{module}: {phase}: {source}")]
    Hook {
        module: String,
        phase: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{module}: element '{id}' raised in development mode: {source}")]
    Element {
        module: String,
        id: String,
        #[source]
        source: ElementError,
    },

    #[error("No elements under {elements_in} could be cast to {etype}, the input type of '{module}'")]
    NoCastableElements {
        module: String,
        elements_in: String,
        etype: String,
    },

    #[error("Batch worker thread panicked")]
    WorkerPanicked,
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(StorageError::Io(err))
    }
}
