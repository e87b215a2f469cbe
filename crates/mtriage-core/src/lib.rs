//! mtriage core - typed media elements, selectors, analysers, and a
//! resumable batch engine
//!
//! Selectors pull media from a source into local storage. Analysers read
//! elements back out of storage, cast them to the etype they accept, and
//! write derived elements alongside. Per-element phases can run through a
//! parallel batch engine that records completions in a ledger so a crashed
//! run resumes where it stopped.

pub mod analyser;
pub mod batch;
pub mod composite;
pub mod config;
pub mod context;
pub mod element;
pub mod error;
pub mod etype;
pub mod hash;
pub mod index;
pub mod ledger;
pub mod log;
pub mod module;
pub mod pipeline;
pub mod registry;
pub mod selector;
pub mod storage;

pub use analyser::{Analyser, AnalyserRunner, ElementsIn, ResolvedElement};
pub use batch::{BatchEngine, BatchPlan, BatchReport, Items};
pub use composite::MetaAnalyser;
pub use config::{
    ArgSpec, ModuleConfig, ModuleKind, ModuleManifest, ModuleSpec, OneOrMany, Phase, RunConfig,
};
pub use context::{Context, ExecutionMode};
pub use element::LocalElement;
pub use error::{
    ConfigError, ElementError, EtypeCastError, LedgerError, PipelineError, StorageError,
};
pub use etype::{CustomEtype, Etype};
pub use hash::PhaseKey;
pub use index::{ElementIndex, IndexRow};
pub use ledger::{Completion, CompletionLog, LedgerHeader};
pub use log::{Logger, ModuleLog};
pub use module::{ElementContext, ModuleBase, PhaseContext, PipelineStage, MAX_ATTEMPTS};
pub use pipeline::{Pipeline, RunSummary, StageSummary};
pub use registry::Registry;
pub use selector::{Selector, SelectorRunner};
pub use storage::{LocalStorage, Location, MediaTree, SelectorMedia, WriteMode};
