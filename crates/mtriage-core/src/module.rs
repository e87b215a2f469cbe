//! Behaviour shared by selectors and analysers
//!
//! A `ModuleBase` owns a module's name, storage handle, log, and run context.
//! It wraps every phase so the phase's log lines are flushed to disk when the
//! phase ends, and decides whether a phase's items go through the batch
//! engine or a plain loop.

use crate::batch::{BatchEngine, BatchReport, Items};
use crate::config::ModuleConfig;
use crate::context::Context;
use crate::error::{ElementError, PipelineError, StorageError};
use crate::hash::PhaseKey;
use crate::ledger::CompletionLog;
use crate::log::{Logger, ModuleLog};
use crate::storage::LocalStorage;
use std::fmt::Display;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Attempts per element before a retried element is given up on
pub const MAX_ATTEMPTS: usize = 5;

pub struct ModuleBase {
    name: String,
    storage: Arc<LocalStorage>,
    log: ModuleLog,
    config: ModuleConfig,
    context: Context,
    inputs: Vec<String>,
}

impl ModuleBase {
    pub fn new(
        name: &str,
        storage: Arc<LocalStorage>,
        config: ModuleConfig,
        context: Context,
    ) -> Self {
        Self {
            name: name.to_string(),
            log: ModuleLog::new(name),
            storage,
            config,
            context,
            inputs: Vec::new(),
        }
    }

    /// Key ledgers on the components this module reads from as well
    pub fn with_inputs(mut self, inputs: &[String]) -> Self {
        self.inputs = inputs.to_vec();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    pub fn logger(&self, phase: &str) -> Logger {
        self.log.logger(phase)
    }

    /// Ledger key for a phase under this module's configuration and inputs
    pub fn unique_id(&self, phase: &str) -> String {
        PhaseKey::new(&self.name, phase, &self.config)
            .with_inputs(&self.inputs)
            .digest()
    }

    pub fn ledger(&self, phase: &str) -> CompletionLog {
        CompletionLog::new(self.storage.base(), &self.unique_id(phase))
    }

    /// Write out everything logged so far
    pub fn flush_logs(&self) -> Result<(), PipelineError> {
        let lines = self.log.drain();
        self.storage.write_logs(&self.name, &lines)?;
        Ok(())
    }

    /// Run `f` as a named phase, flushing logs whether or not it succeeds
    pub fn logged_phase<T, F>(&self, phase: &str, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce(&Logger) -> Result<T, PipelineError>,
    {
        debug!("{}: starting {}", self.name, phase);
        let logger = self.logger(phase);
        let result = f(&logger);
        let flushed = self.flush_logs();
        let value = result?;
        flushed?;
        Ok(value)
    }

    /// Run `f` over `items` as a named phase
    ///
    /// A streamed input goes through the batch engine when `parallel` is set;
    /// anything else runs in order on the calling thread.
    pub fn phase_over<T, F>(
        &self,
        phase: &str,
        items: Items<T>,
        parallel: bool,
        f: F,
    ) -> Result<BatchReport, PipelineError>
    where
        T: Send,
        F: Fn(&Logger, T) -> Result<(), PipelineError> + Sync,
    {
        self.logged_phase(phase, |logger| match items {
            Items::Streamed(iter) if parallel => {
                let engine = BatchEngine::new()
                    .with_parallelism(self.context.parallelism())
                    .keep_ledger(self.context.keep_ledger);
                let ledger = self.ledger(phase);
                engine.run(&ledger, iter.collect(), |item| f(logger, item))
            }
            items => {
                let items = items.into_vec();
                let total = items.len();
                for item in items {
                    f(logger, item)?;
                }
                Ok(BatchReport::serial(total))
            }
        })
    }

    /// Apply the skip/retry/unknown policy to one element's work
    ///
    /// Returns `Ok(Some(value))` on success and `Ok(None)` when the element
    /// was skipped. Unknown failures in development mode become errors.
    pub fn attempt<T, F>(
        &self,
        logger: &Logger,
        element_id: &str,
        mut op: F,
    ) -> Result<Option<T>, PipelineError>
    where
        F: FnMut() -> Result<T, ElementError>,
    {
        for _ in 0..MAX_ATTEMPTS {
            match op() {
                Ok(value) => return Ok(Some(value)),
                Err(ElementError::Retry(msg)) => {
                    logger.error_for(element_id, ElementError::Retry(msg));
                }
                Err(err) if !err.is_unknown() => {
                    logger.error_for(element_id, &err);
                    return Ok(None);
                }
                Err(err) if self.context.is_development() => {
                    return Err(PipelineError::Element {
                        module: self.name.clone(),
                        id: element_id.to_string(),
                        source: err,
                    });
                }
                Err(err) => {
                    logger.error_for(
                        element_id,
                        format!("unknown exception raised - skipping element: {err}"),
                    );
                    return Ok(None);
                }
            }
        }
        logger.error_for(
            element_id,
            format!("failed after {MAX_ATTEMPTS} attempts - skipping element"),
        );
        Ok(None)
    }

    pub fn hook_error(&self, phase: &str, source: anyhow::Error) -> PipelineError {
        PipelineError::Hook {
            module: self.name.clone(),
            phase: phase.to_string(),
            source,
        }
    }
}

/// A module wired to storage, run as setup, per-element processing, teardown
pub trait PipelineStage {
    fn name(&self) -> &str;

    fn setup(&mut self) -> Result<(), PipelineError>;

    fn process_all(&mut self) -> Result<BatchReport, PipelineError>;

    fn teardown(&mut self) -> Result<(), PipelineError>;

    fn run(&mut self) -> Result<BatchReport, PipelineError> {
        self.setup()?;
        let report = self.process_all()?;
        self.teardown()?;
        Ok(report)
    }
}

/// What a module sees while working on a single element
pub struct ElementContext<'a> {
    logger: &'a Logger,
    element_id: &'a str,
    scratch: PathBuf,
    dest: Option<PathBuf>,
}

impl<'a> ElementContext<'a> {
    pub fn new(logger: &'a Logger, element_id: &'a str, scratch: PathBuf) -> Self {
        Self {
            logger,
            element_id,
            scratch,
            dest: None,
        }
    }

    pub fn with_dest(mut self, dest: PathBuf) -> Self {
        self.dest = Some(dest);
        self
    }

    pub fn element_id(&self) -> &str {
        self.element_id
    }

    pub fn logger(&self) -> &Logger {
        self.logger
    }

    pub fn log(&self, msg: impl Display) {
        self.logger.log_for(self.element_id, msg);
    }

    pub fn error(&self, msg: impl Display) {
        self.logger.error_for(self.element_id, msg);
    }

    /// Working folder for this element's outputs, created on first use
    pub fn scratch_dir(&self) -> io::Result<&Path> {
        fs::create_dir_all(&self.scratch)?;
        Ok(&self.scratch)
    }

    /// The scratch folder path, without creating it
    pub fn scratch_path(&self) -> &Path {
        &self.scratch
    }

    /// Where the element will be persisted; the folder may not exist yet
    pub fn dest(&self) -> Option<&Path> {
        self.dest.as_deref()
    }
}

/// What a module sees in its whole-phase hooks
pub struct PhaseContext<'a> {
    logger: &'a Logger,
    storage: &'a LocalStorage,
    module: &'a str,
}

impl<'a> PhaseContext<'a> {
    pub fn new(logger: &'a Logger, storage: &'a LocalStorage, module: &'a str) -> Self {
        Self {
            logger,
            storage,
            module,
        }
    }

    pub fn logger(&self) -> &Logger {
        self.logger
    }

    pub fn storage(&self) -> &LocalStorage {
        self.storage
    }

    pub fn module(&self) -> &str {
        self.module
    }

    pub fn log(&self, msg: impl Display) {
        self.logger.log(msg);
    }

    /// Scratch folder for an output produced outside any one element
    pub fn scratch_dir(&self, id: &str) -> Result<PathBuf, StorageError> {
        let dir = self.storage.scratch_dir(self.module, id)?;
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// The same context under another module's name
    pub fn for_module<'b>(&'b self, logger: &'b Logger, module: &'b str) -> PhaseContext<'b> {
        PhaseContext {
            logger,
            storage: self.storage,
            module,
        }
    }
}

pub(crate) fn remove_scratch(dir: &Path) {
    if dir.exists() {
        let _ = fs::remove_dir_all(dir);
    }
}
