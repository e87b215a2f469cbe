//! Selectors: index a source, then retrieve each indexed element into storage

use crate::batch::{BatchReport, Items};
use crate::config::ModuleConfig;
use crate::context::Context;
use crate::element::LocalElement;
use crate::error::{ElementError, PipelineError};
use crate::etype::Etype;
use crate::index::{ElementIndex, IndexRow};
use crate::log::Logger;
use crate::module::{remove_scratch, ElementContext, ModuleBase, PhaseContext, PipelineStage};
use crate::storage::{LocalStorage, Location, WriteMode};
use std::sync::Arc;
use tracing::info;

pub trait Selector: Send + Sync {
    /// Etype each retrieved element is cast to before it is stored
    fn out_etype(&self) -> Etype {
        Etype::Any
    }

    /// Whether retrieval may run through the batch engine
    fn in_parallel(&self) -> bool {
        true
    }

    /// Move retrieved files into storage rather than copying them
    fn delete_local_on_write(&self) -> bool {
        true
    }

    /// Produce the element index, or `None` to keep the existing one
    fn index(&mut self, ctx: &PhaseContext<'_>) -> anyhow::Result<Option<ElementIndex>>;

    fn pre_retrieve(&mut self, _ctx: &PhaseContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Fetch one row's files, typically into `ctx.scratch_dir()`
    fn retrieve_element(
        &self,
        row: &IndexRow,
        ctx: &ElementContext<'_>,
    ) -> Result<LocalElement, ElementError>;

    fn post_retrieve(&mut self, _ctx: &PhaseContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Drives a selector's index and retrieve phases against storage
pub struct SelectorRunner {
    base: ModuleBase,
    selector: Box<dyn Selector>,
}

impl SelectorRunner {
    pub fn new(
        name: &str,
        selector: Box<dyn Selector>,
        storage: Arc<LocalStorage>,
        config: ModuleConfig,
        context: Context,
    ) -> Self {
        Self {
            base: ModuleBase::new(name, storage, config, context),
            selector,
        }
    }

    pub fn base(&self) -> &ModuleBase {
        &self.base
    }

    /// Run the index phase; returns the number of rows written, if any
    pub fn start_indexing(&mut self) -> Result<Option<usize>, PipelineError> {
        let Self { base, selector } = self;
        base.logged_phase("index", |logger| {
            let ctx = PhaseContext::new(logger, base.storage(), base.name());
            let index = selector
                .index(&ctx)
                .map_err(|e| base.hook_error("index", e))?;
            match index {
                Some(index) => {
                    base.storage().write_elements_index(base.name(), &index)?;
                    logger.log(format!("indexed {} elements", index.len()));
                    Ok(Some(index.len()))
                }
                None => {
                    logger.log("no new index produced");
                    Ok(None)
                }
            }
        })
    }

    /// Run pre-retrieve, retrieve over every index row, then post-retrieve
    pub fn start_retrieving(&mut self) -> Result<BatchReport, PipelineError> {
        self.pre_retrieve()?;
        let report = self.retrieve()?;
        self.post_retrieve()?;
        Ok(report)
    }

    fn pre_retrieve(&mut self) -> Result<(), PipelineError> {
        let Self { base, selector } = self;
        base.logged_phase("pre-retrieve", |logger| {
            let ctx = PhaseContext::new(logger, base.storage(), base.name());
            selector
                .pre_retrieve(&ctx)
                .map_err(|e| base.hook_error("pre-retrieve", e))
        })
    }

    fn retrieve(&self) -> Result<BatchReport, PipelineError> {
        let rows: Vec<IndexRow> = self
            .base
            .storage()
            .read_elements_index(self.base.name())?
            .collect::<Result<_, _>>()?;
        let report = self.base.phase_over(
            "retrieve",
            Items::streamed(rows.into_iter()),
            self.selector.in_parallel(),
            |logger, row| self.retrieve_row(logger, row),
        )?;
        info!(
            "{}: retrieved {} elements ({} resumed)",
            self.base.name(),
            report.processed,
            report.resumed
        );
        Ok(report)
    }

    fn post_retrieve(&mut self) -> Result<(), PipelineError> {
        let Self { base, selector } = self;
        base.logged_phase("post-retrieve", |logger| {
            let ctx = PhaseContext::new(logger, base.storage(), base.name());
            selector
                .post_retrieve(&ctx)
                .map_err(|e| base.hook_error("post-retrieve", e))
        })
    }

    fn retrieve_row(&self, logger: &Logger, row: IndexRow) -> Result<(), PipelineError> {
        let storage = self.base.storage();
        let id = row.id().to_string();
        let location = Location::data(self.base.name());
        let scratch = match storage.scratch_dir(self.base.name(), &id) {
            Ok(scratch) => scratch,
            Err(err) => {
                logger.error_for(&id, ElementError::from(err));
                return Ok(());
            }
        };
        let mode = WriteMode::from_delete_local(self.selector.delete_local_on_write());
        let out_etype = self.selector.out_etype();

        let outcome = self.base.attempt(logger, &id, || {
            let ctx = ElementContext::new(logger, &id, scratch.clone())
                .with_dest(storage.element_dir(&location, &id));
            let element = self.selector.retrieve_element(&row, &ctx)?;
            let element = out_etype.recast(element.with_id(id.as_str()))?;
            Ok(storage.write_element(&location, &element, mode)?)
        });
        remove_scratch(&scratch);

        match outcome? {
            Some(_) => logger.log_for(&id, "retrieved"),
            None => {
                storage.remove_element(&location, &id)?;
            }
        }
        Ok(())
    }
}

impl PipelineStage for SelectorRunner {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn setup(&mut self) -> Result<(), PipelineError> {
        self.start_indexing()?;
        self.pre_retrieve()
    }

    fn process_all(&mut self) -> Result<BatchReport, PipelineError> {
        self.retrieve()
    }

    fn teardown(&mut self) -> Result<(), PipelineError> {
        self.post_retrieve()
    }
}
