//! Analysers: derive new elements from elements already in storage

use crate::batch::{BatchReport, Items};
use crate::config::ModuleConfig;
use crate::context::Context;
use crate::element::LocalElement;
use crate::error::{ConfigError, ElementError, PipelineError};
use crate::etype::Etype;
use crate::log::Logger;
use crate::module::{remove_scratch, ElementContext, ModuleBase, PhaseContext, PipelineStage};
use crate::storage::{self, LocalStorage, Location, WriteMode};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub trait Analyser: Send + Sync {
    /// Etype input elements are cast to; elements that fail the cast are skipped
    fn in_etype(&self) -> Etype {
        Etype::Any
    }

    /// Etype outputs are cast to before they are stored
    fn out_etype(&self) -> Etype {
        Etype::Any
    }

    fn in_parallel(&self) -> bool {
        true
    }

    /// Move outputs into storage rather than copying them
    fn delete_local_on_write(&self) -> bool {
        true
    }

    fn pre_analyse(&mut self, _ctx: &PhaseContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Derive an output from one element; `None` means no output
    fn analyse_element(
        &self,
        element: &LocalElement,
        ctx: &ElementContext<'_>,
    ) -> Result<Option<LocalElement>, ElementError>;

    /// Runs once after every element, given each derived output folder
    ///
    /// A returned element is copied into every one of `derived_dirs`.
    fn post_analyse(
        &mut self,
        _ctx: &PhaseContext<'_>,
        _derived_dirs: &[PathBuf],
    ) -> anyhow::Result<Option<LocalElement>> {
        Ok(None)
    }
}

/// One `elements_in` component: `selector` or `selector/analyser`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementsIn {
    pub selector: String,
    pub analyser: Option<String>,
}

impl ElementsIn {
    pub fn parse(component: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidElementsIn {
            component: component.to_string(),
            reason: reason.to_string(),
        };
        let parts: Vec<&str> = component.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid("empty path segment"));
        }
        match parts.as_slice() {
            [selector] => Ok(Self {
                selector: selector.to_string(),
                analyser: None,
            }),
            [selector, analyser] => Ok(Self {
                selector: selector.to_string(),
                analyser: Some(analyser.to_string()),
            }),
            _ => Err(invalid(
                "it must be a selector name, or a selector and analyser separated by '/'",
            )),
        }
    }
}

impl fmt::Display for ElementsIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.analyser {
            Some(analyser) => write!(f, "{}/{}", self.selector, analyser),
            None => write!(f, "{}", self.selector),
        }
    }
}

/// An input element paired with where its output goes
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedElement {
    pub element: LocalElement,
    pub location: Location,
}

/// Drives an analyser's pre-analyse, analyse and post-analyse phases
pub struct AnalyserRunner {
    base: ModuleBase,
    analyser: Box<dyn Analyser>,
    elements_in: Vec<ElementsIn>,
}

impl AnalyserRunner {
    pub fn new(
        name: &str,
        analyser: Box<dyn Analyser>,
        elements_in: &[String],
        storage: Arc<LocalStorage>,
        config: ModuleConfig,
        context: Context,
    ) -> Result<Self, ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::InvalidModuleConfig {
                module: name.to_string(),
                reason: "analyser name must not be empty".to_string(),
            });
        }
        if elements_in.is_empty() {
            return Err(ConfigError::InvalidModuleConfig {
                module: name.to_string(),
                reason: "elements_in must name at least one selector".to_string(),
            });
        }
        let base = ModuleBase::new(name, storage, config, context).with_inputs(elements_in);
        let elements_in = elements_in
            .iter()
            .map(|c| ElementsIn::parse(c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            base,
            analyser,
            elements_in,
        })
    }

    pub fn base(&self) -> &ModuleBase {
        &self.base
    }

    pub fn elements_in(&self) -> &[ElementsIn] {
        &self.elements_in
    }

    /// Selectors this analyser's outputs are stored under
    pub fn selectors(&self) -> Vec<String> {
        let mut selectors: Vec<String> = Vec::new();
        for component in &self.elements_in {
            if !selectors.contains(&component.selector) {
                selectors.push(component.selector.clone());
            }
        }
        selectors
    }

    /// Folders this analyser writes derived elements into, one per selector
    pub fn derived_dirs(&self) -> Vec<PathBuf> {
        self.selectors()
            .into_iter()
            .map(|s| {
                self.base
                    .storage()
                    .location_dir(&Location::derived(s, self.base.name()))
            })
            .collect()
    }

    /// Find every input element and cast it to the analyser's input etype
    ///
    /// Elements that fail the cast are logged and left out. A component whose
    /// folder is missing or empty is a configuration error.
    pub fn resolve_elements(&self, logger: &Logger) -> Result<Vec<ResolvedElement>, PipelineError> {
        let media = self.base.storage().read_all_media()?;
        let in_etype = self.analyser.in_etype();
        let mut resolved = Vec::new();
        let mut candidates = 0;

        for component in &self.elements_in {
            let missing = || ConfigError::InvalidElementsIn {
                component: component.to_string(),
                reason: "The folder it represents contains no elements or is otherwise corrupted."
                    .to_string(),
            };
            let selector_media = media.get(&component.selector).ok_or_else(missing)?;
            let folders: &BTreeMap<String, PathBuf> = match &component.analyser {
                None => &selector_media.data,
                Some(analyser) => selector_media.derived.get(analyser).ok_or_else(missing)?,
            };
            if folders.is_empty() {
                return Err(missing().into());
            }

            let location = Location::derived(component.selector.as_str(), self.base.name());
            for (id, folder) in folders {
                candidates += 1;
                let files = storage::element_files(folder)?;
                match in_etype.cast(id, &files) {
                    Ok(element) => resolved.push(ResolvedElement {
                        element,
                        location: location.clone(),
                    }),
                    Err(err) => logger.error_for(id, err),
                }
            }
        }

        if candidates > 0 && resolved.is_empty() {
            let elements_in: Vec<String> = self.elements_in.iter().map(|c| c.to_string()).collect();
            return Err(PipelineError::NoCastableElements {
                module: self.base.name().to_string(),
                elements_in: elements_in.join(", "),
                etype: in_etype.to_string(),
            });
        }
        Ok(resolved)
    }

    /// Run pre-analyse, analyse over every input element, then post-analyse
    pub fn start_analysing(&mut self) -> Result<BatchReport, PipelineError> {
        self.pre_analyse()?;
        let report = self.analyse()?;
        self.post_analyse()?;
        Ok(report)
    }

    fn pre_analyse(&mut self) -> Result<(), PipelineError> {
        let Self { base, analyser, .. } = self;
        base.logged_phase("pre-analyse", |logger| {
            let ctx = PhaseContext::new(logger, base.storage(), base.name());
            analyser
                .pre_analyse(&ctx)
                .map_err(|e| base.hook_error("pre-analyse", e))
        })
    }

    fn analyse(&self) -> Result<BatchReport, PipelineError> {
        // Resolution logs go to the analyse phase, flushed with the phase
        let logger = self.base.logger("analyse");
        let elements = match self.resolve_elements(&logger) {
            Ok(elements) => elements,
            Err(err) => {
                self.base.flush_logs()?;
                return Err(err);
            }
        };
        let report = self.base.phase_over(
            "analyse",
            Items::streamed(elements.into_iter()),
            self.analyser.in_parallel(),
            |logger, element| self.analyse_one(logger, element),
        )?;
        info!(
            "{}: analysed {} elements ({} resumed)",
            self.base.name(),
            report.processed,
            report.resumed
        );
        Ok(report)
    }

    fn post_analyse(&mut self) -> Result<(), PipelineError> {
        let derived_dirs = self.derived_dirs();
        let selectors = self.selectors();
        let Self { base, analyser, .. } = self;
        base.logged_phase("post-analyse", |logger| {
            let ctx = PhaseContext::new(logger, base.storage(), base.name());
            let output = analyser
                .post_analyse(&ctx, &derived_dirs)
                .map_err(|e| base.hook_error("post-analyse", e))?;
            let Some(output) = output else {
                return Ok(());
            };
            for selector in selectors {
                let location = Location::derived(selector, base.name());
                base.storage()
                    .write_element(&location, &output, WriteMode::Copy)?;
                logger.log_for(&output.id, "wrote summary element");
            }
            if let Ok(scratch) = base.storage().scratch_dir(base.name(), &output.id) {
                remove_scratch(&scratch);
            }
            Ok(())
        })
    }

    fn analyse_one(&self, logger: &Logger, input: ResolvedElement) -> Result<(), PipelineError> {
        let storage = self.base.storage();
        let id = input.element.id.clone();
        let location = input.location;
        let scratch = match storage.scratch_dir(self.base.name(), &id) {
            Ok(scratch) => scratch,
            Err(err) => {
                logger.error_for(&id, ElementError::from(err));
                return Ok(());
            }
        };
        let mode = WriteMode::from_delete_local(self.analyser.delete_local_on_write());
        let out_etype = self.analyser.out_etype();

        let outcome = self.base.attempt(logger, &id, || {
            let ctx = ElementContext::new(logger, &id, scratch.clone())
                .with_dest(storage.element_dir(&location, &id));
            let Some(output) = self.analyser.analyse_element(&input.element, &ctx)? else {
                return Ok(false);
            };
            let output = out_etype.recast(output.with_id(id.as_str()))?;
            storage.write_element(&location, &output, mode)?;
            Ok(true)
        });
        remove_scratch(&scratch);

        match outcome? {
            Some(true) => logger.log_for(&id, "analysed"),
            Some(false) => {
                logger.log_for(&id, "no output produced");
                storage.remove_element(&location, &id)?;
            }
            None => {
                storage.remove_element(&location, &id)?;
            }
        }
        Ok(())
    }
}

impl PipelineStage for AnalyserRunner {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn setup(&mut self) -> Result<(), PipelineError> {
        self.pre_analyse()
    }

    fn process_all(&mut self) -> Result<BatchReport, PipelineError> {
        self.analyse()
    }

    fn teardown(&mut self) -> Result<(), PipelineError> {
        self.post_analyse()
    }
}
