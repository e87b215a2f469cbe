//! Run-configuration driver: select, then analyse in declaration order

use crate::analyser::{AnalyserRunner, ElementsIn};
use crate::batch::BatchReport;
use crate::config::{ModuleKind, ModuleSpec, Phase, RunConfig};
use crate::context::{Context, ExecutionMode};
use crate::error::{ConfigError, PipelineError};
use crate::module::PipelineStage;
use crate::registry::Registry;
use crate::selector::SelectorRunner;
use crate::storage::LocalStorage;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Outcome of one module in a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSummary {
    pub module: String,
    pub kind: ModuleKind,
    pub report: BatchReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub stages: Vec<StageSummary>,
    pub duration: Duration,
}

pub struct Pipeline<'r> {
    registry: &'r Registry,
    config: RunConfig,
    context: Context,
}

impl<'r> Pipeline<'r> {
    /// Check every module and argument the config names against `registry`
    pub fn new(registry: &'r Registry, config: RunConfig) -> Result<Self, ConfigError> {
        validate(registry, &config)?;
        let mode = if config.dev {
            ExecutionMode::Development
        } else {
            ExecutionMode::Production
        };
        let mut context = Context::new(mode).with_keep_ledger(config.keep_ledger);
        if let Some(parallelism) = config.parallelism {
            context = context.with_parallelism(parallelism);
        }
        Ok(Self {
            registry,
            config,
            context: context.with_env_overrides(),
        })
    }

    /// Replace the run context derived from the config
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn run(&self) -> Result<RunSummary, PipelineError> {
        let start = Instant::now();
        let storage = Arc::new(LocalStorage::new(&self.config.folder)?);
        info!("Running pipeline in {}", storage.base().display());

        let mut stages = Vec::new();
        match (self.config.phase, &self.config.module) {
            (Some(phase), Some(module)) => {
                let spec = ModuleSpec::new(module, self.config.config.clone().unwrap_or_default());
                match phase {
                    Phase::Select => stages.push(self.select(&storage, &spec)?),
                    Phase::Analyse => {
                        let elements_in = spec.elements_in()?.ok_or_else(|| {
                            ConfigError::InvalidRun(
                                "An analyse phase needs 'elements_in' in its config".to_string(),
                            )
                        })?;
                        stages.push(self.analyse(&storage, &spec, &elements_in)?.0);
                    }
                }
            }
            _ => {
                let mut upstream = match &self.config.select {
                    Some(select) => {
                        stages.push(self.select(&storage, select)?);
                        vec![select.name.clone()]
                    }
                    None => self.config.top_elements_in(),
                };
                for spec in self.config.analysers() {
                    let elements_in = spec.elements_in()?.unwrap_or_else(|| upstream.clone());
                    let (summary, selectors) = self.analyse(&storage, &spec, &elements_in)?;
                    stages.push(summary);
                    upstream = selectors
                        .into_iter()
                        .map(|s| format!("{}/{}", s, spec.name))
                        .collect();
                }
            }
        }

        let duration = start.elapsed();
        info!("Pipeline finished in {:.2}s", duration.as_secs_f64());
        Ok(RunSummary { stages, duration })
    }

    fn select(&self, storage: &Arc<LocalStorage>, spec: &ModuleSpec) -> Result<StageSummary, PipelineError> {
        let config = spec.module_config();
        let selector = self.registry.selector(&spec.name, &config)?;
        let mut runner = SelectorRunner::new(
            &spec.name,
            selector,
            Arc::clone(storage),
            config,
            self.context.clone(),
        );
        let report = runner.run()?;
        Ok(StageSummary {
            module: spec.name.clone(),
            kind: ModuleKind::Selector,
            report,
        })
    }

    fn analyse(
        &self,
        storage: &Arc<LocalStorage>,
        spec: &ModuleSpec,
        elements_in: &[String],
    ) -> Result<(StageSummary, Vec<String>), PipelineError> {
        let config = spec.module_config();
        let analyser = self.registry.analyser(&spec.name, &config)?;
        let mut runner = AnalyserRunner::new(
            &spec.name,
            analyser,
            elements_in,
            Arc::clone(storage),
            config,
            self.context.clone(),
        )?;
        let report = runner.run()?;
        let summary = StageSummary {
            module: spec.name.clone(),
            kind: ModuleKind::Analyser,
            report,
        };
        Ok((summary, runner.selectors()))
    }
}

/// Check modules, required arguments and `elements_in` syntax
pub fn validate(registry: &Registry, config: &RunConfig) -> Result<(), ConfigError> {
    if let (Some(phase), Some(module)) = (config.phase, &config.module) {
        let module_config = config.config.clone().unwrap_or_default();
        let spec = ModuleSpec::new(module, module_config);
        let kind = match phase {
            Phase::Select => ModuleKind::Selector,
            Phase::Analyse => ModuleKind::Analyser,
        };
        registry.validate_args(kind, module, &spec.module_config())?;
        if let Some(components) = spec.elements_in()? {
            for component in components {
                ElementsIn::parse(&component)?;
            }
        }
        return Ok(());
    }

    if let Some(select) = &config.select {
        registry.validate_args(ModuleKind::Selector, &select.name, &select.module_config())?;
    }
    for component in config.top_elements_in() {
        ElementsIn::parse(&component)?;
    }
    for spec in config.analysers() {
        registry.validate_args(ModuleKind::Analyser, &spec.name, &spec.module_config())?;
        if let Some(components) = spec.elements_in()? {
            for component in components {
                ElementsIn::parse(&component)?;
            }
        }
    }
    Ok(())
}
