//! Composite analyser that runs child analysers in sequence per element
//!
//! Each child's output is persisted to
//! `{derived_dir}/.cache/meta_{i}_{child}/{element id}` and becomes the next
//! child's input. The last child's output is what the composite returns.

use crate::analyser::Analyser;
use crate::config::{parse_config, ArgSpec, ModuleConfig, ModuleManifest, ModuleSpec};
use crate::element::LocalElement;
use crate::error::{ConfigError, ElementError};
use crate::etype::Etype;
use crate::module::{ElementContext, PhaseContext};
use crate::registry::Registry;
use crate::storage::{self, WriteMode};
use anyhow::{anyhow, Context as _};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const NAME: &str = "Meta";
pub const CACHE_DIR: &str = ".cache";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetaConfig {
    pub children: Vec<ModuleSpec>,

    /// Remove child caches after post-analyse
    #[serde(default)]
    pub delete_cache: bool,
}

pub struct MetaAnalyser {
    children: Vec<(String, Box<dyn Analyser>)>,
    delete_cache: bool,
}

impl MetaAnalyser {
    pub fn new(
        children: Vec<(String, Box<dyn Analyser>)>,
        delete_cache: bool,
    ) -> Result<Self, ConfigError> {
        if children.is_empty() {
            return Err(ConfigError::InvalidModuleConfig {
                module: NAME.to_string(),
                reason: "children must name at least one analyser".to_string(),
            });
        }
        Ok(Self {
            children,
            delete_cache,
        })
    }

    /// Build from `{children: [{name, config}], delete_cache}` via the registry
    pub fn from_config(config: &ModuleConfig, registry: &Registry) -> Result<Self, ConfigError> {
        let config: MetaConfig = parse_config(NAME, config)?;
        let mut children = Vec::with_capacity(config.children.len());
        for spec in &config.children {
            let child = registry.analyser(&spec.name, &spec.module_config())?;
            children.push((spec.name.clone(), child));
        }
        Self::new(children, config.delete_cache)
    }

    fn cache_name(index: usize, child: &str) -> String {
        format!("meta_{index}_{child}")
    }

    fn child_cache_dirs(&self, derived_dirs: &[PathBuf], index: usize, child: &str) -> Vec<PathBuf> {
        derived_dirs
            .iter()
            .map(|d| d.join(CACHE_DIR).join(Self::cache_name(index, child)))
            .collect()
    }
}

pub fn manifest() -> ModuleManifest {
    ModuleManifest::new(NAME, "Run several analysers in sequence on each element")
        .arg(ArgSpec::required("children", "list of {name, config} analysers to chain"))
        .arg(ArgSpec::optional("delete_cache", "remove intermediate outputs when done"))
}

pub fn register(registry: &mut Registry) {
    registry.register_analyser(manifest(), |config, registry| {
        Ok(Box::new(MetaAnalyser::from_config(config, registry)?) as Box<dyn Analyser>)
    });
}

impl Analyser for MetaAnalyser {
    fn in_etype(&self) -> Etype {
        self.children
            .first()
            .map(|(_, c)| c.in_etype())
            .unwrap_or(Etype::Any)
    }

    fn out_etype(&self) -> Etype {
        self.children
            .last()
            .map(|(_, c)| c.out_etype())
            .unwrap_or(Etype::Any)
    }

    fn in_parallel(&self) -> bool {
        self.children.iter().all(|(_, c)| c.in_parallel())
    }

    // Outputs live in the child cache, which may be read again
    fn delete_local_on_write(&self) -> bool {
        false
    }

    fn pre_analyse(&mut self, ctx: &PhaseContext<'_>) -> anyhow::Result<()> {
        for (name, child) in &mut self.children {
            let logger = ctx.logger().for_module(name);
            child
                .pre_analyse(&ctx.for_module(&logger, name))
                .with_context(|| format!("{name}: pre-analyse"))?;
        }
        Ok(())
    }

    fn analyse_element(
        &self,
        element: &LocalElement,
        ctx: &ElementContext<'_>,
    ) -> Result<Option<LocalElement>, ElementError> {
        let cache_root = ctx
            .dest()
            .and_then(Path::parent)
            .map(|d| d.join(CACHE_DIR))
            .ok_or_else(|| anyhow!("composite analyser was given no destination"))?;

        let mut current = element.clone();
        for (i, (name, child)) in self.children.iter().enumerate() {
            let input = child.in_etype().recast(current)?;
            let cache_name = Self::cache_name(i, name);
            let child_dest = cache_root.join(&cache_name).join(&element.id);
            let logger = ctx.logger().for_module(name);
            let child_ctx = ElementContext::new(
                &logger,
                ctx.element_id(),
                ctx.scratch_path().join(&cache_name),
            )
            .with_dest(child_dest.clone());

            let Some(output) = child.analyse_element(&input, &child_ctx)? else {
                ctx.log(format!("{name} produced no output"));
                return Ok(None);
            };
            let output = child.out_etype().recast(output.with_id(element.id.as_str()))?;
            let mode = WriteMode::from_delete_local(child.delete_local_on_write());
            let paths = storage::place_element(&child_dest, &output, mode)?;
            current = LocalElement { paths, ..output };
            ctx.log(format!("analysed in {name}"));
        }
        Ok(Some(current))
    }

    fn post_analyse(
        &mut self,
        ctx: &PhaseContext<'_>,
        derived_dirs: &[PathBuf],
    ) -> anyhow::Result<Option<LocalElement>> {
        let mut summary = None;
        for i in 0..self.children.len() {
            let cache_dirs = {
                let (name, _) = &self.children[i];
                self.child_cache_dirs(derived_dirs, i, name)
            };
            let (name, child) = &mut self.children[i];
            let logger = ctx.logger().for_module(name);
            let output = child
                .post_analyse(&ctx.for_module(&logger, name), &cache_dirs)
                .with_context(|| format!("{name}: post-analyse"))?;
            if output.is_some() {
                summary = output;
            }
        }

        // Summaries may live in a child's scratch; move them under our own
        let summary = match summary {
            Some(output) => {
                let dest = ctx.scratch_dir(&output.id)?;
                let paths = storage::place_element(&dest, &output, WriteMode::Move)?;
                Some(LocalElement { paths, ..output })
            }
            None => None,
        };

        if self.delete_cache {
            for dir in derived_dirs {
                let cache = dir.join(CACHE_DIR);
                if cache.exists() {
                    fs::remove_dir_all(&cache)?;
                    ctx.log(format!("removed {}", cache.display()));
                }
            }
        }
        Ok(summary)
    }
}
