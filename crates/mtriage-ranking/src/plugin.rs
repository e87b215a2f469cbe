//! Rank and Flatten analysers over CvJson elements

use crate::cvjson::{self, cvjson_etype, Predictions};
use anyhow::Context as _;
use mtriage_core::config::parse_config;
use mtriage_core::storage::element_files;
use mtriage_core::{
    Analyser, ArgSpec, ConfigError, ElementContext, ElementError, Etype, LocalElement,
    ModuleConfig, ModuleManifest, PhaseContext, Registry,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::debug;

pub const RANK_NAME: &str = "Rank";
pub const FLATTEN_NAME: &str = "Flatten";
pub const RANKING_ID: &str = "__RANKING";
pub const FLATTENED_ID: &str = "__FLATTENED";
pub const RANKING_FILE: &str = "rankings.json";
pub const FLATTENED_FILE: &str = "flattened.json";

/// Summary ids begin with this prefix and are never read back as inputs
const SUMMARY_PREFIX: &str = "__";

fn default_threshold() -> f64 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RankConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

/// Load predictions from every element folder under `dirs`
///
/// Folders that hold no readable CvJson are logged and left out.
fn collect_predictions(
    ctx: &PhaseContext<'_>,
    dirs: &[PathBuf],
) -> anyhow::Result<Vec<(String, Predictions)>> {
    let etype = cvjson_etype();
    let mut collected = Vec::new();
    for dir in dirs {
        if !dir.is_dir() {
            continue;
        }
        let mut folders: Vec<(String, PathBuf)> = fs::read_dir(dir)
            .with_context(|| format!("reading {}", dir.display()))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
            .filter(|(id, _)| !id.starts_with('.') && !id.starts_with(SUMMARY_PREFIX))
            .collect();
        folders.sort();

        for (id, folder) in folders {
            let element = match etype.cast(&id, &element_files(&folder)?) {
                Ok(element) => element,
                Err(err) => {
                    ctx.logger().error_for(&id, err);
                    continue;
                }
            };
            match Predictions::load(&element.paths[0]) {
                Ok(predictions) => collected.push((id, predictions)),
                Err(err) => ctx
                    .logger()
                    .error_for(&id, format!("unreadable predictions: {err}")),
            }
        }
    }
    Ok(collected)
}

fn write_summary<T: Serialize>(
    ctx: &PhaseContext<'_>,
    id: &str,
    file: &str,
    value: &T,
) -> anyhow::Result<LocalElement> {
    let dir = ctx.scratch_dir(id)?;
    let path = dir.join(file);
    fs::write(&path, serde_json::to_vec_pretty(value)?)?;
    Ok(LocalElement::new(id, vec![path], Etype::Json))
}

fn pass_through(element: &LocalElement) -> Option<LocalElement> {
    Some(element.clone())
}

/// Passes CvJson elements through, then ranks element ids per label
pub struct RankAnalyser {
    config: RankConfig,
}

impl RankAnalyser {
    pub fn new(config: RankConfig) -> Self {
        Self { config }
    }

    pub fn from_config(config: &ModuleConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(parse_config(RANK_NAME, config)?))
    }
}

impl Analyser for RankAnalyser {
    fn in_etype(&self) -> Etype {
        cvjson_etype()
    }

    fn delete_local_on_write(&self) -> bool {
        false
    }

    fn analyse_element(
        &self,
        element: &LocalElement,
        _ctx: &ElementContext<'_>,
    ) -> Result<Option<LocalElement>, ElementError> {
        Ok(pass_through(element))
    }

    fn post_analyse(
        &mut self,
        ctx: &PhaseContext<'_>,
        derived_dirs: &[PathBuf],
    ) -> anyhow::Result<Option<LocalElement>> {
        let elements = collect_predictions(ctx, derived_dirs)?;
        let ranking = cvjson::rank(&elements, self.config.threshold);
        for (label, ids) in &ranking {
            debug!("{RANK_NAME}: {label}: {} elements ranked", ids.len());
        }
        ctx.log(format!(
            "ranked {} elements across {} labels",
            elements.len(),
            ranking.len()
        ));
        write_summary(ctx, RANKING_ID, RANKING_FILE, &ranking).map(Some)
    }
}

/// Passes CvJson elements through, then lists every frame prediction
#[derive(Debug, Default)]
pub struct FlattenAnalyser;

impl Analyser for FlattenAnalyser {
    fn in_etype(&self) -> Etype {
        cvjson_etype()
    }

    fn delete_local_on_write(&self) -> bool {
        false
    }

    fn analyse_element(
        &self,
        element: &LocalElement,
        _ctx: &ElementContext<'_>,
    ) -> Result<Option<LocalElement>, ElementError> {
        Ok(pass_through(element))
    }

    fn post_analyse(
        &mut self,
        ctx: &PhaseContext<'_>,
        derived_dirs: &[PathBuf],
    ) -> anyhow::Result<Option<LocalElement>> {
        let elements = collect_predictions(ctx, derived_dirs)?;
        let frames = cvjson::flatten(&elements);
        ctx.log(format!("flattened {} frame predictions", frames.len()));
        write_summary(ctx, FLATTENED_ID, FLATTENED_FILE, &frames).map(Some)
    }
}

pub fn rank_manifest() -> ModuleManifest {
    ModuleManifest::new(RANK_NAME, "Rank CvJson elements by positive frames per label")
        .arg(ArgSpec::optional("threshold", "score a frame must exceed, default 0.5"))
}

pub fn flatten_manifest() -> ModuleManifest {
    ModuleManifest::new(FLATTEN_NAME, "List every frame prediction across CvJson elements")
}

pub fn register(registry: &mut Registry) {
    registry.register_analyser(rank_manifest(), |config, _| {
        Ok(Box::new(RankAnalyser::from_config(config)?) as Box<dyn Analyser>)
    });
    registry.register_analyser(flatten_manifest(), |config, _| {
        let _: FlattenConfig = parse_config(FLATTEN_NAME, config)?;
        Ok(Box::new(FlattenAnalyser) as Box<dyn Analyser>)
    });
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FlattenConfig {}
