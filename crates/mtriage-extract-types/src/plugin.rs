//! Analyser wrapper for extension filtering

use crate::ExtractTypesConfig;
use mtriage_core::config::parse_config;
use mtriage_core::{
    Analyser, ArgSpec, ConfigError, ElementContext, ElementError, LocalElement, ModuleConfig,
    ModuleManifest, Registry,
};

pub const NAME: &str = "ExtractTypes";

pub struct ExtractTypes {
    config: ExtractTypesConfig,
}

impl ExtractTypes {
    pub fn new(config: ExtractTypesConfig) -> Self {
        Self { config }
    }

    pub fn from_config(config: &ModuleConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(parse_config(NAME, config)?))
    }
}

pub fn manifest() -> ModuleManifest {
    ModuleManifest::new(NAME, "Keep only the files of an element with given extensions")
        .arg(ArgSpec::required("exts", "extensions to keep, e.g. [json, png]"))
}

pub fn register(registry: &mut Registry) {
    registry.register_analyser(manifest(), |config, _| {
        Ok(Box::new(ExtractTypes::from_config(config)?) as Box<dyn Analyser>)
    });
}

impl Analyser for ExtractTypes {
    // Inputs are owned by upstream storage
    fn delete_local_on_write(&self) -> bool {
        false
    }

    fn analyse_element(
        &self,
        element: &LocalElement,
        ctx: &ElementContext<'_>,
    ) -> Result<Option<LocalElement>, ElementError> {
        let paths = self.config.filter(&element.paths);
        if paths.is_empty() {
            ctx.log(format!("No extracted media in element {}.", element.id));
            return Ok(None);
        }
        let names: Vec<String> = paths
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        ctx.log(format!("Extracting element with paths: {}", names.join(", ")));
        Ok(Some(LocalElement {
            paths,
            ..element.clone()
        }))
    }
}
