//! Module registry: maps module names to manifests and factories

use crate::analyser::Analyser;
use crate::config::{ModuleConfig, ModuleKind, ModuleManifest};
use crate::error::ConfigError;
use crate::selector::Selector;
use std::collections::HashMap;
use tracing::{debug, info};

pub type SelectorFactory =
    Box<dyn Fn(&ModuleConfig, &Registry) -> Result<Box<dyn Selector>, ConfigError> + Send + Sync>;

pub type AnalyserFactory =
    Box<dyn Fn(&ModuleConfig, &Registry) -> Result<Box<dyn Analyser>, ConfigError> + Send + Sync>;

struct Entry<F> {
    manifest: ModuleManifest,
    factory: F,
}

/// Registry for selector and analyser lookup by name
pub struct Registry {
    selectors: HashMap<String, Entry<SelectorFactory>>,
    analysers: HashMap<String, Entry<AnalyserFactory>>,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            selectors: HashMap::new(),
            analysers: HashMap::new(),
        }
    }

    pub fn register_selector<F>(&mut self, manifest: ModuleManifest, factory: F)
    where
        F: Fn(&ModuleConfig, &Registry) -> Result<Box<dyn Selector>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        info!("Registering selector: {}", manifest.name);
        self.selectors.insert(
            manifest.name.clone(),
            Entry {
                manifest,
                factory: Box::new(factory),
            },
        );
    }

    pub fn register_analyser<F>(&mut self, manifest: ModuleManifest, factory: F)
    where
        F: Fn(&ModuleConfig, &Registry) -> Result<Box<dyn Analyser>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        info!("Registering analyser: {}", manifest.name);
        self.analysers.insert(
            manifest.name.clone(),
            Entry {
                manifest,
                factory: Box::new(factory),
            },
        );
    }

    /// Validate `config` and build the named selector
    pub fn selector(&self, name: &str, config: &ModuleConfig) -> Result<Box<dyn Selector>, ConfigError> {
        self.validate_args(ModuleKind::Selector, name, config)?;
        let entry = self.selectors.get(name).ok_or_else(|| unknown(ModuleKind::Selector, name))?;
        debug!("Building selector '{}'", name);
        (entry.factory)(config, self)
    }

    /// Validate `config` and build the named analyser
    pub fn analyser(&self, name: &str, config: &ModuleConfig) -> Result<Box<dyn Analyser>, ConfigError> {
        self.validate_args(ModuleKind::Analyser, name, config)?;
        let entry = self.analysers.get(name).ok_or_else(|| unknown(ModuleKind::Analyser, name))?;
        debug!("Building analyser '{}'", name);
        (entry.factory)(config, self)
    }

    pub fn manifest(&self, kind: ModuleKind, name: &str) -> Option<&ModuleManifest> {
        match kind {
            ModuleKind::Selector => self.selectors.get(name).map(|e| &e.manifest),
            ModuleKind::Analyser => self.analysers.get(name).map(|e| &e.manifest),
        }
    }

    /// Check the module exists and `config` has every required argument
    pub fn validate_args(
        &self,
        kind: ModuleKind,
        name: &str,
        config: &ModuleConfig,
    ) -> Result<(), ConfigError> {
        let manifest = self.manifest(kind, name).ok_or_else(|| unknown(kind, name))?;
        match manifest.missing_required(config) {
            Some(arg) => Err(ConfigError::MissingArgument {
                kind: kind.as_str(),
                module: name.to_string(),
                arg: arg.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Registered selector names, sorted
    pub fn selector_names(&self) -> Vec<String> {
        sorted_keys(&self.selectors)
    }

    /// Registered analyser names, sorted
    pub fn analyser_names(&self) -> Vec<String> {
        sorted_keys(&self.analysers)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown(kind: ModuleKind, name: &str) -> ConfigError {
    ConfigError::UnknownModule {
        kind: kind.as_str(),
        name: name.to_string(),
    }
}

fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<String> {
    let mut names: Vec<String> = map.keys().cloned().collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArgSpec;
    use crate::element::LocalElement;
    use crate::error::ElementError;
    use crate::module::ElementContext;

    struct Echo;

    impl Analyser for Echo {
        fn analyse_element(
            &self,
            element: &LocalElement,
            _ctx: &ElementContext<'_>,
        ) -> Result<Option<LocalElement>, ElementError> {
            Ok(Some(element.clone()))
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register_analyser(
            ModuleManifest::new("Echo", "returns its input")
                .arg(ArgSpec::required("label", "tag for outputs")),
            |_, _| Ok(Box::new(Echo) as Box<dyn Analyser>),
        );
        registry
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = registry();
        assert_eq!(registry.analyser_names(), vec!["Echo".to_string()]);
        assert!(registry.selector_names().is_empty());
        let config: ModuleConfig = serde_yaml::from_str("label: x").unwrap();
        assert!(registry.analyser("Echo", &config).is_ok());
    }

    #[test]
    fn test_missing_required_argument() {
        let registry = registry();
        let err = registry
            .analyser("Echo", &crate::config::empty_config())
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::MissingArgument { .. }));
    }

    #[test]
    fn test_unknown_module() {
        let registry = registry();
        let config = crate::config::empty_config();
        assert!(matches!(
            registry.selector("Echo", &config).err().unwrap(),
            ConfigError::UnknownModule { kind: "selector", .. }
        ));
        assert!(registry.manifest(ModuleKind::Analyser, "Nope").is_none());
    }
}
