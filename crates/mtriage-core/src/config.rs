//! Run configuration and module manifests

use crate::error::ConfigError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Free-form configuration handed to a module factory
pub type ModuleConfig = serde_yaml::Value;

/// Keys of an analyser's config consumed by the engine, not the module
pub const RESERVED_KEYS: &[&str] = &["elements_in", "dev"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Selector,
    Analyser,
}

impl ModuleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleKind::Selector => "selector",
            ModuleKind::Analyser => "analyser",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One argument a module accepts in its `config`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgSpec {
    pub name: String,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub description: String,
}

impl ArgSpec {
    pub fn required(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            required: true,
            description: description.to_string(),
        }
    }

    pub fn optional(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            required: false,
            description: description.to_string(),
        }
    }
}

/// Module description used for validation and `mtriage modules`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub args: Vec<ArgSpec>,
}

impl ModuleManifest {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: ArgSpec) -> Self {
        self.args.push(arg);
        self
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// First required argument missing from `config`
    pub fn missing_required(&self, config: &ModuleConfig) -> Option<&str> {
        self.args
            .iter()
            .filter(|a| a.required)
            .find(|a| config.get(a.name.as_str()).is_none())
            .map(|a| a.name.as_str())
    }
}

/// `{name, config}` entry naming a module to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub name: String,

    #[serde(default = "empty_config")]
    pub config: ModuleConfig,
}

impl ModuleSpec {
    pub fn new(name: &str, config: ModuleConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
        }
    }

    /// `elements_in` given explicitly in this module's config
    pub fn elements_in(&self) -> Result<Option<Vec<String>>, ConfigError> {
        match self.config.get("elements_in") {
            None | Some(serde_yaml::Value::Null) => Ok(None),
            Some(value) => {
                let parsed: OneOrMany<String> = serde_yaml::from_value(value.clone())
                    .map_err(|e| ConfigError::InvalidModuleConfig {
                        module: self.name.clone(),
                        reason: format!("elements_in: {e}"),
                    })?;
                Ok(Some(parsed.into_vec()))
            }
        }
    }

    /// The config without engine-reserved keys
    pub fn module_config(&self) -> ModuleConfig {
        strip_reserved(&self.config)
    }
}

pub fn empty_config() -> ModuleConfig {
    serde_yaml::Value::Mapping(serde_yaml::Mapping::new())
}

pub fn strip_reserved(config: &ModuleConfig) -> ModuleConfig {
    match config {
        serde_yaml::Value::Mapping(map) => {
            let mut stripped = map.clone();
            for key in RESERVED_KEYS {
                stripped.remove(*key);
            }
            serde_yaml::Value::Mapping(stripped)
        }
        serde_yaml::Value::Null => empty_config(),
        other => other.clone(),
    }
}

/// Deserialise a module's typed config, treating a null config as empty
pub fn parse_config<T: DeserializeOwned>(
    module: &str,
    config: &ModuleConfig,
) -> Result<T, ConfigError> {
    let value = match config {
        serde_yaml::Value::Null => empty_config(),
        other => strip_reserved(other),
    };
    serde_yaml::from_value(value).map_err(|e| ConfigError::InvalidModuleConfig {
        module: module.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Select,
    Analyse,
}

/// A parsed run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Working directory all modules store into
    pub folder: PathBuf,

    #[serde(default)]
    pub dev: bool,

    #[serde(default)]
    pub keep_ledger: bool,

    #[serde(default)]
    pub parallelism: Option<usize>,

    #[serde(default)]
    pub phase: Option<Phase>,

    #[serde(default)]
    pub module: Option<String>,

    #[serde(default)]
    pub config: Option<ModuleConfig>,

    #[serde(default)]
    pub select: Option<ModuleSpec>,

    #[serde(default)]
    pub elements_in: Option<OneOrMany<String>>,

    #[serde(default)]
    pub analyse: Option<OneOrMany<ModuleSpec>>,
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::InvalidRun(msg.to_string())
}

impl RunConfig {
    /// Parse and check the structural rules of a run configuration
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let raw: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        check_raw(&raw)?;
        let config: RunConfig = serde_yaml::from_value(raw)?;
        config.check_structure()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    fn check_structure(&self) -> Result<(), ConfigError> {
        if self.phase.is_some() || self.module.is_some() {
            if self.module.is_none() {
                return Err(invalid("If you specified a phase, you must specify a module"));
            }
            if self.phase.is_none() {
                return Err(invalid("If you specified a module, you must specify a phase"));
            }
            if !matches!(self.config, Some(serde_yaml::Value::Mapping(_))) {
                return Err(invalid("The 'config' attribute must exist."));
            }
            return Ok(());
        }

        if self.elements_in.is_none() && self.select.is_none() {
            return Err(invalid("You must specify either 'elements_in' or 'select'."));
        }
        if self.select.is_none() && self.analyse.is_none() {
            return Err(invalid(
                "You have specified 'elements_in', and so at least one 'analyse' module must be specified.",
            ));
        }
        Ok(())
    }

    /// Analyse modules in declaration order
    pub fn analysers(&self) -> Vec<ModuleSpec> {
        self.analyse
            .clone()
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
    }

    pub fn top_elements_in(&self) -> Vec<String> {
        self.elements_in
            .clone()
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
    }
}

/// Rules that need the raw document, before typed deserialisation
fn check_raw(raw: &serde_yaml::Value) -> Result<(), ConfigError> {
    let map = raw
        .as_mapping()
        .ok_or_else(|| invalid("The run configuration must be a mapping"))?;
    match map.get("folder") {
        Some(serde_yaml::Value::String(_)) => {}
        _ => return Err(invalid("The folder attribute must exist and be a string")),
    }
    if let Some(phase) = map.get("phase") {
        if !matches!(phase.as_str(), Some("select") | Some("analyse")) {
            return Err(invalid("The phase attribute must be either select or analyse"));
        }
    }
    if let Some(analyse) = map.get("analyse") {
        let entries: Vec<&serde_yaml::Value> = match analyse {
            serde_yaml::Value::Mapping(_) => vec![analyse],
            serde_yaml::Value::Sequence(items) => items.iter().collect(),
            _ => return Err(invalid("The 'analyse' attribute must be a dict or list.")),
        };
        for entry in entries {
            if entry.get("name").and_then(|n| n.as_str()).is_none() {
                return Err(invalid(
                    "Each analyse component must be a dict containing at least a 'name' attribute.",
                ));
            }
        }
    }
    if let Some(select) = map.get("select") {
        if select.get("name").and_then(|n| n.as_str()).is_none() {
            return Err(invalid("The 'select' attribute must contain a 'name'."));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chained_config() {
        let config = RunConfig::from_yaml(
            "folder: media/demo\nselect:\n  name: Local\n  config:\n    source: media/in\nanalyse:\n  - name: ExtractTypes\n    config:\n      exts: [png]\n  - name: Rank\n",
        )
        .unwrap();
        assert_eq!(config.folder, PathBuf::from("media/demo"));
        assert_eq!(config.select.as_ref().unwrap().name, "Local");
        let analysers = config.analysers();
        assert_eq!(analysers.len(), 2);
        assert_eq!(analysers[1].config, empty_config());
    }

    #[test]
    fn test_single_analyse_mapping() {
        let config = RunConfig::from_yaml(
            "folder: f\nelements_in: sel1\nanalyse:\n  name: ExtractTypes\n  config: {exts: [json]}\n",
        )
        .unwrap();
        assert_eq!(config.top_elements_in(), vec!["sel1".to_string()]);
        assert_eq!(config.analysers().len(), 1);
    }

    #[test]
    fn test_folder_must_be_string() {
        let err = RunConfig::from_yaml("folder: 1\nselect: {name: Local}\n").unwrap_err();
        assert!(err.to_string().contains("folder attribute"));
        assert!(RunConfig::from_yaml("select: {name: Local}\n").is_err());
    }

    #[test]
    fn test_phase_and_module_go_together() {
        let err = RunConfig::from_yaml("folder: f\nphase: select\nconfig: {}\n").unwrap_err();
        assert!(err.to_string().contains("must specify a module"));
        let err = RunConfig::from_yaml("folder: f\nmodule: Local\nconfig: {}\n").unwrap_err();
        assert!(err.to_string().contains("must specify a phase"));
        let err = RunConfig::from_yaml("folder: f\nphase: select\nmodule: Local\n").unwrap_err();
        assert!(err.to_string().contains("'config'"));
        let err =
            RunConfig::from_yaml("folder: f\nphase: index\nmodule: Local\nconfig: {}\n").unwrap_err();
        assert!(err.to_string().contains("select or analyse"));
    }

    #[test]
    fn test_chained_form_needs_a_source() {
        assert!(RunConfig::from_yaml("folder: f\nanalyse: {name: Rank}\n").is_err());
        let err = RunConfig::from_yaml("folder: f\nelements_in: [sel1]\n").unwrap_err();
        assert!(err.to_string().contains("at least one 'analyse'"));
        let err = RunConfig::from_yaml("folder: f\nselect: {name: Local}\nanalyse: [{config: {}}]\n")
            .unwrap_err();
        assert!(err.to_string().contains("'name'"));
    }

    #[test]
    fn test_module_spec_elements_in() {
        let spec: ModuleSpec =
            serde_yaml::from_str("name: Rank\nconfig:\n  elements_in: sel1/an1\n  threshold: 0.7\n")
                .unwrap();
        assert_eq!(spec.elements_in().unwrap(), Some(vec!["sel1/an1".to_string()]));
        let stripped = spec.module_config();
        assert!(stripped.get("elements_in").is_none());
        assert!(stripped.get("threshold").is_some());
    }

    #[test]
    fn test_manifest_missing_required() {
        let manifest = ModuleManifest::new("Local", "Local files")
            .arg(ArgSpec::required("source", "folder to import"))
            .arg(ArgSpec::optional("aggregate", "one element"));
        let config: ModuleConfig = serde_yaml::from_str("aggregate: true").unwrap();
        assert_eq!(manifest.missing_required(&config), Some("source"));
        let config: ModuleConfig = serde_yaml::from_str("source: /tmp").unwrap();
        assert_eq!(manifest.missing_required(&config), None);
    }

    #[test]
    fn test_manifest_from_yaml() {
        let manifest = ModuleManifest::from_yaml(
            "name: Rank\ndescription: rank labels\nargs:\n  - name: threshold\n",
        )
        .unwrap();
        assert_eq!(manifest.args.len(), 1);
        assert!(!manifest.args[0].required);
    }

    #[test]
    fn test_parse_config_null_is_empty() {
        #[derive(Deserialize)]
        struct Cfg {
            #[serde(default)]
            flag: bool,
        }
        let cfg: Cfg = parse_config("m", &serde_yaml::Value::Null).unwrap();
        assert!(!cfg.flag);
    }
}
