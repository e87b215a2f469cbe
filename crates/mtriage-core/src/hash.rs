//! Content keys for phase ledgers

use serde::{Deserialize, Serialize};

/// Identifies one phase of one module under one configuration and inputs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhaseKey {
    pub module: String,
    pub phase: String,

    /// blake3 of the configuration in canonical JSON form
    pub config_hash: String,

    /// `elements_in` components in configured order; empty for selectors
    #[serde(default)]
    pub inputs: Vec<String>,
}

impl PhaseKey {
    pub fn new(module: &str, phase: &str, config: &serde_yaml::Value) -> Self {
        Self {
            module: module.to_string(),
            phase: phase.to_string(),
            config_hash: config_hash(config),
            inputs: Vec::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: &[String]) -> Self {
        self.inputs = inputs.to_vec();
        self
    }

    /// Hex digest over every part, used as the ledger file stem
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.module.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.phase.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.config_hash.as_bytes());
        for input in &self.inputs {
            hasher.update(&(input.len() as u64).to_le_bytes());
            hasher.update(input.as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// Hash a configuration independently of mapping key order
pub fn config_hash(config: &serde_yaml::Value) -> String {
    // serde_json maps are sorted, so this is canonical for string-keyed YAML
    let canonical = serde_json::to_value(config)
        .and_then(|v| serde_json::to_string(&v))
        .unwrap_or_else(|_| format!("{config:?}"));
    blake3::hash(canonical.as_bytes()).to_hex().to_string()
}
