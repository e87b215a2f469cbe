//! Config validation command

use super::registry_helper::builtin_registry;
use anyhow::{Context as _, Result};
use clap::Args;
use mtriage_core::{pipeline, RunConfig};
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
pub struct ValidateCommand {
    /// Run configuration (YAML)
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
}

impl ValidateCommand {
    pub fn new(config: PathBuf) -> Self {
        Self { config }
    }

    pub fn execute(self) -> Result<()> {
        let config = RunConfig::from_path(&self.config)
            .with_context(|| format!("Failed to load {}", self.config.display()))?;
        pipeline::validate(&builtin_registry(), &config)
            .with_context(|| format!("Invalid config {}", self.config.display()))?;
        info!("{} is valid", self.config.display());
        Ok(())
    }
}
