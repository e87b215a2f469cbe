//! Pipeline run command

use super::registry_helper::builtin_registry;
use anyhow::{Context as _, Result};
use clap::Args;
use mtriage_core::{Pipeline, RunConfig, RunSummary};
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
pub struct RunCommand {
    /// Run configuration (YAML)
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Development mode: unknown element errors stop the run
    #[arg(long)]
    dev: bool,

    /// Keep completion ledgers after successful phases
    #[arg(long)]
    keep_ledger: bool,
}

impl RunCommand {
    pub fn new(config: PathBuf) -> Self {
        Self {
            config,
            dev: false,
            keep_ledger: false,
        }
    }

    pub fn execute(self) -> Result<RunSummary> {
        info!("=== mtriage run ===");
        info!("Config: {}", self.config.display());

        let mut config = RunConfig::from_path(&self.config)
            .with_context(|| format!("Failed to load {}", self.config.display()))?;
        config.dev |= self.dev;
        config.keep_ledger |= self.keep_ledger;

        let registry = builtin_registry();
        let pipeline = Pipeline::new(&registry, config).context("Invalid run configuration")?;
        info!(
            "Mode: {}, parallelism {}",
            if pipeline.context().is_development() {
                "development"
            } else {
                "production"
            },
            pipeline.context().parallelism()
        );

        let summary = pipeline.run().context("Pipeline failed")?;
        for stage in &summary.stages {
            info!(
                "{} {}: {} processed, {} resumed, {} total",
                stage.kind,
                stage.module,
                stage.report.processed,
                stage.report.resumed,
                stage.report.total
            );
        }
        Ok(summary)
    }
}
