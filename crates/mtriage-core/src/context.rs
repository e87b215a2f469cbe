//! Run context shared by every module in a pipeline

use serde::{Deserialize, Serialize};

/// Environment variable that overrides the number of batch workers
pub const THREADS_ENV: &str = "MTRIAGE_THREADS";

/// How unknown element failures are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Unknown failures abort the run
    Development,

    /// Unknown failures are logged and the element is skipped
    Production,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub mode: ExecutionMode,

    /// Keep completion ledgers after successful phases
    pub keep_ledger: bool,

    /// Batch worker count; `None` means one per logical core
    pub parallelism: Option<usize>,
}

impl Context {
    pub fn development() -> Self {
        Self {
            mode: ExecutionMode::Development,
            keep_ledger: false,
            parallelism: None,
        }
    }

    pub fn production() -> Self {
        Self {
            mode: ExecutionMode::Production,
            keep_ledger: false,
            parallelism: None,
        }
    }

    pub fn new(mode: ExecutionMode) -> Self {
        match mode {
            ExecutionMode::Development => Self::development(),
            ExecutionMode::Production => Self::production(),
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism.max(1));
        self
    }

    pub fn with_keep_ledger(mut self, keep: bool) -> Self {
        self.keep_ledger = keep;
        self
    }

    /// Apply `MTRIAGE_THREADS` when set to a positive integer
    pub fn with_env_overrides(self) -> Self {
        match std::env::var(THREADS_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
        {
            Some(n) if n > 0 => self.with_parallelism(n),
            _ => self,
        }
    }

    pub fn is_development(&self) -> bool {
        self.mode == ExecutionMode::Development
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism.unwrap_or_else(num_cpus::get).max(1)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::production()
    }
}
