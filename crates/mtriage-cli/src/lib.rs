//! mtriage CLI - run media triage pipelines from YAML configs
//!
//! The binary in `main.rs` is a thin wrapper over the commands here.

pub mod commands;
