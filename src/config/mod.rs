// src/config/mod.rs

//! Configuration loading and validation for deploydag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate stages, tasks, hooks and variables (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{DEFAULT_CONFIG_FILE, load_and_validate, load_from_path, parse_and_validate};
pub use model::{
    CommandSpec, ConfigFile, ConfigSection, HostConfig, HostTable, RawConfigFile, SshSection,
    StageConfig, TaskConfig, VariantConfig, DEFAULT_FLOW,
};
