//! Shared types, error model, and configuration for espforge.
//!
//! This crate is the foundation depended on by all other espforge crates.
//! It provides:
//! - [`EspforgeError`]: the unified error type
//! - Domain types ([`Component`], [`ConfigVariable`], [`RawComponent`], [`Configuration`])
//! - Configuration ([`AppConfig`], [`ScrapeConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, DeviceDefaults, ScrapeConfig, ScrapeSection, config_dir,
    config_file_path, init_config, load_config, load_config_from, resolve_db_path,
};
pub use error::{EspforgeError, Result};
pub use types::{
    Catalog, Component, ComponentInstance, ConfigVariable, Configuration, Constraints,
    GlobalSettings, RawComponent, RawVariable, Value, VarType, compute_hash,
};
