//! Shared types, error model, and configuration for govsite.
//!
//! This crate is the foundation depended on by all other govsite crates.
//! It provides:
//! - [`GovsiteError`], the unified error type
//! - Domain types ([`Site`], [`Tag`], [`ContentSource`], [`ExternalItem`])
//! - Configuration ([`AppConfig`], [`SyncConfig`], [`PageConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DatabaseConfig, ImportConfig, PageConfig, SyncConfig, SyncSettings, config_dir,
    config_file_path, init_config, load_config, load_config_from,
};
pub use error::{GovsiteError, Result};
pub use types::{
    ContentSource, ExternalItem, ItemMetadata, Site, Tag, format_timestamp, normalize_slug,
    url_key,
};
