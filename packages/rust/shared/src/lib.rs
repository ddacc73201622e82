//! Shared types, error model, and configuration for Pagewise.
//!
//! This crate is the foundation depended on by all other Pagewise crates.
//! It provides:
//! - [`PagewiseError`]: the unified error type
//! - Domain types ([`SessionId`], [`HistoryTurn`])
//! - Configuration ([`AppConfig`], runtime [`SessionConfig`], [`CrawlConfig`],
//!   [`SandboxConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlConfig, CrawlPoliciesConfig, OpenRouterConfig, SandboxConfig,
    SandboxSettings, SessionConfig, SessionDefaults, config_dir, config_file_path, init_config,
    load_config, load_config_from, validate_api_key,
};
pub use error::{PagewiseError, Result};
pub use types::{HistoryTurn, SessionId};
