//! Shared types, error model, and configuration for linkenrich.
//!
//! This crate is the foundation depended on by all other linkenrich crates.
//! It provides:
//! - [`LinkEnrichError`]: the unified error type
//! - Domain types ([`Identity`], [`ResolvedDetail`], [`IssueDetail`], [`UserProfile`])
//! - Configuration ([`AppConfig`], [`EnrichConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    API_URL_ENV, AppConfig, CACHE_FILE_ENV, DefaultsConfig, EnrichConfig, GithubConfig,
    ResolverConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{LinkEnrichError, Result};
pub use types::{IssueDetail, IssueState, Identity, ResolvedDetail, USER_SCOPE, UserProfile};
