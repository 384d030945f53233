//! Fiction Hub Library
//!
//! Hosts serialized-fiction provider plugins: installs and loads provider
//! packages, exposes their sources by name and reconciles the same novel
//! and chapter across sources.

pub mod cache;
pub mod core;
pub mod db;
pub mod plugin;
pub mod reconcile;

// Re-export commonly used types
pub use crate::cache::ResultCache;
pub use crate::core::{Config, HubError, SourceService};
pub use db::DatabaseManager;
pub use plugin::{ModuleCatalog, ProviderManager};
pub use reconcile::ReconciliationEngine;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias for the library
pub type Result<T> = anyhow::Result<T>;
