//! Database module
//!
//! Connection pool management, schema migrations and the provider
//! descriptor repository.

pub mod manager;
pub mod migrations;
pub mod repository;

pub use manager::DatabaseManager;
pub use repository::{ProviderRepository, Repository};
