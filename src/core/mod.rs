//! Core application module
//!
//! This module provides the core application layer including:
//! - Source service addressing providers by name
//! - Configuration management
//! - Structured logging system
//! - Error handling and type system

pub mod config;
pub mod error;
pub mod logging;
pub mod services;

pub use config::{CliArgs, Config};
pub use error::{HubError, Result};
pub use logging::Logger;
pub use services::{Listing, SourceService};
