//! Error type system for the fiction hub
//!
//! Lifecycle operations (load/unload/install/remove) surface these errors to
//! the operator. Fan-out operations log them per provider and never propagate
//! a single provider's failure to the caller.

/// Main error type for the fiction hub
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    // System-level errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("Database connection pool error: {0}")]
    PoolError(String),

    // Provider lifecycle errors
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Provider {0} is already loaded")]
    AlreadyLoaded(String),

    #[error("Provider {0} is not loaded")]
    NotLoaded(String),

    #[error("Provider {0} already exists")]
    AlreadyExists(String),

    #[error("Module of provider {provider} does not satisfy the {contract} contract: {reason}")]
    ContractNotSatisfied {
        provider: String,
        contract: String,
        reason: String,
    },

    #[error("Failed to load module of provider {provider}: {reason}")]
    ModuleLoadFailed { provider: String, reason: String },

    #[error("Failed to remove provider {provider}: {source}")]
    RemoveFailed {
        provider: String,
        #[source]
        source: Box<HubError>,
    },

    // Package errors
    #[error("Package manifest missing: {0}")]
    ManifestMissing(String),

    #[error("Package manifest invalid: {0}")]
    ManifestInvalid(String),

    #[error("Package error: {0}")]
    PackageError(String),

    // Provider runtime errors
    #[error("Provider {provider} failed during {operation}: {message}")]
    ProviderOperationFailed {
        provider: String,
        operation: String,
        message: String,
    },

    #[error("Insufficient input: {0}")]
    InsufficientInput(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    // I/O errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Task error: {0}")]
    TaskError(String),
}

impl HubError {
    /// Shorthand for a provider-side failure
    pub fn provider_failed(
        provider: impl Into<String>,
        operation: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        HubError::ProviderOperationFailed {
            provider: provider.into(),
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Get the stable error type name
    pub fn error_type(&self) -> &'static str {
        match self {
            HubError::ConfigError(_) => "ConfigError",
            HubError::DatabaseError(_) => "DatabaseError",
            HubError::PoolError(_) => "PoolError",
            HubError::ProviderNotFound(_) => "NotFound",
            HubError::AlreadyLoaded(_) => "AlreadyLoaded",
            HubError::NotLoaded(_) => "NotLoaded",
            HubError::AlreadyExists(_) => "AlreadyExists",
            HubError::ContractNotSatisfied { .. } => "ContractNotSatisfied",
            HubError::ModuleLoadFailed { .. } => "ModuleLoadFailed",
            HubError::RemoveFailed { .. } => "RemoveFailed",
            HubError::ManifestMissing(_) => "ManifestMissing",
            HubError::ManifestInvalid(_) => "ManifestInvalid",
            HubError::PackageError(_) => "PackageError",
            HubError::ProviderOperationFailed { .. } => "ProviderOperationFailed",
            HubError::InsufficientInput(_) => "InsufficientInput",
            HubError::Timeout(_) => "Timeout",
            HubError::IoError(_) => "IoError",
            HubError::SerializationError(_) => "SerializationError",
            HubError::TaskError(_) => "TaskError",
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HubError::DatabaseError(_)
                | HubError::PoolError(_)
                | HubError::Timeout(_)
                | HubError::ProviderOperationFailed { .. }
        )
    }
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        HubError::SerializationError(err.to_string())
    }
}

/// Result type alias for operations that can fail with HubError
pub type Result<T> = std::result::Result<T, HubError>;
