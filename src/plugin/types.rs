//! Provider type definitions
//!
//! Descriptors, manifests and the volatile load state shared by the
//! registry, installer and manager.

use crate::core::error::{HubError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Manifest file every provider package must carry
pub const MANIFEST_FILE: &str = "provider.json";

/// Module references with this prefix resolve against the builtin catalog
pub const BUILTIN_PREFIX: &str = "builtin:";

/// Unique provider name
pub type ProviderName = String;

/// Which capability contract a provider implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Serves novels, chapters and listings
    Source,
    /// Writes a novel to a file
    Exporter,
}

impl ProviderKind {
    /// Contract identifier a module must declare for this kind
    pub fn contract(&self) -> &'static str {
        match self {
            ProviderKind::Source => "novel-source/1",
            ProviderKind::Exporter => "novel-exporter/1",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Source => "source",
            ProviderKind::Exporter => "exporter",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "source" => Ok(ProviderKind::Source),
            "exporter" => Ok(ProviderKind::Exporter),
            other => Err(HubError::ManifestInvalid(format!("unknown provider kind '{}'", other))),
        }
    }
}

/// Runtime state, derived from whether a live instance is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadState {
    Unloaded,
    Loaded,
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadState::Unloaded => write!(f, "unloaded"),
            LoadState::Loaded => write!(f, "loaded"),
        }
    }
}

/// Contents of `provider.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderManifest {
    pub name: String,

    /// Library file relative to the package root, or `builtin:<id>`
    pub module: String,

    pub version: semver::Version,

    #[serde(default)]
    pub author: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    pub kind: ProviderKind,

    /// Output extension, exporters only
    #[serde(default)]
    pub file_extension: Option<String>,
}

impl ProviderManifest {
    /// Parse and validate manifest JSON
    ///
    /// Takes raw bytes, so a manifest that is not UTF-8 is reported as
    /// invalid rather than as an I/O failure.
    pub fn parse(content: impl AsRef<[u8]>) -> Result<Self> {
        let manifest: ProviderManifest = serde_json::from_slice(content.as_ref())
            .map_err(|e| HubError::ManifestInvalid(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;

        let module = self.module.trim();
        if module.is_empty() {
            return Err(HubError::ManifestInvalid("module cannot be empty".to_string()));
        }
        if let Some(id) = module.strip_prefix(BUILTIN_PREFIX) {
            if id.is_empty() {
                return Err(HubError::ManifestInvalid("builtin module id cannot be empty".to_string()));
            }
        } else if module.contains("..") || module.starts_with('/') || module.starts_with('\\') {
            return Err(HubError::ManifestInvalid(format!(
                "module '{}' must be a path inside the package",
                module
            )));
        }

        if self.kind == ProviderKind::Exporter
            && self.file_extension.as_deref().map_or(true, |ext| ext.trim().is_empty())
        {
            return Err(HubError::ManifestInvalid(
                "exporter providers must declare file_extension".to_string(),
            ));
        }

        Ok(())
    }
}

/// Provider names double as directory names
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(HubError::ManifestInvalid("name cannot be empty".to_string()));
    }
    if name.starts_with('.') {
        return Err(HubError::ManifestInvalid(format!("name '{}' cannot start with '.'", name)));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(HubError::ManifestInvalid(format!(
            "name '{}' may only contain ASCII letters, digits, '-', '_' and '.'",
            name
        )));
    }
    Ok(())
}

/// Installed provider record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: ProviderName,
    pub module: String,
    pub version: semver::Version,
    pub kind: ProviderKind,
    pub author: Option<String>,
    pub description: Option<String>,
    pub file_extension: Option<String>,
    /// SHA-256 of the package this provider was installed from
    pub checksum: Option<String>,
    pub installed_at: DateTime<Utc>,
}

impl ProviderDescriptor {
    pub fn from_manifest(manifest: ProviderManifest, checksum: Option<String>) -> Self {
        Self {
            name: manifest.name,
            module: manifest.module.trim().to_string(),
            version: manifest.version,
            kind: manifest.kind,
            author: manifest.author,
            description: manifest.description,
            file_extension: manifest.file_extension,
            checksum,
            installed_at: Utc::now(),
        }
    }

    /// Builtin catalog id, if the module reference names one
    pub fn builtin_id(&self) -> Option<&str> {
        self.module.strip_prefix(BUILTIN_PREFIX)
    }
}

/// Descriptor plus current load state, as listed to operators
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    #[serde(flatten)]
    pub descriptor: ProviderDescriptor,
    pub state: LoadState,
}

/// Lifecycle transition delivered to subscribers
///
/// `old_state` is `None` for a fresh install and `new_state` is `None` once
/// the provider has been removed.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStateEvent {
    pub provider: ProviderName,
    pub old_state: Option<LoadState>,
    pub new_state: Option<LoadState>,
    pub timestamp: i64,
}

impl ProviderStateEvent {
    pub fn new(provider: &str, old_state: Option<LoadState>, new_state: Option<LoadState>) -> Self {
        Self {
            provider: provider.to_string(),
            old_state,
            new_state,
            timestamp: Utc::now().timestamp(),
        }
    }
}
