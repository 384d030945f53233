//! Provider registry
//!
//! The authoritative in-memory list of installed providers. A provider's
//! load state is not stored: it is `Loaded` exactly when a live instance is
//! attached to its entry.

use super::boundary::{ModuleBoundary, ModuleExport};
use super::exporter::NovelExporter;
use super::source::NovelSource;
use super::types::{LoadState, ProviderDescriptor, ProviderInfo};
use crate::core::error::{HubError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// A provider's module boundary together with its resolved export
pub struct LiveProvider {
    pub boundary: Arc<ModuleBoundary>,
    pub export: ModuleExport,
}

/// Registry entry for one installed provider
pub struct ProviderEntry {
    pub descriptor: ProviderDescriptor,
    live: Option<LiveProvider>,
}

impl ProviderEntry {
    fn new(descriptor: ProviderDescriptor) -> Self {
        Self { descriptor, live: None }
    }

    pub fn state(&self) -> LoadState {
        if self.live.is_some() {
            LoadState::Loaded
        } else {
            LoadState::Unloaded
        }
    }

    pub fn live(&self) -> Option<&LiveProvider> {
        self.live.as_ref()
    }

    pub fn info(&self) -> ProviderInfo {
        ProviderInfo {
            descriptor: self.descriptor.clone(),
            state: self.state(),
        }
    }
}

/// Handle to a loaded source
///
/// Holds the module boundary for as long as the caller keeps the handle, so
/// the provider's code stays mapped during the call even if it is unloaded
/// concurrently.
#[derive(Clone)]
pub struct SourceHandle {
    pub name: String,
    pub source: Arc<dyn NovelSource>,
    _boundary: Arc<ModuleBoundary>,
}

/// Handle to a loaded exporter
#[derive(Clone)]
pub struct ExporterHandle {
    pub name: String,
    pub exporter: Arc<dyn NovelExporter>,
    _boundary: Arc<ModuleBoundary>,
}

#[derive(Default)]
pub struct ProviderRegistry {
    entries: HashMap<String, ProviderEntry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an unloaded descriptor; names are unique
    pub fn register(&mut self, descriptor: ProviderDescriptor) -> Result<()> {
        if self.entries.contains_key(&descriptor.name) {
            return Err(HubError::AlreadyExists(descriptor.name));
        }
        self.entries
            .insert(descriptor.name.clone(), ProviderEntry::new(descriptor));
        Ok(())
    }

    /// Drop an entry, returning it with whatever live instance it still had
    pub fn unregister(&mut self, name: &str) -> Result<ProviderEntry> {
        self.entries
            .remove(name)
            .ok_or_else(|| HubError::ProviderNotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&ProviderEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn state(&self, name: &str) -> Option<LoadState> {
        self.entries.get(name).map(|e| e.state())
    }

    /// All providers with their state, sorted by name
    pub fn list(&self) -> Vec<ProviderInfo> {
        let mut infos: Vec<ProviderInfo> = self.entries.values().map(|e| e.info()).collect();
        infos.sort_by(|a, b| a.descriptor.name.cmp(&b.descriptor.name));
        infos
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn loaded_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.live.is_some())
            .map(|e| e.descriptor.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Publish a live instance for an unloaded provider
    pub fn attach(&mut self, name: &str, live: LiveProvider) -> Result<()> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| HubError::ProviderNotFound(name.to_string()))?;
        if entry.live.is_some() {
            return Err(HubError::AlreadyLoaded(name.to_string()));
        }
        entry.live = Some(live);
        Ok(())
    }

    /// Take the live instance away from a loaded provider
    pub fn detach(&mut self, name: &str) -> Result<LiveProvider> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| HubError::ProviderNotFound(name.to_string()))?;
        entry
            .live
            .take()
            .ok_or_else(|| HubError::NotLoaded(name.to_string()))
    }

    pub fn source(&self, name: &str) -> Option<SourceHandle> {
        let live = self.entries.get(name)?.live.as_ref()?;
        match &live.export {
            ModuleExport::Source(source) => Some(SourceHandle {
                name: name.to_string(),
                source: Arc::clone(source),
                _boundary: Arc::clone(&live.boundary),
            }),
            ModuleExport::Exporter(_) => None,
        }
    }

    pub fn exporter(&self, name: &str) -> Option<ExporterHandle> {
        let live = self.entries.get(name)?.live.as_ref()?;
        match &live.export {
            ModuleExport::Exporter(exporter) => Some(ExporterHandle {
                name: name.to_string(),
                exporter: Arc::clone(exporter),
                _boundary: Arc::clone(&live.boundary),
            }),
            ModuleExport::Source(_) => None,
        }
    }

    /// Handles to every loaded source, sorted by name
    pub fn loaded_sources(&self) -> Vec<SourceHandle> {
        self.loaded_names()
            .iter()
            .filter_map(|name| self.source(name))
            .collect()
    }
}
