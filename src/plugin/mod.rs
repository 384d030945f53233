//! Provider plugin system
//!
//! This module provides the provider host implementation including:
//! - Provider manager for installing, loading, unloading and removing providers
//! - Provider registry for tracking installed providers and their live instances
//! - Module boundaries isolating each loaded provider's code
//! - Native loader for provider dynamic libraries
//! - Provider contracts (NovelSource, NovelExporter)

pub mod boundary;
pub mod exporter;
pub mod installer;
pub mod manager;
pub mod native;
pub mod registry;
pub mod source;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use boundary::{ModuleBoundary, ModuleCatalog, ModuleExport, ModuleFactory, ModuleOrigin};
pub use exporter::NovelExporter;
pub use installer::{PackageInstaller, StagedPackage};
pub use manager::{LoadReport, ProviderManager, UnloadReport};
pub use native::{NativeExporter, NativeLibrary, NativeSource};
pub use registry::{ExporterHandle, LiveProvider, ProviderEntry, ProviderRegistry, SourceHandle};
pub use source::{Author, Category, Chapter, Novel, NovelSource, Paged};
pub use types::{
    LoadState, ProviderDescriptor, ProviderInfo, ProviderKind, ProviderManifest, ProviderStateEvent,
    BUILTIN_PREFIX, MANIFEST_FILE,
};
