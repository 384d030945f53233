//! Module boundaries
//!
//! A [`ModuleBoundary`] owns the code of exactly one loaded provider: a
//! dynamic library opened with a private symbol namespace, or a builtin
//! module instantiated from the [`ModuleCatalog`]. It lives for one
//! load/unload cycle. Every handle given out for the provider holds an
//! `Arc` to it, so the library is unmapped only after the manager has let go
//! and the last in-flight caller is done. The manager keeps a `Weak` to
//! observe when that happens.

use super::exporter::NovelExporter;
use super::native::{NativeExporter, NativeLibrary, NativeSource};
use super::source::{Category, Chapter, Novel, NovelSource, Paged};
use super::types::{ProviderDescriptor, ProviderKind};
use crate::core::error::{HubError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// An object a module exposes, tagged by the contract it implements
#[derive(Clone)]
pub enum ModuleExport {
    Source(Arc<dyn NovelSource>),
    Exporter(Arc<dyn NovelExporter>),
}

impl ModuleExport {
    pub fn contract(&self) -> &'static str {
        self.kind().contract()
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            ModuleExport::Source(_) => ProviderKind::Source,
            ModuleExport::Exporter(_) => ProviderKind::Exporter,
        }
    }

    /// Wrap the export so every clone of it keeps `boundary` alive
    fn bind(self, boundary: &Arc<ModuleBoundary>) -> Self {
        match self {
            ModuleExport::Source(inner) => ModuleExport::Source(Arc::new(BoundSource {
                inner,
                _boundary: Arc::clone(boundary),
            })),
            ModuleExport::Exporter(inner) => ModuleExport::Exporter(Arc::new(BoundExporter {
                inner,
                _boundary: Arc::clone(boundary),
            })),
        }
    }
}

impl std::fmt::Debug for ModuleExport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ModuleExport({})", self.contract())
    }
}

/// Builds the exports of a builtin module, fresh for every load
pub type ModuleFactory = Arc<dyn Fn() -> Vec<ModuleExport> + Send + Sync>;

/// Statically linked modules, addressed as `builtin:<id>`
#[derive(Default)]
pub struct ModuleCatalog {
    modules: RwLock<HashMap<String, ModuleFactory>>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a builtin module
    pub fn register<F>(&self, id: impl Into<String>, factory: F)
    where
        F: Fn() -> Vec<ModuleExport> + Send + Sync + 'static,
    {
        let id = id.into();
        tracing::debug!(module = %id, "Builtin module registered");
        self.modules
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, Arc::new(factory));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.modules
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(id)
    }

    fn factory(&self, id: &str) -> Option<ModuleFactory> {
        self.modules
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .cloned()
    }
}

/// Where a boundary's code came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleOrigin {
    Builtin(String),
    Native(PathBuf),
}

/// Isolation unit holding one provider's code
pub struct ModuleBoundary {
    provider: String,
    origin: ModuleOrigin,
    library: Option<NativeLibrary>,
}

impl std::fmt::Debug for ModuleBoundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleBoundary")
            .field("provider", &self.provider)
            .field("origin", &self.origin)
            .finish()
    }
}

impl ModuleBoundary {
    /// Open the descriptor's module and resolve the export its kind requires
    ///
    /// On any failure the boundary is dropped before returning, so nothing
    /// of the module stays reachable.
    pub fn open(
        descriptor: &ProviderDescriptor,
        install_dir: &Path,
        catalog: &ModuleCatalog,
    ) -> Result<(Arc<ModuleBoundary>, ModuleExport)> {
        let boundary = match descriptor.builtin_id() {
            Some(id) => {
                if !catalog.contains(id) {
                    return Err(HubError::ModuleLoadFailed {
                        provider: descriptor.name.clone(),
                        reason: format!("unknown builtin module '{}'", id),
                    });
                }
                ModuleBoundary {
                    provider: descriptor.name.clone(),
                    origin: ModuleOrigin::Builtin(id.to_string()),
                    library: None,
                }
            }
            None => {
                let path = install_dir.join(&descriptor.module);
                let library = NativeLibrary::open(&descriptor.name, &path)?;
                ModuleBoundary {
                    provider: descriptor.name.clone(),
                    origin: ModuleOrigin::Native(path),
                    library: Some(library),
                }
            }
        };

        let boundary = Arc::new(boundary);
        let exports = boundary.exports(descriptor, catalog)?;
        let export = resolve_export(&descriptor.name, descriptor.kind, exports)?;

        tracing::debug!(
            provider = %descriptor.name,
            contract = export.contract(),
            "Module boundary opened"
        );

        Ok((boundary, export))
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn origin(&self) -> &ModuleOrigin {
        &self.origin
    }

    /// The native library, for modules that are one
    pub fn library(&self) -> Result<&NativeLibrary> {
        self.library.as_ref().ok_or_else(|| HubError::ModuleLoadFailed {
            provider: self.provider.clone(),
            reason: "module is not a native library".to_string(),
        })
    }

    /// Enumerate what the module exposes
    fn exports(self: &Arc<Self>, descriptor: &ProviderDescriptor, catalog: &ModuleCatalog) -> Result<Vec<ModuleExport>> {
        match &self.origin {
            ModuleOrigin::Builtin(id) => {
                let factory = catalog.factory(id).ok_or_else(|| HubError::ModuleLoadFailed {
                    provider: self.provider.clone(),
                    reason: format!("unknown builtin module '{}'", id),
                })?;
                // The factory's objects are owned by this boundary from here on
                Ok(factory().into_iter().map(|export| export.bind(self)).collect())
            }
            ModuleOrigin::Native(_) => {
                let library = self.library()?;
                let not_satisfied = |reason: String| HubError::ContractNotSatisfied {
                    provider: self.provider.clone(),
                    contract: descriptor.kind.contract().to_string(),
                    reason,
                };

                let declared = library
                    .contract()
                    .ok_or_else(|| not_satisfied("module exports no provider_contract symbol".to_string()))?;

                if !library.has_invoke() {
                    return Err(not_satisfied("module exports no provider_invoke symbol".to_string()));
                }

                let export = if declared == ProviderKind::Source.contract() {
                    ModuleExport::Source(Arc::new(NativeSource::new(Arc::clone(self))))
                } else if declared == ProviderKind::Exporter.contract() {
                    let extension = descriptor.file_extension.clone().unwrap_or_default();
                    ModuleExport::Exporter(Arc::new(NativeExporter::new(Arc::clone(self), extension)))
                } else {
                    return Err(not_satisfied(format!("module declares unknown contract '{}'", declared)));
                };

                Ok(vec![export])
            }
        }
    }
}

impl Drop for ModuleBoundary {
    fn drop(&mut self) {
        tracing::debug!(provider = %self.provider, origin = ?self.origin, "Module boundary reclaimed");
    }
}

/// A builtin source that pins its module boundary
struct BoundSource {
    inner: Arc<dyn NovelSource>,
    _boundary: Arc<ModuleBoundary>,
}

#[async_trait]
impl NovelSource for BoundSource {
    async fn search(&self, query: &str, page: u32) -> Result<Paged<Novel>> {
        self.inner.search(query, page).await
    }

    async fn quick_search(&self, query: &str, page: u32) -> Result<Paged<Novel>> {
        self.inner.quick_search(query, page).await
    }

    async fn list_hot(&self, page: u32) -> Result<Paged<Novel>> {
        self.inner.list_hot(page).await
    }

    async fn list_latest(&self, page: u32) -> Result<Paged<Novel>> {
        self.inner.list_latest(page).await
    }

    async fn list_completed(&self, page: u32) -> Result<Paged<Novel>> {
        self.inner.list_completed(page).await
    }

    async fn list_by_author(&self, author_slug: &str, page: u32) -> Result<Paged<Novel>> {
        self.inner.list_by_author(author_slug, page).await
    }

    async fn list_by_category(&self, category_slug: &str, page: u32) -> Result<Paged<Novel>> {
        self.inner.list_by_category(category_slug, page).await
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        self.inner.list_categories().await
    }

    async fn detail(&self, slug: &str) -> Result<Option<Novel>> {
        self.inner.detail(slug).await
    }

    async fn list_chapters(&self, slug: &str, novel_id: Option<&str>) -> Result<Vec<Chapter>> {
        self.inner.list_chapters(slug, novel_id).await
    }

    async fn chapter_content(&self, novel_slug: &str, chapter_slug: &str) -> Result<Option<Chapter>> {
        self.inner.chapter_content(novel_slug, chapter_slug).await
    }

    async fn locate_chapter_by_number(
        &self,
        slug: &str,
        novel_id: Option<&str>,
        number: u32,
    ) -> Result<Option<Chapter>> {
        self.inner.locate_chapter_by_number(slug, novel_id, number).await
    }
}

/// A builtin exporter that pins its module boundary
struct BoundExporter {
    inner: Arc<dyn NovelExporter>,
    _boundary: Arc<ModuleBoundary>,
}

#[async_trait]
impl NovelExporter for BoundExporter {
    fn file_extension(&self) -> &str {
        self.inner.file_extension()
    }

    async fn export(
        &self,
        novel: &Novel,
        chapters: &[Chapter],
        output: &mut (dyn std::io::Write + Send),
    ) -> Result<String> {
        self.inner.export(novel, chapters, output).await
    }
}

/// Pick the single export implementing `kind`'s contract
pub fn resolve_export(provider: &str, kind: ProviderKind, exports: Vec<ModuleExport>) -> Result<ModuleExport> {
    let total = exports.len();
    let mut matching: Vec<ModuleExport> = exports.into_iter().filter(|e| e.kind() == kind).collect();

    match matching.len() {
        1 => Ok(matching.remove(0)),
        0 => Err(HubError::ContractNotSatisfied {
            provider: provider.to_string(),
            contract: kind.contract().to_string(),
            reason: format!("none of the {} export(s) implements it", total),
        }),
        n => Err(HubError::ContractNotSatisfied {
            provider: provider.to_string(),
            contract: kind.contract().to_string(),
            reason: format!("{} exports implement it, expected exactly one", n),
        }),
    }
}
