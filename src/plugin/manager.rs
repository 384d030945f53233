//! Provider lifecycle manager
//!
//! Owns the registry, the on-disk installations and the persisted
//! descriptors. Every lifecycle operation holds a per-name lock, so
//! operations on one provider are serialized while different providers
//! proceed concurrently. The registry lock itself is only held for short,
//! non-blocking sections.

use super::boundary::{ModuleBoundary, ModuleCatalog};
use super::installer::PackageInstaller;
use super::registry::{ExporterHandle, LiveProvider, ProviderRegistry, SourceHandle};
use super::types::{LoadState, ProviderDescriptor, ProviderInfo, ProviderKind, ProviderStateEvent};
use crate::core::config::PluginConfig;
use crate::core::error::{HubError, Result};
use crate::db::repository::{ProviderRepository, Repository};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{OwnedMutexGuard, RwLock};
use tracing::{error, info, warn};

type StateSubscriber = Box<dyn Fn(&ProviderStateEvent) + Send + Sync>;

/// Outcome of [`ProviderManager::load_all`]
#[derive(Debug, Default, Clone, Serialize)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Outcome of [`ProviderManager::unload_all`]
#[derive(Debug, Default, Clone, Serialize)]
pub struct UnloadReport {
    pub unloaded: Vec<String>,
    pub failed: Vec<(String, String)>,
    /// Unloaded providers whose module boundary is still referenced
    pub unreleased: Vec<String>,
}

/// Held while a lifecycle operation runs on one provider name
struct NameGuard<'a> {
    manager: &'a ProviderManager,
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for NameGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.manager.prune_name_lock(&self.name);
    }
}

pub struct ProviderManager {
    config: PluginConfig,
    installer: PackageInstaller,
    catalog: Arc<ModuleCatalog>,
    store: ProviderRepository,
    registry: RwLock<ProviderRegistry>,
    name_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    released: Mutex<HashMap<String, Weak<ModuleBoundary>>>,
    subscribers: std::sync::RwLock<Vec<StateSubscriber>>,
}

impl ProviderManager {
    pub fn new(config: PluginConfig, catalog: Arc<ModuleCatalog>, store: ProviderRepository) -> Result<Self> {
        let installer = PackageInstaller::new(config.plugin_dir.clone())?;
        Ok(Self {
            config,
            installer,
            catalog,
            store,
            registry: RwLock::new(ProviderRegistry::new()),
            name_locks: Mutex::new(HashMap::new()),
            released: Mutex::new(HashMap::new()),
            subscribers: std::sync::RwLock::new(Vec::new()),
        })
    }

    pub fn plugin_dir(&self) -> &Path {
        self.installer.plugin_dir()
    }

    pub fn catalog(&self) -> &Arc<ModuleCatalog> {
        &self.catalog
    }

    /// Register a callback for lifecycle transitions
    ///
    /// Callbacks run synchronously on the task performing the transition and
    /// must not call back into the manager.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&ProviderStateEvent) + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Box::new(callback));
    }

    fn emit(&self, provider: &str, old_state: Option<LoadState>, new_state: Option<LoadState>) {
        let event = ProviderStateEvent::new(provider, old_state, new_state);
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for subscriber in subscribers.iter() {
            subscriber(&event);
        }
    }

    /// Serialize lifecycle operations on `name` until the guard is dropped
    async fn lock_name(&self, name: &str) -> NameGuard<'_> {
        let lock = {
            let mut locks = self
                .name_locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(locks.entry(name.to_string()).or_default())
        };
        NameGuard {
            manager: self,
            name: name.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Forget the lock of `name` once no operation holds or awaits it
    fn prune_name_lock(&self, name: &str) {
        let mut locks = self
            .name_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Clones are only handed out under this map lock, so a count of one is stable
        if locks.get(name).map_or(false, |lock| Arc::strong_count(lock) == 1) {
            locks.remove(name);
        }
    }

    /// Register every persisted descriptor as unloaded
    ///
    /// Returns how many providers were restored.
    pub async fn restore(&self) -> Result<usize> {
        if let Err(e) = self.installer.purge_staging() {
            warn!(error = %e, "Failed to clean staging area");
        }

        let descriptors = self.store.find_all().await?;
        let mut registry = self.registry.write().await;
        let mut restored = 0;

        for descriptor in descriptors {
            if registry.contains(&descriptor.name) {
                continue;
            }
            if descriptor.builtin_id().is_none() && !self.installer.install_dir(&descriptor.name).is_dir() {
                warn!(provider = %descriptor.name, "Install directory missing, provider will fail to load");
            }
            registry.register(descriptor)?;
            restored += 1;
        }

        info!("Restored {} provider(s) from the store", restored);
        Ok(restored)
    }

    /// All installed providers with their load state, sorted by name
    pub async fn list_installed(&self) -> Vec<ProviderInfo> {
        self.registry.read().await.list()
    }

    pub async fn descriptor(&self, name: &str) -> Option<ProviderDescriptor> {
        self.registry
            .read()
            .await
            .get(name)
            .map(|entry| entry.descriptor.clone())
    }

    pub async fn state(&self, name: &str) -> Option<LoadState> {
        self.registry.read().await.state(name)
    }

    /// Load an installed provider's module and publish its instance
    pub async fn load(&self, name: &str) -> Result<()> {
        let _guard = self.lock_name(name).await;
        self.load_locked(name).await
    }

    async fn load_locked(&self, name: &str) -> Result<()> {
        let descriptor = {
            let registry = self.registry.read().await;
            let entry = registry
                .get(name)
                .ok_or_else(|| HubError::ProviderNotFound(name.to_string()))?;
            if entry.state() == LoadState::Loaded {
                return Err(HubError::AlreadyLoaded(name.to_string()));
            }
            entry.descriptor.clone()
        };

        info!(provider = %name, module = %descriptor.module, "Loading provider");

        let install_dir = self.installer.install_dir(name);
        let catalog = Arc::clone(&self.catalog);
        let (boundary, export) =
            tokio::task::spawn_blocking(move || ModuleBoundary::open(&descriptor, &install_dir, &catalog))
                .await
                .map_err(|e| HubError::TaskError(format!("Module load task failed: {}", e)))??;

        self.registry
            .write()
            .await
            .attach(name, LiveProvider { boundary, export })?;

        self.released
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(name);

        self.emit(name, Some(LoadState::Unloaded), Some(LoadState::Loaded));
        info!(provider = %name, "Provider loaded");
        Ok(())
    }

    /// Detach a provider's instance and release the manager's boundary reference
    pub async fn unload(&self, name: &str) -> Result<()> {
        let _guard = self.lock_name(name).await;
        self.unload_locked(name).await
    }

    async fn unload_locked(&self, name: &str) -> Result<()> {
        let live = self.registry.write().await.detach(name)?;
        let weak = Arc::downgrade(&live.boundary);
        drop(live);

        let in_use = weak.strong_count();
        self.released
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), weak);

        self.emit(name, Some(LoadState::Loaded), Some(LoadState::Unloaded));
        if in_use > 0 {
            info!(provider = %name, handles = in_use, "Provider unloaded, module still in use");
        } else {
            info!(provider = %name, "Provider unloaded");
        }
        Ok(())
    }

    /// Whether no module boundary of `name` is alive any more
    ///
    /// False while the provider is loaded or while a caller still holds a
    /// handle obtained before the last unload.
    pub async fn is_reclaimed(&self, name: &str) -> bool {
        if self.registry.read().await.state(name) == Some(LoadState::Loaded) {
            return false;
        }
        self.released_boundary_gone(name)
    }

    fn released_boundary_gone(&self, name: &str) -> bool {
        self.released
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .map_or(true, |weak| weak.strong_count() == 0)
    }

    /// Load every unloaded provider; failures are logged and reported
    pub async fn load_all(&self) -> LoadReport {
        let names = self.registry.read().await.names();
        let mut report = LoadReport::default();

        for name in names {
            match self.load(&name).await {
                Ok(()) => report.loaded.push(name),
                Err(HubError::AlreadyLoaded(_)) => {}
                Err(e) => {
                    error!(provider = %name, error = %e, "Failed to load provider");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "Bulk load finished"
        );
        report
    }

    /// Unload every loaded provider; failures are logged and reported
    pub async fn unload_all(&self) -> UnloadReport {
        let names = self.registry.read().await.loaded_names();
        let mut report = UnloadReport::default();

        for name in names {
            match self.unload(&name).await {
                Ok(()) => report.unloaded.push(name),
                Err(HubError::NotLoaded(_)) => {}
                Err(e) => {
                    error!(provider = %name, error = %e, "Failed to unload provider");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        report.unreleased = report
            .unloaded
            .iter()
            .filter(|name| !self.released_boundary_gone(name))
            .cloned()
            .collect();

        if !report.unreleased.is_empty() {
            warn!(providers = ?report.unreleased, "Some module boundaries are still referenced");
        }
        report
    }

    /// Install a package and load it
    ///
    /// The descriptor is persisted only after the provider loaded. Any
    /// failure after the files were moved in rolls the installation back.
    pub async fn install_from_package(&self, package_path: &Path) -> Result<String> {
        let installer = self.installer.clone();
        let package = package_path.to_path_buf();
        let staged = tokio::task::spawn_blocking(move || installer.stage(&package))
            .await
            .map_err(|e| HubError::TaskError(format!("Package staging task failed: {}", e)))??;

        let manifest = staged.manifest()?.clone();
        let checksum = staged.checksum().to_string();
        let name = manifest.name.clone();

        let _guard = self.lock_name(&name).await;

        if self.registry.read().await.contains(&name) {
            warn!(provider = %name, "Install rejected, provider already exists");
            return Err(HubError::AlreadyExists(name));
        }

        let target = self.installer.install_dir(&name);
        if target.exists() {
            warn!(provider = %name, "Replacing stale install directory {}", target.display());
            std::fs::remove_dir_all(&target)?;
        }
        staged.commit_to(&target)?;

        let descriptor = ProviderDescriptor::from_manifest(manifest, Some(checksum));
        self.registry.write().await.register(descriptor.clone())?;
        self.emit(&name, None, Some(LoadState::Unloaded));

        if let Err(e) = self.load_locked(&name).await {
            error!(provider = %name, error = %e, "Installed provider failed to load, rolling back");
            self.roll_back_install(&name, &target).await;
            return Err(e);
        }

        if let Err(e) = self.store.create(&descriptor).await {
            error!(provider = %name, error = %e, "Failed to persist provider, rolling back");
            if let Err(unload_error) = self.unload_locked(&name).await {
                warn!(provider = %name, error = %unload_error, "Unload during rollback failed");
            }
            self.roll_back_install(&name, &target).await;
            return Err(e);
        }

        info!(provider = %name, version = %descriptor.version, "Provider installed");
        Ok(name)
    }

    async fn roll_back_install(&self, name: &str, target: &Path) {
        if self.registry.write().await.unregister(name).is_ok() {
            self.emit(name, Some(LoadState::Unloaded), None);
        }
        if let Err(e) = std::fs::remove_dir_all(target) {
            warn!(provider = %name, error = %e, "Failed to delete {}", target.display());
        }
    }

    /// Uninstall a provider, unloading it first when needed
    pub async fn remove(&self, name: &str) -> Result<()> {
        let _guard = self.lock_name(name).await;

        let state = self
            .registry
            .read()
            .await
            .state(name)
            .ok_or_else(|| HubError::ProviderNotFound(name.to_string()))?;

        if state == LoadState::Loaded {
            self.unload_locked(name)
                .await
                .map_err(|e| HubError::RemoveFailed {
                    provider: name.to_string(),
                    source: Box::new(e),
                })?;
        }

        self.store.delete(name).await?;
        self.registry.write().await.unregister(name)?;
        self.emit(name, Some(LoadState::Unloaded), None);

        if !self.wait_for_reclaim(name).await {
            warn!(
                provider = %name,
                retries = self.config.reclaim_retries,
                "Module boundary still referenced, deleting files anyway"
            );
        }

        let dir = self.installer.install_dir(name);
        if dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!(provider = %name, error = %e, "Failed to delete {}", dir.display());
            }
        }

        info!(provider = %name, "Provider removed");
        Ok(())
    }

    async fn wait_for_reclaim(&self, name: &str) -> bool {
        for _ in 0..self.config.reclaim_retries {
            if self.released_boundary_gone(name) {
                return true;
            }
            tokio::time::sleep(self.config.reclaim_interval()).await;
        }
        self.released_boundary_gone(name)
    }

    /// Handle to a loaded source provider
    pub async fn source(&self, name: &str) -> Result<SourceHandle> {
        let registry = self.registry.read().await;
        let entry = registry
            .get(name)
            .ok_or_else(|| HubError::ProviderNotFound(name.to_string()))?;
        if entry.state() == LoadState::Unloaded {
            return Err(HubError::NotLoaded(name.to_string()));
        }
        registry.source(name).ok_or_else(|| HubError::ContractNotSatisfied {
            provider: name.to_string(),
            contract: ProviderKind::Source.contract().to_string(),
            reason: "provider is not a source".to_string(),
        })
    }

    /// Handle to a loaded exporter provider
    pub async fn exporter(&self, name: &str) -> Result<ExporterHandle> {
        let registry = self.registry.read().await;
        let entry = registry
            .get(name)
            .ok_or_else(|| HubError::ProviderNotFound(name.to_string()))?;
        if entry.state() == LoadState::Unloaded {
            return Err(HubError::NotLoaded(name.to_string()));
        }
        registry.exporter(name).ok_or_else(|| HubError::ContractNotSatisfied {
            provider: name.to_string(),
            contract: ProviderKind::Exporter.contract().to_string(),
            reason: "provider is not an exporter".to_string(),
        })
    }

    /// Handles to every loaded source
    pub async fn loaded_sources(&self) -> Vec<SourceHandle> {
        self.registry.read().await.loaded_sources()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseManager;
    use crate::plugin::testing::{
        native_fixture, register_exporter, register_source, write_native_package, write_package_dir,
        write_package_zip, MockSource,
    };
    use crate::plugin::types::MANIFEST_FILE;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Fixture {
        manager: Arc<ProviderManager>,
        store: ProviderRepository,
        catalog: Arc<ModuleCatalog>,
        config: PluginConfig,
        dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(ModuleCatalog::new());
        register_source(&catalog, "mock-p1", MockSource::new("p1").with_novel("Tao Tac", "tao-tac", "X"));
        register_source(&catalog, "mock-p2", MockSource::new("p2").with_novel("Tao Tac", "tao-tac-p2", "X"));
        register_exporter(&catalog, "txt");

        let store = ProviderRepository::new(Arc::new(DatabaseManager::new_in_memory().unwrap()));
        let config = PluginConfig {
            plugin_dir: dir.path().join("providers"),
            reclaim_retries: 3,
            reclaim_interval_ms: 5,
        };
        let manager = Arc::new(ProviderManager::new(config.clone(), Arc::clone(&catalog), store.clone()).unwrap());

        Fixture {
            manager,
            store,
            catalog,
            config,
            dir,
        }
    }

    impl Fixture {
        fn packages(&self) -> PathBuf {
            let dir = self.dir.path().join("packages");
            std::fs::create_dir_all(&dir).unwrap();
            dir
        }

        async fn install(&self, name: &str, module: &str, kind: ProviderKind) -> Result<String> {
            let package = write_package_dir(&self.packages(), name, module, kind);
            self.manager.install_from_package(&package).await
        }
    }

    #[tokio::test]
    async fn test_install_loads_and_persists() {
        let f = fixture();
        let name = f.install("p1", "builtin:mock-p1", ProviderKind::Source).await.unwrap();
        assert_eq!(name, "p1");

        assert_eq!(f.manager.state("p1").await, Some(LoadState::Loaded));
        assert!(f.manager.plugin_dir().join("p1").join(MANIFEST_FILE).is_file());

        let stored = f.store.find_by_id("p1").await.unwrap().unwrap();
        assert_eq!(stored.module, "builtin:mock-p1");
        assert!(stored.checksum.is_some());
    }

    #[tokio::test]
    async fn test_install_from_zip() {
        let f = fixture();
        let package = write_package_zip(&f.packages(), "p2", "builtin:mock-p2", ProviderKind::Source);
        f.manager.install_from_package(&package).await.unwrap();

        assert!(!package.exists());
        assert!(!f.manager.plugin_dir().join("p2").join("p2.pdb").exists());
        assert!(f.manager.source("p2").await.is_ok());
    }

    #[tokio::test]
    async fn test_load_and_unload_transitions() {
        let f = fixture();
        f.install("p1", "builtin:mock-p1", ProviderKind::Source).await.unwrap();

        assert!(matches!(f.manager.load("p1").await, Err(HubError::AlreadyLoaded(_))));

        f.manager.unload("p1").await.unwrap();
        assert!(matches!(f.manager.unload("p1").await, Err(HubError::NotLoaded(_))));
        assert!(matches!(f.manager.source("p1").await, Err(HubError::NotLoaded(_))));

        f.manager.load("p1").await.unwrap();
        assert_eq!(f.manager.state("p1").await, Some(LoadState::Loaded));

        assert!(matches!(f.manager.load("ghost").await, Err(HubError::ProviderNotFound(_))));
        assert!(matches!(f.manager.unload("ghost").await, Err(HubError::ProviderNotFound(_))));
    }

    #[tokio::test]
    async fn test_colliding_install_leaves_existing_untouched() {
        let f = fixture();
        f.install("p1", "builtin:mock-p1", ProviderKind::Source).await.unwrap();
        let marker = f.manager.plugin_dir().join("p1").join("README.md");
        std::fs::write(&marker, "original").unwrap();

        let second = f.dir.path().join("second");
        let package = write_package_dir(&second, "p1", "builtin:mock-p2", ProviderKind::Source);
        let result = f.manager.install_from_package(&package).await;

        assert!(matches!(result, Err(HubError::AlreadyExists(_))));
        assert_eq!(std::fs::read_to_string(&marker).unwrap(), "original");
        assert_eq!(f.manager.descriptor("p1").await.unwrap().module, "builtin:mock-p1");
        assert_eq!(f.manager.state("p1").await, Some(LoadState::Loaded));
    }

    #[tokio::test]
    async fn test_contract_mismatch_rolls_back() {
        let f = fixture();
        // declares a source but the module only exports an exporter
        let result = f.install("bad", "builtin:txt", ProviderKind::Source).await;

        assert!(matches!(result, Err(HubError::ContractNotSatisfied { .. })));
        assert!(f.manager.state("bad").await.is_none());
        assert!(!f.manager.plugin_dir().join("bad").exists());
        assert!(f.store.find_by_id("bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_contract_mismatch_on_load_stays_unloaded() {
        let f = fixture();
        f.install("p1", "builtin:mock-p1", ProviderKind::Source).await.unwrap();
        f.manager.unload("p1").await.unwrap();

        // the module now exports two sources
        f.catalog.register("mock-p1", || {
            vec![
                crate::plugin::boundary::ModuleExport::Source(Arc::new(MockSource::new("p1"))),
                crate::plugin::boundary::ModuleExport::Source(Arc::new(MockSource::new("p1"))),
            ]
        });

        let result = f.manager.load("p1").await;
        assert!(matches!(result, Err(HubError::ContractNotSatisfied { .. })));
        assert_eq!(f.manager.state("p1").await, Some(LoadState::Unloaded));
        assert!(f.manager.is_reclaimed("p1").await);
    }

    #[tokio::test]
    async fn test_unknown_module_rolls_back() {
        let f = fixture();
        let result = f.install("ghost", "builtin:nowhere", ProviderKind::Source).await;
        assert!(matches!(result, Err(HubError::ModuleLoadFailed { .. })));
        assert!(f.manager.list_installed().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_loaded_provider() {
        let f = fixture();
        f.install("p1", "builtin:mock-p1", ProviderKind::Source).await.unwrap();
        f.install("p2", "builtin:mock-p2", ProviderKind::Source).await.unwrap();

        f.manager.remove("p2").await.unwrap();

        let names: Vec<_> = f
            .manager
            .list_installed()
            .await
            .into_iter()
            .map(|i| i.descriptor.name)
            .collect();
        assert_eq!(names, vec!["p1"]);
        assert!(!f.manager.plugin_dir().join("p2").exists());
        assert!(f.store.find_by_id("p2").await.unwrap().is_none());
        assert!(f.manager.is_reclaimed("p2").await);

        assert!(matches!(f.manager.remove("p2").await, Err(HubError::ProviderNotFound(_))));
    }

    #[tokio::test]
    async fn test_handle_delays_reclamation() {
        let f = fixture();
        f.install("p1", "builtin:mock-p1", ProviderKind::Source).await.unwrap();
        assert!(!f.manager.is_reclaimed("p1").await);

        let handle = f.manager.source("p1").await.unwrap();
        f.manager.unload("p1").await.unwrap();
        assert!(!f.manager.is_reclaimed("p1").await);

        let report = handle.source.quick_search("Tao", 1).await.unwrap();
        assert_eq!(report.items.len(), 1);

        drop(handle);
        assert!(f.manager.is_reclaimed("p1").await);
    }

    #[tokio::test]
    async fn test_escaped_instance_delays_reclamation() {
        let f = fixture();
        f.install("p1", "builtin:mock-p1", ProviderKind::Source).await.unwrap();

        let handle = f.manager.source("p1").await.unwrap();
        let instance = Arc::clone(&handle.source);
        drop(handle);
        f.manager.unload("p1").await.unwrap();

        assert!(!f.manager.is_reclaimed("p1").await);
        assert_eq!(instance.quick_search("Tao Tac", 1).await.unwrap().items.len(), 1);

        drop(instance);
        assert!(f.manager.is_reclaimed("p1").await);
    }

    #[tokio::test]
    async fn test_remove_waits_on_escaped_exporter() {
        let f = fixture();
        f.install("txt", "builtin:txt", ProviderKind::Exporter).await.unwrap();

        let exporter = Arc::clone(&f.manager.exporter("txt").await.unwrap().exporter);
        f.manager.remove("txt").await.unwrap();
        assert!(!f.manager.is_reclaimed("txt").await);

        drop(exporter);
        assert!(f.manager.is_reclaimed("txt").await);
    }

    #[tokio::test]
    async fn test_name_locks_are_pruned() {
        let f = fixture();
        let tracked = |f: &Fixture| f.manager.name_locks.lock().unwrap().len();

        assert!(matches!(f.manager.load("ghost").await, Err(HubError::ProviderNotFound(_))));
        assert!(matches!(f.manager.remove("ghost").await, Err(HubError::ProviderNotFound(_))));
        assert_eq!(tracked(&f), 0);

        f.install("p1", "builtin:mock-p1", ProviderKind::Source).await.unwrap();
        f.manager.unload("p1").await.unwrap();
        f.manager.remove("p1").await.unwrap();
        assert_eq!(tracked(&f), 0);
    }

    #[tokio::test]
    async fn test_remove_with_held_handle_still_deletes_files() {
        let f = fixture();
        f.install("p1", "builtin:mock-p1", ProviderKind::Source).await.unwrap();
        let handle = f.manager.source("p1").await.unwrap();

        f.manager.remove("p1").await.unwrap();
        assert!(!f.manager.plugin_dir().join("p1").exists());
        assert!(!f.manager.is_reclaimed("p1").await);

        drop(handle);
        assert!(f.manager.is_reclaimed("p1").await);
    }

    #[tokio::test]
    async fn test_restore_and_bulk_operations() {
        let f = fixture();
        f.install("p1", "builtin:mock-p1", ProviderKind::Source).await.unwrap();
        f.install("txt", "builtin:txt", ProviderKind::Exporter).await.unwrap();

        let restarted = ProviderManager::new(f.config.clone(), Arc::clone(&f.catalog), f.store.clone()).unwrap();
        assert_eq!(restarted.restore().await.unwrap(), 2);
        assert!(restarted
            .list_installed()
            .await
            .iter()
            .all(|info| info.state == LoadState::Unloaded));

        let report = restarted.load_all().await;
        assert_eq!(report.loaded, vec!["p1", "txt"]);
        assert!(report.failed.is_empty());

        // idempotent
        let again = restarted.load_all().await;
        assert!(again.loaded.is_empty());

        assert!(restarted.exporter("txt").await.is_ok());
        assert!(matches!(
            restarted.exporter("p1").await,
            Err(HubError::ContractNotSatisfied { .. })
        ));

        let handle = restarted.source("p1").await.unwrap();
        let report = restarted.unload_all().await;
        assert_eq!(report.unloaded.len(), 2);
        assert_eq!(report.unreleased, vec!["p1"]);
        drop(handle);

        assert!(restarted.unload_all().await.unloaded.is_empty());
    }

    #[tokio::test]
    async fn test_state_events() {
        let f = fixture();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        f.manager.subscribe(move |event| {
            sink.lock().unwrap().push((event.old_state, event.new_state));
        });

        f.install("p1", "builtin:mock-p1", ProviderKind::Source).await.unwrap();
        f.manager.unload("p1").await.unwrap();
        f.manager.remove("p1").await.unwrap();

        let events = events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                (None, Some(LoadState::Unloaded)),
                (Some(LoadState::Unloaded), Some(LoadState::Loaded)),
                (Some(LoadState::Loaded), Some(LoadState::Unloaded)),
                (Some(LoadState::Unloaded), None),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_loads_of_same_name() {
        let f = fixture();
        f.install("p1", "builtin:mock-p1", ProviderKind::Source).await.unwrap();
        f.manager.unload("p1").await.unwrap();

        let ok = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&f.manager);
            let ok = Arc::clone(&ok);
            tasks.push(tokio::spawn(async move {
                match manager.load("p1").await {
                    Ok(()) => {
                        ok.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(HubError::AlreadyLoaded(_)) => {}
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(ok.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_native_provider_lifecycle() {
        let f = fixture();
        let package = write_native_package(&f.packages(), "nat", &native_fixture(&[]));
        f.manager.install_from_package(&package).await.unwrap();
        assert_eq!(f.manager.state("nat").await, Some(LoadState::Loaded));

        let handle = f.manager.source("nat").await.unwrap();
        let page = handle.source.quick_search("Tao Tac", 1).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(handle.source.detail("missing").await.unwrap().is_none());

        f.manager.unload("nat").await.unwrap();
        assert!(!f.manager.is_reclaimed("nat").await);
        // still mapped for the caller that holds a handle
        assert_eq!(handle.source.search("Tao Tac", 1).await.unwrap().items.len(), 1);

        drop(handle);
        assert!(f.manager.is_reclaimed("nat").await);

        // the library is opened afresh
        f.manager.load("nat").await.unwrap();
        let categories = f.manager.source("nat").await.unwrap().source.list_categories().await.unwrap();
        assert_eq!(categories.len(), 1);

        f.manager.remove("nat").await.unwrap();
        assert!(f.manager.is_reclaimed("nat").await);
        assert!(!f.manager.plugin_dir().join("nat").exists());
    }

    #[tokio::test]
    async fn test_native_contract_mismatch_rolls_back() {
        let f = fixture();

        for (name, feature) in [("unknown", "unknown-contract"), ("silent", "no-contract")] {
            let package = write_native_package(&f.packages(), name, &native_fixture(&[feature]));
            let result = f.manager.install_from_package(&package).await;

            assert!(
                matches!(result, Err(HubError::ContractNotSatisfied { .. })),
                "{} should not satisfy the source contract",
                name
            );
            assert!(f.manager.state(name).await.is_none());
            assert!(!f.manager.plugin_dir().join(name).exists());
            assert!(f.manager.is_reclaimed(name).await);
        }
    }
}
