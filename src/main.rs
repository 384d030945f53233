//! Fiction Hub - provider host
//!
//! Restores and loads the installed providers, applies the install and
//! remove requests given on the command line, then serves until Ctrl-C.

use fiction_hub::{core, db, plugin, SourceService};

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration (handles CLI args, env vars, and config file)
    let (config, cli_args) = match core::Config::load() {
        Ok(loaded) => loaded,
        Err(e) => {
            // Print error to stderr since logging isn't initialized yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _logger = match core::Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e);
        }
    };

    info!("Starting Fiction Hub v{}", fiction_hub::VERSION);
    info!(path = ?config.database.path, "Database configuration");
    info!(plugin_dir = ?config.plugins.plugin_dir, "Plugin configuration");

    info!("Initializing database...");
    let db = Arc::new(db::DatabaseManager::new(
        &config.database.path,
        config.database.connection_pool_size as u32,
        std::time::Duration::from_millis(config.database.busy_timeout),
    )?);
    info!("Database initialized successfully");

    let catalog = Arc::new(plugin::ModuleCatalog::new());
    let store = db::ProviderRepository::new(Arc::clone(&db));
    let manager = Arc::new(plugin::ProviderManager::new(config.plugins.clone(), catalog, store)?);
    let service = SourceService::new(Arc::clone(&manager), config.reconcile.clone());

    manager.restore().await?;
    let report = manager.load_all().await;
    for (name, reason) in &report.failed {
        warn!(provider = %name, reason = %reason, "Provider left unloaded");
    }

    for package in &cli_args.install {
        match manager.install_from_package(package).await {
            Ok(name) => info!(provider = %name, "Installed {}", package.display()),
            Err(e) => error!(package = %package.display(), error = %e, "Install failed"),
        }
    }

    for name in &cli_args.remove {
        if let Err(e) = manager.remove(name).await {
            error!(provider = %name, error = %e, "Remove failed");
        }
    }

    let sources = manager.loaded_sources().await;
    info!(
        installed = manager.list_installed().await.len(),
        sources = sources.len(),
        "Fiction Hub ready, press Ctrl-C to stop"
    );
    drop(sources);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let stats = service.cache().stats();
    info!(entries = stats.entries, hits = stats.hits, misses = stats.misses, "Result cache statistics");
    drop(service);

    let report = manager.unload_all().await;
    info!(
        unloaded = report.unloaded.len(),
        failed = report.failed.len(),
        unreleased = report.unreleased.len(),
        "Providers unloaded"
    );

    Ok(())
}
