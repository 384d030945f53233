//! Provider package installation
//!
//! Packages are zip archives or plain directories carrying a `provider.json`
//! manifest and the module files. Installation happens in two phases: the
//! package is first staged under `<plugin_dir>/.staging/<uuid>/`, then the
//! staged tree is moved to `<plugin_dir>/<name>/` once the manager has
//! checked the name. A staged package that is never committed removes itself
//! when dropped.

use super::types::{ProviderManifest, MANIFEST_FILE};
use crate::core::error::{HubError, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const STAGING_DIR: &str = ".staging";

/// Debug-symbol files are never installed
pub fn is_debug_symbol(path: &Path) -> bool {
    let by_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("pdb") || ext.eq_ignore_ascii_case("debug"));

    by_extension
        || path.components().any(|c| {
            c.as_os_str()
                .to_str()
                .map_or(false, |s| s.to_ascii_lowercase().ends_with(".dsym"))
        })
}

/// Stages packages and owns the on-disk layout of installed providers
#[derive(Debug, Clone)]
pub struct PackageInstaller {
    plugin_dir: PathBuf,
}

impl PackageInstaller {
    pub fn new(plugin_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&plugin_dir)?;
        Ok(Self { plugin_dir })
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    /// Directory an installed provider lives in
    pub fn install_dir(&self, name: &str) -> PathBuf {
        self.plugin_dir.join(name)
    }

    fn staging_root(&self) -> PathBuf {
        self.plugin_dir.join(STAGING_DIR)
    }

    /// Extract or copy a package into a fresh staging directory and read its manifest
    ///
    /// A zip archive is deleted once it has been extracted.
    pub fn stage(&self, package_path: &Path) -> Result<StagedPackage> {
        info!("Staging provider package: {}", package_path.display());

        if !package_path.exists() {
            return Err(HubError::PackageError(format!(
                "package not found: {}",
                package_path.display()
            )));
        }

        let checksum = calculate_checksum(package_path)?;
        let dir = self.staging_root().join(uuid::Uuid::new_v4().to_string());
        fs::create_dir_all(&dir)?;

        // From here on the guard cleans the staging directory on any error
        let mut staged = StagedPackage {
            dir,
            root: PathBuf::new(),
            manifest: None,
            checksum,
            committed: false,
        };

        if package_path.is_dir() {
            copy_package_dir(package_path, &staged.dir)?;
        } else {
            extract_zip(package_path, &staged.dir)?;
            if let Err(e) = fs::remove_file(package_path) {
                warn!(error = %e, "Failed to delete extracted package {}", package_path.display());
            }
        }

        staged.root = locate_package_root(&staged.dir)?;
        let content = fs::read(staged.root.join(MANIFEST_FILE))?;
        staged.manifest = Some(ProviderManifest::parse(&content)?);

        debug!(
            "Package staged at {} (checksum {})",
            staged.dir.display(),
            staged.checksum
        );
        Ok(staged)
    }

    /// Remove everything left in the staging area, e.g. after a crash
    pub fn purge_staging(&self) -> Result<()> {
        let root = self.staging_root();
        if root.exists() {
            fs::remove_dir_all(&root)?;
        }
        Ok(())
    }
}

/// A package extracted into staging, not yet installed
#[derive(Debug)]
pub struct StagedPackage {
    dir: PathBuf,
    root: PathBuf,
    manifest: Option<ProviderManifest>,
    checksum: String,
    committed: bool,
}

impl StagedPackage {
    pub fn manifest(&self) -> Result<&ProviderManifest> {
        self.manifest
            .as_ref()
            .ok_or_else(|| HubError::ManifestMissing(self.dir.display().to_string()))
    }

    /// SHA-256 of the original package
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Move the staged files to `target`, which must not exist yet
    pub fn commit_to(mut self, target: &Path) -> Result<()> {
        if target.exists() {
            return Err(HubError::PackageError(format!(
                "install directory already exists: {}",
                target.display()
            )));
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&self.root, target)?;
        self.committed = true;

        // A nested package root leaves its empty wrapper behind
        if self.dir.exists() {
            let _ = fs::remove_dir_all(&self.dir);
        }

        info!("Provider files installed to {}", target.display());
        Ok(())
    }
}

impl Drop for StagedPackage {
    fn drop(&mut self) {
        if !self.committed && self.dir.exists() {
            debug!("Discarding staged package {}", self.dir.display());
            if let Err(e) = fs::remove_dir_all(&self.dir) {
                warn!(error = %e, "Failed to clean staging directory {}", self.dir.display());
            }
        }
    }
}

/// The staged tree itself, or its single subdirectory when the archive wraps
/// everything in one top-level folder
fn locate_package_root(staging: &Path) -> Result<PathBuf> {
    if staging.join(MANIFEST_FILE).is_file() {
        return Ok(staging.to_path_buf());
    }

    let entries: Vec<PathBuf> = fs::read_dir(staging)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();

    if let [only] = entries.as_slice() {
        if only.is_dir() && only.join(MANIFEST_FILE).is_file() {
            return Ok(only.clone());
        }
    }

    Err(HubError::ManifestMissing(format!(
        "{} not found in package",
        MANIFEST_FILE
    )))
}

/// SHA-256 over a zip file, or over a directory's files in path order
fn calculate_checksum(package_path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();

    if package_path.is_dir() {
        for entry in walkdir::WalkDir::new(package_path)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            if let Ok(relative) = entry.path().strip_prefix(package_path) {
                hasher.update(relative.to_string_lossy().as_bytes());
            }
            hasher.update(fs::read(entry.path())?);
        }
    } else {
        let mut file = fs::File::open(package_path)?;
        let mut buffer = [0u8; 8192];
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
    }

    Ok(format!("{:x}", hasher.finalize()))
}

fn copy_package_dir(source: &Path, target: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(source).follow_links(false).min_depth(1) {
        let entry = entry.map_err(|e| HubError::PackageError(format!("failed to read package: {}", e)))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| HubError::PackageError(e.to_string()))?;

        if is_debug_symbol(relative) {
            continue;
        }

        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &destination)?;
        }
    }
    Ok(())
}

fn extract_zip(source: &Path, target: &Path) -> Result<()> {
    let file = fs::File::open(source)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| HubError::PackageError(format!("failed to open zip archive: {}", e)))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| HubError::PackageError(format!("failed to read zip entry: {}", e)))?;

        let relative = match entry.enclosed_name() {
            Some(path) => path.to_path_buf(),
            None => {
                warn!("Skipping zip entry with unsafe path: {}", entry.name());
                continue;
            }
        };

        if is_debug_symbol(&relative) {
            debug!("Discarding debug symbols: {}", relative.display());
            continue;
        }

        let outpath = target.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&outpath)?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = fs::File::create(&outpath)?;
        std::io::copy(&mut entry, &mut outfile)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&outpath, fs::Permissions::from_mode(mode))?;
            }
        }
    }

    Ok(())
}
