//! In-crate mock providers, registered as builtin modules in tests

use super::boundary::{ModuleCatalog, ModuleExport};
use super::manager::ProviderManager;
use super::exporter::NovelExporter;
use super::source::{Category, Chapter, Novel, NovelSource, Paged};
use super::types::{ProviderDescriptor, ProviderKind, ProviderManifest, MANIFEST_FILE};
use crate::core::config::PluginConfig;
use crate::core::error::{HubError, Result};
use crate::db::{DatabaseManager, ProviderRepository};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub enum MockBehavior {
    Ok,
    Fail,
    Hang,
    Delay(Duration),
}

#[derive(Clone)]
pub struct MockSource {
    name: String,
    novels: Vec<Novel>,
    chapters: HashMap<String, Vec<Chapter>>,
    behavior: MockBehavior,
    calls: Arc<AtomicUsize>,
}

impl MockSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            novels: Vec::new(),
            chapters: HashMap::new(),
            behavior: MockBehavior::Ok,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Add a novel with a single author
    pub fn with_novel(mut self, title: &str, slug: &str, author: &str) -> Self {
        let mut novel = Novel::new(title, slug, &self.name).with_author(author);
        novel.categories.push(Category {
            name: "Tien Hiep".to_string(),
            slug: "tien-hiep".to_string(),
        });
        self.novels.push(novel);
        self
    }

    /// Add numbered chapters `1..=count` to a novel
    pub fn with_chapters(mut self, novel_slug: &str, count: u32) -> Self {
        let chapters = (1..=count)
            .map(|n| {
                let mut chapter = Chapter::new(format!("Chuong {}", n), format!("chuong-{}", n), &self.name);
                chapter.number = Some(n);
                chapter.novel_slug = Some(novel_slug.to_string());
                chapter
            })
            .collect();
        self.chapters.insert(novel_slug.to_string(), chapters);
        self
    }

    pub fn with_behavior(mut self, behavior: MockBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared call counter, readable after the source has been handed out
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    async fn enter(&self, operation: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            MockBehavior::Ok => Ok(()),
            MockBehavior::Fail => Err(HubError::provider_failed(&self.name, operation, "site unreachable")),
            MockBehavior::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
            MockBehavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    fn page(&self, items: Vec<Novel>) -> Paged<Novel> {
        Paged::new(items, 1)
    }

    fn matching(&self, query: &str) -> Vec<Novel> {
        let query = query.to_lowercase();
        self.novels
            .iter()
            .filter(|n| n.title.to_lowercase().contains(&query))
            .cloned()
            .collect()
    }

    fn with_content(&self, chapter: &Chapter) -> Chapter {
        let mut chapter = chapter.clone();
        chapter.content = Some(format!("{} content from {}", chapter.title, self.name));
        chapter
    }
}

#[async_trait]
impl NovelSource for MockSource {
    async fn search(&self, query: &str, _page: u32) -> Result<Paged<Novel>> {
        self.enter("search").await?;
        Ok(self.page(self.matching(query)))
    }

    async fn quick_search(&self, query: &str, _page: u32) -> Result<Paged<Novel>> {
        self.enter("quick_search").await?;
        Ok(self.page(self.matching(query)))
    }

    async fn list_hot(&self, _page: u32) -> Result<Paged<Novel>> {
        self.enter("list_hot").await?;
        Ok(self.page(self.novels.clone()))
    }

    async fn list_latest(&self, _page: u32) -> Result<Paged<Novel>> {
        self.enter("list_latest").await?;
        Ok(self.page(self.novels.iter().rev().cloned().collect()))
    }

    async fn list_completed(&self, _page: u32) -> Result<Paged<Novel>> {
        self.enter("list_completed").await?;
        Ok(Paged::empty())
    }

    async fn list_by_author(&self, author_slug: &str, _page: u32) -> Result<Paged<Novel>> {
        self.enter("list_by_author").await?;
        let items = self
            .novels
            .iter()
            .filter(|n| n.authors.iter().any(|a| a.name.eq_ignore_ascii_case(author_slug)))
            .cloned()
            .collect();
        Ok(self.page(items))
    }

    async fn list_by_category(&self, category_slug: &str, _page: u32) -> Result<Paged<Novel>> {
        self.enter("list_by_category").await?;
        let items = self
            .novels
            .iter()
            .filter(|n| n.categories.iter().any(|c| c.slug == category_slug))
            .cloned()
            .collect();
        Ok(self.page(items))
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        self.enter("list_categories").await?;
        let mut categories: Vec<Category> = self.novels.iter().flat_map(|n| n.categories.clone()).collect();
        categories.dedup();
        Ok(categories)
    }

    async fn detail(&self, slug: &str) -> Result<Option<Novel>> {
        self.enter("detail").await?;
        Ok(self.novels.iter().find(|n| n.slug == slug).cloned())
    }

    async fn list_chapters(&self, slug: &str, _novel_id: Option<&str>) -> Result<Vec<Chapter>> {
        self.enter("list_chapters").await?;
        Ok(self.chapters.get(slug).cloned().unwrap_or_default())
    }

    async fn chapter_content(&self, novel_slug: &str, chapter_slug: &str) -> Result<Option<Chapter>> {
        self.enter("chapter_content").await?;
        Ok(self
            .chapters
            .get(novel_slug)
            .and_then(|chapters| chapters.iter().find(|c| c.slug == chapter_slug))
            .map(|c| self.with_content(c)))
    }

    async fn locate_chapter_by_number(
        &self,
        slug: &str,
        _novel_id: Option<&str>,
        number: u32,
    ) -> Result<Option<Chapter>> {
        self.enter("locate_chapter_by_number").await?;
        Ok(self
            .chapters
            .get(slug)
            .and_then(|chapters| chapters.iter().find(|c| c.number == Some(number)))
            .map(|c| self.with_content(c)))
    }
}

/// Plain-text exporter
#[derive(Default)]
pub struct MockExporter;

#[async_trait]
impl NovelExporter for MockExporter {
    fn file_extension(&self) -> &str {
        "txt"
    }

    async fn export(
        &self,
        novel: &Novel,
        chapters: &[Chapter],
        output: &mut (dyn std::io::Write + Send),
    ) -> Result<String> {
        writeln!(output, "{}", novel.title)?;
        for chapter in chapters {
            writeln!(output, "{}", chapter.title)?;
        }
        Ok("txt".to_string())
    }
}

pub fn mock_descriptor(name: &str, module: &str, kind: ProviderKind) -> ProviderDescriptor {
    let manifest = ProviderManifest {
        name: name.to_string(),
        module: module.to_string(),
        version: semver::Version::new(1, 0, 0),
        author: Some("tests".to_string()),
        description: None,
        kind,
        file_extension: (kind == ProviderKind::Exporter).then(|| "txt".to_string()),
    };
    ProviderDescriptor::from_manifest(manifest, None)
}

/// Register a source under `builtin:<id>` that yields clones of `source`
pub fn register_source(catalog: &ModuleCatalog, id: &str, source: MockSource) {
    catalog.register(id, move || vec![ModuleExport::Source(Arc::new(source.clone()))]);
}

pub fn register_exporter(catalog: &ModuleCatalog, id: &str) {
    catalog.register(id, || vec![ModuleExport::Exporter(Arc::new(MockExporter))]);
}

fn manifest_json(name: &str, module: &str, kind: ProviderKind) -> String {
    let extension = match kind {
        ProviderKind::Exporter => "\"txt\"",
        ProviderKind::Source => "null",
    };
    format!(
        r#"{{ "name": "{}", "module": "{}", "version": "1.0.0", "author": "tests",
             "description": "mock provider", "kind": "{}", "file_extension": {} }}"#,
        name, module, kind, extension
    )
}

/// Write an unpacked package directory under `root`
pub fn write_package_dir(root: &Path, name: &str, module: &str, kind: ProviderKind) -> PathBuf {
    let dir = root.join(format!("{}-package", name));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(MANIFEST_FILE), manifest_json(name, module, kind)).unwrap();
    std::fs::write(dir.join("README.md"), format!("# {}\n", name)).unwrap();
    dir
}

/// Write a zip package under `root`, with a debug-symbol file that must not be installed
pub fn write_package_zip(root: &Path, name: &str, module: &str, kind: ProviderKind) -> PathBuf {
    let path = root.join(format!("{}.zip", name));
    let file = std::fs::File::create(&path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();

    zip.start_file(MANIFEST_FILE, options).unwrap();
    zip.write_all(manifest_json(name, module, kind).as_bytes()).unwrap();
    zip.start_file("README.md", options).unwrap();
    zip.write_all(b"mock").unwrap();
    zip.start_file(format!("{}.pdb", name), options).unwrap();
    zip.write_all(b"symbols").unwrap();
    zip.start_file(format!("{}.dSYM/Contents/Info.plist", name), options).unwrap();
    zip.write_all(b"plist").unwrap();
    zip.finish().unwrap();

    path
}

/// Manager over `root` with one installed, loaded provider per mock source
///
/// Each source is installed under its own name from the builtin module
/// `mock-<name>`; exporters are installed from `builtin:<name>`.
pub async fn manager_with_providers(root: &Path, sources: Vec<MockSource>, exporters: &[&str]) -> Arc<ProviderManager> {
    let catalog = Arc::new(ModuleCatalog::new());
    let store = ProviderRepository::new(Arc::new(DatabaseManager::new_in_memory().unwrap()));
    let config = PluginConfig {
        plugin_dir: root.join("providers"),
        reclaim_retries: 2,
        reclaim_interval_ms: 5,
    };
    let manager = Arc::new(ProviderManager::new(config, Arc::clone(&catalog), store).unwrap());
    let packages = root.join("packages");

    for source in sources {
        let name = source.name().to_string();
        let module = format!("mock-{}", name);
        register_source(&catalog, &module, source);
        let package = write_package_dir(&packages, &name, &format!("builtin:{}", module), ProviderKind::Source);
        manager.install_from_package(&package).await.unwrap();
    }

    for name in exporters {
        register_exporter(&catalog, name);
        let package = write_package_dir(&packages, name, &format!("builtin:{}", name), ProviderKind::Exporter);
        manager.install_from_package(&package).await.unwrap();
    }

    manager
}

static NATIVE_FIXTURES: Mutex<Vec<(String, PathBuf)>> = Mutex::new(Vec::new());

/// Build `fixtures/native-provider` with the given cargo features and return the library path
///
/// Each feature set is built once per test run, into its own target directory.
pub fn native_fixture(features: &[&str]) -> PathBuf {
    let key = if features.is_empty() {
        "default".to_string()
    } else {
        features.join("+")
    };

    let mut built = NATIVE_FIXTURES.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some((_, path)) = built.iter().find(|(k, _)| *k == key) {
        return path.clone();
    }

    let root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let target_dir = root.join("target").join("native-fixtures").join(&key);
    let mut command = Command::new(env!("CARGO"));
    command
        .arg("build")
        .arg("--quiet")
        .arg("--offline")
        .arg("--manifest-path")
        .arg(root.join("fixtures").join("native-provider").join("Cargo.toml"))
        .arg("--target-dir")
        .arg(&target_dir)
        .env_remove("CARGO_BUILD_TARGET");
    if !features.is_empty() {
        command.arg("--features").arg(features.join(","));
    }

    let status = command.status().expect("failed to run cargo for the native fixture");
    assert!(status.success(), "native fixture build failed for features {:?}", features);

    let library = target_dir.join("debug").join(format!(
        "{}native_fixture.{}",
        std::env::consts::DLL_PREFIX,
        std::env::consts::DLL_EXTENSION
    ));
    assert!(library.is_file(), "missing fixture library {}", library.display());

    built.push((key, library.clone()));
    library
}

/// Write a package directory whose module is a copy of `library`
pub fn write_native_package(root: &Path, name: &str, library: &Path) -> PathBuf {
    let file_name = library
        .file_name()
        .and_then(|f| f.to_str())
        .expect("library path has a file name");
    let dir = write_package_dir(root, name, file_name, ProviderKind::Source);
    std::fs::copy(library, dir.join(file_name)).unwrap();
    dir
}
