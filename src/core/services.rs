//! Application services
//!
//! [`SourceService`] is the entry point for callers that address providers
//! by name. It resolves a handle through the manager, applies the provider
//! deadline to every call and memoizes first-page listings and category
//! lists in the shared result cache.

use crate::cache::{listing_key, CacheValue, ResultCache};
use crate::core::config::ReconcileConfig;
use crate::core::error::{HubError, Result};
use crate::plugin::manager::ProviderManager;
use crate::plugin::registry::SourceHandle;
use crate::plugin::source::{Category, Chapter, Novel, NovelSource, Paged};
use crate::reconcile::{ReconciliationEngine, StrippedNovel};
use std::collections::HashMap;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Paginated novel listings a source offers
#[derive(Debug, Clone, Copy)]
pub enum Listing<'a> {
    Hot,
    Latest,
    Completed,
    ByAuthor(&'a str),
    ByCategory(&'a str),
}

impl<'a> Listing<'a> {
    pub fn operation(&self) -> &'static str {
        match self {
            Listing::Hot => "hot",
            Listing::Latest => "latest",
            Listing::Completed => "completed",
            Listing::ByAuthor(_) => "author",
            Listing::ByCategory(_) => "category",
        }
    }

    fn param(&self) -> Option<&'a str> {
        match self {
            Listing::ByAuthor(slug) | Listing::ByCategory(slug) => Some(*slug),
            _ => None,
        }
    }

    async fn fetch(&self, source: &dyn NovelSource, page: u32) -> Result<Paged<Novel>> {
        match self {
            Listing::Hot => source.list_hot(page).await,
            Listing::Latest => source.list_latest(page).await,
            Listing::Completed => source.list_completed(page).await,
            Listing::ByAuthor(slug) => source.list_by_author(slug, page).await,
            Listing::ByCategory(slug) => source.list_by_category(slug, page).await,
        }
    }
}

pub struct SourceService {
    manager: Arc<ProviderManager>,
    cache: Arc<ResultCache>,
    engine: ReconciliationEngine,
    config: ReconcileConfig,
}

impl SourceService {
    /// Create the service and subscribe its cache to provider lifecycle events
    pub fn new(manager: Arc<ProviderManager>, config: ReconcileConfig) -> Self {
        let cache = Arc::new(ResultCache::new(config.cache_max_entries));

        let subscribed = Arc::clone(&cache);
        manager.subscribe(move |event| {
            let cleared = subscribed.clear();
            debug!(provider = %event.provider, cleared, "Result cache cleared after provider state change");
        });

        let engine = ReconciliationEngine::new(Arc::clone(&manager), Arc::clone(&cache), config.clone());
        Self {
            manager,
            cache,
            engine,
            config,
        }
    }

    pub fn manager(&self) -> &Arc<ProviderManager> {
        &self.manager
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    async fn source(&self, name: &str) -> Result<SourceHandle> {
        if name.trim().is_empty() {
            return Err(HubError::InsufficientInput("source name cannot be empty".to_string()));
        }
        self.manager.source(name).await
    }

    async fn timed<T>(&self, provider: &str, operation: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        let deadline = self.config.provider_timeout();
        tokio::time::timeout(deadline, call).await.map_err(|_| {
            HubError::Timeout(format!("{} on provider {} exceeded {:?}", operation, provider, deadline))
        })?
    }

    fn listing_ttl(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.config.listing_cache_ttl_secs),
            Duration::from_secs(self.config.listing_cache_sliding_secs),
        )
    }

    pub async fn search(&self, source: &str, query: &str, page: u32) -> Result<Paged<Novel>> {
        if query.trim().is_empty() {
            return Err(HubError::InsufficientInput("search query cannot be empty".to_string()));
        }
        let handle = self.source(source).await?;
        self.timed(source, "search", handle.source.search(query.trim(), page)).await
    }

    pub async fn quick_search(&self, source: &str, query: &str, page: u32) -> Result<Paged<Novel>> {
        if query.trim().is_empty() {
            return Err(HubError::InsufficientInput("search query cannot be empty".to_string()));
        }
        let handle = self.source(source).await?;
        self.timed(source, "quick_search", handle.source.quick_search(query.trim(), page))
            .await
    }

    /// Fetch a listing page; page 1 is served from the cache when possible
    pub async fn listing(&self, source: &str, listing: Listing<'_>, page: u32) -> Result<Paged<Novel>> {
        let handle = self.source(source).await?;
        let key = (page == 1).then(|| listing_key(listing.operation(), source, listing.param()));

        if let Some(key) = &key {
            if let Some(CacheValue::Listing(cached)) = self.cache.get(key) {
                debug!(provider = %source, key = %key, "Listing cache hit");
                return Ok(cached);
            }
        }

        let result = self
            .timed(source, listing.operation(), listing.fetch(handle.source.as_ref(), page))
            .await?;

        if let Some(key) = key {
            let (ttl, sliding) = self.listing_ttl();
            self.cache.set(key, CacheValue::Listing(result.clone()), ttl, sliding);
        }
        Ok(result)
    }

    pub async fn list_hot(&self, source: &str, page: u32) -> Result<Paged<Novel>> {
        self.listing(source, Listing::Hot, page).await
    }

    pub async fn list_latest(&self, source: &str, page: u32) -> Result<Paged<Novel>> {
        self.listing(source, Listing::Latest, page).await
    }

    pub async fn list_completed(&self, source: &str, page: u32) -> Result<Paged<Novel>> {
        self.listing(source, Listing::Completed, page).await
    }

    pub async fn list_by_author(&self, source: &str, author_slug: &str, page: u32) -> Result<Paged<Novel>> {
        self.listing(source, Listing::ByAuthor(author_slug), page).await
    }

    pub async fn list_by_category(&self, source: &str, category_slug: &str, page: u32) -> Result<Paged<Novel>> {
        self.listing(source, Listing::ByCategory(category_slug), page).await
    }

    pub async fn list_categories(&self, source: &str) -> Result<Vec<Category>> {
        let handle = self.source(source).await?;
        let key = listing_key("categories", source, None);

        if let Some(CacheValue::Categories(cached)) = self.cache.get(&key) {
            return Ok(cached);
        }

        let categories = self
            .timed(source, "list_categories", handle.source.list_categories())
            .await?;
        let (ttl, sliding) = self.listing_ttl();
        self.cache
            .set(key, CacheValue::Categories(categories.clone()), ttl, sliding);
        Ok(categories)
    }

    pub async fn detail(&self, source: &str, slug: &str) -> Result<Option<Novel>> {
        let handle = self.source(source).await?;
        self.timed(source, "detail", handle.source.detail(slug)).await
    }

    pub async fn list_chapters(&self, source: &str, slug: &str, novel_id: Option<&str>) -> Result<Vec<Chapter>> {
        let handle = self.source(source).await?;
        self.timed(source, "list_chapters", handle.source.list_chapters(slug, novel_id))
            .await
    }

    pub async fn chapter_content(&self, source: &str, novel_slug: &str, chapter_slug: &str) -> Result<Option<Chapter>> {
        let handle = self.source(source).await?;
        self.timed(
            source,
            "chapter_content",
            handle.source.chapter_content(novel_slug, chapter_slug),
        )
        .await
    }

    pub async fn locate_chapter_by_number(
        &self,
        source: &str,
        slug: &str,
        novel_id: Option<&str>,
        number: u32,
    ) -> Result<Option<Chapter>> {
        let handle = self.source(source).await?;
        self.timed(
            source,
            "locate_chapter_by_number",
            handle.source.locate_chapter_by_number(slug, novel_id, number),
        )
        .await
    }

    pub async fn find_novel_elsewhere(&self, anchor: &str, novel: &Novel) -> Option<HashMap<String, StrippedNovel>> {
        self.engine.find_novel_elsewhere(anchor, novel).await
    }

    pub async fn find_chapter_elsewhere(
        &self,
        novels: &HashMap<String, StrippedNovel>,
        chapter: &Chapter,
    ) -> Option<HashMap<String, Chapter>> {
        self.engine.find_chapter_elsewhere(novels, chapter).await
    }

    /// Render a novel through an exporter provider, returning the file extension written
    pub async fn export(
        &self,
        exporter: &str,
        novel: &Novel,
        chapters: &[Chapter],
        output: &mut (dyn Write + Send),
    ) -> Result<String> {
        let handle = self.manager.exporter(exporter).await?;
        let extension = handle.exporter.export(novel, chapters, output).await?;
        debug!(provider = %exporter, extension = %extension, chapters = chapters.len(), "Novel exported");
        Ok(extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::testing::{manager_with_providers, MockSource};
    use std::sync::atomic::Ordering;

    async fn service(root: &std::path::Path, sources: Vec<MockSource>) -> SourceService {
        let manager = manager_with_providers(root, sources, &["txt"]).await;
        SourceService::new(manager, ReconcileConfig::default())
    }

    #[tokio::test]
    async fn test_first_page_listing_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = MockSource::new("p1").with_novel("Tao Tac", "tao-tac", "X");
        let calls = p1.calls();
        let service = service(dir.path(), vec![p1]).await;

        let first = service.list_hot("p1", 1).await.unwrap();
        let second = service.list_hot("p1", 1).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        service.list_hot("p1", 2).await.unwrap();
        service.list_hot("p1", 2).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let by_category = service.list_by_category("p1", "tien-hiep", 1).await.unwrap();
        assert_eq!(by_category.items.len(), 1);
        service.list_categories("p1").await.unwrap();
        service.list_categories("p1").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_lifecycle_events_clear_cache() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), vec![MockSource::new("p1").with_novel("Tao Tac", "tao-tac", "X")]).await;

        service.list_latest("p1", 1).await.unwrap();
        assert!(!service.cache().is_empty());

        service.manager().unload("p1").await.unwrap();
        assert!(service.cache().is_empty());
        assert!(matches!(service.list_latest("p1", 1).await, Err(HubError::NotLoaded(_))));
    }

    #[tokio::test]
    async fn test_operations_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(
            dir.path(),
            vec![MockSource::new("p1")
                .with_novel("Tao Tac", "tao-tac", "X")
                .with_chapters("tao-tac", 3)],
        )
        .await;

        assert_eq!(service.search("p1", "tao", 1).await.unwrap().items.len(), 1);
        assert!(service.detail("p1", "tao-tac").await.unwrap().is_some());
        assert!(service.detail("p1", "missing").await.unwrap().is_none());
        assert_eq!(service.list_chapters("p1", "tao-tac", None).await.unwrap().len(), 3);

        let chapter = service
            .chapter_content("p1", "tao-tac", "chuong-2")
            .await
            .unwrap()
            .unwrap();
        assert!(chapter.content.is_some());

        let located = service
            .locate_chapter_by_number("p1", "tao-tac", None, 3)
            .await
            .unwrap();
        assert_eq!(located.and_then(|c| c.number), Some(3));

        assert!(matches!(
            service.search("p1", "  ", 1).await,
            Err(HubError::InsufficientInput(_))
        ));
        assert!(matches!(
            service.detail("ghost", "tao-tac").await,
            Err(HubError::ProviderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_find_elsewhere_forwarding() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(
            dir.path(),
            vec![
                MockSource::new("p1").with_novel("Tao Tac", "tao-tac", "X"),
                MockSource::new("p2")
                    .with_novel("Tao Tac", "tao-tac-p2", "X")
                    .with_chapters("tao-tac-p2", 4),
            ],
        )
        .await;

        let anchor = Novel::new("Tao Tac", "tao-tac", "p1").with_author("X");
        let novels = service.find_novel_elsewhere("p1", &anchor).await.unwrap();
        assert_eq!(novels["p2"].slug, "tao-tac-p2");

        let mut chapter = Chapter::new("Chuong 4", "chuong-4", "p1");
        chapter.novel_slug = Some("tao-tac".to_string());
        chapter.number = Some(4);

        let chapters = service.find_chapter_elsewhere(&novels, &chapter).await.unwrap();
        assert_eq!(chapters["p2"].slug, "chuong-4");
    }

    #[tokio::test]
    async fn test_export() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), vec![]).await;

        let novel = Novel::new("Tao Tac", "tao-tac", "p1");
        let chapters = vec![Chapter::new("Chuong 1", "chuong-1", "p1")];
        let mut output = Vec::new();

        let extension = service.export("txt", &novel, &chapters, &mut output).await.unwrap();
        assert_eq!(extension, "txt");
        assert_eq!(String::from_utf8(output).unwrap(), "Tao Tac\nChuong 1\n");

        assert!(matches!(
            service.export("ghost", &novel, &chapters, &mut Vec::<u8>::new()).await,
            Err(HubError::ProviderNotFound(_))
        ));
    }
}
