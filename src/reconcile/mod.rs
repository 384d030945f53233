//! Cross-source reconciliation
//!
//! Finds the same novel, or the same chapter, on the other loaded sources.
//! Each lookup fans out to the participating providers concurrently. Every
//! provider call is bounded by a deadline and can be abandoned through a
//! cancellation token; a provider that fails, hangs or finds nothing is
//! logged and left out of the result without affecting the others.

pub mod matching;

use crate::cache::{CacheValue, ResultCache};
use crate::core::config::ReconcileConfig;
use crate::core::error::{HubError, Result};
use crate::plugin::manager::ProviderManager;
use crate::plugin::registry::SourceHandle;
use crate::plugin::source::{Chapter, Novel};
use futures::StreamExt;
use matching::{match_key, titles_match};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use matching::StrippedNovel;

pub struct ReconciliationEngine {
    manager: Arc<ProviderManager>,
    cache: Arc<ResultCache>,
    config: ReconcileConfig,
}

impl ReconciliationEngine {
    pub fn new(manager: Arc<ProviderManager>, cache: Arc<ResultCache>, config: ReconcileConfig) -> Self {
        Self { manager, cache, config }
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Find `novel` on every loaded source other than `anchor`
    ///
    /// Returns `None` when the novel lacks a title or an author. Otherwise
    /// returns the matches keyed by provider name, never including `anchor`.
    pub async fn find_novel_elsewhere(&self, anchor: &str, novel: &Novel) -> Option<HashMap<String, StrippedNovel>> {
        self.find_novel_elsewhere_with_cancel(anchor, novel, &CancellationToken::new())
            .await
    }

    /// Like [`find_novel_elsewhere`](Self::find_novel_elsewhere), abandoning
    /// outstanding provider calls once `cancel` fires
    ///
    /// Matches collected before cancellation are returned but not cached.
    pub async fn find_novel_elsewhere_with_cancel(
        &self,
        anchor: &str,
        novel: &Novel,
        cancel: &CancellationToken,
    ) -> Option<HashMap<String, StrippedNovel>> {
        let (title, author) = match novel_query(novel) {
            Ok(query) => query,
            Err(e) => {
                debug!(anchor = %anchor, error = %e, "Skipping novel reconciliation");
                return None;
            }
        };

        let key = match_key(&title, &author);
        if let Some(CacheValue::Reconciliation(cached)) = self.cache.get(&key) {
            debug!(anchor = %anchor, key = %key, "Reconciliation cache hit");
            return Some(without_anchor(cached, anchor));
        }

        let sources: Vec<SourceHandle> = self
            .manager
            .loaded_sources()
            .await
            .into_iter()
            .filter(|handle| handle.name != anchor)
            .collect();

        let matches = Mutex::new(HashMap::new());
        futures::stream::iter(sources)
            .map(|handle| {
                let (title, author, matches) = (&title, &author, &matches);
                async move {
                    let candidate = self
                        .guarded(&handle.name, "quick_search", cancel, handle.source.quick_search(title, 1))
                        .await;

                    match candidate {
                        Ok(page) => match page.items.iter().find(|n| titles_match(&n.title, title)) {
                            Some(found) => {
                                debug!(provider = %handle.name, slug = %found.slug, "Novel matched");
                                lock(matches).insert(handle.name.clone(), StrippedNovel::from_novel(found, author));
                            }
                            None => debug!(provider = %handle.name, title = %title, "No matching novel"),
                        },
                        Err(e) => warn!(provider = %handle.name, error = %e, "Novel search failed"),
                    }
                }
            })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect::<Vec<()>>()
            .await;

        let mut found = matches.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        info!(anchor = %anchor, title = %title, matches = found.len(), "Novel reconciliation finished");

        if cancel.is_cancelled() {
            return Some(without_anchor(found, anchor));
        }

        found.insert(anchor.to_string(), StrippedNovel::from_novel(novel, &author));
        self.cache.set(
            key,
            CacheValue::Reconciliation(found.clone()),
            Duration::from_secs(self.config.match_cache_ttl_secs),
            Duration::from_secs(self.config.match_cache_sliding_secs),
        );

        Some(without_anchor(found, anchor))
    }

    /// Find the chapter with `chapter`'s number in the novels of other sources
    ///
    /// `novels` maps provider names to that provider's copy of the novel,
    /// as returned by [`find_novel_elsewhere`](Self::find_novel_elsewhere).
    /// Returns `None` when the chapter lacks its source, novel or number, or
    /// when no other source is known.
    pub async fn find_chapter_elsewhere(
        &self,
        novels: &HashMap<String, StrippedNovel>,
        chapter: &Chapter,
    ) -> Option<HashMap<String, Chapter>> {
        self.find_chapter_elsewhere_with_cancel(novels, chapter, &CancellationToken::new())
            .await
    }

    pub async fn find_chapter_elsewhere_with_cancel(
        &self,
        novels: &HashMap<String, StrippedNovel>,
        chapter: &Chapter,
        cancel: &CancellationToken,
    ) -> Option<HashMap<String, Chapter>> {
        let number = match chapter_query(novels, chapter) {
            Ok(number) => number,
            Err(e) => {
                debug!(anchor = %chapter.source, error = %e, "Skipping chapter reconciliation");
                return None;
            }
        };

        let mut targets = Vec::new();
        for (name, novel) in novels {
            if *name == chapter.source || novel.slug.trim().is_empty() {
                continue;
            }
            match self.manager.source(name).await {
                Ok(handle) => targets.push((handle, novel.slug.clone())),
                Err(e) => debug!(provider = %name, error = %e, "Source unavailable for chapter lookup"),
            }
        }

        let located = Mutex::new(HashMap::new());
        futures::stream::iter(targets)
            .map(|(handle, slug)| {
                let located = &located;
                async move {
                    let result = self
                        .guarded(
                            &handle.name,
                            "locate_chapter_by_number",
                            cancel,
                            handle.source.locate_chapter_by_number(&slug, None, number),
                        )
                        .await;

                    match result {
                        Ok(Some(found)) => {
                            lock(located).insert(handle.name.clone(), found);
                        }
                        Ok(None) => debug!(provider = %handle.name, number, "Chapter not found"),
                        Err(e) => warn!(provider = %handle.name, error = %e, "Chapter lookup failed"),
                    }
                }
            })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect::<Vec<()>>()
            .await;

        let located = located.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        info!(anchor = %chapter.source, number, found = located.len(), "Chapter reconciliation finished");
        Some(located)
    }

    /// Run one provider call under the deadline and the cancellation token
    async fn guarded<T, F>(&self, provider: &str, operation: &str, cancel: &CancellationToken, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let deadline = self.config.provider_timeout();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HubError::TaskError(format!(
                "{} on provider {} cancelled",
                operation, provider
            ))),
            result = tokio::time::timeout(deadline, call) => match result {
                Ok(result) => result,
                Err(_) => Err(HubError::Timeout(format!(
                    "{} on provider {} exceeded {:?}",
                    operation, provider, deadline
                ))),
            },
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn without_anchor(mut matches: HashMap<String, StrippedNovel>, anchor: &str) -> HashMap<String, StrippedNovel> {
    matches.remove(anchor);
    matches
}

/// Title and primary author of a novel, both non-blank
fn novel_query(novel: &Novel) -> Result<(String, String)> {
    let title = novel.title.trim();
    if title.is_empty() {
        return Err(HubError::InsufficientInput("novel has no title".to_string()));
    }

    let author = novel
        .primary_author()
        .map(|a| a.name.trim())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| HubError::InsufficientInput(format!("novel '{}' has no author", title)))?;

    Ok((title.to_string(), author.to_string()))
}

fn chapter_query(novels: &HashMap<String, StrippedNovel>, chapter: &Chapter) -> Result<u32> {
    if chapter.source.trim().is_empty() {
        return Err(HubError::InsufficientInput("chapter has no source".to_string()));
    }
    if chapter.novel_slug.as_deref().map_or(true, |slug| slug.trim().is_empty()) {
        return Err(HubError::InsufficientInput("chapter has no novel slug".to_string()));
    }
    let number = chapter
        .number
        .ok_or_else(|| HubError::InsufficientInput("chapter has no number".to_string()))?;
    if !novels.keys().any(|name| *name != chapter.source) {
        return Err(HubError::InsufficientInput("no other source to search".to_string()));
    }
    Ok(number)
}
