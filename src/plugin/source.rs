//! Source provider interface
//!
//! Every site-specific provider implements [`NovelSource`]. Lookups that can
//! legitimately find nothing return `Ok(None)`; `Err` is reserved for the
//! provider actually failing (network, parsing, error codes from native code).

use crate::core::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Capability contract for novel sources
#[async_trait]
pub trait NovelSource: Send + Sync {
    /// Full search by keyword
    ///
    /// # Arguments
    /// * `query` - Search keyword
    /// * `page` - Page number (1-indexed)
    async fn search(&self, query: &str, page: u32) -> Result<Paged<Novel>>;

    /// Lightweight search used for cross-source matching
    async fn quick_search(&self, query: &str, page: u32) -> Result<Paged<Novel>>;

    async fn list_hot(&self, page: u32) -> Result<Paged<Novel>>;

    async fn list_latest(&self, page: u32) -> Result<Paged<Novel>>;

    async fn list_completed(&self, page: u32) -> Result<Paged<Novel>>;

    async fn list_by_author(&self, author_slug: &str, page: u32) -> Result<Paged<Novel>>;

    async fn list_by_category(&self, category_slug: &str, page: u32) -> Result<Paged<Novel>>;

    async fn list_categories(&self) -> Result<Vec<Category>>;

    /// Full novel record, `None` if the slug is unknown to this source
    async fn detail(&self, slug: &str) -> Result<Option<Novel>>;

    /// Chapter index, without content
    ///
    /// Some sites need their internal novel id in addition to the slug.
    async fn list_chapters(&self, slug: &str, novel_id: Option<&str>) -> Result<Vec<Chapter>>;

    async fn chapter_content(&self, novel_slug: &str, chapter_slug: &str) -> Result<Option<Chapter>>;

    /// Find the chapter with the given ordinal in a novel
    async fn locate_chapter_by_number(
        &self,
        slug: &str,
        novel_id: Option<&str>,
        number: u32,
    ) -> Result<Option<Chapter>>;
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paged<T> {
    pub items: Vec<T>,

    /// Total number of pages the source reports
    #[serde(default = "default_total_pages")]
    pub total_pages: u32,
}

fn default_total_pages() -> u32 {
    1
}

impl<T> Paged<T> {
    pub fn new(items: Vec<T>, total_pages: u32) -> Self {
        Self { items, total_pages }
    }

    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total_pages: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
}

impl Author {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slug: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub slug: String,
}

/// Novel as reported by one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Novel {
    pub title: String,
    pub slug: String,

    /// Site-internal id, when the site has one distinct from the slug
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub authors: Vec<Author>,

    #[serde(default)]
    pub categories: Vec<Category>,

    #[serde(default)]
    pub cover_url: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub total_chapters: Option<u32>,

    /// Name of the provider this record came from
    #[serde(default)]
    pub source: String,
}

impl Novel {
    pub fn new(title: impl Into<String>, slug: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            slug: slug.into(),
            id: None,
            authors: Vec::new(),
            categories: Vec::new(),
            cover_url: None,
            description: None,
            status: None,
            total_chapters: None,
            source: source.into(),
        }
    }

    pub fn with_author(mut self, name: impl Into<String>) -> Self {
        self.authors.push(Author::new(name));
        self
    }

    pub fn primary_author(&self) -> Option<&Author> {
        self.authors.first()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub slug: String,

    #[serde(default)]
    pub number: Option<u32>,

    #[serde(default)]
    pub novel_slug: Option<String>,

    /// Only filled by `chapter_content` and `locate_chapter_by_number`
    #[serde(default)]
    pub content: Option<String>,

    #[serde(default)]
    pub source: String,
}

impl Chapter {
    pub fn new(title: impl Into<String>, slug: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            slug: slug.into(),
            number: None,
            novel_slug: None,
            content: None,
            source: source.into(),
        }
    }
}
