mod repository;
mod schema;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Article;

pub use repository::Repository;

/// Outcome of writing a slug to one article.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlugWrite {
    Written,
    /// Another article already holds the slug.
    Conflict,
    NotFound,
}

/// The persistence operations the enrichment pipeline relies on.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn read_article(&self, id: i64) -> Result<Option<Article>>;

    async fn write_slug(&self, id: i64, slug: &str) -> Result<SlugWrite>;

    /// Returns `false` when the article does not exist.
    async fn write_summary(&self, id: i64, summary: &str) -> Result<bool>;

    async fn slug_exists(&self, slug: &str, exclude_id: i64) -> Result<bool>;
}
