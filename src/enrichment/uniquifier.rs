use std::sync::Arc;

use crate::db::{ArticleStore, SlugWrite};
use crate::error::{AppError, Result};

/// Highest numeric suffix tried before giving up on a base slug.
pub const MAX_SLUG_SUFFIX: u32 = 10_000;

/// `base` for `n == 0`, otherwise `base-n`.
pub fn suffixed(base: &str, n: u32) -> String {
    if n == 0 {
        base.to_string()
    } else {
        format!("{}-{}", base, n)
    }
}

/// Resolves slug collisions by numeric suffixing.
#[derive(Clone)]
pub struct SlugUniquifier {
    store: Arc<dyn ArticleStore>,
}

impl SlugUniquifier {
    pub fn new(store: Arc<dyn ArticleStore>) -> Self {
        Self { store }
    }

    /// First free slug among `candidate`, `candidate-1`, ... ignoring `exclude_id`.
    ///
    /// Read-only lookup: another writer may take the slug before it is used.
    /// Writers go through [`SlugUniquifier::assign`].
    pub async fn uniquify(&self, candidate: &str, exclude_id: i64) -> Result<String> {
        for n in 0..=MAX_SLUG_SUFFIX {
            let slug = suffixed(candidate, n);
            if !self.store.slug_exists(&slug, exclude_id).await? {
                return Ok(slug);
            }
        }
        Err(AppError::SlugSpaceExhausted(candidate.to_string()))
    }

    /// Writes the first free suffix of `candidate` to the article.
    ///
    /// The store's uniqueness constraint decides each attempt, so two writers
    /// racing for the same base can never both win it. Returns `None` when the
    /// article no longer exists.
    pub async fn assign(&self, article_id: i64, candidate: &str) -> Result<Option<String>> {
        for n in 0..=MAX_SLUG_SUFFIX {
            let slug = suffixed(candidate, n);
            match self.store.write_slug(article_id, &slug).await? {
                SlugWrite::Written => return Ok(Some(slug)),
                SlugWrite::NotFound => return Ok(None),
                SlugWrite::Conflict => {
                    tracing::debug!(article_id, slug = %slug, "Slug taken, trying next suffix");
                }
            }
        }
        Err(AppError::SlugSpaceExhausted(candidate.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Repository;
    use crate::models::{ArticleStatus, NewArticle};

    async fn seeded(slugs: &[&str]) -> (Arc<Repository>, Vec<i64>) {
        let repo = Arc::new(Repository::open_in_memory().await.unwrap());
        let mut ids = Vec::new();
        for slug in slugs {
            let article = repo
                .insert_article(NewArticle {
                    title: slug.to_string(),
                    content: String::new(),
                    slug: slug.to_string(),
                    summary: String::new(),
                    status: ArticleStatus::Draft,
                    published_at: None,
                    author_id: None,
                })
                .await
                .unwrap();
            ids.push(article.id);
        }
        (repo, ids)
    }

    #[test]
    fn suffix_format() {
        assert_eq!(suffixed("post", 0), "post");
        assert_eq!(suffixed("post", 3), "post-3");
    }

    #[tokio::test]
    async fn uniquify_skips_taken_slugs() {
        let (repo, ids) = seeded(&["news", "news-1", "other"]).await;
        let uniquifier = SlugUniquifier::new(repo);

        assert_eq!(uniquifier.uniquify("news", ids[2]).await.unwrap(), "news-2");
        assert_eq!(uniquifier.uniquify("news", ids[0]).await.unwrap(), "news");
        assert_eq!(uniquifier.uniquify("fresh", ids[0]).await.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn assign_takes_next_free_suffix() {
        let (repo, ids) = seeded(&["greetings-to-the-world", "hello-world-2024"]).await;
        let uniquifier = SlugUniquifier::new(repo.clone());

        let slug = uniquifier.assign(ids[1], "greetings-to-the-world").await.unwrap();
        assert_eq!(slug.as_deref(), Some("greetings-to-the-world-1"));
        assert_eq!(
            repo.get_article(ids[1]).await.unwrap().unwrap().slug,
            "greetings-to-the-world-1"
        );
    }

    #[tokio::test]
    async fn assign_keeps_own_slug() {
        let (repo, ids) = seeded(&["mine"]).await;
        let uniquifier = SlugUniquifier::new(repo);
        assert_eq!(uniquifier.assign(ids[0], "mine").await.unwrap().as_deref(), Some("mine"));
    }

    #[tokio::test]
    async fn assign_on_missing_article() {
        let (repo, _) = seeded(&[]).await;
        let uniquifier = SlugUniquifier::new(repo);
        assert_eq!(uniquifier.assign(42, "ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_assigns_never_duplicate() {
        let (repo, ids) = seeded(&["a", "b", "c", "d", "e", "f"]).await;
        let uniquifier = SlugUniquifier::new(repo.clone());

        let handles: Vec<_> = ids
            .iter()
            .map(|&id| {
                let uniquifier = uniquifier.clone();
                tokio::spawn(async move { uniquifier.assign(id, "shared").await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut slugs: Vec<String> = repo
            .list_articles()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.slug)
            .collect();
        slugs.sort();
        assert_eq!(
            slugs,
            vec!["shared", "shared-1", "shared-2", "shared-3", "shared-4", "shared-5"]
        );
    }
}
