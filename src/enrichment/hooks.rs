use std::sync::Arc;

use chrono::Utc;

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{
    Article, ArticleChanges, ArticleStatus, ArticleUpdate, EnrichmentTask, NewArticle,
    NewArticleRequest,
};

use super::fallback::{
    clean_slug, simple_slug, simple_summary, strip_markup, truncate_chars, SUMMARY_MAX_CHARS,
};
use super::scheduler::EnrichmentQueue;
use super::uniquifier::SlugUniquifier;

/// Reacts to article writes: keeps slug and summary valid synchronously and
/// queues AI refinement for the fields whose inputs changed.
pub struct ArticleLifecycleHooks {
    repository: Arc<Repository>,
    uniquifier: SlugUniquifier,
    queue: EnrichmentQueue,
}

impl ArticleLifecycleHooks {
    pub fn new(repository: Arc<Repository>, queue: EnrichmentQueue) -> Self {
        let uniquifier = SlugUniquifier::new(repository.clone());
        Self {
            repository,
            uniquifier,
            queue,
        }
    }

    pub async fn create_article(&self, request: NewArticleRequest) -> Result<Article> {
        if request.title.trim().is_empty() {
            return Err(AppError::InvalidArticle("title must not be empty".to_string()));
        }

        let slug = request
            .slug
            .as_deref()
            .map(clean_slug)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| simple_slug(&request.title));
        // The insert still suffixes if another writer takes the slug first
        let slug = self.uniquifier.uniquify(&slug, 0).await?;
        let summary = request
            .summary
            .as_deref()
            .map(normalize_summary)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| simple_summary(&request.content));
        let published_at = (request.status == ArticleStatus::Published).then(Utc::now);

        let article = self
            .repository
            .insert_article(NewArticle {
                title: request.title,
                content: request.content,
                slug,
                summary,
                status: request.status,
                published_at,
                author_id: request.author_id,
            })
            .await?;

        tracing::info!(article_id = article.id, slug = %article.slug, "Article created");
        self.on_article_created(article.id, &article.title, &article.content);
        Ok(article)
    }

    /// Applies `update`. Returns `None` if the article does not exist.
    ///
    /// Only the columns the update names are written; slug and summary values
    /// stored by enrichment in the meantime survive unrelated edits.
    pub async fn update_article(&self, id: i64, update: ArticleUpdate) -> Result<Option<Article>> {
        let Some(current) = self.repository.get_article(id).await? else {
            return Ok(None);
        };

        if update.title.as_ref().is_some_and(|t| t.trim().is_empty()) {
            return Err(AppError::InvalidArticle("title must not be empty".to_string()));
        }
        let title_changed = update.title.as_ref().is_some_and(|t| *t != current.title);
        let content_changed = update
            .content
            .as_ref()
            .is_some_and(|c| *c != current.content);
        let title = update.title.as_deref().unwrap_or(&current.title);
        let content = update.content.as_deref().unwrap_or(&current.content);

        // Never persist an empty derived field; AI refinement replaces these later
        let slug = match update.slug.as_deref().map(clean_slug) {
            Some(slug) if slug.is_empty() => Some(simple_slug(title)),
            other => other,
        };
        let slug = match slug {
            Some(slug) => Some(self.uniquifier.uniquify(&slug, id).await?),
            None => None,
        };
        let summary = update.summary.as_deref().map(|summary| {
            let summary = normalize_summary(summary);
            if summary.is_empty() {
                simple_summary(content)
            } else {
                summary
            }
        });
        let fill_summary = (!content.is_empty()).then(|| simple_summary(content));

        let (status, published_at) = match update.status {
            Some(status) => {
                let mut moved = current.clone();
                moved.transition_to(status, Utc::now());
                (Some(status), moved.published_at)
            }
            None => (None, None),
        };

        let changes = ArticleChanges {
            title: update.title.clone(),
            content: update.content.clone(),
            slug,
            summary,
            fill_summary,
            status,
            published_at,
        };
        let Some(saved) = self.repository.apply_changes(id, changes).await? else {
            return Ok(None);
        };

        self.on_article_updated(
            saved.id,
            title_changed,
            content_changed,
            &saved.title,
            &saved.content,
        );
        Ok(Some(saved))
    }

    pub async fn publish(&self, id: i64) -> Result<Option<Article>> {
        self.set_status(id, ArticleStatus::Published).await
    }

    pub async fn archive(&self, id: i64) -> Result<Option<Article>> {
        self.set_status(id, ArticleStatus::Archived).await
    }

    async fn set_status(&self, id: i64, status: ArticleStatus) -> Result<Option<Article>> {
        self.update_article(
            id,
            ArticleUpdate {
                status: Some(status),
                ..ArticleUpdate::default()
            },
        )
        .await
    }

    /// Returns `false` if the article does not exist.
    pub async fn regenerate_slug(&self, id: i64) -> Result<bool> {
        let Some(article) = self.repository.get_article(id).await? else {
            return Ok(false);
        };
        self.on_regenerate_slug_requested(article.id, &article.title, &article.content);
        Ok(true)
    }

    /// Returns `false` if the article does not exist.
    pub async fn regenerate_summary(&self, id: i64) -> Result<bool> {
        let Some(article) = self.repository.get_article(id).await? else {
            return Ok(false);
        };
        self.on_regenerate_summary_requested(article.id, &article.content);
        Ok(true)
    }

    pub async fn delete_article(&self, id: i64) -> Result<bool> {
        self.repository.delete_article(id).await
    }

    pub fn on_article_created(&self, id: i64, title: &str, content: &str) {
        self.queue.enqueue(EnrichmentTask::slug(id, title, content));
        self.queue.enqueue(EnrichmentTask::summary(id, content));
    }

    pub fn on_article_updated(
        &self,
        id: i64,
        title_changed: bool,
        content_changed: bool,
        title: &str,
        content: &str,
    ) {
        if title_changed {
            self.queue.enqueue(EnrichmentTask::slug(id, title, content));
        }
        if content_changed {
            self.queue.enqueue(EnrichmentTask::summary(id, content));
        }
    }

    pub fn on_regenerate_slug_requested(&self, id: i64, title: &str, content: &str) {
        self.queue.enqueue(EnrichmentTask::slug(id, title, content));
    }

    pub fn on_regenerate_summary_requested(&self, id: i64, content: &str) {
        self.queue.enqueue(EnrichmentTask::summary(id, content));
    }
}

fn normalize_summary(summary: &str) -> String {
    truncate_chars(&strip_markup(summary), SUMMARY_MAX_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::ai::prompts::{SLUG_MAX_TOKENS, SUMMARY_MAX_TOKENS};
    use crate::db::ArticleStore;
    use crate::enrichment::scheduler::{EnrichmentScheduler, SchedulerConfig};
    use crate::enrichment::test_support::ScriptedGenerator;
    use crate::models::{FailureKind, GenerationResult};

    const AI_CONTENT: &str = "<p>AI is changing everything. It touches healthcare, finance, and education. The future is bright.</p>";

    struct Harness {
        repo: Arc<Repository>,
        generator: Arc<ScriptedGenerator>,
        scheduler: EnrichmentScheduler,
        hooks: ArticleLifecycleHooks,
    }

    async fn harness(generator: ScriptedGenerator) -> Harness {
        let repo = Arc::new(Repository::open_in_memory().await.unwrap());
        let generator = Arc::new(generator);
        let scheduler = EnrichmentScheduler::start(
            SchedulerConfig {
                worker_count: 4,
                max_attempts: 3,
                retry_delay: Duration::from_millis(1),
            },
            generator.clone(),
            repo.clone(),
        );
        let hooks = ArticleLifecycleHooks::new(repo.clone(), scheduler.queue());
        Harness {
            repo,
            generator,
            scheduler,
            hooks,
        }
    }

    fn unconfigured() -> ScriptedGenerator {
        ScriptedGenerator::always(GenerationResult::Failed(FailureKind::Unconfigured))
    }

    fn request(title: &str, content: &str) -> NewArticleRequest {
        NewArticleRequest {
            title: title.to_string(),
            content: content.to_string(),
            ..NewArticleRequest::default()
        }
    }

    fn budgets(generator: &ScriptedGenerator) -> Vec<u32> {
        let mut budgets: Vec<u32> = generator.calls().into_iter().map(|(_, b)| b).collect();
        budgets.sort();
        budgets
    }

    #[tokio::test]
    async fn creation_is_valid_immediately_then_refined() {
        let h = harness(
            ScriptedGenerator::always(GenerationResult::Failed(FailureKind::Unconfigured))
                .answering(
                    SLUG_MAX_TOKENS,
                    GenerationResult::Success("  Greetings To The World  ".to_string()),
                )
                .answering(
                    SUMMARY_MAX_TOKENS,
                    GenerationResult::Success("A short AI summary.".to_string()),
                ),
        )
        .await;
        h.repo
            .insert_article(NewArticle {
                title: "Greetings".to_string(),
                content: String::new(),
                slug: "greetings-to-the-world".to_string(),
                summary: String::new(),
                status: ArticleStatus::Draft,
                published_at: None,
                author_id: None,
            })
            .await
            .unwrap();

        let created = h
            .hooks
            .create_article(request("Hello, World! 2024", AI_CONTENT))
            .await
            .unwrap();
        assert_eq!(created.slug, "hello-world-2024");
        assert!(!created.summary.is_empty());

        h.scheduler.drain().await;
        let refined = h.repo.get_article(created.id).await.unwrap().unwrap();
        assert_eq!(refined.slug, "greetings-to-the-world-1");
        assert_eq!(refined.summary, "A short AI summary.");
        assert_eq!(budgets(&h.generator), vec![SLUG_MAX_TOKENS, SUMMARY_MAX_TOKENS]);
    }

    #[tokio::test]
    async fn disabled_ai_leaves_fallback_values() {
        let h = harness(unconfigured()).await;

        let created = h
            .hooks
            .create_article(request("Hello, World! 2024", AI_CONTENT))
            .await
            .unwrap();
        h.scheduler.drain().await;

        let article = h.repo.get_article(created.id).await.unwrap().unwrap();
        assert_eq!(article.slug, "hello-world-2024");
        assert_eq!(
            article.summary,
            "AI is changing everything. It touches healthcare, finance, and education. The future is bright."
        );
    }

    #[tokio::test]
    async fn supplied_slug_and_summary_are_kept_but_normalized() {
        let h = harness(unconfigured()).await;
        let created = h
            .hooks
            .create_article(NewArticleRequest {
                slug: Some("My Custom Slug".to_string()),
                summary: Some("<em>Hand</em> written.".to_string()),
                ..request("Title", "Body.")
            })
            .await
            .unwrap();

        assert_eq!(created.slug, "my-custom-slug");
        assert_eq!(created.summary, "Hand written.");
    }

    #[tokio::test]
    async fn duplicate_titles_get_suffixed_slugs() {
        let h = harness(unconfigured()).await;
        let first = h.hooks.create_article(request("Same Title", "A.")).await.unwrap();
        let second = h.hooks.create_article(request("Same Title", "B.")).await.unwrap();

        assert_eq!(first.slug, "same-title");
        assert_eq!(second.slug, "same-title-1");
    }

    #[tokio::test]
    async fn empty_title_is_rejected() {
        let h = harness(unconfigured()).await;
        let err = h.hooks.create_article(request("   ", "Body.")).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidArticle(_)));
        assert_eq!(h.scheduler.queue().pending(), 0);
    }

    #[tokio::test]
    async fn title_change_only_enqueues_slug() {
        let h = harness(unconfigured()).await;
        let created = h.hooks.create_article(request("Old Title", "Body.")).await.unwrap();
        h.scheduler.drain().await;
        let calls_after_create = h.generator.call_count();

        let updated = h
            .hooks
            .update_article(
                created.id,
                ArticleUpdate {
                    title: Some("New Title".to_string()),
                    content: Some("Body.".to_string()),
                    ..ArticleUpdate::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        // The existing slug is kept until enrichment runs
        assert_eq!(updated.slug, "old-title");

        h.scheduler.drain().await;
        let calls = h.generator.calls();
        assert_eq!(calls.len(), calls_after_create + 1);
        assert_eq!(calls.last().unwrap().1, SLUG_MAX_TOKENS);
        assert_eq!(
            h.repo.get_article(created.id).await.unwrap().unwrap().slug,
            "new-title"
        );
    }

    #[tokio::test]
    async fn content_change_only_enqueues_summary() {
        let h = harness(unconfigured()).await;
        let created = h.hooks.create_article(request("Kept Title", "Old body.")).await.unwrap();
        h.scheduler.drain().await;
        let calls_after_create = h.generator.call_count();

        h.hooks
            .update_article(
                created.id,
                ArticleUpdate {
                    title: Some("Kept Title".to_string()),
                    content: Some("<p>New body. Second line.</p>".to_string()),
                    ..ArticleUpdate::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        h.scheduler.drain().await;

        let calls = h.generator.calls();
        assert_eq!(calls.len(), calls_after_create + 1);
        assert_eq!(calls.last().unwrap().1, SUMMARY_MAX_TOKENS);
        let article = h.repo.get_article(created.id).await.unwrap().unwrap();
        assert_eq!(article.slug, "kept-title");
        assert_eq!(article.summary, "New body. Second line.");
    }

    #[tokio::test]
    async fn status_edits_during_enrichment_keep_generated_slug() {
        let h = harness(
            unconfigured()
                .answering(
                    SLUG_MAX_TOKENS,
                    GenerationResult::Success("AI Refined Slug".to_string()),
                )
                .with_delay(Duration::from_millis(30)),
        )
        .await;
        let created = h.hooks.create_article(request("Old Title", "Body.")).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_millis(80);
        let mut publish = true;
        while tokio::time::Instant::now() < deadline {
            let edited = if publish {
                h.hooks.publish(created.id).await
            } else {
                h.hooks.archive(created.id).await
            };
            assert!(edited.unwrap().is_some());
            publish = !publish;
        }
        h.scheduler.drain().await;

        let article = h.repo.get_article(created.id).await.unwrap().unwrap();
        assert_eq!(article.slug, "ai-refined-slug");
        assert_eq!(article.summary, "Body.");
    }

    #[tokio::test]
    async fn cleared_slug_is_filled_synchronously() {
        let h = harness(unconfigured()).await;
        let created = h.hooks.create_article(request("Some Title", "Body.")).await.unwrap();
        h.scheduler.drain().await;

        let updated = h
            .hooks
            .update_article(
                created.id,
                ArticleUpdate {
                    slug: Some(String::new()),
                    summary: Some(String::new()),
                    ..ArticleUpdate::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.slug, "some-title");
        assert_eq!(updated.summary, "Body.");
    }

    #[tokio::test]
    async fn regenerate_ignores_change_detection() {
        let h = harness(
            unconfigured().answering(
                SUMMARY_MAX_TOKENS,
                GenerationResult::Success("Regenerated summary.".to_string()),
            ),
        )
        .await;
        let created = h.hooks.create_article(request("T", "Body.")).await.unwrap();
        h.scheduler.drain().await;
        assert!(h.repo.write_summary(created.id, "Hand edited.").await.unwrap());

        assert!(h.hooks.regenerate_summary(created.id).await.unwrap());
        h.scheduler.drain().await;

        assert_eq!(
            h.repo.get_article(created.id).await.unwrap().unwrap().summary,
            "Regenerated summary."
        );
        assert!(!h.hooks.regenerate_slug(created.id + 50).await.unwrap());
    }

    #[tokio::test]
    async fn publish_sets_published_at_once() {
        let h = harness(unconfigured()).await;
        let created = h.hooks.create_article(request("T", "Body.")).await.unwrap();
        assert!(created.published_at.is_none());

        let published = h.hooks.publish(created.id).await.unwrap().unwrap();
        let stamp = published.published_at.unwrap();
        assert_eq!(published.status, ArticleStatus::Published);

        let again = h.hooks.publish(created.id).await.unwrap().unwrap();
        assert_eq!(again.published_at, Some(stamp));

        let archived = h.hooks.archive(created.id).await.unwrap().unwrap();
        assert_eq!(archived.status, ArticleStatus::Archived);
        assert_eq!(archived.published_at, Some(stamp));
    }

    #[tokio::test]
    async fn task_for_deleted_article_is_a_noop() {
        let h = harness(unconfigured()).await;
        let created = h.hooks.create_article(request("T", "Body.")).await.unwrap();
        h.scheduler.drain().await;

        assert!(h.hooks.delete_article(created.id).await.unwrap());
        h.hooks.on_regenerate_slug_requested(created.id, "T", "Body.");
        h.scheduler.drain().await;

        assert!(h.repo.list_articles().await.unwrap().is_empty());
        let missing = h
            .hooks
            .update_article(created.id, ArticleUpdate::default())
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
