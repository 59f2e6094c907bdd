use std::sync::Arc;

use crate::ai::prompts::{slug_prompt, summary_prompt, SLUG_MAX_TOKENS, SUMMARY_MAX_TOKENS};
use crate::ai::TextGenerator;
use crate::db::ArticleStore;
use crate::error::Result;
use crate::models::{EnrichmentKind, EnrichmentTask, FailureKind};

use super::fallback::{clean_slug, simple_slug, simple_summary, strip_markup, truncate_chars, SUMMARY_MAX_CHARS};
use super::uniquifier::SlugUniquifier;

/// What one AI attempt of a task ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The derived value was persisted.
    Written(String),
    /// The article no longer exists; nothing was written.
    Missing,
    /// The text service failed; nothing was written.
    Failed(FailureKind),
}

/// Runs the AI and fallback paths of slug and summary tasks.
pub struct TaskExecutor {
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn ArticleStore>,
    uniquifier: SlugUniquifier,
}

impl TaskExecutor {
    pub fn new(generator: Arc<dyn TextGenerator>, store: Arc<dyn ArticleStore>) -> Self {
        let uniquifier = SlugUniquifier::new(store.clone());
        Self {
            generator,
            store,
            uniquifier,
        }
    }

    /// One call to the text service and, on success, the write.
    pub async fn attempt(&self, task: &EnrichmentTask) -> Result<AttemptOutcome> {
        if self.store.read_article(task.article_id).await?.is_none() {
            return Ok(AttemptOutcome::Missing);
        }

        let generated = match task.kind {
            EnrichmentKind::Slug => {
                self.generator
                    .generate(&slug_prompt(&task.title, &task.content), SLUG_MAX_TOKENS)
                    .await
            }
            EnrichmentKind::Summary => {
                self.generator
                    .generate(&summary_prompt(&task.content), SUMMARY_MAX_TOKENS)
                    .await
            }
        };

        tracing::debug!(
            article_id = task.article_id,
            kind = %task.kind,
            succeeded = generated.succeeded(),
            "Text service answered"
        );
        if let Some(failure) = generated.failure_kind() {
            return Ok(AttemptOutcome::Failed(failure));
        }
        let text = generated.text().unwrap_or_default();

        let written = match task.kind {
            EnrichmentKind::Slug => {
                let candidate = clean_slug(text);
                let candidate = if candidate.is_empty() {
                    tracing::debug!(article_id = task.article_id, "Generated slug was empty after cleanup");
                    simple_slug(&task.title)
                } else {
                    candidate
                };
                self.uniquifier.assign(task.article_id, &candidate).await?
            }
            EnrichmentKind::Summary => {
                let summary = truncate_chars(&strip_markup(text), SUMMARY_MAX_CHARS);
                let summary = if summary.is_empty() {
                    simple_summary(&task.content)
                } else {
                    summary
                };
                self.write_summary(task.article_id, summary).await?
            }
        };

        Ok(written.map_or(AttemptOutcome::Missing, AttemptOutcome::Written))
    }

    /// Deterministic write used once the AI path is exhausted or unavailable.
    /// Returns `None` when the article no longer exists.
    pub async fn fallback(&self, task: &EnrichmentTask) -> Result<Option<String>> {
        match task.kind {
            EnrichmentKind::Slug => {
                self.uniquifier
                    .assign(task.article_id, &simple_slug(&task.title))
                    .await
            }
            EnrichmentKind::Summary => {
                self.write_summary(task.article_id, simple_summary(&task.content))
                    .await
            }
        }
    }

    async fn write_summary(&self, article_id: i64, summary: String) -> Result<Option<String>> {
        if self.store.write_summary(article_id, &summary).await? {
            Ok(Some(summary))
        } else {
            Ok(None)
        }
    }
}
