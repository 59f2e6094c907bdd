use std::fmt;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnrichmentKind {
    Slug,
    Summary,
}

impl EnrichmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentKind::Slug => "slug",
            EnrichmentKind::Summary => "summary",
        }
    }
}

impl fmt::Display for EnrichmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of enrichment work. Carries copies of its inputs, never the article.
#[derive(Debug, Clone)]
pub struct EnrichmentTask {
    pub article_id: i64,
    pub kind: EnrichmentKind,
    pub title: String,
    pub content: String,
    pub attempt: u32,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
}

impl EnrichmentTask {
    pub fn slug(article_id: i64, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            article_id,
            kind: EnrichmentKind::Slug,
            title: title.into(),
            content: content.into(),
            attempt: 0,
            state: TaskState::Queued,
            created_at: Utc::now(),
        }
    }

    pub fn summary(article_id: i64, content: impl Into<String>) -> Self {
        Self {
            article_id,
            kind: EnrichmentKind::Summary,
            title: String::new(),
            content: content.into(),
            attempt: 0,
            state: TaskState::Queued,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> (i64, EnrichmentKind) {
        (self.article_id, self.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    #[default]
    Queued,
    Running,
    Retrying,
    Succeeded,
    FallenBack,
    /// The article disappeared before the task could write.
    Discarded,
    /// Even the fallback write could not reach storage.
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::FallenBack | TaskState::Discarded | TaskState::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Unconfigured,
    Timeout,
    ServiceError,
}

impl FailureKind {
    /// A missing credential will not fix itself on the next attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureKind::Unconfigured)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Unconfigured => "unconfigured",
            FailureKind::Timeout => "timeout",
            FailureKind::ServiceError => "service_error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationResult {
    Success(String),
    Failed(FailureKind),
}

impl GenerationResult {
    pub fn succeeded(&self) -> bool {
        matches!(self, GenerationResult::Success(_))
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            GenerationResult::Success(text) => Some(text),
            GenerationResult::Failed(_) => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            GenerationResult::Success(_) => None,
            GenerationResult::Failed(kind) => Some(*kind),
        }
    }
}

/// Published by the scheduler whenever a task reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub article_id: i64,
    pub kind: EnrichmentKind,
    pub state: TaskState,
    pub attempts: u32,
    /// The value written, if any.
    pub value: Option<String>,
}
