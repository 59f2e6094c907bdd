use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub slug: String,
    pub summary: String,
    pub status: ArticleStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub author_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Article {
    /// Moves the article to `status`. `published_at` is stamped only when
    /// entering `Published` from another status.
    pub fn transition_to(&mut self, status: ArticleStatus, now: DateTime<Utc>) {
        if status == ArticleStatus::Published && self.status != ArticleStatus::Published {
            self.published_at = Some(now);
        }
        self.status = status;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStatus::Draft => "draft",
            ArticleStatus::Published => "published",
            ArticleStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArticleStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ArticleStatus::Draft),
            "published" => Ok(ArticleStatus::Published),
            "archived" => Ok(ArticleStatus::Archived),
            other => Err(AppError::InvalidArticle(format!("unknown status '{}'", other))),
        }
    }
}

/// Row ready for insertion; slug and summary are already resolved.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub title: String,
    pub content: String,
    pub slug: String,
    pub summary: String,
    pub status: ArticleStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub author_id: Option<i64>,
}

/// What a creator hands to the lifecycle boundary.
#[derive(Debug, Clone, Default)]
pub struct NewArticleRequest {
    pub title: String,
    pub content: String,
    pub slug: Option<String>,
    pub summary: Option<String>,
    pub status: ArticleStatus,
    pub author_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct ArticleUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub slug: Option<String>,
    pub summary: Option<String>,
    pub status: Option<ArticleStatus>,
}

/// Column-level patch. `None` leaves the stored value as it is, so a write
/// never resets columns it did not mean to touch.
#[derive(Debug, Clone, Default)]
pub struct ArticleChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    pub slug: Option<String>,
    pub summary: Option<String>,
    /// Written only while the stored summary is empty.
    pub fill_summary: Option<String>,
    pub status: Option<ArticleStatus>,
    pub published_at: Option<DateTime<Utc>>,
}
