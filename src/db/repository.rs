use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::enrichment::uniquifier::{suffixed, MAX_SLUG_SUFFIX};
use crate::error::{AppError, Result};
use crate::models::{Article, ArticleChanges, ArticleStatus, NewArticle};

use super::schema::SCHEMA;
use super::{ArticleStore, SlugWrite};

const ARTICLE_COLUMNS: &str = "id, title, content, slug, summary, status, published_at, author_id, created_at, updated_at";

pub struct Repository {
    conn: Connection,
}

/// Result of a statement retried under successive slug suffixes.
enum SuffixedWrite<T> {
    Done(T, String),
    Exhausted,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Inserts the article; a taken slug is suffixed (`-1`, `-2`, ...) until free.
    pub async fn insert_article(&self, article: NewArticle) -> Result<Article> {
        let base = article.slug.clone();
        let outcome = self
            .conn
            .call(move |conn| {
                let published_at = article.published_at.map(|dt| dt.to_rfc3339());
                let outcome = write_with_free_slug(&article.slug, |slug| {
                    conn.execute(
                        r#"INSERT INTO articles (title, content, slug, summary, status, published_at, author_id)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                        params![
                            article.title,
                            article.content,
                            slug,
                            article.summary,
                            article.status,
                            published_at,
                            article.author_id,
                        ],
                    )?;
                    Ok(conn.last_insert_rowid())
                })?;
                Ok(outcome)
            })
            .await?;

        match outcome {
            SuffixedWrite::Done(id, _) => self
                .get_article(id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("article {} missing right after insert", id).into()),
            SuffixedWrite::Exhausted => Err(AppError::SlugSpaceExhausted(base)),
        }
    }

    pub async fn get_article(&self, id: i64) -> Result<Option<Article>> {
        let article = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM articles WHERE id = ?1",
                    ARTICLE_COLUMNS
                ))?;
                let article = stmt.query_row(params![id], article_from_row).optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    pub async fn list_articles(&self) -> Result<Vec<Article>> {
        let articles = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM articles ORDER BY created_at DESC, id DESC",
                    ARTICLE_COLUMNS
                ))?;
                let articles = stmt
                    .query_map([], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    /// Writes only the columns `changes` sets. Returns `None` if the article is gone.
    ///
    /// Slug and summary are often rewritten by enrichment between a caller's
    /// read and this write; leaving them out of the statement keeps those values.
    pub async fn apply_changes(&self, id: i64, changes: ArticleChanges) -> Result<Option<Article>> {
        let base = changes.slug.clone().unwrap_or_default();
        let outcome = self
            .conn
            .call(move |conn| {
                let now = Utc::now().to_rfc3339();
                let published_at = changes.published_at.map(|dt| dt.to_rfc3339());
                let update = |conn: &rusqlite::Connection, slug: Option<&str>| {
                    conn.execute(
                        r#"UPDATE articles SET
                               title = COALESCE(?1, title),
                               content = COALESCE(?2, content),
                               slug = COALESCE(?3, slug),
                               summary = CASE
                                   WHEN ?4 IS NOT NULL THEN ?4
                                   WHEN summary = '' AND ?5 IS NOT NULL THEN ?5
                                   ELSE summary
                               END,
                               status = COALESCE(?6, status),
                               published_at = COALESCE(?7, published_at),
                               updated_at = ?8
                           WHERE id = ?9"#,
                        params![
                            changes.title,
                            changes.content,
                            slug,
                            changes.summary,
                            changes.fill_summary,
                            changes.status,
                            published_at,
                            now,
                            id,
                        ],
                    )
                };
                let rows = match changes.slug.as_deref() {
                    Some(slug) => match write_with_free_slug(slug, |candidate| {
                        update(conn, Some(candidate))
                    })? {
                        SuffixedWrite::Done(rows, _) => Some(rows),
                        SuffixedWrite::Exhausted => None,
                    },
                    None => Some(update(conn, None)?),
                };
                Ok(rows)
            })
            .await?;

        match outcome {
            Some(0) => Ok(None),
            Some(_) => self.get_article(id).await,
            None => Err(AppError::SlugSpaceExhausted(base)),
        }
    }

    pub async fn delete_article(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn
            .call(move |conn| {
                let rows = conn.execute("DELETE FROM articles WHERE id = ?1", params![id])?;
                Ok(rows > 0)
            })
            .await?;
        Ok(deleted)
    }
}

#[async_trait]
impl ArticleStore for Repository {
    async fn read_article(&self, id: i64) -> Result<Option<Article>> {
        self.get_article(id).await
    }

    async fn write_slug(&self, id: i64, slug: &str) -> Result<SlugWrite> {
        let slug = slug.to_string();
        let outcome = self
            .conn
            .call(move |conn| {
                let now = Utc::now().to_rfc3339();
                match conn.execute(
                    "UPDATE articles SET slug = ?1, updated_at = ?2 WHERE id = ?3",
                    params![slug, now, id],
                ) {
                    Ok(0) => Ok(SlugWrite::NotFound),
                    Ok(_) => Ok(SlugWrite::Written),
                    Err(e) if is_slug_conflict(&e) => Ok(SlugWrite::Conflict),
                    Err(e) => Err(e.into()),
                }
            })
            .await?;
        Ok(outcome)
    }

    async fn write_summary(&self, id: i64, summary: &str) -> Result<bool> {
        let summary = summary.to_string();
        let written = self
            .conn
            .call(move |conn| {
                let now = Utc::now().to_rfc3339();
                let rows = conn.execute(
                    "UPDATE articles SET summary = ?1, updated_at = ?2 WHERE id = ?3",
                    params![summary, now, id],
                )?;
                Ok(rows > 0)
            })
            .await?;
        Ok(written)
    }

    async fn slug_exists(&self, slug: &str, exclude_id: i64) -> Result<bool> {
        let slug = slug.to_string();
        let exists = self
            .conn
            .call(move |conn| {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM articles WHERE slug = ?1 AND id != ?2)",
                    params![slug, exclude_id],
                    |row| row.get(0),
                )?;
                Ok(exists)
            })
            .await?;
        Ok(exists)
    }
}

/// Runs `write` with `base`, `base-1`, `base-2`, ... until it stops hitting the
/// slug uniqueness constraint.
fn write_with_free_slug<T>(
    base: &str,
    mut write: impl FnMut(&str) -> rusqlite::Result<T>,
) -> rusqlite::Result<SuffixedWrite<T>> {
    for n in 0..=MAX_SLUG_SUFFIX {
        let candidate = suffixed(base, n);
        match write(&candidate) {
            Ok(value) => return Ok(SuffixedWrite::Done(value, candidate)),
            Err(e) if is_slug_conflict(&e) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(SuffixedWrite::Exhausted)
}

fn is_slug_conflict(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, Some(msg))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                && msg.contains("articles.slug")
    )
}

impl ToSql for ArticleStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ArticleStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: AppError| FromSqlError::Other(Box::new(e)))
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn article_from_row(row: &Row<'_>) -> rusqlite::Result<Article> {
    Ok(Article {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        slug: row.get(3)?,
        summary: row.get(4)?,
        status: row.get(5)?,
        published_at: row
            .get::<_, Option<String>>(6)?
            .and_then(|s| parse_datetime(&s)),
        author_id: row.get(7)?,
        created_at: row
            .get::<_, String>(8)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        updated_at: row
            .get::<_, String>(9)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
    })
}
