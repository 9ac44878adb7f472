use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::error::BotError;
use crate::ingestion::Article;
use crate::llm::{Brief, SummarySource};

/// One row of `seen_articles`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SeenRecord {
    pub id: String,
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub first_seen_at: DateTime<Utc>,
    /// Seen on the first run beyond the initial limit; never delivered
    pub suppressed: bool,
    pub summarized: bool,
    pub notified: bool,
    pub category: Option<String>,
    pub summary: Option<String>,
    pub summary_source: Option<String>,
}

impl SeenRecord {
    /// The stored brief, once the record has been summarized
    pub fn brief(&self) -> Option<Brief> {
        if !self.summarized {
            return None;
        }
        let summary = self.summary.clone()?;
        let source = self
            .summary_source
            .as_deref()
            .and_then(|s| s.parse::<SummarySource>().ok())
            .unwrap_or(SummarySource::Offline);
        Some(Brief {
            category: self.category.clone().unwrap_or_default(),
            summary,
            source,
        })
    }

    pub fn to_article(&self) -> Article {
        Article {
            id: self.id.clone(),
            title: self.title.clone(),
            url: self.url.clone(),
            published: self.published_at,
            body: None,
        }
    }
}

/// Row counts, mostly for run reports and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub seen: i64,
    pub summarized: i64,
    pub notified: i64,
    pub suppressed: i64,
}

/// Tracks which feed entries have been seen, summarized and delivered.
///
/// Every write commits immediately: seen rows for a run go in one transaction, and the
/// summarized/notified flags are durable before the next step starts.
pub struct SeenStore {
    pool: SqlitePool,
    first_run: bool,
}

impl SeenStore {
    /// Opens the store for one run and remembers whether it was empty at that moment.
    pub async fn open(pool: SqlitePool) -> Result<Self, BotError> {
        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM seen_articles")
            .fetch_one(&pool)
            .await
            .map_err(BotError::store)?;

        debug!("storage: {} records before this run", existing);
        Ok(Self {
            pool,
            first_run: existing == 0,
        })
    }

    /// True iff the store held no records when this run opened it
    pub fn is_first_run(&self) -> bool {
        self.first_run
    }

    pub async fn is_known(&self, id: &str) -> Result<bool> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM seen_articles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to check existing article")?;
        Ok(found.is_some())
    }

    /// Ids from `ids` that are already stored
    pub async fn known_ids(&self, ids: &[&str]) -> Result<HashSet<String>> {
        let mut known = HashSet::new();
        for id in ids {
            if self.is_known(id).await? {
                known.insert(id.to_string());
            }
        }
        Ok(known)
    }

    /// Inserts the article if absent. Returns whether a row was created.
    pub async fn mark_seen(&self, article: &Article, seen_at: DateTime<Utc>, suppressed: bool) -> Result<bool> {
        let result = sqlx::query(INSERT_SEEN)
            .bind(&article.id)
            .bind(&article.title)
            .bind(&article.url)
            .bind(article.published)
            .bind(seen_at)
            .bind(suppressed)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to insert seen article {}", article.id))?;
        Ok(result.rows_affected() > 0)
    }

    /// Records all new entries of a run in one transaction.
    pub async fn record_new(
        &self,
        new: &[Article],
        suppressed: &HashSet<String>,
        seen_at: DateTime<Utc>,
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;
        let mut inserted = 0;

        for article in new {
            let result = sqlx::query(INSERT_SEEN)
                .bind(&article.id)
                .bind(&article.title)
                .bind(&article.url)
                .bind(article.published)
                .bind(seen_at)
                .bind(suppressed.contains(&article.id))
                .execute(&mut tx)
                .await
                .with_context(|| format!("failed to insert seen article {}", article.id))?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await.context("failed to commit seen articles")?;
        info!("Recorded {} new articles ({} suppressed)", inserted, suppressed.len());
        Ok(inserted)
    }

    /// Sets the summarized flag and stores the brief. A second call leaves the first brief in place.
    pub async fn mark_summarized(&self, id: &str, brief: &Brief) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE seen_articles
            SET summarized = 1, category = ?, summary = ?, summary_source = ?, summarized_at = ?
            WHERE id = ? AND summarized = 0
            "#,
        )
        .bind(&brief.category)
        .bind(&brief.summary)
        .bind(brief.source.as_str())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to mark {} summarized", id))?;
        Ok(())
    }

    pub async fn mark_notified(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE seen_articles SET notified = 1, notified_at = ? WHERE id = ? AND notified = 0")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to mark {} notified", id))?;
        Ok(())
    }

    /// Records still waiting for delivery, oldest first.
    pub async fn pending(&self) -> Result<Vec<SeenRecord>> {
        sqlx::query_as::<_, SeenRecord>(
            r#"
            SELECT id, title, url, published_at, first_seen_at, suppressed, summarized, notified,
                   category, summary, summary_source
            FROM seen_articles
            WHERE notified = 0 AND suppressed = 0
            ORDER BY first_seen_at ASC, published_at IS NULL, published_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to load pending articles")
    }

    pub async fn get(&self, id: &str) -> Result<Option<SeenRecord>> {
        sqlx::query_as::<_, SeenRecord>(
            r#"
            SELECT id, title, url, published_at, first_seen_at, suppressed, summarized, notified,
                   category, summary, summary_source
            FROM seen_articles
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load article {}", id))
    }

    pub async fn counts(&self) -> Result<StoreCounts> {
        let (seen, summarized, notified, suppressed): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(summarized), 0),
                   COALESCE(SUM(notified), 0),
                   COALESCE(SUM(suppressed), 0)
            FROM seen_articles
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("failed to count articles")?;

        Ok(StoreCounts {
            seen,
            summarized,
            notified,
            suppressed,
        })
    }
}

const INSERT_SEEN: &str = r#"
    INSERT OR IGNORE INTO seen_articles (id, title, url, published_at, first_seen_at, suppressed)
    VALUES (?, ?, ?, ?, ?, ?)
"#;
