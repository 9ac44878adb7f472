use anyhow::Result;
use chrono::Utc;
use common::Config;
use sqlx::SqlitePool;
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

use crate::error::BotError;
use crate::ingestion::{self, Article};
use crate::llm::summarizer::{link_only_brief, Summarizer};
use crate::notifier::WebhookNotifier;
use crate::scraping::{self, ArticleBody};
use crate::storage::{SeenRecord, SeenStore};

/// Feed entries of one fetch, split by whether the store already knows them.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub known: Vec<String>,
    /// In feed order (newest first), without duplicates
    pub new: Vec<Article>,
}

impl RunContext {
    pub fn diff(feed: Vec<Article>, known_ids: &HashSet<String>) -> Self {
        let mut ctx = RunContext::default();
        let mut taken = HashSet::new();

        for article in feed {
            if known_ids.contains(&article.id) {
                ctx.known.push(article.id);
            } else if taken.insert(article.id.clone()) {
                ctx.new.push(article);
            }
        }
        ctx
    }

    /// Ids recorded as seen but never delivered. Only the first run holds anything back:
    /// everything past the `limit` most recent entries.
    pub fn suppressed(&self, first_run: bool, limit: usize) -> HashSet<String> {
        if !first_run {
            return HashSet::new();
        }
        self.new.iter().skip(limit).map(|a| a.id.clone()).collect()
    }
}

/// What one run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub fetched: usize,
    pub new: usize,
    pub suppressed: usize,
    pub summarized: usize,
    pub notified: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct ArticleOutcome {
    summarized: bool,
    notified: bool,
}

/// Feed -> diff -> fetch/summarize/notify -> persist, once per call to [`Pipeline::run_once`].
pub struct Pipeline {
    config: Config,
    pool: SqlitePool,
    summarizer: Summarizer,
    notifier: WebhookNotifier,
}

impl Pipeline {
    pub fn new(config: &Config, pool: SqlitePool) -> Result<Self> {
        let summarizer = Summarizer::from_config(&config.llm)?;
        if summarizer.stage_count() == 0 {
            warn!("No LLM endpoint configured, briefs will be offline excerpts");
        }

        Ok(Self {
            config: config.clone(),
            pool,
            summarizer,
            notifier: WebhookNotifier::from_config(&config.webhook)?,
        })
    }

    /// Runs the whole pipeline once. Only a feed or store failure returns an error;
    /// problems with individual articles are logged and counted in the report.
    pub async fn run_once(&self) -> Result<RunReport, BotError> {
        let feed = ingestion::fetch_entries(&self.config.feed.url, self.config.feed.timeout_seconds).await?;
        let store = SeenStore::open(self.pool.clone()).await?;

        let ids: Vec<&str> = feed.iter().map(|a| a.id.as_str()).collect();
        let known = store.known_ids(&ids).await.map_err(BotError::store)?;
        let fetched = feed.len();
        let ctx = RunContext::diff(feed, &known);

        let first_run = store.is_first_run();
        let suppressed = ctx.suppressed(first_run, self.config.initial_summary_limit);
        if first_run {
            info!(
                "First run: {} entries, delivering the {} most recent",
                ctx.new.len(),
                ctx.new.len() - suppressed.len()
            );
        }

        store
            .record_new(&ctx.new, &suppressed, Utc::now())
            .await
            .map_err(BotError::store)?;

        let mut report = RunReport {
            fetched,
            new: ctx.new.len(),
            suppressed: suppressed.len(),
            ..RunReport::default()
        };

        let pending = store.pending().await.map_err(BotError::store)?;
        let selected = ctx.new.len() - suppressed.len();
        debug!("{} entries already known, {} selected", ctx.known.len(), selected);
        if pending.len() > selected {
            info!("Retrying {} undelivered articles from earlier runs", pending.len() - selected);
        }

        for record in &pending {
            match self.process_record(&store, record).await {
                Ok(outcome) => {
                    report.summarized += usize::from(outcome.summarized);
                    if outcome.notified {
                        report.notified += 1;
                    } else {
                        report.failed += 1;
                    }
                }
                Err(e) => {
                    error!(article = %record.id, "Failed to process article: {:#}", e);
                    report.failed += 1;
                }
            }
        }

        info!(
            fetched = report.fetched,
            new = report.new,
            suppressed = report.suppressed,
            summarized = report.summarized,
            notified = report.notified,
            failed = report.failed,
            "run complete"
        );
        Ok(report)
    }

    /// Fetch -> summarize -> notify for one record. The summary is stored before the
    /// webhook is called, so a failed delivery is retried later without a new LLM call.
    async fn process_record(&self, store: &SeenStore, record: &SeenRecord) -> Result<ArticleOutcome> {
        let mut article = record.to_article();
        let mut outcome = ArticleOutcome::default();

        let brief = match record.brief() {
            Some(brief) => {
                info!(article = %article.id, "Reusing stored summary");
                brief
            }
            None => {
                info!(article = %article.id, "Processing entry: {}", article.title);
                let brief = match scraping::fetch_body(&article.url, self.config.scraping.timeout_seconds).await {
                    ArticleBody::Text(text) => {
                        article.body = Some(text);
                        self.summarizer.summarize_article(&article).await
                    }
                    ArticleBody::Unavailable { reason } => {
                        let err = BotError::ArticleFetchFailed {
                            url: article.url.clone(),
                            reason,
                        };
                        warn!(article = %article.id, "{}; sending link only", err);
                        link_only_brief(&article.title)
                    }
                };
                store.mark_summarized(&article.id, &brief).await?;
                outcome.summarized = true;
                brief
            }
        };

        if self.notifier.notify(&article, &brief).await {
            store.mark_notified(&article.id).await?;
            outcome.notified = true;
        }
        Ok(outcome)
    }
}
