use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use feed_rs::parser;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::BotError;

pub const USER_AGENT: &str = concat!("blogbrief/", env!("CARGO_PKG_VERSION"));

/// A candidate article read from the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    /// Stable across runs: the entry GUID, or the link when the feed has none
    pub id: String,
    pub title: String,
    pub url: String,
    pub published: Option<DateTime<Utc>>,
    /// Filled in by the scraper
    pub body: Option<String>,
}

/// Fetches the feed and returns its entries, newest first.
/// Any network, status or parse problem is reported as `FeedUnavailable`.
pub async fn fetch_entries(url: &str, timeout_secs: u64) -> Result<Vec<Article>, BotError> {
    let unavailable = |e: anyhow::Error| BotError::FeedUnavailable {
        url: url.to_string(),
        reason: format!("{:#}", e),
    };

    let bytes = download_feed(url, timeout_secs).await.map_err(unavailable)?;
    let articles = parse_entries(&bytes).map_err(unavailable)?;
    info!("Fetched feed '{}': {} entries", url, articles.len());
    Ok(articles)
}

async fn download_feed(url: &str, timeout_secs: u64) -> Result<Vec<u8>> {
    let client = Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(USER_AGENT)
        .build()
        .context("failed to build reqwest client")?;

    let response = client
        .get(url)
        .send()
        .await
        .context("network error during fetch")?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("feed fetch failed with status: {}", status);
    }

    let bytes = response.bytes().await.context("failed to read response body")?;
    Ok(bytes.to_vec())
}

/// Parses RSS/Atom bytes into articles sorted by published time, newest first.
/// Undated entries keep their feed order and go last.
pub fn parse_entries(data: &[u8]) -> Result<Vec<Article>> {
    let feed = parser::parse(data).context("failed to parse feed")?;

    let mut articles: Vec<Article> = feed
        .entries
        .into_iter()
        .filter_map(article_from_entry)
        .collect();

    articles.sort_by(|a, b| b.published.cmp(&a.published));
    Ok(articles)
}

fn article_from_entry(entry: Entry) -> Option<Article> {
    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.trim().to_string())
        .unwrap_or_default();

    let Some(link) = entry.links.first().map(|l| l.href.trim().to_string()) else {
        debug!("Skipping entry without URL: {:?}", title);
        return None;
    };
    if url::Url::parse(&link).is_err() {
        debug!("Skipping entry with invalid URL {:?}: {:?}", link, title);
        return None;
    }

    let raw_id = entry.id.trim();
    let id = if raw_id.is_empty() || looks_generated(raw_id) {
        link.clone()
    } else {
        raw_id.to_string()
    };

    Some(Article {
        id,
        title: if title.is_empty() { link.clone() } else { title },
        url: link,
        published: entry.published.or(entry.updated),
        body: None,
    })
}

/// feed-rs invents a random UUID for entries that carry no guid, which would change
/// on every fetch.
fn looks_generated(id: &str) -> bool {
    let groups: Vec<&str> = id.split('-').collect();
    let lengths = [8, 4, 4, 4, 12];
    groups.len() == lengths.len()
        && groups
            .iter()
            .zip(lengths)
            .all(|(g, len)| g.len() == len && g.chars().all(|c| c.is_ascii_hexdigit()))
}
