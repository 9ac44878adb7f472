use anyhow::{Context, Result};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::debug;

use crate::ingestion::USER_AGENT;

/// Outcome of downloading an article page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArticleBody {
    Text(String),
    /// The page could not be fetched or had no readable text
    Unavailable { reason: String },
}

// Candidate containers for the main content, most specific first
const MAIN_SELECTORS: [&str; 6] = ["article", "main", ".post-content", ".entry-content", "#content", "body"];

// Text under these elements is page chrome, not article content
const BOILERPLATE: [&str; 8] = ["nav", "header", "footer", "aside", "script", "style", "noscript", "form"];

/// Downloads an article and extracts its main text.
/// Never fails: problems are returned as `ArticleBody::Unavailable` for the caller to log.
pub async fn fetch_body(url: &str, timeout_secs: u64) -> ArticleBody {
    let html = match download_html(url, timeout_secs).await {
        Ok(html) => html,
        Err(e) => {
            return ArticleBody::Unavailable {
                reason: format!("{:#}", e),
            }
        }
    };

    let text = extract_main_text(&html);
    if text.is_empty() {
        return ArticleBody::Unavailable {
            reason: "no textual content extracted".to_string(),
        };
    }

    debug!("scraping: extracted {} chars from {}", text.len(), url);
    ArticleBody::Text(text)
}

async fn download_html(url: &str, timeout_secs: u64) -> Result<String> {
    let client = Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(USER_AGENT)
        .build()
        .context("failed to build reqwest client")?;

    let response = client.get(url).send().await.context("failed to fetch article page")?;

    let status = response.status();
    if !status.is_success() {
        return Err(anyhow::anyhow!("article fetch failed with status: {}", status));
    }

    response.text().await.context("failed to read response body")
}

/// Extracts readable paragraphs from an HTML page, joined by blank lines.
pub fn extract_main_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let Ok(blocks) = Selector::parse("p, li") else {
        return String::new();
    };

    let region = MAIN_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|selector| document.select(&selector).next());

    let mut paragraphs = region
        .map(|root| collect_blocks(root, &blocks, true))
        .unwrap_or_default();

    // some sites wrap the whole page in chrome, e.g. a WebForms <form>
    if paragraphs.is_empty() {
        if let Ok(p) = Selector::parse("p") {
            paragraphs = collect_blocks(document.root_element(), &p, false);
        }
    }

    paragraphs.join("\n\n")
}

fn collect_blocks(root: ElementRef<'_>, blocks: &Selector, skip_chrome: bool) -> Vec<String> {
    root.select(blocks)
        .filter(|el| !is_nested_or_boilerplate(el, &root, skip_chrome))
        .map(|el| normalize_whitespace(&el.text().collect::<String>()))
        .filter(|text| !text.is_empty())
        .collect()
}

/// Looks at ancestors up to (not including) `root` only, so chrome wrapping the
/// region itself does not hide its content.
fn is_nested_or_boilerplate(el: &ElementRef<'_>, root: &ElementRef<'_>, skip_chrome: bool) -> bool {
    el.ancestors()
        .take_while(|node| node.id() != root.id())
        .filter_map(|node| node.value().as_element())
        .any(|ancestor| {
            let name = ancestor.name();
            name == "p" || name == "li" || (skip_chrome && BOILERPLATE.contains(&name))
        })
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
