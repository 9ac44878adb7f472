// Summarizer chain: configured providers in order, then an offline extract
use serde_json::Value;
use tracing::{info, warn};

use super::remote::RemoteLlmProvider;
use super::{extract_json_from_text, Brief, LlmProvider, LlmRequest, SummarySource};
use crate::error::BotError;
use crate::ingestion::Article;

const FALLBACK_SENTENCES: usize = 3;
const FALLBACK_CHARS: usize = 280;
const FALLBACK_MAX_CHARS: usize = 600;
const NO_SUMMARY: &str = "No summary is available for this post; please read the original.";
const LINK_ONLY: &str = "The article text could not be retrieved; please read the original post.";

/// Produces a [`Brief`] for an article. Never fails: when every provider stage errors
/// the offline extract is returned instead.
pub struct Summarizer {
    stages: Vec<Box<dyn LlmProvider>>,
    language: String,
    max_input_chars: usize,
}

impl Summarizer {
    pub fn new(stages: Vec<Box<dyn LlmProvider>>, language: impl Into<String>, max_input_chars: usize) -> Self {
        Self {
            stages,
            language: language.into(),
            max_input_chars,
        }
    }

    /// Custom endpoint first (if configured), then the default provider (if it has a key).
    pub fn from_config(cfg: &common::LlmConfig) -> anyhow::Result<Self> {
        let mut stages: Vec<Box<dyn LlmProvider>> = Vec::new();

        if let Some(custom) = cfg.custom.as_ref().filter(|c| !c.api_url.is_empty()) {
            let model = custom.model.clone().unwrap_or_else(|| cfg.model.clone());
            stages.push(Box::new(
                RemoteLlmProvider::new(&custom.api_url, custom.api_key.clone(), model, SummarySource::Custom)?
                    .with_message_key(&custom.message_key)
                    .with_timeout(cfg.timeout_seconds),
            ));
        }

        if let Some(key) = &cfg.openai_api_key {
            stages.push(Box::new(
                RemoteLlmProvider::new(&cfg.openai_api_url, Some(key.clone()), &cfg.model, SummarySource::OpenAi)?
                    .with_timeout(cfg.timeout_seconds),
            ));
        }

        Ok(Self::new(stages, &cfg.language, cfg.max_input_chars))
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Summarizes an article whose body has been filled in by the scraper.
    pub async fn summarize_article(&self, article: &Article) -> Brief {
        self.summarize(&article.title, article.body.as_deref().unwrap_or_default())
            .await
    }

    pub async fn summarize(&self, title: &str, article_text: &str) -> Brief {
        let request = LlmRequest {
            system: Some("You summarize technical blog posts for a team chat.".to_string()),
            prompt: self.prompt(title, article_text),
            timeout_seconds: None,
        };

        for stage in &self.stages {
            let source = stage.source();
            let failure = match stage.generate(request.clone()).await {
                Ok(response) => match parse_brief(&response.content, title, article_text, source) {
                    Some(brief) => {
                        info!("LLM summarization successful via {} ({})", source, response.model);
                        return brief;
                    }
                    None => "completion was empty".to_string(),
                },
                Err(e) => format!("{:#}", e),
            };

            let err = BotError::SummarizerFailed {
                stage: source.to_string(),
                reason: failure,
            };
            warn!("{}, trying next stage", err);
        }

        offline_brief(title, article_text)
    }

    fn prompt(&self, title: &str, article_text: &str) -> String {
        let content: String = article_text.chars().take(self.max_input_chars).collect();
        format!(
            r#"Read the following blog post and write a concise {language} summary of 3-5 sentences covering the core problem, the solution and its impact.

Respond with strict JSON containing two fields:
{{
  "category": "a 1-3 word label for the kind of post, e.g. Technical deep dive, Product update, News",
  "summary": "the summary text, without Markdown or extra quotes"
}}

Title: {title}

Content:
{content}
"#,
            language = self.language,
            title = title,
            content = content
        )
    }
}

/// Brief used when the article body could not be fetched
pub fn link_only_brief(title: &str) -> Brief {
    Brief {
        category: infer_category(title, ""),
        summary: LINK_ONLY.to_string(),
        source: SummarySource::Offline,
    }
}

/// Deterministic non-AI brief: the first few sentences of the article.
pub fn offline_brief(title: &str, article_text: &str) -> Brief {
    let sentences = split_sentences(article_text);
    let mut summary = join_sentences(&sentences[..sentences.len().min(FALLBACK_SENTENCES)]);
    // unpunctuated text comes back as one huge "sentence"
    if summary.chars().count() > FALLBACK_MAX_CHARS {
        summary = summary.chars().take(FALLBACK_CHARS).collect::<String>() + "…";
    }
    if summary.is_empty() {
        summary = NO_SUMMARY.to_string();
    }

    Brief {
        category: infer_category(title, article_text),
        summary,
        source: SummarySource::Offline,
    }
}

/// Reads a completion as a brief: JSON first, then labelled lines, then plain text.
fn parse_brief(completion: &str, title: &str, article_text: &str, source: SummarySource) -> Option<Brief> {
    let completion = completion.trim();
    if completion.is_empty() {
        return None;
    }

    let (category, summary) = structured_fields(completion)
        .or_else(|| labelled_fields(completion))
        .unwrap_or_else(|| (String::new(), completion.to_string()));

    let summary = normalize_summary(&summary);
    if summary.is_empty() {
        return None;
    }
    let category = if category.trim().is_empty() {
        infer_category(title, article_text)
    } else {
        category.trim().to_string()
    };

    Some(Brief {
        category,
        summary,
        source,
    })
}

fn structured_fields(text: &str) -> Option<(String, String)> {
    let json = extract_json_from_text(text)?;
    let value: Value = serde_json::from_str(&json).ok()?;

    let from_object = |obj: &Value| -> Option<(String, String)> {
        let summary = obj.get("summary").and_then(Value::as_str)?.trim().to_string();
        if summary.is_empty() {
            return None;
        }
        let category = ["category", "type", "label"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();
        Some((category, summary))
    };

    match &value {
        Value::Array(items) => items.iter().find_map(from_object),
        other => from_object(other),
    }
}

fn labelled_fields(text: &str) -> Option<(String, String)> {
    let summary = after_label(text, &["summary", "摘要"])?;
    let category = after_label(text, &["category", "类别"])
        .and_then(|rest| rest.lines().next().map(str::to_string))
        .unwrap_or_default();
    Some((category, summary))
}

/// Text following the first `label:` (ASCII or full-width colon), to the end of input.
/// Occurrences of the label not followed by a colon are prose and skipped.
fn after_label(text: &str, labels: &[&str]) -> Option<String> {
    let lower = text.to_lowercase();
    // lowercasing can shift byte offsets for non-ASCII text
    if lower.len() != text.len() {
        return None;
    }
    labels.iter().find_map(|label| {
        lower.match_indices(label).find_map(|(start, _)| {
            let rest = text[start + label.len()..].trim_start();
            let rest = rest.strip_prefix(':').or_else(|| rest.strip_prefix('：'))?;
            Some(rest.trim().to_string())
        })
    })
}

fn normalize_summary(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let boundary = match c {
            '。' | '！' | '？' => true,
            '.' | '!' | '?' => chars.peek().map_or(true, |next| next.is_whitespace()),
            _ => false,
        };
        if boundary {
            let sentence = current.split_whitespace().collect::<Vec<_>>().join(" ");
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            current.clear();
        }
    }

    let tail = current.split_whitespace().collect::<Vec<_>>().join(" ");
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn join_sentences(sentences: &[String]) -> String {
    let mut out = String::new();
    for sentence in sentences {
        let needs_space = out.chars().last().map_or(false, |c| c.is_ascii_punctuation() || c.is_ascii_alphanumeric());
        if needs_space {
            out.push(' ');
        }
        out.push_str(sentence);
    }
    out
}

/// Best-effort category when no model provided one.
pub fn infer_category(title: &str, article_text: &str) -> String {
    let head: String = article_text.chars().take(600).collect();
    let text = format!("{}\n{}", title, head).to_lowercase();

    let heuristics: [(&[&str], &str); 5] = [
        (&["security", "vulnerability", "attack", "漏洞", "攻击"], "Security"),
        (&["tutorial", "guide", "how to", "指南", "教程"], "Technical deep dive"),
        (&["beta", "launch", "new", "update", "发布", "上线"], "Product update"),
        (&["report", "trend", "analysis", "洞察", "报告"], "Insights"),
        (&["event", "webinar", "conference", "活动", "峰会"], "Event"),
    ];

    heuristics
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| text.contains(k)))
        .map(|(_, category)| category.to_string())
        .unwrap_or_else(|| "News".to_string())
}
