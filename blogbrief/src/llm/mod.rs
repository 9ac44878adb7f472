use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod extract;
pub mod remote;
pub mod summarizer;

/// Core trait for chat-completion providers
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short label used in logs and stored as the brief's provenance
    fn source(&self) -> SummarySource;

    /// Generate a completion for a given prompt
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse>;
}

/// Request structure for LLM generation
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub timeout_seconds: Option<u64>,
}

/// Response from LLM generation
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
}

/// One role/content entry of a chat payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// Where a brief came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummarySource {
    /// Custom chat-completion endpoint
    Custom,
    /// Default OpenAI-compatible provider
    OpenAi,
    /// Heuristic extract, no model involved
    Offline,
}

impl SummarySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Custom => "custom",
            Self::OpenAi => "openai",
            Self::Offline => "offline",
        }
    }

    pub fn is_ai(&self) -> bool {
        !matches!(self, Self::Offline)
    }
}

impl fmt::Display for SummarySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SummarySource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "custom" => Ok(Self::Custom),
            "openai" => Ok(Self::OpenAi),
            "offline" => Ok(Self::Offline),
            other => anyhow::bail!("unknown summary source: {}", other),
        }
    }
}

/// Summary of one article, ready to be posted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Brief {
    /// Short label such as "Security" or "Product update"
    pub category: String,
    pub summary: String,
    pub source: SummarySource,
}

/// Helper to extract JSON from text that might contain markdown backticks or preamble
pub fn extract_json_from_text(text: &str) -> Option<String> {
    // 1. Try to find content between ```json and ```
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim().to_string());
        }
    }

    // 2. Try to find content between ``` and ```
    if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim().to_string());
        }
    }

    // 3. Try to find the first '{' and last '}'
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            return Some(text[start..=end].to_string());
        }
    }

    None
}
