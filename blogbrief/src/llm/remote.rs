use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use super::{extract, ChatMessage, LlmProvider, LlmRequest, LlmResponse, SummarySource};
use crate::ingestion::USER_AGENT;

/// Remote chat-completion provider.
///
/// Sends `{ "model": ..., <message_key>: [{role, content}, ...] }` and accepts any of the
/// response layouts known to [`extract`].
pub struct RemoteLlmProvider {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    message_key: String,
    source: SummarySource,
    default_timeout: Duration,
    client: reqwest::Client,
}

impl RemoteLlmProvider {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        source: SummarySource,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
            message_key: common::DEFAULT_MESSAGE_KEY.to_string(),
            source,
            default_timeout: Duration::from_secs(30),
            client,
        })
    }

    /// Field name carrying the message list, `messages` by default
    pub fn with_message_key(mut self, message_key: impl Into<String>) -> Self {
        self.message_key = message_key.into();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.default_timeout = Duration::from_secs(timeout_secs);
        self
    }

    /// JSON body for the given messages
    pub fn payload(&self, messages: &[ChatMessage]) -> Result<Value> {
        let mut body = Map::new();
        body.insert("model".to_string(), Value::String(self.model.clone()));
        body.insert(
            self.message_key.clone(),
            serde_json::to_value(messages).context("failed to serialize chat messages")?,
        );
        Ok(Value::Object(body))
    }
}

#[async_trait::async_trait]
impl LlmProvider for RemoteLlmProvider {
    fn source(&self) -> SummarySource {
        self.source
    }

    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let timeout = request
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system {
            messages.push(ChatMessage::new("system", system));
        }
        messages.push(ChatMessage::new("user", request.prompt));
        let body = self.payload(&messages)?;

        let mut http_request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        // Make HTTP request with timeout
        let response = tokio::time::timeout(timeout, http_request.send())
            .await
            .context("LLM request timed out")?
            .context("LLM HTTP request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error {} from {}: {}", status, self.endpoint, body);
        }

        let resp_body: Value = tokio::time::timeout(timeout, response.json::<Value>())
            .await
            .context("LLM request timed out")?
            .context("Failed to parse LLM response as JSON")?;

        let (strategy, content) = extract::extract_with_strategy(&resp_body)
            .context("LLM response contains no text payload")?;
        debug!("llm: {} response matched {}", self.source, strategy);

        let model = resp_body
            .get("model")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.model.clone());

        Ok(LlmResponse { content, model })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_uses_configured_message_key() {
        let provider = RemoteLlmProvider::new("http://localhost/chat", None, "qwen", SummarySource::Custom)
            .expect("provider")
            .with_message_key("input");
        let body = provider
            .payload(&[ChatMessage::new("user", "hello")])
            .expect("payload");

        assert_eq!(body["model"], "qwen");
        assert_eq!(body["input"][0]["role"], "user");
        assert_eq!(body["input"][0]["content"], "hello");
        assert!(body.get("messages").is_none());
    }
}
