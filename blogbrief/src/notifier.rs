use anyhow::Context;
use common::{WebhookConfig, WebhookFormat};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::BotError;
use crate::ingestion::{Article, USER_AGENT};
use crate::llm::Brief;

const OFFLINE_NOTE: &str = "Automatic excerpt, not an AI summary";
const LINK_TEXT: &str = "Read the original";

/// Posts article briefs to a group chat webhook.
pub struct WebhookNotifier {
    url: Option<String>,
    format: WebhookFormat,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(url: Option<String>, format: WebhookFormat, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { url, format, client })
    }

    pub fn from_config(cfg: &WebhookConfig) -> anyhow::Result<Self> {
        Self::new(cfg.url.clone(), cfg.format, cfg.timeout_seconds)
    }

    /// Message text in the markup of the target chat
    pub fn format_message(&self, article: &Article, brief: &Brief) -> String {
        let heading = if brief.category.is_empty() {
            article.title.clone()
        } else {
            format!("[{}] {}", brief.category, article.title)
        };

        let mut lines = Vec::with_capacity(4);
        match self.format {
            WebhookFormat::Slack => {
                lines.push(format!("*{}*", heading));
                lines.push(brief.summary.clone());
                if !brief.source.is_ai() {
                    lines.push(format!("_{}_", OFFLINE_NOTE));
                }
                lines.push(format!("<{}|{}>", article.url, LINK_TEXT));
            }
            WebhookFormat::Wecom | WebhookFormat::Discord => {
                lines.push(format!("**{}**", heading));
                lines.push(brief.summary.clone());
                if !brief.source.is_ai() {
                    lines.push(format!("> {}", OFFLINE_NOTE));
                }
                lines.push(format!("[{}]({})", LINK_TEXT, article.url));
            }
        }
        lines.join("\n\n")
    }

    pub fn payload(&self, article: &Article, brief: &Brief) -> Value {
        let content = self.format_message(article, brief);
        match self.format {
            WebhookFormat::Wecom => json!({
                "msgtype": "markdown",
                "markdown": { "content": content },
            }),
            WebhookFormat::Slack => json!({ "text": content }),
            WebhookFormat::Discord => json!({ "content": content }),
        }
    }

    /// Posts the message. Success means a 2xx status and, for WeCom, `errcode == 0`.
    pub async fn send(&self, article: &Article, brief: &Brief) -> Result<(), BotError> {
        let Some(url) = self.url.as_deref() else {
            return Err(BotError::NotifyFailed {
                status: None,
                reason: "webhook URL is not configured".to_string(),
            });
        };

        let response = self
            .client
            .post(url)
            .json(&self.payload(article, brief))
            .send()
            .await
            .context("webhook request failed")
            .map_err(|e| BotError::NotifyFailed {
                status: None,
                reason: format!("{:#}", e),
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(BotError::NotifyFailed {
                status: Some(status.as_u16()),
                reason: body,
            });
        }

        if self.format == WebhookFormat::Wecom {
            let errcode = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("errcode").and_then(Value::as_i64));
            if errcode != Some(0) {
                return Err(BotError::NotifyFailed {
                    status: Some(status.as_u16()),
                    reason: format!("webhook rejected message: {}", body),
                });
            }
        }

        Ok(())
    }

    /// Like [`send`](Self::send) but reports failure as `false` after logging it.
    pub async fn notify(&self, article: &Article, brief: &Brief) -> bool {
        match self.send(article, brief).await {
            Ok(()) => {
                info!("Sent {} notification for {}", self.format, article.id);
                true
            }
            Err(e) => {
                warn!(article = %article.id, "{}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::SummarySource;

    fn article() -> Article {
        Article {
            id: "post-1".to_string(),
            title: "Faster builds".to_string(),
            url: "https://blog.example.com/faster-builds/".to_string(),
            published: None,
            body: None,
        }
    }

    fn brief(source: SummarySource) -> Brief {
        Brief {
            category: "Product update".to_string(),
            summary: "Builds are now twice as fast.".to_string(),
            source,
        }
    }

    #[test]
    fn wecom_payload_is_markdown() {
        let notifier = WebhookNotifier::new(None, WebhookFormat::Wecom, 5).unwrap();
        let payload = notifier.payload(&article(), &brief(SummarySource::OpenAi));

        assert_eq!(payload["msgtype"], "markdown");
        assert_eq!(
            payload["markdown"]["content"],
            "**[Product update] Faster builds**\n\nBuilds are now twice as fast.\n\n\
             [Read the original](https://blog.example.com/faster-builds/)"
        );
    }

    #[test]
    fn offline_briefs_are_labelled() {
        let notifier = WebhookNotifier::new(None, WebhookFormat::Slack, 5).unwrap();
        let text = notifier.format_message(&article(), &brief(SummarySource::Offline));
        assert!(text.starts_with("*[Product update] Faster builds*"));
        assert!(text.contains("_Automatic excerpt, not an AI summary_"));
        assert!(text.ends_with("<https://blog.example.com/faster-builds/|Read the original>"));

        let discord = WebhookNotifier::new(None, WebhookFormat::Discord, 5).unwrap();
        let payload = discord.payload(&article(), &brief(SummarySource::Offline));
        assert!(payload["content"].as_str().unwrap().contains("> Automatic excerpt"));
    }

    #[tokio::test]
    async fn missing_webhook_is_a_failure() {
        let notifier = WebhookNotifier::new(None, WebhookFormat::Wecom, 5).unwrap();
        assert!(!notifier.notify(&article(), &brief(SummarySource::Custom)).await);
    }

    #[tokio::test]
    async fn wecom_error_code_is_a_failure() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(200)
            .with_body(r#"{"errcode":93000,"errmsg":"invalid webhook url"}"#)
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(Some(format!("{}/hook", server.url())), WebhookFormat::Wecom, 5).unwrap();
        let err = notifier
            .send(&article(), &brief(SummarySource::Custom))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("93000"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn slack_accepts_any_2xx() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_body(mockito::Matcher::PartialJson(json!({"text": notifier_text()})))
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(Some(format!("{}/hook", server.url())), WebhookFormat::Slack, 5).unwrap();
        assert!(notifier.notify(&article(), &brief(SummarySource::Custom)).await);
        mock.assert_async().await;
    }

    fn notifier_text() -> String {
        WebhookNotifier::new(None, WebhookFormat::Slack, 5).unwrap().format_message(&article(), &brief(SummarySource::Custom))
    }
}
