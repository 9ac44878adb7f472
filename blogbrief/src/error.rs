//! Error taxonomy for a polling run

use thiserror::Error;

/// Errors surfaced by the pipeline.
///
/// `FeedUnavailable` and `StoreUnavailable` abort a run. The others are isolated to a
/// single article and only logged.
#[derive(Debug, Error)]
pub enum BotError {
    /// Feed could not be fetched or parsed; nothing was written
    #[error("feed unavailable ({url}): {reason}")]
    FeedUnavailable { url: String, reason: String },

    /// Article page could not be downloaded or had no text
    #[error("article fetch failed ({url}): {reason}")]
    ArticleFetchFailed { url: String, reason: String },

    /// One stage of the summarizer chain failed
    #[error("summarizer stage {stage} failed: {reason}")]
    SummarizerFailed { stage: String, reason: String },

    /// Webhook rejected or never received the message
    #[error("notification failed (status {}): {reason}", display_status(.status))]
    NotifyFailed { status: Option<u16>, reason: String },

    /// State database could not be opened or queried
    #[error("state store unavailable: {reason}")]
    StoreUnavailable { reason: String },
}

fn display_status(status: &Option<u16>) -> String {
    status.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string())
}

impl BotError {
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_failure_mentions_status() {
        let err = BotError::NotifyFailed {
            status: Some(500),
            reason: "internal error".into(),
        };
        assert_eq!(err.to_string(), "notification failed (status 500): internal error");

        let err = BotError::NotifyFailed {
            status: None,
            reason: "no webhook".into(),
        };
        assert!(err.to_string().contains("status none"));
    }

    #[test]
    fn store_errors_keep_the_reason() {
        let err = BotError::store("database is locked");
        assert!(matches!(err, BotError::StoreUnavailable { .. }));
        assert_eq!(err.to_string(), "state store unavailable: database is locked");
    }
}
