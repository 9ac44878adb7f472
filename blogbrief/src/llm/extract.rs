//! Pulls the completion text out of chat API responses.
//!
//! Providers that claim OpenAI compatibility still disagree on where the text lives,
//! so each known layout is a small strategy. They are tried in order and the first
//! non-empty string wins. New layouts go into [`STRATEGIES`] without touching the
//! existing ones.

use serde_json::Value;

/// Pure function from a response body to the text it carries, if any
pub type Extractor = fn(&Value) -> Option<String>;

/// Ordered extraction strategies, most specific first
pub const STRATEGIES: &[(&str, Extractor)] = &[
    ("choices[0].message.content", message_content),
    ("choices[0].text", completion_text),
    ("output_text", output_text),
    ("choices[0].message.content[].text", message_content_parts),
    ("choices[0].delta.content", delta_content),
    ("message.content", top_level_message),
    ("response", response_field),
    ("result", result_field),
    ("first string leaf", first_string_leaf),
];

// Keys that hold identifiers or bookkeeping, never the completion
const METADATA_KEYS: &[&str] = &[
    "id",
    "object",
    "model",
    "role",
    "finish_reason",
    "done_reason",
    "stop_reason",
    "system_fingerprint",
    "type",
    "created",
    "created_at",
    "updated_at",
    "status",
];

/// Returns the completion text, or `None` when no strategy matches.
pub fn extract_text(body: &Value) -> Option<String> {
    extract_with_strategy(body).map(|(_, text)| text)
}

/// Like [`extract_text`], also naming the strategy that matched.
pub fn extract_with_strategy(body: &Value) -> Option<(&'static str, String)> {
    STRATEGIES
        .iter()
        .find_map(|(name, extractor)| extractor(body).map(|text| (*name, text)))
}

fn non_empty(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn first_choice(body: &Value) -> Option<&Value> {
    body.get("choices")?.get(0)
}

fn message_content(body: &Value) -> Option<String> {
    non_empty(first_choice(body)?.get("message")?.get("content")?)
}

fn completion_text(body: &Value) -> Option<String> {
    non_empty(first_choice(body)?.get("text")?)
}

fn output_text(body: &Value) -> Option<String> {
    non_empty(body.get("output_text")?)
}

fn message_content_parts(body: &Value) -> Option<String> {
    let parts = first_choice(body)?.get("message")?.get("content")?.as_array()?;
    let joined: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    let joined = joined.trim();
    (!joined.is_empty()).then(|| joined.to_string())
}

fn delta_content(body: &Value) -> Option<String> {
    non_empty(first_choice(body)?.get("delta")?.get("content")?)
}

// Ollama /api/chat
fn top_level_message(body: &Value) -> Option<String> {
    non_empty(body.get("message")?.get("content")?)
}

// Ollama /api/generate
fn response_field(body: &Value) -> Option<String> {
    non_empty(body.get("response")?)
}

fn result_field(body: &Value) -> Option<String> {
    non_empty(body.get("result")?)
}

fn first_string_leaf(body: &Value) -> Option<String> {
    match body {
        Value::String(s) if is_timestamp(s) => None,
        Value::String(_) => non_empty(body),
        Value::Array(items) => items.iter().find_map(first_string_leaf),
        Value::Object(map) => map
            .iter()
            .filter(|(key, _)| !METADATA_KEYS.contains(&key.as_str()))
            .find_map(|(_, value)| first_string_leaf(value)),
        _ => None,
    }
}

fn is_timestamp(text: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(text.trim()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn the_three_common_shapes_yield_the_same_text() {
        let shapes = [
            json!({"choices": [{"message": {"role": "assistant", "content": "X"}}]}),
            json!({"choices": [{"text": "X", "index": 0}]}),
            json!({"output_text": "X"}),
        ];
        for body in &shapes {
            assert_eq!(extract_text(body).as_deref(), Some("X"), "shape {}", body);
        }
    }

    #[test]
    fn message_content_wins_over_later_strategies() {
        let body = json!({
            "output_text": "from output_text",
            "choices": [{"message": {"content": "from message"}, "text": "from text"}]
        });
        let (strategy, text) = extract_with_strategy(&body).expect("text");
        assert_eq!(strategy, "choices[0].message.content");
        assert_eq!(text, "from message");
    }

    #[test]
    fn blank_content_defers_to_the_next_strategy() {
        let body = json!({
            "choices": [{"message": {"content": "   "}, "text": "fallback"}]
        });
        assert_eq!(extract_text(&body).as_deref(), Some("fallback"));
    }

    #[test]
    fn content_parts_are_concatenated() {
        let body = json!({
            "choices": [{"message": {"content": [
                {"type": "text", "text": "Hello, "},
                {"type": "text", "text": "world"}
            ]}}]
        });
        assert_eq!(extract_text(&body).as_deref(), Some("Hello, world"));
    }

    #[test]
    fn provider_specific_fields() {
        let delta = json!({"choices": [{"delta": {"content": "streamed"}}]});
        assert_eq!(extract_text(&delta).as_deref(), Some("streamed"));

        let result = json!({"success": true, "result": "worker output"});
        assert_eq!(extract_text(&result).as_deref(), Some("worker output"));
    }

    #[test]
    fn ollama_chat_and_generate_bodies() {
        let chat = json!({
            "model": "llama3",
            "created_at": "2024-06-01T10:00:00.123Z",
            "message": {"role": "assistant", "content": "Real summary"},
            "done_reason": "stop",
            "done": true
        });
        assert_eq!(
            extract_with_strategy(&chat),
            Some(("message.content", "Real summary".to_string()))
        );

        let generate = json!({
            "model": "llama3",
            "created_at": "2024-06-01T10:00:00.123Z",
            "response": "Real summary",
            "done": true
        });
        assert_eq!(
            extract_with_strategy(&generate),
            Some(("response", "Real summary".to_string()))
        );
    }

    #[test]
    fn leaf_search_skips_timestamps() {
        let body = json!({
            "data": {"finished": "2024-06-01T10:00:00+02:00", "text": "leaf text"},
            "meta": {"created_at": "yesterday"}
        });
        assert_eq!(extract_text(&body).as_deref(), Some("leaf text"));

        let only_bookkeeping = json!({"created_at": "2024-06-01T10:00:00Z", "stop_reason": "end_turn"});
        assert!(extract_text(&only_bookkeeping).is_none());
    }

    #[test]
    fn unknown_shape_falls_back_to_first_string_leaf() {
        let body = json!({
            "id": "resp_123",
            "model": "custom-model",
            "data": {"generations": [{"finish_reason": "stop", "output": "leaf text"}]}
        });
        let (strategy, text) = extract_with_strategy(&body).expect("text");
        assert_eq!(strategy, "first string leaf");
        assert_eq!(text, "leaf text");
    }

    #[test]
    fn bodies_without_text_fail_explicitly() {
        assert!(extract_text(&json!({"choices": []})).is_none());
        assert!(extract_text(&json!({"id": "x", "usage": {"total_tokens": 3}})).is_none());
        assert!(extract_text(&json!(null)).is_none());
    }
}
