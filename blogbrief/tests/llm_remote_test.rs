use blogbrief::llm::remote::RemoteLlmProvider;
use blogbrief::llm::{LlmProvider, LlmRequest, SummarySource};
use mockito::Matcher;
use serde_json::json;

fn request(prompt: &str) -> LlmRequest {
    LlmRequest {
        system: Some("You summarize blog posts.".to_string()),
        prompt: prompt.to_string(),
        timeout_seconds: Some(10),
    }
}

#[tokio::test]
async fn test_remote_provider_with_mock() {
    let mut server = mockito::Server::new_async().await;

    // Mock successful OpenAI response
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", "Bearer fake-api-key")
        .match_body(Matcher::PartialJson(json!({
            "model": "gpt-4o-mini",
            "messages": [
                {"role": "system", "content": "You summarize blog posts."},
                {"role": "user", "content": "Test prompt"}
            ]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "model": "gpt-4o-mini-2024-07-18",
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": "This is a test response"
                    },
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
            }"#,
        )
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(
        format!("{}/v1/chat/completions", server.url()),
        Some("fake-api-key".to_string()),
        "gpt-4o-mini",
        SummarySource::OpenAi,
    )
    .unwrap();

    let response = provider.generate(request("Test prompt")).await.unwrap();
    assert_eq!(response.content, "This is a test response");
    assert_eq!(response.model, "gpt-4o-mini-2024-07-18");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_custom_endpoint_message_key_and_no_auth() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/chat")
        .match_header("authorization", Matcher::Missing)
        .match_body(Matcher::PartialJson(json!({
            "model": "qwen-plus",
            "input": [{"role": "system", "content": "You summarize blog posts."}]
        })))
        .with_status(200)
        .with_body(r#"{"output_text": "worker summary"}"#)
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(format!("{}/chat", server.url()), None, "qwen-plus", SummarySource::Custom)
        .unwrap()
        .with_message_key("input");

    let response = provider.generate(request("hello")).await.unwrap();
    assert_eq!(response.content, "worker summary");
    // no model in the body, so the configured one is reported
    assert_eq!(response.model, "qwen-plus");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_rate_limited_response_is_an_error() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .with_status(429)
        .with_body(r#"{"error": {"message": "Rate limit reached"}}"#)
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), Some("k".to_string()), "m", SummarySource::OpenAi).unwrap();
    let err = provider.generate(request("x")).await.unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("429"), "unexpected error: {}", message);
    assert!(message.contains("Rate limit reached"));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_response_without_text_is_an_error() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_body(r#"{"id": "cmpl-1", "choices": [], "usage": {"total_tokens": 0}}"#)
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), None, "m", SummarySource::Custom).unwrap();
    let err = provider.generate(request("x")).await.unwrap_err();
    assert!(format!("{:#}", err).contains("no text payload"));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_non_json_body_is_an_error() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_body("<html>gateway</html>")
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), None, "m", SummarySource::Custom).unwrap();
    assert!(provider.generate(request("x")).await.is_err());

    mock.assert_async().await;
}
