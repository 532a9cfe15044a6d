use reqwest::Client;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

use chat_gateway::{
    errors::AppError,
    providers::{
        Provider,
        anthropic::AnthropicProvider,
        types::{ChatMessage, ChatRequest, FinishReason, TokenUsage},
    },
};

use crate::common::{LIVE_KEY, collect, create_provider_config, sse_response};

fn create_test_request() -> ChatRequest {
    ChatRequest::new(
        "claude-3-haiku-20240307",
        vec![
            ChatMessage::system("You are terse."),
            ChatMessage::user("Hello"),
        ],
    )
    .with_conversation("conv-a")
}

fn create_provider(server: &MockServer) -> AnthropicProvider {
    AnthropicProvider::new(create_provider_config(&server.uri()), Client::new())
}

/// One named SSE event the way the Messages API frames it
fn event(name: &str, payload: serde_json::Value) -> String {
    format!("event: {}\ndata: {}\n\n", name, payload)
}

#[tokio::test]
async fn test_anthropic_chat_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("x-api-key", LIVE_KEY))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-haiku-20240307",
            "content": [
                { "type": "text", "text": "Hello" },
                { "type": "text", "text": " there" }
            ],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 12, "output_tokens": 3 }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = create_provider(&mock_server);
    let response = provider
        .chat(&CancellationToken::new(), create_test_request())
        .await
        .unwrap();

    assert_eq!(response.content(), "Hello there");
    assert_eq!(response.finish_reason, FinishReason::Stop);
    assert_eq!(response.usage, Some(TokenUsage::new(12, 3)));
    assert_eq!(response.conversation_id, "conv-a");

    let requests = mock_server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["system"], "You are terse.");
    assert_eq!(body["max_tokens"], 1024);
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    assert_eq!(body["messages"][0]["role"], "user");
}

#[tokio::test]
async fn test_anthropic_max_tokens_stop_reason_maps_to_length() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_02",
            "model": "claude-3-haiku-20240307",
            "content": [{ "type": "text", "text": "cut" }],
            "stop_reason": "max_tokens",
            "usage": { "input_tokens": 1, "output_tokens": 5 }
        })))
        .mount(&mock_server)
        .await;

    let mut request = create_test_request();
    request.max_tokens = Some(5);

    let provider = create_provider(&mock_server);
    let response = provider.chat(&CancellationToken::new(), request).await.unwrap();
    assert_eq!(response.finish_reason, FinishReason::Length);

    let requests = mock_server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["max_tokens"], 5);
}

#[tokio::test]
async fn test_anthropic_error_status_passthrough() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "type": "error",
            "error": { "type": "rate_limit_error", "message": "Slow down" }
        })))
        .mount(&mock_server)
        .await;

    let provider = create_provider(&mock_server);
    let err = provider
        .chat(&CancellationToken::new(), create_test_request())
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 429);
    assert!(err.to_string().contains("Slow down"));
}

#[tokio::test]
async fn test_anthropic_stream_event_sequence() {
    let mock_server = MockServer::start().await;

    let body = [
        event("message_start", json!({
            "type": "message_start",
            "message": { "id": "msg_s", "usage": { "input_tokens": 9, "output_tokens": 1 } }
        })),
        event("content_block_start", json!({
            "type": "content_block_start", "index": 0, "content_block": { "type": "text", "text": "" }
        })),
        event("ping", json!({ "type": "ping" })),
        event("content_block_delta", json!({
            "type": "content_block_delta", "index": 0, "delta": { "type": "text_delta", "text": "Hel" }
        })),
        event("content_block_delta", json!({
            "type": "content_block_delta", "index": 0, "delta": { "type": "text_delta", "text": "lo" }
        })),
        event("content_block_stop", json!({ "type": "content_block_stop", "index": 0 })),
        event("message_delta", json!({
            "type": "message_delta", "delta": { "stop_reason": "end_turn" }, "usage": { "output_tokens": 2 }
        })),
        event("message_stop", json!({ "type": "message_stop" })),
    ]
    .concat();

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("accept", "text/event-stream"))
        .respond_with(sse_response(body))
        .mount(&mock_server)
        .await;

    let provider = create_provider(&mock_server);
    let events = collect(
        provider
            .stream_chat(CancellationToken::new(), create_test_request())
            .await
            .unwrap(),
    )
    .await;

    let contents: Vec<_> = events.iter().map(|e| e.content()).collect();
    assert_eq!(contents, vec!["Hel", "lo", ""]);

    let last = events.last().unwrap();
    assert_eq!(last.finish_reason, FinishReason::Stop);
    assert_eq!(last.usage, Some(TokenUsage::new(9, 2)));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    let requests = mock_server.received_requests().await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(sent["stream"], true);
}

#[tokio::test]
async fn test_anthropic_stream_error_event() {
    let mock_server = MockServer::start().await;

    let body = [
        event("message_start", json!({ "type": "message_start", "message": { "id": "msg_e" } })),
        event("content_block_delta", json!({
            "type": "content_block_delta", "index": 0, "delta": { "type": "text_delta", "text": "par" }
        })),
        event("error", json!({
            "type": "error", "error": { "type": "overloaded_error", "message": "Overloaded" }
        })),
    ]
    .concat();

    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(sse_response(body))
        .mount(&mock_server)
        .await;

    let provider = create_provider(&mock_server);
    let events = collect(
        provider
            .stream_chat(CancellationToken::new(), create_test_request())
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].content(), "par");
    assert_eq!(events[1].finish_reason, FinishReason::Error);
    assert!(events[1].error_message().unwrap().contains("Overloaded"));
}

#[tokio::test]
async fn test_anthropic_stream_truncated_body() {
    let mock_server = MockServer::start().await;

    let body = event("content_block_delta", json!({
        "type": "content_block_delta", "index": 0, "delta": { "type": "text_delta", "text": "half" }
    }));

    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(sse_response(body))
        .mount(&mock_server)
        .await;

    let provider = create_provider(&mock_server);
    let events = collect(
        provider
            .stream_chat(CancellationToken::new(), create_test_request())
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(events.len(), 2);
    assert_eq!(events[1].finish_reason, FinishReason::Error);
}

#[tokio::test]
async fn test_anthropic_stream_setup_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid x-api-key"))
        .mount(&mock_server)
        .await;

    let provider = create_provider(&mock_server);
    let result = provider
        .stream_chat(CancellationToken::new(), create_test_request())
        .await;

    assert!(matches!(result, Err(AppError::Upstream { status: 401, .. })));
}
