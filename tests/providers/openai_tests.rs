use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

use chat_gateway::{
    errors::AppError,
    providers::{
        Provider,
        openai::OpenAIProvider,
        types::{ChatMessage, ChatRequest, FinishReason},
    },
};

use crate::common::{
    LIVE_KEY, collect, create_provider_config, openai_completion, openai_delta, sse_body, sse_response,
};

fn create_test_request() -> ChatRequest {
    ChatRequest::new("gpt-4o-mini", vec![ChatMessage::user("Hello, world!")]).with_conversation("conv-1")
}

fn create_provider(server: &MockServer) -> OpenAIProvider {
    OpenAIProvider::new(create_provider_config(&server.uri()), Client::new())
}

#[tokio::test]
async fn test_openai_chat_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", format!("Bearer {}", LIVE_KEY).as_str()))
        .and(body_partial_json(json!({ "model": "gpt-4o-mini", "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_completion("hello", 5, 1)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = create_provider(&mock_server);
    let response = provider
        .chat(&CancellationToken::new(), create_test_request())
        .await
        .unwrap();

    assert_eq!(response.content(), "hello");
    assert_eq!(response.finish_reason, FinishReason::Stop);
    assert_eq!(response.conversation_id, "conv-1");
    assert_eq!(response.usage.unwrap().total_tokens, 6);
}

#[tokio::test]
async fn test_openai_optional_fields_only_sent_when_set() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_completion("ok", 1, 1)))
        .mount(&mock_server)
        .await;

    let provider = create_provider(&mock_server);
    let cancel = CancellationToken::new();

    provider.chat(&cancel, create_test_request()).await.unwrap();

    let mut tuned = create_test_request();
    tuned.max_tokens = Some(64);
    tuned.temperature = Some(0.5);
    provider.chat(&cancel, tuned).await.unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    let plain: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let tuned: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();

    assert!(plain.get("max_tokens").is_none());
    assert!(plain.get("temperature").is_none());
    assert_eq!(plain["messages"][0]["role"], "user");
    assert_eq!(tuned["max_tokens"], 64);
    assert_eq!(tuned["temperature"], 0.5);
}

#[tokio::test]
async fn test_openai_chat_error_status_passthrough() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "message": "Invalid API key", "type": "invalid_request_error" }
        })))
        .mount(&mock_server)
        .await;

    let provider = create_provider(&mock_server);
    let result = provider.chat(&CancellationToken::new(), create_test_request()).await;

    match result {
        Err(AppError::Upstream { status, message }) => {
            assert_eq!(status, 401);
            assert!(message.contains("Invalid API key"));
        }
        other => panic!("Expected upstream error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_openai_chat_without_choices_is_upstream_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "x", "choices": [] })))
        .mount(&mock_server)
        .await;

    let provider = create_provider(&mock_server);
    let err = provider
        .chat(&CancellationToken::new(), create_test_request())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Upstream { status: 502, .. }));
}

#[tokio::test]
async fn test_openai_chat_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(openai_completion("late", 1, 1))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&mock_server)
        .await;

    let mut config = create_provider_config(&mock_server.uri());
    config.timeout_seconds = 1;
    let provider = OpenAIProvider::new(config, Client::new());

    let err = provider
        .chat(&CancellationToken::new(), create_test_request())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Upstream { status: 504, .. }));
}

#[tokio::test]
async fn test_openai_chat_cancelled_in_flight() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(openai_completion("late", 1, 1))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&mock_server)
        .await;

    let provider = create_provider(&mock_server);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = provider.chat(&cancel, create_test_request()).await.unwrap_err();
    assert!(matches!(err, AppError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_openai_invalid_request_makes_no_call() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let provider = create_provider(&mock_server);
    let request = ChatRequest::new("gpt-4o-mini", vec![]);

    let err = provider.chat(&CancellationToken::new(), request).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_openai_stream_chunks_then_close() {
    let mock_server = MockServer::start().await;

    let body = sse_body(&[&openai_delta("hel", None), &openai_delta("lo", None), "[DONE]"]);
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("accept", "text/event-stream"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(sse_response(body))
        .mount(&mock_server)
        .await;

    let provider = create_provider(&mock_server);
    let stream = provider
        .stream_chat(CancellationToken::new(), create_test_request())
        .await
        .unwrap();

    let events = collect(stream).await;
    let contents: Vec<_> = events.iter().map(|e| e.content()).collect();
    assert_eq!(contents, vec!["hel", "lo"]);
    assert!(events.iter().all(|e| e.conversation_id == "conv-1"));
}

#[tokio::test]
async fn test_openai_stream_single_terminal_event_last() {
    let mock_server = MockServer::start().await;

    let body = sse_body(&[
        &openai_delta("Hi", None),
        &openai_delta(" there", None),
        &openai_delta("", Some("stop")),
        "[DONE]",
    ]);
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
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

    let terminals: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(terminals.len(), 1);
    assert_eq!(events.last().unwrap().finish_reason, FinishReason::Stop);

    let text: String = events.iter().map(|e| e.content()).collect();
    assert_eq!(text, "Hi there");
}

#[tokio::test]
async fn test_openai_stream_skips_noise_lines() {
    let mock_server = MockServer::start().await;

    let body = format!(
        ": keep-alive\n\ndata: not-json\n\ndata:{}\r\n\r\n{}",
        openai_delta("ok", Some("length")),
        sse_body(&["[DONE]"])
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
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

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].content(), "ok");
    assert_eq!(events[0].finish_reason, FinishReason::Length);
}

#[tokio::test]
async fn test_openai_stream_eof_before_done_ends_with_error_event() {
    let mock_server = MockServer::start().await;

    let body = sse_body(&[&openai_delta("partial", None)]);
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
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
    assert_eq!(events[0].content(), "partial");
    let last = events.last().unwrap();
    assert_eq!(last.finish_reason, FinishReason::Error);
    assert!(last.error_message().unwrap().contains("ended before completion"));
}

#[tokio::test]
async fn test_openai_stream_setup_failure_is_err() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&mock_server)
        .await;

    let provider = create_provider(&mock_server);
    let result = provider
        .stream_chat(CancellationToken::new(), create_test_request())
        .await;

    match result {
        Err(AppError::Upstream { status, message }) => {
            assert_eq!(status, 503);
            assert!(message.contains("overloaded"));
        }
        Err(other) => panic!("Expected upstream error, got {:?}", other),
        Ok(_) => panic!("Expected setup failure"),
    }
}

#[test]
fn test_openai_builtin_models() {
    let provider = OpenAIProvider::new(create_provider_config("http://localhost"), Client::new());
    let models = provider.get_models();
    assert!(!models.is_empty());
    assert!(models.iter().all(|m| m.provider == "openai"));
    assert_eq!(provider.name(), "openai");
    assert!(!provider.is_demo());
}
