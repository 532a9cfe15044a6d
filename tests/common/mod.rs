#![allow(dead_code)]

use std::time::Duration;

use chat_gateway::{
    config::ProviderDetail,
    providers::{ChatStream, types::ChatResponse},
};
use wiremock::ResponseTemplate;

/// A key that passes the placeholder filter
pub const LIVE_KEY: &str = "sk-live-abcdef1234567890";

pub fn create_provider_config(api_base: &str) -> ProviderDetail {
    ProviderDetail::new(LIVE_KEY, api_base)
}

/// Drain a stream until the producer closes it
pub async fn collect(mut stream: ChatStream) -> Vec<ChatResponse> {
    let mut events = Vec::new();
    while let Some(event) = tokio::time::timeout(Duration::from_secs(5), stream.recv())
        .await
        .expect("stream stalled")
    {
        events.push(event);
    }
    events
}

/// Join `data:` payloads into an SSE body
pub fn sse_body(frames: &[&str]) -> String {
    frames.iter().map(|f| format!("data: {}\n\n", f)).collect()
}

pub fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

pub fn openai_delta(content: &str, finish_reason: Option<&str>) -> String {
    serde_json::json!({
        "id": "chatcmpl-1",
        "object": "chat.completion.chunk",
        "choices": [{
            "index": 0,
            "delta": { "content": content },
            "finish_reason": finish_reason,
        }]
    })
    .to_string()
}

pub fn openai_completion(content: &str, prompt: u32, completion: u32) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": prompt,
            "completion_tokens": completion,
            "total_tokens": prompt + completion
        }
    })
}
