use std::time::Duration;

use tokio_util::sync::CancellationToken;

use chat_gateway::providers::{
    Provider,
    mock::{MockFlavour, MockProvider},
    types::{ChatMessage, ChatRequest, FinishReason},
};

use crate::common::collect;

fn request(text: &str) -> ChatRequest {
    ChatRequest::new("gpt-3.5-turbo", vec![ChatMessage::user(text)]).with_conversation("demo-conv")
}

#[tokio::test]
async fn test_stream_concatenation_matches_blocking_reply() {
    for flavour in [MockFlavour::OpenAI, MockFlavour::Anthropic] {
        for prompt in ["hello there", "How are you?", "what now", "help me", "tell me about  spacing"] {
            let provider = MockProvider::new(flavour).with_delay(Duration::ZERO);
            let cancel = CancellationToken::new();

            let blocking = provider.chat(&cancel, request(prompt)).await.unwrap();
            let events = collect(provider.stream_chat(cancel, request(prompt)).await.unwrap()).await;

            let streamed: String = events.iter().map(|e| e.content()).collect();
            assert_eq!(streamed, blocking.content(), "{:?} / {}", flavour, prompt);

            assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
            let last = events.last().unwrap();
            assert_eq!(last.finish_reason, FinishReason::Stop);
            assert_eq!(
                last.usage.unwrap().completion_tokens as usize,
                blocking.content().split(' ').count()
            );
        }
    }
}

#[tokio::test]
async fn test_mock_blocking_usage_per_flavour() {
    let cancel = CancellationToken::new();

    let openai = MockProvider::new(MockFlavour::OpenAI).chat(&cancel, request("hi")).await.unwrap();
    assert_eq!(openai.usage.unwrap().total_tokens, 150);
    assert_eq!(openai.conversation_id, "demo-conv");

    let anthropic = MockProvider::new(MockFlavour::Anthropic).chat(&cancel, request("hi")).await.unwrap();
    assert_eq!(anthropic.usage.unwrap().total_tokens, 180);
}

#[tokio::test]
async fn test_mock_identity() {
    let provider = MockProvider::new(MockFlavour::Anthropic);
    assert_eq!(provider.name(), "anthropic");
    assert!(provider.is_demo());
    assert!(provider.get_models().iter().all(|m| m.name.contains("(Demo)")));
}

#[tokio::test]
async fn test_cancel_mid_stream_closes_promptly() {
    let provider = MockProvider::new(MockFlavour::OpenAI).with_delay(Duration::from_millis(200));
    let cancel = CancellationToken::new();
    let mut stream = provider.stream_chat(cancel.clone(), request("hello")).await.unwrap();

    let first = stream.recv().await.unwrap();
    assert_eq!(first.content(), "Hello!");

    cancel.cancel();
    let next = tokio::time::timeout(Duration::from_millis(100), stream.recv())
        .await
        .expect("stream should close right after cancellation");
    assert!(next.is_none());
}
