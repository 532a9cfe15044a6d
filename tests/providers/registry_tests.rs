use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

use chat_gateway::{
    config::DispatchConfig,
    providers::{
        ProviderFactory, ProviderRegistry,
        types::{ChatMessage, ChatRequest},
    },
    store::{CredentialRecord, InMemoryCredentialStore},
};

use crate::common::{LIVE_KEY, openai_completion};

fn factory() -> ProviderFactory {
    ProviderFactory::from_config(&DispatchConfig::default()).unwrap()
}

async fn registry_with(records: Vec<CredentialRecord>) -> (ProviderRegistry, Arc<InMemoryCredentialStore>) {
    let store = Arc::new(InMemoryCredentialStore::new(records));
    let registry = ProviderRegistry::build(factory(), store.clone()).await.unwrap();
    (registry, store)
}

#[tokio::test]
async fn test_empty_store_installs_demo_providers() {
    let (registry, _) = registry_with(vec![]).await;

    assert_eq!(registry.provider_names().await, vec!["anthropic", "openai"]);
    assert!(!registry.has_real_providers().await);
    assert!(!registry.is_empty().await);

    let openai = registry.get("openai").await.unwrap();
    assert!(openai.is_demo());
}

#[tokio::test]
async fn test_real_credential_uses_api_url() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_completion("from stub", 1, 2)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (registry, _) = registry_with(vec![
        CredentialRecord::new("c1", "openai", LIVE_KEY).with_api_url(mock_server.uri()),
    ])
    .await;

    assert_eq!(registry.provider_names().await, vec!["openai"]);
    let provider = registry.get("openai").await.unwrap();
    assert!(!provider.is_demo());

    let response = provider
        .chat(
            &CancellationToken::new(),
            ChatRequest::new("gpt-4o-mini", vec![ChatMessage::user("hi")]),
        )
        .await
        .unwrap();
    assert_eq!(response.content(), "from stub");
}

#[tokio::test]
async fn test_last_credential_for_a_provider_wins() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_completion("first", 1, 1)))
        .expect(0)
        .mount(&first)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_completion("second", 1, 1)))
        .expect(1)
        .mount(&second)
        .await;

    let (registry, _) = registry_with(vec![
        CredentialRecord::new("c1", "openai", LIVE_KEY).with_api_url(first.uri()),
        CredentialRecord::new("c2", "OpenAI", LIVE_KEY).with_api_url(second.uri()),
    ])
    .await;

    let response = registry
        .get("openai")
        .await
        .unwrap()
        .chat(
            &CancellationToken::new(),
            ChatRequest::new("gpt-4o-mini", vec![ChatMessage::user("hi")]),
        )
        .await
        .unwrap();
    assert_eq!(response.content(), "second");
}

#[tokio::test]
async fn test_reload_swaps_in_new_set() {
    let (registry, store) = registry_with(vec![CredentialRecord::new("c1", "anthropic", "sk-ant-REDACTED")]).await;

    let before = registry.snapshot().await;
    assert!(!before.has_real_providers());

    store
        .upsert(CredentialRecord::new("c1", "anthropic", "sk-ant-live-0123456789"))
        .await;
    registry.reload().await.unwrap();

    let after = registry.snapshot().await;
    assert!(after.has_real_providers());
    assert_eq!(after.provider_names(), vec!["anthropic"]);

    // snapshots taken earlier are unaffected
    assert!(!before.has_real_providers());
    assert_eq!(before.len(), 2);
}

#[tokio::test]
async fn test_unknown_and_disabled_credentials_are_skipped() {
    let (registry, _) = registry_with(vec![
        CredentialRecord::new("c1", "mistral", "ms-live-0123456789"),
        CredentialRecord::new("c2", "anthropic", "sk-ant-live-0123456789").disabled(),
    ])
    .await;

    assert!(!registry.has_real_providers().await);
    assert_eq!(registry.provider_names().await, vec!["anthropic", "openai"]);
}

#[tokio::test]
async fn test_all_models_grouped_by_provider() {
    let (registry, _) = registry_with(vec![]).await;
    let models = registry.all_models().await;

    assert_eq!(models.keys().cloned().collect::<Vec<_>>(), vec!["anthropic", "openai"]);
    assert!(models["openai"].iter().all(|m| m.provider == "openai"));
}
