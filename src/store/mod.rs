//! Collaborator contracts consumed by the dispatch core.
//!
//! The model catalog, credential table and conversation store live outside
//! this crate (admin CRUD, database). Only their read/write surface is
//! described here; [`memory`] provides process-local implementations.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::providers::types::Role;

pub use memory::{InMemoryCatalog, InMemoryConversationStore, InMemoryCredentialStore};

/// Admin-managed model catalog entry
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CatalogModel {
    /// Opaque identifier clients may reference
    pub id: String,
    #[serde(rename = "type", default = "default_model_type")]
    pub model_type: String,
    #[serde(default)]
    pub name: String,
    /// Wire model name sent to the vendor
    pub value: String,
    pub provider: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub max_tokens: u32,
    #[serde(default)]
    pub max_context: u32,
}

impl CatalogModel {
    pub fn new(id: &str, value: &str, provider: &str) -> Self {
        Self {
            id: id.to_string(),
            model_type: default_model_type(),
            name: value.to_string(),
            value: value.to_string(),
            provider: provider.to_string(),
            enabled: true,
            max_tokens: 4096,
            max_context: 0,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Admin-managed vendor credential
#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct CredentialRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Secret API key
    pub value: String,
    #[serde(rename = "type", default = "default_credential_type")]
    pub credential_type: String,
    pub provider: String,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl CredentialRecord {
    pub fn new(id: &str, provider: &str, value: &str) -> Self {
        Self {
            id: id.to_string(),
            name: format!("{} key", provider),
            value: value.to_string(),
            credential_type: default_credential_type(),
            provider: provider.to_string(),
            api_url: None,
            enabled: true,
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = Some(api_url.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

// secrets stay out of logs
impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .field("type", &self.credential_type)
            .field("provider", &self.provider)
            .field("api_url", &self.api_url)
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    /// Model reference used for every send in this conversation
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

fn default_model_type() -> String {
    "chat".to_string()
}

fn default_credential_type() -> String {
    "api_key".to_string()
}

/// Source of catalog entries used for model resolution
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    async fn list_models(&self) -> anyhow::Result<Vec<CatalogModel>>;
}

/// Source of vendor credentials used to build the provider registry
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn list_credentials(&self) -> anyhow::Result<Vec<CredentialRecord>>;
}

/// Durable conversation storage
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_conversation(&self, id: &str) -> anyhow::Result<Option<Conversation>>;

    /// Messages of a conversation in creation order
    async fn list_messages(&self, conversation_id: &str) -> anyhow::Result<Vec<StoredMessage>>;

    async fn create_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> anyhow::Result<StoredMessage>;

    /// Bump the conversation's `updated_at`
    async fn touch_conversation(&self, id: &str) -> anyhow::Result<()>;
}
