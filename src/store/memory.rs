//! Process-local implementations of the collaborator traits.

use std::collections::HashMap;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    CatalogModel, Conversation, ConversationStore, CredentialRecord, CredentialStore, ModelCatalog,
    StoredMessage,
};
use crate::providers::types::Role;

/// Catalog backed by `RwLock<Vec<CatalogModel>>`
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    models: RwLock<Vec<CatalogModel>>,
}

impl InMemoryCatalog {
    pub fn new(models: Vec<CatalogModel>) -> Self {
        Self {
            models: RwLock::new(models),
        }
    }

    pub async fn replace(&self, models: Vec<CatalogModel>) {
        *self.models.write().await = models;
    }
}

#[async_trait]
impl ModelCatalog for InMemoryCatalog {
    async fn list_models(&self) -> anyhow::Result<Vec<CatalogModel>> {
        Ok(self.models.read().await.clone())
    }
}

/// Credential table backed by `RwLock<Vec<CredentialRecord>>`
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    credentials: RwLock<Vec<CredentialRecord>>,
}

impl InMemoryCredentialStore {
    pub fn new(credentials: Vec<CredentialRecord>) -> Self {
        Self {
            credentials: RwLock::new(credentials),
        }
    }

    /// Insert or replace the record with the same id
    pub async fn upsert(&self, record: CredentialRecord) {
        let mut credentials = self.credentials.write().await;
        match credentials.iter_mut().find(|c| c.id == record.id) {
            Some(existing) => *existing = record,
            None => credentials.push(record),
        }
    }

    pub async fn replace(&self, credentials: Vec<CredentialRecord>) {
        *self.credentials.write().await = credentials;
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn list_credentials(&self) -> anyhow::Result<Vec<CredentialRecord>> {
        Ok(self.credentials.read().await.clone())
    }
}

#[derive(Debug, Default)]
struct ConversationTables {
    conversations: HashMap<String, Conversation>,
    messages: HashMap<String, Vec<StoredMessage>>,
    /// Writes of this role fail, to exercise persistence error paths
    failing_role: Option<Role>,
}

/// Conversation store backed by in-process maps
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    tables: RwLock<ConversationTables>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a conversation owned by `user_id` using `model`
    pub async fn create_conversation(&self, user_id: &str, title: &str, model: &str) -> Conversation {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            model: model.to_string(),
            created_at: now,
            updated_at: now,
        };

        let mut tables = self.tables.write().await;
        tables
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        tables.messages.insert(conversation.id.clone(), Vec::new());
        conversation
    }

    /// Make every subsequent write of `role` fail (`None` restores normal behaviour)
    pub async fn fail_writes_for(&self, role: Option<Role>) {
        self.tables.write().await.failing_role = role;
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_conversation(&self, id: &str) -> anyhow::Result<Option<Conversation>> {
        Ok(self.tables.read().await.conversations.get(id).cloned())
    }

    async fn list_messages(&self, conversation_id: &str) -> anyhow::Result<Vec<StoredMessage>> {
        Ok(self
            .tables
            .read()
            .await
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> anyhow::Result<StoredMessage> {
        let mut tables = self.tables.write().await;

        if tables.failing_role == Some(role) {
            return Err(anyhow!("simulated write failure for {} message", role.as_str()));
        }

        let messages = tables
            .messages
            .get_mut(conversation_id)
            .ok_or_else(|| anyhow!("conversation {} not found", conversation_id))?;

        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        messages.push(message.clone());
        Ok(message)
    }

    async fn touch_conversation(&self, id: &str) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        let conversation = tables
            .conversations
            .get_mut(id)
            .ok_or_else(|| anyhow!("conversation {} not found", id))?;
        conversation.updated_at = Utc::now();
        Ok(())
    }
}
