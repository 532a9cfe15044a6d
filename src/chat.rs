//! Conversation-level send-message orchestration.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    bridge::{BridgedStream, StreamBridge},
    dispatch::ChatDispatchService,
    errors::{AppError, AppResult},
    providers::types::{ChatMessage, ChatRequest, ChatResponse, Role},
    store::{Conversation, ConversationStore, StoredMessage},
};

/// Result of a blocking send
#[derive(Debug)]
pub struct SendOutcome {
    pub user_message: StoredMessage,
    /// `None` when the reply could not be saved
    pub assistant_message: Option<StoredMessage>,
    pub response: ChatResponse,
}

pub struct ChatService {
    dispatch: Arc<ChatDispatchService>,
    store: Arc<dyn ConversationStore>,
    bridge: StreamBridge,
}

impl ChatService {
    pub fn new(dispatch: Arc<ChatDispatchService>, store: Arc<dyn ConversationStore>, stream_buffer: usize) -> Self {
        let bridge = StreamBridge::new(store.clone(), stream_buffer);
        Self {
            dispatch,
            store,
            bridge,
        }
    }

    /// 发送消息并等待完整回复
    ///
    /// ## 内部实现逻辑
    /// 1. 校验内容并确认会话归属于`user_id`
    /// 2. 预检模型可用性（演示模式开关、模型解析），失败时不写入任何消息
    /// 3. 保存用户消息（失败返回 `Persistence`，不会调用供应商）
    /// 4. 读取完整历史作为请求消息，使用会话的模型引用
    /// 5. 调用调度服务
    /// 6. 保存助手消息并更新会话时间（失败只记录日志）
    pub async fn send_message(
        &self,
        cancel: &CancellationToken,
        user_id: &str,
        conversation_id: &str,
        content: &str,
    ) -> AppResult<SendOutcome> {
        validate_content(content)?;
        let conversation = self.owned_conversation(user_id, conversation_id).await?;
        self.dispatch.preflight(&conversation.model).await?;

        let user_message = self
            .store
            .create_message(&conversation.id, Role::User, content)
            .await
            .map_err(|e| AppError::persistence(format!("Failed to save user message: {:#}", e)))?;

        let request = build_request(self.store.as_ref(), &conversation).await?;
        let response = self.dispatch.chat(cancel, request).await?;

        let assistant_message = match self
            .store
            .create_message(&conversation.id, Role::Assistant, response.content())
            .await
        {
            Ok(message) => {
                if let Err(e) = self.store.touch_conversation(&conversation.id).await {
                    tracing::warn!(conversation_id = %conversation.id, "Failed to update conversation timestamp: {:#}", e);
                }
                Some(message)
            }
            Err(e) => {
                tracing::warn!(conversation_id = %conversation.id, "Failed to save assistant message: {:#}", e);
                None
            }
        };

        Ok(SendOutcome {
            user_message,
            assistant_message,
            response,
        })
    }

    /// Send a message and stream the reply
    ///
    /// The returned receiver yields provider events in order; the assistant
    /// message is saved by the bridge task once the stream ends.
    pub async fn send_message_stream(
        &self,
        cancel: CancellationToken,
        user_id: &str,
        conversation_id: &str,
        content: &str,
    ) -> AppResult<BridgedStream> {
        validate_content(content)?;
        let conversation = self.owned_conversation(user_id, conversation_id).await?;
        self.dispatch.preflight(&conversation.model).await?;

        let dispatch = self.dispatch.clone();
        let store = self.store.clone();
        let upstream_cancel = cancel.clone();
        let conv = conversation.clone();

        self.bridge
            .open(cancel, &conversation.id, content, move |_user_message| async move {
                let request = build_request(store.as_ref(), &conv).await?;
                dispatch.stream_chat(upstream_cancel, request).await
            })
            .await
    }

    /// Load a conversation, hiding whether it is missing or owned by someone else
    async fn owned_conversation(&self, user_id: &str, conversation_id: &str) -> AppResult<Conversation> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await
            .map_err(|e| AppError::persistence(format!("Failed to load conversation: {:#}", e)))?;

        match conversation {
            Some(conv) if conv.user_id == user_id => Ok(conv),
            _ => Err(AppError::authorization(format!(
                "Conversation {} not found or access denied",
                conversation_id
            ))),
        }
    }
}

fn validate_content(content: &str) -> AppResult<()> {
    if content.trim().is_empty() {
        return Err(AppError::Validation("Message content cannot be empty".to_string()));
    }
    Ok(())
}

/// Full history of `conversation` as a request for its model
async fn build_request(store: &dyn ConversationStore, conversation: &Conversation) -> AppResult<ChatRequest> {
    let history = store
        .list_messages(&conversation.id)
        .await
        .map_err(|e| AppError::persistence(format!("Failed to load conversation history: {:#}", e)))?;

    let messages = history
        .into_iter()
        .map(|m| ChatMessage {
            id: m.id,
            role: m.role,
            content: m.content,
            metadata: None,
            created_at: m.created_at,
        })
        .collect();

    Ok(ChatRequest::new(conversation.model.clone(), messages).with_conversation(conversation.id.clone()))
}
