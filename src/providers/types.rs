use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a chat message
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Parse a stored role string; unknown roles are rejected
    pub fn parse(role: &str) -> Option<Self> {
        match role {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// A single message in a conversation
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            metadata: None,
            created_at: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Canonical, vendor-independent chat request
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChatRequest {
    #[serde(default)]
    pub conversation_id: String,
    pub messages: Vec<ChatMessage>,
    pub model: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            conversation_id: String::new(),
            messages,
            model: model.into(),
            stream: false,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = conversation_id.into();
        self
    }

    /// 验证请求参数的有效性
    ///
    /// ## 功能说明
    /// 在发起任何网络调用之前检查请求，失败时返回描述性错误信息
    ///
    /// ## 验证规则
    /// - `model`: 不能为空
    /// - `messages`: 不能为空，每条消息内容不能包含空字节
    /// - `max_tokens`: 如果提供，必须大于0
    /// - `temperature`: 如果提供，必须是0.0到2.0之间的有效数字
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("Model reference cannot be empty".to_string());
        }

        if self.messages.is_empty() {
            return Err("Messages cannot be empty".to_string());
        }

        if self.messages.iter().any(|m| m.content.contains('\0')) {
            return Err("Message content cannot contain null bytes".to_string());
        }

        if self.max_tokens == Some(0) {
            return Err("max_tokens must be greater than 0".to_string());
        }

        if let Some(temp) = self.temperature {
            if !temp.is_finite() {
                return Err("temperature must be a valid number".to_string());
            }
            if !(0.0..=2.0).contains(&temp) {
                return Err("temperature must be between 0.0 and 2.0".to_string());
            }
        }

        Ok(())
    }
}

/// Token accounting for one completion
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Why a completion (or a stream) ended
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    /// Not a terminal item
    #[default]
    #[serde(rename = "")]
    Empty,
    Stop,
    Length,
    /// Stream aborted by an upstream failure; the message is in `metadata["error"]`
    Error,
}

impl FinishReason {
    /// Map a vendor stop reason onto the canonical set
    pub fn from_vendor(reason: Option<&str>) -> Self {
        match reason {
            None | Some("") => FinishReason::Empty,
            Some("length") | Some("max_tokens") => FinishReason::Length,
            Some("error") => FinishReason::Error,
            Some(_) => FinishReason::Stop,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, FinishReason::Empty)
    }
}

/// Metadata key carrying the failure description on an error terminal event
pub const ERROR_METADATA_KEY: &str = "error";

/// Canonical, vendor-independent chat response (or stream chunk)
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChatResponse {
    pub id: String,
    pub conversation_id: String,
    pub message: ChatMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub finish_reason: FinishReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

impl ChatResponse {
    /// Build an assistant response carrying `content`
    pub fn assistant(
        id: impl Into<String>,
        conversation_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            message: ChatMessage::assistant(content),
            usage: None,
            finish_reason: FinishReason::Empty,
            metadata: None,
        }
    }

    /// Build the error-carrying terminal event of a failed stream
    pub fn stream_error(conversation_id: impl Into<String>, error: impl Into<String>) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(ERROR_METADATA_KEY.to_string(), error.into());
        Self {
            finish_reason: FinishReason::Error,
            metadata: Some(metadata),
            ..Self::assistant(Uuid::new_v4().to_string(), conversation_id, "")
        }
    }

    pub fn with_finish_reason(mut self, finish_reason: FinishReason) -> Self {
        self.finish_reason = finish_reason;
        self
    }

    pub fn with_usage(mut self, usage: Option<TokenUsage>) -> Self {
        self.usage = usage;
        self
    }

    pub fn content(&self) -> &str {
        &self.message.content
    }

    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_terminal()
    }

    /// Failure description of an error terminal event
    pub fn error_message(&self) -> Option<&str> {
        if self.finish_reason != FinishReason::Error {
            return None;
        }
        self.metadata
            .as_ref()
            .and_then(|m| m.get(ERROR_METADATA_KEY))
            .map(String::as_str)
    }
}

/// Model description exposed to callers
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub max_tokens: u32,
    pub enabled: bool,
}

impl ModelDescriptor {
    pub fn new(id: &str, name: &str, provider: &str, capabilities: &[&str], max_tokens: u32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            provider: provider.to_string(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            max_tokens,
            enabled: true,
        }
    }
}
