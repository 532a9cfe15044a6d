//! Non-networked demo adapters.
//!
//! Installed by the registry when no usable credential exists so the rest of
//! the pipeline still works end to end. Replies are canned and deterministic.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    errors::AppError,
    providers::{
        ChatStream, PROVIDER_STREAM_CAPACITY, Provider, emit,
        types::{ChatMessage, ChatRequest, ChatResponse, FinishReason, ModelDescriptor, TokenUsage},
    },
};

/// Which vendor a demo adapter impersonates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFlavour {
    OpenAI,
    Anthropic,
}

impl MockFlavour {
    pub fn name(&self) -> &'static str {
        match self {
            MockFlavour::OpenAI => "openai",
            MockFlavour::Anthropic => "anthropic",
        }
    }

    /// Pause between streamed words
    pub fn default_delay(&self) -> Duration {
        match self {
            MockFlavour::OpenAI => Duration::from_millis(50),
            MockFlavour::Anthropic => Duration::from_millis(60),
        }
    }

    fn prompt_tokens(&self) -> u32 {
        match self {
            MockFlavour::OpenAI => 100,
            MockFlavour::Anthropic => 120,
        }
    }

    fn completion_tokens(&self) -> u32 {
        match self {
            MockFlavour::OpenAI => 50,
            MockFlavour::Anthropic => 60,
        }
    }
}

/// Demo adapter answering from a fixed phrase book
pub struct MockProvider {
    flavour: MockFlavour,
    delay: Duration,
}

impl MockProvider {
    pub fn new(flavour: MockFlavour) -> Self {
        Self {
            flavour,
            delay: flavour.default_delay(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn flavour(&self) -> MockFlavour {
        self.flavour
    }

    /// 根据最后一条消息生成固定的演示回复
    ///
    /// ## 内部实现逻辑
    /// 按顺序匹配（不区分大小写）：hello → how are you → what → help，
    /// 都不匹配时复述用户输入。所有回复都带有"(Demo Mode)"标记。
    pub fn reply_for(&self, messages: &[ChatMessage]) -> String {
        let Some(last) = messages.last() else {
            return match self.flavour {
                MockFlavour::OpenAI => "Hello! How can I help you today? (Demo Mode - Please configure real API keys)".to_string(),
                MockFlavour::Anthropic => "Hello! I'm Claude, an AI assistant. How can I help you today? (Demo Mode - Please configure real API keys)".to_string(),
            };
        };

        let lower = last.content.to_lowercase();
        let canned = match self.flavour {
            MockFlavour::OpenAI => [
                "Hello! Nice to meet you. How can I assist you today? (Demo Mode)",
                "I'm doing well, thank you for asking! I'm here to help you with any questions or tasks you might have. (Demo Mode)",
                "That's a great question! Let me think about that and provide you with a helpful response. (Demo Mode)",
                "I'd be happy to help! Could you please provide more details about what you need assistance with? (Demo Mode)",
            ],
            MockFlavour::Anthropic => [
                "Hello! I'm Claude. It's nice to meet you. What would you like to explore or discuss today? (Demo Mode)",
                "I'm doing well, thank you! I'm here and ready to help with whatever you need. How are you doing? (Demo Mode)",
                "That's a thoughtful question. Let me provide you with a comprehensive and helpful response. (Demo Mode)",
                "I'd be delighted to help! Please let me know what specific topic or task you'd like assistance with. (Demo Mode)",
            ],
        };

        let keyword_hit = ["hello", "how are you", "what", "help"]
            .iter()
            .position(|keyword| lower.contains(keyword));

        match (keyword_hit, self.flavour) {
            (Some(idx), _) => canned[idx].to_string(),
            (None, MockFlavour::OpenAI) => format!(
                "I understand you said: \"{}\". That's interesting! Let me help you with that. (Demo Mode - Please configure real API keys)",
                last.content
            ),
            (None, MockFlavour::Anthropic) => format!(
                "I see you mentioned: \"{}\". That's quite interesting! Let me share some thoughts on that. (Demo Mode - Please configure real API keys)",
                last.content
            ),
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        self.flavour.name()
    }

    fn is_demo(&self) -> bool {
        true
    }

    async fn chat(
        &self,
        cancel: &CancellationToken,
        request: ChatRequest,
    ) -> Result<ChatResponse, AppError> {
        request.validate().map_err(AppError::Validation)?;
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let usage = TokenUsage::new(self.flavour.prompt_tokens(), self.flavour.completion_tokens());
        Ok(ChatResponse::assistant(
            Uuid::new_v4().to_string(),
            request.conversation_id,
            self.reply_for(&request.messages),
        )
        .with_usage(Some(usage))
        .with_finish_reason(FinishReason::Stop))
    }

    async fn stream_chat(
        &self,
        cancel: CancellationToken,
        request: ChatRequest,
    ) -> Result<ChatStream, AppError> {
        request.validate().map_err(AppError::Validation)?;

        let reply = self.reply_for(&request.messages);
        let conversation_id = request.conversation_id;
        let prompt_tokens = self.flavour.prompt_tokens();
        let delay = self.delay;
        let (tx, rx) = mpsc::channel(PROVIDER_STREAM_CAPACITY);

        tokio::spawn(async move {
            let response_id = Uuid::new_v4().to_string();
            let words: Vec<&str> = reply.split(' ').collect();
            let last = words.len() - 1;

            for (i, word) in words.iter().enumerate() {
                // the separator rides on the following word
                let content = if i == 0 { word.to_string() } else { format!(" {}", word) };
                let mut chunk = ChatResponse::assistant(response_id.clone(), conversation_id.clone(), content);

                if i == last {
                    chunk = chunk
                        .with_finish_reason(FinishReason::Stop)
                        .with_usage(Some(TokenUsage::new(prompt_tokens, words.len() as u32)));
                }

                if !emit(&tx, &cancel, chunk).await {
                    return;
                }

                if i < last {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tx.closed() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        });

        Ok(rx)
    }

    fn get_models(&self) -> Vec<ModelDescriptor> {
        match self.flavour {
            MockFlavour::OpenAI => vec![
                ModelDescriptor::new("gpt-3.5-turbo", "GPT-3.5 Turbo (Demo)", "openai", &["text", "chat"], 4096),
                ModelDescriptor::new("gpt-4", "GPT-4 (Demo)", "openai", &["text", "chat"], 8192),
            ],
            MockFlavour::Anthropic => vec![
                ModelDescriptor::new("claude-3-sonnet-20240229", "Claude 3 Sonnet (Demo)", "anthropic", &["text", "chat", "vision"], 200000),
                ModelDescriptor::new("claude-3-haiku-20240307", "Claude 3 Haiku (Demo)", "anthropic", &["text", "chat", "vision"], 200000),
            ],
        }
    }
}
