// Anthropic Provider Implementation
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    config::ProviderDetail,
    errors::AppError,
    providers::{
        ChatStream, PROVIDER_STREAM_CAPACITY, Provider,
        anthropic::*,
        sse::{self, FrameAction, FrameDecoder, SseLine},
        types::{ChatRequest, ChatResponse, FinishReason, ModelDescriptor, Role, TokenUsage},
        upstream_failure, with_watchdog,
    },
};

/// Anthropic provider implementation
pub struct AnthropicProvider {
    config: ProviderDetail,
    client: Client,
}

impl AnthropicProvider {
    pub const NAME: &'static str = "anthropic";
    pub const DEFAULT_API_BASE: &'static str = "https://api.anthropic.com/v1";
    pub const API_VERSION: &'static str = "2023-06-01";
    pub const DEFAULT_MAX_TOKENS: u32 = 1024;

    /// 创建新的Anthropic提供商实例
    ///
    /// ## 参数说明
    /// - `config`: 提供商配置，包含API密钥、基础URL和超时设置
    /// - `client`: 共享的HTTP客户端
    ///
    /// ## 执行例子
    /// ```rust,ignore
    /// let provider = AnthropicProvider::new(ProviderDetail::new("sk-ant-real-key", AnthropicProvider::DEFAULT_API_BASE), Client::new());
    /// ```
    pub fn new(config: ProviderDetail, client: Client) -> Self {
        Self { config, client }
    }

    fn endpoint(&self) -> String {
        format!("{}/messages", self.config.api_base.trim_end_matches('/'))
    }

    /// 将规范请求转换为Messages API格式
    ///
    /// ## 内部实现逻辑
    /// 1. 所有system消息按顺序以换行拼接，放入顶层`system`字段
    /// 2. 其余消息保持会话顺序映射为role/content对
    /// 3. 未指定`max_tokens`时使用默认值1024
    fn convert_request(&self, request: &ChatRequest, stream: bool) -> AnthropicRequest {
        let mut system_parts = Vec::new();
        let mut messages = Vec::with_capacity(request.messages.len());

        for msg in &request.messages {
            match msg.role {
                Role::System => system_parts.push(msg.content.as_str()),
                Role::User | Role::Assistant => messages.push(AnthropicMessage {
                    role: msg.role.as_str().to_string(),
                    content: msg.content.clone(),
                }),
            }
        }

        AnthropicRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens.unwrap_or(Self::DEFAULT_MAX_TOKENS),
            system: (!system_parts.is_empty()).then(|| system_parts.join("\n")),
            stream: stream.then_some(true),
            temperature: request.temperature,
        }
    }

    fn convert_response(&self, res: AnthropicResponse, conversation_id: &str) -> ChatResponse {
        let content = res.text();
        let usage = res
            .usage
            .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens));
        let finish_reason = match FinishReason::from_vendor(res.stop_reason.as_deref()) {
            FinishReason::Empty => FinishReason::Stop,
            reason => reason,
        };

        ChatResponse::assistant(res.id, conversation_id, content)
            .with_usage(usage)
            .with_finish_reason(finish_reason)
    }

    async fn post(&self, body: &AnthropicRequest, streaming: bool) -> Result<reqwest::Response, AppError> {
        let mut builder = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", Self::API_VERSION)
            .header("Content-Type", "application/json");

        if streaming {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::upstream(502, format!("Failed to send request to Anthropic: {}", e)))?;

        if !response.status().is_success() {
            return Err(upstream_failure("Anthropic", response).await);
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn chat(
        &self,
        cancel: &CancellationToken,
        request: ChatRequest,
    ) -> Result<ChatResponse, AppError> {
        request.validate().map_err(AppError::Validation)?;

        let anthropic_req = self.convert_request(&request, false);
        let timeout = Duration::from_secs(self.config.timeout_seconds);

        let call = async {
            let response = self.post(&anthropic_req, false).await?;
            response
                .json::<AnthropicResponse>()
                .await
                .map_err(|e| AppError::upstream(502, format!("Failed to parse Anthropic response: {}", e)))
        };

        let anthropic_res = with_watchdog(cancel, timeout, "Anthropic chat", call).await?;

        tracing::debug!(model = %anthropic_res.model, "Anthropic chat completed");
        Ok(self.convert_response(anthropic_res, &request.conversation_id))
    }

    async fn stream_chat(
        &self,
        cancel: CancellationToken,
        request: ChatRequest,
    ) -> Result<ChatStream, AppError> {
        request.validate().map_err(AppError::Validation)?;

        let anthropic_req = self.convert_request(&request, true);
        let timeout = Duration::from_secs(self.config.stream_timeout_seconds);

        let response = with_watchdog(
            &cancel,
            timeout,
            "Anthropic stream setup",
            self.post(&anthropic_req, true),
        )
        .await?;

        let (tx, rx) = mpsc::channel(PROVIDER_STREAM_CAPACITY);
        let decoder = AnthropicFrameDecoder::new(request.conversation_id);
        tokio::spawn(sse::pump(response, decoder, tx, cancel));

        Ok(rx)
    }

    fn get_models(&self) -> Vec<ModelDescriptor> {
        vec![
            ModelDescriptor::new("claude-3-5-sonnet-20241022", "Claude 3.5 Sonnet", Self::NAME, &["text", "chat", "vision"], 8192),
            ModelDescriptor::new("claude-3-5-haiku-20241022", "Claude 3.5 Haiku", Self::NAME, &["text", "chat"], 8192),
            ModelDescriptor::new("claude-3-opus-20240229", "Claude 3 Opus", Self::NAME, &["text", "chat", "vision"], 4096),
            ModelDescriptor::new("claude-3-haiku-20240307", "Claude 3 Haiku", Self::NAME, &["text", "chat"], 4096),
        ]
    }
}

/// Stateful decoder for Messages API stream events
///
/// Usage arrives split across `message_start` (input) and `message_delta`
/// (output), so both are remembered until `message_stop`.
pub struct AnthropicFrameDecoder {
    conversation_id: String,
    message_id: String,
    input_tokens: u32,
    output_tokens: u32,
    stop_reason: Option<String>,
    saw_terminal: bool,
}

impl AnthropicFrameDecoder {
    pub fn new(conversation_id: String) -> Self {
        Self {
            conversation_id,
            message_id: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            stop_reason: None,
            saw_terminal: false,
        }
    }

    fn chunk(&self, content: String) -> ChatResponse {
        ChatResponse::assistant(self.message_id.clone(), self.conversation_id.clone(), content)
    }
}

impl FrameDecoder for AnthropicFrameDecoder {
    fn vendor(&self) -> &'static str {
        "Anthropic"
    }

    fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    fn decode(&mut self, line: SseLine) -> FrameAction {
        // every payload repeats its event name in `type`
        let data = match line {
            SseLine::Data(data) => data,
            SseLine::Event(_) => return FrameAction::Skip,
        };

        let event = match serde_json::from_str::<AnthropicStreamEvent>(&data) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Skipping malformed Anthropic stream event: {}", e);
                return FrameAction::Skip;
            }
        };

        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                self.message_id = message.id;
                if let Some(usage) = message.usage {
                    self.input_tokens = usage.input_tokens;
                    self.output_tokens = usage.output_tokens;
                }
                FrameAction::Skip
            }
            AnthropicStreamEvent::ContentBlockDelta {
                delta: BlockDelta::TextDelta { text },
                ..
            } => FrameAction::Emit(self.chunk(text)),
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                if let Some(usage) = usage {
                    self.output_tokens = usage.output_tokens;
                }
                FrameAction::Skip
            }
            AnthropicStreamEvent::MessageStop {} => {
                self.saw_terminal = true;
                let finish_reason = match FinishReason::from_vendor(self.stop_reason.as_deref()) {
                    FinishReason::Empty => FinishReason::Stop,
                    reason => reason,
                };
                let usage = TokenUsage::new(self.input_tokens, self.output_tokens);
                FrameAction::EmitFinal(
                    self.chunk(String::new())
                        .with_usage(Some(usage))
                        .with_finish_reason(finish_reason),
                )
            }
            AnthropicStreamEvent::Error { error } => {
                self.saw_terminal = true;
                tracing::warn!(error_type = %error.error_type, "Anthropic stream reported an error");
                FrameAction::EmitFinal(ChatResponse::stream_error(
                    self.conversation_id.clone(),
                    format!("Anthropic stream error ({}): {}", error.error_type, error.message),
                ))
            }
            AnthropicStreamEvent::ContentBlockDelta { .. }
            | AnthropicStreamEvent::ContentBlockStart {}
            | AnthropicStreamEvent::ContentBlockStop {}
            | AnthropicStreamEvent::Ping {}
            | AnthropicStreamEvent::Unknown => FrameAction::Skip,
        }
    }

    fn saw_terminal(&self) -> bool {
        self.saw_terminal
    }
}
