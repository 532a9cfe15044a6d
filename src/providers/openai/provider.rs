use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::ProviderDetail,
    errors::AppError,
    providers::{
        ChatStream, PROVIDER_STREAM_CAPACITY, Provider, openai::*,
        sse::{self, FrameAction, FrameDecoder, SseLine},
        types::{ChatRequest, ChatResponse, FinishReason, ModelDescriptor, TokenUsage},
        upstream_failure, with_watchdog,
    },
};

/// OpenAI provider implementation
pub struct OpenAIProvider {
    config: ProviderDetail,
    client: Client,
}

impl OpenAIProvider {
    pub const NAME: &'static str = "openai";
    pub const DEFAULT_API_BASE: &'static str = "https://api.openai.com/v1";

    pub fn new(config: ProviderDetail, client: Client) -> Self {
        Self { config, client }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'))
    }

    /// Convert the canonical request to OpenAI format
    fn convert_request(&self, request: &ChatRequest, stream: bool) -> OpenAIRequest {
        let messages = request
            .messages
            .iter()
            .map(|msg| OpenAIMessage {
                role: msg.role.as_str().to_string(),
                content: msg.content.clone(),
            })
            .collect();

        OpenAIRequest {
            model: request.model.clone(),
            messages,
            stream,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }

    /// Convert OpenAI response format to the canonical format
    fn convert_response(
        &self,
        openai_res: OpenAIResponse,
        conversation_id: &str,
    ) -> Result<ChatResponse, AppError> {
        let choice = openai_res
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::upstream(502, "No choices in OpenAI response"))?;

        let usage = openai_res
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens));

        Ok(ChatResponse::assistant(openai_res.id, conversation_id, choice.message.content)
            .with_usage(usage)
            .with_finish_reason(FinishReason::from_vendor(choice.finish_reason.as_deref())))
    }

    async fn post(&self, body: &OpenAIRequest, streaming: bool) -> Result<reqwest::Response, AppError> {
        let mut builder = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json");

        if streaming {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::upstream(502, format!("Failed to send request to OpenAI: {}", e)))?;

        if !response.status().is_success() {
            return Err(upstream_failure("OpenAI", response).await);
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn chat(
        &self,
        cancel: &CancellationToken,
        request: ChatRequest,
    ) -> Result<ChatResponse, AppError> {
        request.validate().map_err(AppError::Validation)?;

        let openai_req = self.convert_request(&request, false);
        let timeout = Duration::from_secs(self.config.timeout_seconds);

        let call = async {
            let response = self.post(&openai_req, false).await?;
            response
                .json::<OpenAIResponse>()
                .await
                .map_err(|e| AppError::upstream(502, format!("Failed to parse OpenAI response: {}", e)))
        };

        let openai_res = with_watchdog(cancel, timeout, "OpenAI chat", call).await?;

        tracing::debug!(model = %openai_res.model, "OpenAI chat completed");
        self.convert_response(openai_res, &request.conversation_id)
    }

    async fn stream_chat(
        &self,
        cancel: CancellationToken,
        request: ChatRequest,
    ) -> Result<ChatStream, AppError> {
        request.validate().map_err(AppError::Validation)?;

        let openai_req = self.convert_request(&request, true);
        let timeout = Duration::from_secs(self.config.stream_timeout_seconds);

        // the watchdog only covers setup; once headers arrive there is no per-chunk timeout
        let response = with_watchdog(
            &cancel,
            timeout,
            "OpenAI stream setup",
            self.post(&openai_req, true),
        )
        .await?;

        let (tx, rx) = mpsc::channel(PROVIDER_STREAM_CAPACITY);
        let decoder = OpenAIFrameDecoder::new(request.conversation_id);
        tokio::spawn(sse::pump(response, decoder, tx, cancel));

        Ok(rx)
    }

    fn get_models(&self) -> Vec<ModelDescriptor> {
        vec![
            ModelDescriptor::new("gpt-4o-mini", "GPT-4o mini", Self::NAME, &["text", "chat"], 16384),
            ModelDescriptor::new("gpt-4o", "GPT-4o", Self::NAME, &["text", "chat", "vision"], 16384),
            ModelDescriptor::new("gpt-4-turbo", "GPT-4 Turbo", Self::NAME, &["text", "chat", "vision"], 4096),
            ModelDescriptor::new("gpt-3.5-turbo", "GPT-3.5 Turbo", Self::NAME, &["text", "chat"], 4096),
        ]
    }
}

/// Turns `data:` frames of a chat-completions stream into canonical chunks
pub struct OpenAIFrameDecoder {
    conversation_id: String,
    saw_terminal: bool,
}

impl OpenAIFrameDecoder {
    pub fn new(conversation_id: String) -> Self {
        Self {
            conversation_id,
            saw_terminal: false,
        }
    }
}

impl FrameDecoder for OpenAIFrameDecoder {
    fn vendor(&self) -> &'static str {
        "OpenAI"
    }

    fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    fn decode(&mut self, line: SseLine) -> FrameAction {
        let data = match line {
            SseLine::Data(data) => data,
            SseLine::Event(_) => return FrameAction::Skip,
        };

        if data.trim() == STREAM_DONE_SENTINEL {
            return FrameAction::Finish;
        }

        let frame = match serde_json::from_str::<OpenAIStreamResponse>(&data) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Skipping malformed OpenAI stream frame: {}", e);
                return FrameAction::Skip;
            }
        };

        // usage-only frames have no choices
        let Some(choice) = frame.choices.into_iter().next() else {
            return FrameAction::Skip;
        };

        let id = if frame.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            frame.id
        };
        let finish_reason = FinishReason::from_vendor(choice.finish_reason.as_deref());
        let usage = frame
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens));

        let chunk = ChatResponse::assistant(
            id,
            self.conversation_id.clone(),
            choice.delta.content.unwrap_or_default(),
        )
        .with_usage(usage)
        .with_finish_reason(finish_reason);

        if finish_reason.is_terminal() {
            self.saw_terminal = true;
        }
        FrameAction::Emit(chunk)
    }

    fn saw_terminal(&self) -> bool {
        self.saw_terminal
    }
}
