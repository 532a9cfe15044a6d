//! Couples a provider stream to durable conversation storage.
//!
//! The user's message is written before the vendor is contacted. A single
//! forwarding task then relays provider events to the caller while
//! accumulating the reply, and writes the assistant message once the
//! provider stream ends, the caller goes away, or the call is cancelled.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    errors::{AppError, AppResult},
    providers::{ChatStream, types::{ChatResponse, Role}},
    store::{ConversationStore, StoredMessage},
};

/// How a bridged stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Provider channel closed normally
    Completed,
    /// Provider ended with an error terminal event
    UpstreamFailed(String),
    /// Cancellation token fired
    Cancelled,
    /// Caller dropped its receiver
    ClientGone,
}

/// Result of the forwarding task
#[derive(Debug)]
pub struct BridgeOutcome {
    pub termination: Termination,
    /// Events handed to the caller
    pub delivered_chunks: usize,
    /// Concatenated content of the delivered events
    pub content: String,
    pub assistant_message: Option<StoredMessage>,
    /// Set when writing the assistant message or touching the conversation failed
    pub persistence_error: Option<String>,
}

/// Caller side of a bridged stream
pub struct BridgedStream {
    pub receiver: ChatStream,
    pub user_message: StoredMessage,
    pub completion: JoinHandle<BridgeOutcome>,
}

#[derive(Clone)]
pub struct StreamBridge {
    store: Arc<dyn ConversationStore>,
    buffer: usize,
}

impl StreamBridge {
    pub fn new(store: Arc<dyn ConversationStore>, buffer: usize) -> Self {
        Self {
            store,
            buffer: buffer.max(1),
        }
    }

    /// 持久化用户消息后打开并桥接提供商流
    ///
    /// ## 内部实现逻辑
    /// 1. 写入用户消息，失败时返回 `Persistence` 错误且不调用`open_upstream`
    /// 2. 调用`open_upstream`建立提供商流，建立失败原样返回
    /// 3. 启动转发任务，返回调用方接收端、用户消息和任务句柄
    ///
    /// ## 参数说明
    /// - `cancel`: 取消令牌，触发后转发任务丢弃上游并退出
    /// - `open_upstream`: 接收已持久化的用户消息，返回提供商流
    pub async fn open<F, Fut>(
        &self,
        cancel: CancellationToken,
        conversation_id: &str,
        user_content: &str,
        open_upstream: F,
    ) -> AppResult<BridgedStream>
    where
        F: FnOnce(StoredMessage) -> Fut,
        Fut: Future<Output = AppResult<ChatStream>>,
    {
        let user_message = self
            .store
            .create_message(conversation_id, Role::User, user_content)
            .await
            .map_err(|e| AppError::persistence(format!("Failed to save user message: {:#}", e)))?;

        let upstream = open_upstream(user_message.clone()).await?;
        let (receiver, completion) = self.attach(cancel, conversation_id, upstream);

        Ok(BridgedStream {
            receiver,
            user_message,
            completion,
        })
    }

    /// Start forwarding an already open provider stream
    pub fn attach(
        &self,
        cancel: CancellationToken,
        conversation_id: &str,
        upstream: ChatStream,
    ) -> (ChatStream, JoinHandle<BridgeOutcome>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let task = forward(
            upstream,
            tx,
            cancel,
            self.store.clone(),
            conversation_id.to_string(),
        );
        (rx, tokio::spawn(task))
    }
}

async fn forward(
    mut upstream: ChatStream,
    tx: mpsc::Sender<ChatResponse>,
    cancel: CancellationToken,
    store: Arc<dyn ConversationStore>,
    conversation_id: String,
) -> BridgeOutcome {
    let mut content = String::new();
    let mut delivered_chunks = 0usize;
    let mut failure: Option<String> = None;

    let termination = loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Termination::Cancelled,
            _ = tx.closed() => break Termination::ClientGone,
            event = upstream.recv() => event,
        };

        let Some(event) = event else {
            break match failure.take() {
                Some(message) => Termination::UpstreamFailed(message),
                None => Termination::Completed,
            };
        };

        if let Some(message) = event.error_message() {
            failure = Some(message.to_string());
        }
        let fragment = event.message.content.clone();

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Termination::Cancelled,
            sent = tx.send(event) => sent,
        };
        if sent.is_err() {
            break Termination::ClientGone;
        }

        delivered_chunks += 1;
        content.push_str(&fragment);
    };

    // closing both ends stops the provider task and releases the caller
    drop(upstream);
    drop(tx);

    tracing::debug!(
        conversation_id = %conversation_id,
        chunks = delivered_chunks,
        termination = ?termination,
        "Stream bridge finished"
    );

    let should_persist = termination == Termination::Completed || !content.is_empty();
    let mut assistant_message = None;
    let mut persistence_error = None;

    if should_persist {
        match store
            .create_message(&conversation_id, Role::Assistant, &content)
            .await
        {
            Ok(message) => {
                assistant_message = Some(message);
                if let Err(e) = store.touch_conversation(&conversation_id).await {
                    tracing::warn!(conversation_id = %conversation_id, "Failed to update conversation timestamp: {:#}", e);
                    persistence_error = Some(format!("{:#}", e));
                }
            }
            Err(e) => {
                tracing::warn!(conversation_id = %conversation_id, "Failed to save assistant message: {:#}", e);
                persistence_error = Some(format!("{:#}", e));
            }
        }
    }

    BridgeOutcome {
        termination,
        delivered_chunks,
        content,
        assistant_message,
        persistence_error,
    }
}
