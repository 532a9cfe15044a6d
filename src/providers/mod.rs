pub mod anthropic;
pub mod mock;
pub mod openai;
pub mod registry;
pub mod sse;
pub mod types;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::AppError;
use self::types::{ChatRequest, ChatResponse, ModelDescriptor};

// Re-export registry for easier access
pub use registry::{ProviderFactory, ProviderRegistry, ProviderSet};

/// Channel of canonical responses produced by a streaming call.
///
/// Closure of the channel is the end-of-stream signal.
pub type ChatStream = mpsc::Receiver<ChatResponse>;

/// Buffer between a provider's I/O task and its consumer
pub const PROVIDER_STREAM_CAPACITY: usize = 10;

/// Core chat provider trait that all vendor adapters implement
///
/// Every vendor peculiarity stays inside the adapter; callers only ever see
/// the canonical request/response types.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable lowercase registry key, e.g. `openai`
    fn name(&self) -> &str;

    /// Whether this is a non-networked stand-in
    fn is_demo(&self) -> bool {
        false
    }

    /// Execute one blocking chat completion
    async fn chat(
        &self,
        cancel: &CancellationToken,
        request: ChatRequest,
    ) -> Result<ChatResponse, AppError>;

    /// Start a streamed chat completion
    ///
    /// Only setup failures are returned as `Err`. A failure after the stream
    /// started ends it with an error terminal event followed by closure.
    async fn stream_chat(
        &self,
        cancel: CancellationToken,
        request: ChatRequest,
    ) -> Result<ChatStream, AppError>;

    /// Models this adapter knows about out of the box
    fn get_models(&self) -> Vec<ModelDescriptor>;
}

/// Run a vendor call under a whole-call timeout, aborting it on cancellation.
///
/// Dropping the pending future drops the in-flight HTTP request.
pub(crate) async fn with_watchdog<T, F>(
    cancel: &CancellationToken,
    timeout: Duration,
    what: &str,
    call: F,
) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        result = tokio::time::timeout(timeout, call) => match result {
            Ok(inner) => inner,
            Err(_) => Err(AppError::upstream(
                504,
                format!("{} timed out after {}s", what, timeout.as_secs()),
            )),
        },
    }
}

/// Deliver one stream item, giving up if the consumer left or the call was cancelled.
///
/// Returns `false` when the producer should stop.
pub(crate) async fn emit(
    tx: &mpsc::Sender<ChatResponse>,
    cancel: &CancellationToken,
    item: ChatResponse,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}

/// Read the body of a failed vendor response into an upstream error
pub(crate) async fn upstream_failure(vendor: &str, response: reqwest::Response) -> AppError {
    let status = response.status().as_u16();
    let error_body = response.text().await.unwrap_or_default();
    AppError::upstream(status, format!("{} API error: {}", vendor, error_body))
}
