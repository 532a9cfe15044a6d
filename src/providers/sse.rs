//! Line decoding for `text/event-stream` bodies.
//!
//! Both vendors deliver their streams as SSE. Network chunks do not respect
//! line boundaries (or UTF-8 boundaries), so bytes are buffered until a full
//! line is available. Each adapter supplies a [`FrameDecoder`] that turns
//! lines into canonical responses; [`pump`] drives it from the HTTP body.

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::emit;
use super::types::ChatResponse;

/// One meaningful line of an SSE body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    /// Payload of a `data:` line
    Data(String),
    /// Name from an `event:` line
    Event(String),
}

/// Incremental SSE line decoder
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a network chunk and return every complete line it finished
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseLine> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(line) = Self::parse_line(&raw[..raw.len() - 1]) {
                lines.push(line);
            }
        }
        lines
    }

    /// Flush a trailing line that was not newline-terminated
    pub fn finish(&mut self) -> Option<SseLine> {
        if self.buffer.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buffer);
        Self::parse_line(&raw)
    }

    fn parse_line(raw: &[u8]) -> Option<SseLine> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches('\r');

        // blank separators and `:` comments carry nothing
        if line.is_empty() || line.starts_with(':') {
            return None;
        }

        if let Some(data) = line.strip_prefix("data:") {
            return Some(SseLine::Data(data.strip_prefix(' ').unwrap_or(data).to_string()));
        }

        if let Some(event) = line.strip_prefix("event:") {
            return Some(SseLine::Event(event.trim().to_string()));
        }

        None
    }
}

/// What a vendor decoder wants done with one line
#[derive(Debug)]
pub enum FrameAction {
    /// Forward this response and keep reading
    Emit(ChatResponse),
    /// Forward this response, then end the stream
    EmitFinal(ChatResponse),
    /// End the stream without emitting anything
    Finish,
    /// Nothing to forward
    Skip,
}

/// Vendor-specific interpretation of SSE lines
pub trait FrameDecoder: Send + 'static {
    /// Vendor name used in logs and error messages
    fn vendor(&self) -> &'static str;

    fn conversation_id(&self) -> &str;

    fn decode(&mut self, line: SseLine) -> FrameAction;

    /// Whether a terminal event was already produced
    fn saw_terminal(&self) -> bool;
}

/// Drive a streaming HTTP body through `decoder` into `tx`.
///
/// Stops on cancellation, on consumer drop, on the vendor's completion
/// sentinel, or on body end. Transport failures and a body that ends before
/// any terminal event produce one error terminal event.
pub async fn pump<D: FrameDecoder>(
    response: reqwest::Response,
    mut decoder: D,
    tx: mpsc::Sender<ChatResponse>,
    cancel: CancellationToken,
) {
    let mut body = response.bytes_stream();
    let mut lines = SseLineDecoder::new();
    let mut delivered = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(vendor = decoder.vendor(), delivered, "Stream cancelled, dropping vendor connection");
                return;
            }
            _ = tx.closed() => {
                tracing::debug!(vendor = decoder.vendor(), delivered, "Stream consumer gone, dropping vendor connection");
                return;
            }
            next = body.next() => next,
        };

        let pending = match next {
            Some(Ok(chunk)) => lines.feed(&chunk),
            Some(Err(e)) => {
                tracing::warn!(vendor = decoder.vendor(), delivered, "Stream read failed: {}", e);
                let event = ChatResponse::stream_error(
                    decoder.conversation_id(),
                    format!("{} stream read failed: {}", decoder.vendor(), e),
                );
                emit(&tx, &cancel, event).await;
                return;
            }
            None => {
                if let Some(line) = lines.finish() {
                    if !dispatch_line(&mut decoder, line, &tx, &cancel, &mut delivered).await {
                        return;
                    }
                }
                if !decoder.saw_terminal() {
                    tracing::warn!(vendor = decoder.vendor(), delivered, "Stream ended before completion");
                    let event = ChatResponse::stream_error(
                        decoder.conversation_id(),
                        format!("{} stream ended before completion", decoder.vendor()),
                    );
                    emit(&tx, &cancel, event).await;
                }
                return;
            }
        };

        for line in pending {
            if !dispatch_line(&mut decoder, line, &tx, &cancel, &mut delivered).await {
                return;
            }
        }
    }
}

/// Returns `false` once the stream is over
async fn dispatch_line<D: FrameDecoder>(
    decoder: &mut D,
    line: SseLine,
    tx: &mpsc::Sender<ChatResponse>,
    cancel: &CancellationToken,
    delivered: &mut usize,
) -> bool {
    match decoder.decode(line) {
        FrameAction::Emit(event) => {
            *delivered += 1;
            emit(tx, cancel, event).await
        }
        FrameAction::EmitFinal(event) => {
            *delivered += 1;
            emit(tx, cancel, event).await;
            tracing::debug!(vendor = decoder.vendor(), delivered = *delivered, "Stream completed");
            false
        }
        FrameAction::Finish => {
            tracing::debug!(vendor = decoder.vendor(), delivered = *delivered, "Stream completed");
            false
        }
        FrameAction::Skip => true,
    }
}
