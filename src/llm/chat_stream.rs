//! Streaming chat client for OpenAI-compatible APIs.
//!
//! The response body arrives as server-sent events. [`DeltaStream`] frames
//! the raw bytes into SSE lines with a carry buffer for partial frames,
//! classifies each line, and yields only content deltas. A `[DONE]` marker
//! ends the stream even if the transport keeps going.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::{RagError, Result};

use super::{ChatClient, ChatMessage, TokenStream};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub struct HttpChatClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl HttpChatClient {
    pub fn new(http: reqwest::Client, config: LlmConfig) -> Self {
        Self { http, config }
    }
}

#[derive(Serialize)]
struct StreamRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<TokenStream> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let req = StreamRequest {
            model: self.config.model.clone(),
            messages,
            stream: true,
        };

        let resp = self
            .http
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .header(
                "Authorization",
                format!("Bearer {}", self.config.api_key.as_deref().unwrap_or("")),
            )
            .json(&req)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = resp.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => RagError::unauthorized(format!("chat API: {body}")),
                429 => RagError::RateLimited { retry_after },
                _ => RagError::upstream(format!("chat API returned {status}: {body}")),
            });
        }

        let body: Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>> =
            Box::pin(resp.bytes_stream());
        Ok(Box::pin(DeltaStream::new(body)))
    }
}

// ─── SSE framing ─────────────────────────────────────────

/// Accumulates body bytes and drains complete SSE lines. A frame is closed
/// by `\n`; bytes after the last newline are carried to the next feed.
#[derive(Default)]
struct SseFrameDecoder {
    carry: Vec<u8>,
}

impl SseFrameDecoder {
    fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.carry.iter().position(|b| *b == b'\n') {
            let frame: Vec<u8> = self.carry.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&frame);
            let text = text.trim_end_matches(['\n', '\r']);
            if !text.is_empty() {
                lines.push(text.to_string());
            }
        }
        lines
    }

    /// Surface whatever is left once the body ends without a final newline.
    fn flush(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        let tail = String::from_utf8_lossy(&std::mem::take(&mut self.carry))
            .trim()
            .to_string();
        (!tail.is_empty()).then_some(tail)
    }
}

/// What one framed SSE line contributes to the delta stream.
enum LinePayload {
    Delta(String),
    Done,
    Skip,
    Malformed(String),
}

fn classify_line(line: &str) -> LinePayload {
    let Some(payload) = line.strip_prefix("data:") else {
        // Comments, event names, and anything else SSE allows between
        // data lines carry no content.
        return LinePayload::Skip;
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return LinePayload::Done;
    }

    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => {
            let content = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .filter(|c| !c.is_empty());
            match content {
                Some(text) => LinePayload::Delta(text),
                None => LinePayload::Skip, // role-only or empty delta
            }
        }
        Err(err) => LinePayload::Malformed(err.to_string()),
    }
}

/// The token stream handed to the generation stage: frames the transport
/// bytes, classifies lines, and queues deltas between polls.
struct DeltaStream<S> {
    body: S,
    decoder: SseFrameDecoder,
    ready: VecDeque<Result<String>>,
    finished: bool,
}

impl<S> DeltaStream<S> {
    fn new(body: S) -> Self {
        Self {
            body,
            decoder: SseFrameDecoder::default(),
            ready: VecDeque::new(),
            finished: false,
        }
    }

    fn take_in(&mut self, bytes: &[u8]) {
        for line in self.decoder.feed(bytes) {
            match classify_line(&line) {
                LinePayload::Delta(text) => self.ready.push_back(Ok(text)),
                LinePayload::Skip => {}
                LinePayload::Done => {
                    self.finished = true;
                    break;
                }
                LinePayload::Malformed(reason) => {
                    self.ready.push_back(Err(RagError::upstream(format!(
                        "unparseable chat stream chunk: {reason}"
                    ))));
                }
            }
        }
    }
}

impl<S> Stream for DeltaStream<S>
where
    S: Stream<Item = reqwest::Result<bytes::Bytes>> + Send + Unpin,
{
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(item) = this.ready.pop_front() {
                return Poll::Ready(Some(item));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.body).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(bytes))) => this.take_in(&bytes),
                Poll::Ready(Some(Err(err))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(RagError::upstream(format!(
                        "chat stream transport error: {err}"
                    )))));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    if let Some(tail) = this.decoder.flush() {
                        if let LinePayload::Delta(text) = classify_line(&tail) {
                            this.ready.push_back(Ok(text));
                        }
                    }
                }
            }
        }
    }
}
