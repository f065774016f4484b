//! Streaming transport for the chat completions endpoint
//!
//! Owns the HTTP layer: builds the request, classifies the initial status,
//! and pumps raw body chunks through the [`StreamDecoder`]. All failures
//! after the stream opens funnel into a terminal `Error` event so the
//! orchestrator has one failure channel.

use std::pin::Pin;
use std::time::Duration;

use async_stream::stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;

use perpetual_core::{Error, Message, Result, StreamDecoder, StreamEvent};

const COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Abort a stalled stream when no chunk arrives within this window.
const CHUNK_TIMEOUT: Duration = Duration::from_secs(60);

/// A stream of decoded events for one response
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Client for the streaming completions API
pub struct ChatClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

// Error body shape returned on non-success status
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

impl ChatClient {
    /// Create a new client with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: COMPLETIONS_URL.to_string(),
        }
    }

    /// Override the endpoint URL (tests, compatible gateways)
    #[allow(dead_code)]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Open a streaming completion for the given payload.
    ///
    /// Fails with [`Error::Transport`] when the request cannot be sent or
    /// the server answers with a non-success status; once the stream is
    /// open, failures surface as a terminal `Error` event instead.
    pub async fn stream(&self, model: &str, messages: &[Message]) -> Result<EventStream> {
        let request = ChatRequest {
            model,
            messages,
            stream: true,
        };

        let response = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::transport(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::transport(extract_error_message(status, &body)));
        }

        let mut body = response.bytes_stream();

        Ok(Box::pin(stream! {
            let mut decoder = StreamDecoder::new();
            let mut carry = Utf8Carry::default();

            loop {
                let chunk = match tokio::time::timeout(CHUNK_TIMEOUT, body.next()).await {
                    Ok(Some(Ok(bytes))) => bytes,
                    Ok(Some(Err(e))) => {
                        yield StreamEvent::Error(format!("stream read failed: {e}"));
                        return;
                    }
                    // Transport EOF: clean completion even without [DONE].
                    Ok(None) => break,
                    Err(_) => {
                        yield StreamEvent::Error(format!(
                            "stream timed out after {}s without data",
                            CHUNK_TIMEOUT.as_secs()
                        ));
                        return;
                    }
                };

                let text = carry.decode(&chunk);
                match decoder.feed(&text) {
                    Ok(events) => {
                        for event in events {
                            let terminal = event.is_terminal();
                            yield event;
                            if terminal {
                                log_malformed(&decoder);
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        yield StreamEvent::Error(e.to_string());
                        return;
                    }
                }
            }

            match decoder.finish() {
                Ok(events) => {
                    for event in events {
                        yield event;
                    }
                }
                Err(e) => yield StreamEvent::Error(e.to_string()),
            }
            log_malformed(&decoder);
        }))
    }
}

/// Incremental UTF-8 decoding across transport chunk boundaries.
///
/// Transport chunks are not aligned to code points: a multibyte sequence
/// can be split between two reads. Decoding each chunk independently would
/// turn both halves into replacement characters, so the trailing bytes of
/// an incomplete sequence are held back and prepended to the next chunk.
#[derive(Debug, Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    /// Decode the next chunk, returning all complete text it closes off.
    fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let bytes = std::mem::take(&mut self.pending);

        let mut out = String::new();
        let mut rest: &[u8] = &bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&rest[..valid]) {
                        out.push_str(text);
                    }
                    match e.error_len() {
                        // Truly invalid bytes: substitute and keep decoding.
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid + len..];
                        }
                        // Incomplete trailing sequence: hold it for the
                        // next chunk.
                        None => {
                            self.pending = rest[valid..].to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }
}

fn log_malformed(decoder: &StreamDecoder) {
    let dropped = decoder.malformed_lines();
    if dropped > 0 {
        tracing::warn!("dropped {dropped} malformed stream payload line(s)");
    }
}

/// Pull a human-readable message out of a structured error body, falling
/// back to the bare status.
fn extract_error_message(status: reqwest::StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .and_then(|e| e.message)
        .unwrap_or_else(|| format!("HTTP {status}"))
}
