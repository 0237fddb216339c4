//! Shared request/stream plumbing for the HTTP adapters.
//!
//! Every vendor stream runs through [`drive_stream`]: it polls the
//! cancellation token before each body read, enforces the idle timeout, and
//! feeds decoded SSE frames to a vendor-specific [`StreamHandler`].

use std::fmt::Display;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Response};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use parley_core::{ChatOptions, ChatResult, ProviderError};

use crate::sse::{SseDecoder, SseFrame};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// What the driver should do after a frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Done,
}

/// Vendor-specific event state machine.
pub trait StreamHandler: Send {
    /// Apply one frame, forwarding text deltas through `options.emit`.
    fn handle(&mut self, frame: &SseFrame, options: &ChatOptions) -> Result<Flow, ProviderError>;

    /// Whether any text has reached the caller yet.
    fn has_text(&self) -> bool;

    fn finish(self, cancelled: bool) -> ChatResult;
}

/// Send the request unless cancelled first. `Ok(None)` means cancelled.
/// Non-2xx statuses are classified into [`ProviderError`].
pub async fn send_request(
    request: RequestBuilder,
    cancel: &CancellationToken,
) -> Result<Option<Response>, ProviderError> {
    let response = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(None),
        sent = request.send() => sent.map_err(|e| ProviderError::NetworkError(e.to_string()))?,
    };

    let status = response.status();
    if status.is_success() {
        return Ok(Some(response));
    }

    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(match ProviderError::from_status(status.as_u16(), body) {
        ProviderError::RateLimited { .. } => ProviderError::RateLimited { retry_after },
        other => other,
    })
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Pump a response body through `handler` until the stream ends, the
/// handler reports completion, or `options.cancel` fires.
///
/// Cancellation returns the partial result with `cancelled = true`; the body
/// is dropped, which aborts the underlying transfer.
pub async fn drive_stream<S, E, H>(
    body: S,
    mut handler: H,
    options: &ChatOptions,
    idle_timeout: Duration,
) -> Result<ChatResult, ProviderError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
    H: StreamHandler,
{
    let mut body = std::pin::pin!(body);
    let mut decoder = SseDecoder::new();

    loop {
        let next = tokio::select! {
            biased;
            () = options.cancel.cancelled() => {
                debug!(model = %options.model, "stream cancelled, returning partial result");
                return Ok(handler.finish(true));
            }
            next = tokio::time::timeout(idle_timeout, body.next()) => next,
        };

        let frames = match next {
            Err(_) => {
                return Err(ProviderError::StreamInterrupted(format!(
                    "idle timeout after {}s",
                    idle_timeout.as_secs()
                )));
            }
            Ok(Some(Err(e))) => return Err(ProviderError::StreamInterrupted(e.to_string())),
            Ok(Some(Ok(chunk))) => decoder.push(&chunk),
            Ok(None) => {
                let frames = decoder.finish();
                for frame in &frames {
                    if let Err(e) = handler.handle(frame, options) {
                        return Err(escalate(e, &handler));
                    }
                }
                return Ok(handler.finish(false));
            }
        };

        for frame in &frames {
            match handler.handle(frame, options) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Done) => return Ok(handler.finish(false)),
                Err(e) => return Err(escalate(e, &handler)),
            }
        }
    }
}

fn escalate<H: StreamHandler>(err: ProviderError, handler: &H) -> ProviderError {
    if handler.has_text() {
        err.committed()
    } else {
        err
    }
}

/// Parse accumulated tool-call arguments. Empty input is an empty object;
/// malformed or non-object JSON is logged and the call is dropped.
pub fn parse_tool_arguments(provider: &str, id: &str, name: &str, raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(Value::Object(serde_json::Map::new()));
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ Value::Object(_)) => Some(value),
        Ok(other) => {
            warn!(
                provider,
                tool_call_id = id,
                tool_name = name,
                parsed_type = other.to_string().chars().take(20).collect::<String>(),
                "tool call arguments are not an object, dropping call"
            );
            None
        }
        Err(e) => {
            warn!(
                provider,
                tool_call_id = id,
                tool_name = name,
                error = %e,
                args_preview = trimmed.chars().take(100).collect::<String>(),
                "failed to parse tool call arguments, dropping call"
            );
            None
        }
    }
}
