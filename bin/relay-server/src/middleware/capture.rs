//! Capture middleware for the chat-completion route.
//!
//! On the way in the request body is buffered, its `messages` array is
//! validated and a lifecycle is started for the conversation. On the way out
//! the response body is wrapped in [`CaptureBody`], which forwards every
//! frame untouched while feeding data frames to a [`ResponseCapture`]. End of
//! stream reports completion, and the body only reports its own end once the
//! lifecycle task has written the cache. Dropping the body first (client
//! disconnect) reports cancellation. Non-success responses are forwarded but
//! never cached.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use axum::middleware::Next;
use axum::response::Response;
use http_body::{Body as HttpBody, Frame, SizeHint};
use http_body_util::BodyExt;
use relay_core::{CompletionSignal, Finalized, Message, ResponseCapture, validate};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ServerError;
use crate::state::AppState;

pub async fn capture_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ServerError> {
    let content_type = header_str(req.headers(), &header::CONTENT_TYPE).to_ascii_lowercase();
    if !content_type.starts_with("application/json") {
        return Err(ServerError::BadRequest("invalid content type".into()));
    }

    let (parts, body) = req.into_parts();
    let bytes = body
        .collect()
        .await
        .map_err(|e| ServerError::Internal(format!("failed to read request body: {e}")))?
        .to_bytes();

    let transcript = parse_transcript(&bytes)?;
    if !validate(&transcript) {
        return Err(ServerError::BadRequest("invalid message order".into()));
    }

    let conversation_id = conversation_id(&parts.headers, &state.conversation_header);
    debug!(%conversation_id, messages = transcript.len(), "capturing conversation");

    // Held across `next.run` so that dropping this future also cancels.
    let (signal, task) = state.coordinator.begin(conversation_id.clone(), transcript);

    let req = Request::from_parts(parts, Body::from(bytes));
    let response = next.run(req).await;

    let (mut parts, body) = response.into_parts();
    if !parts.status.is_success() {
        debug!(%conversation_id, status = parts.status.as_u16(), "non-success response will not be cached");
    }
    let capture = ResponseCapture::for_content_type(
        header_str(&parts.headers, &header::CONTENT_TYPE),
        Arc::clone(&state.capture),
    );
    match HeaderValue::from_str(&conversation_id) {
        Ok(value) => {
            parts.headers.insert(state.conversation_header.clone(), value);
        }
        Err(e) => warn!(%conversation_id, error = %e, "conversation id is not a valid header value"),
    }

    let body = CaptureBody::new(body, capture, signal, task).cache_reply(parts.status.is_success());
    Ok(Response::from_parts(parts, Body::new(body)))
}

/// Response body that observes every data frame on its way to the client.
pub struct CaptureBody {
    inner: Body,
    capture: Option<ResponseCapture>,
    signal: Option<CompletionSignal>,
    task: Option<JoinHandle<Finalized>>,
    cache_reply: bool,
}

impl CaptureBody {
    pub fn new(
        inner: Body,
        capture: ResponseCapture,
        signal: CompletionSignal,
        task: JoinHandle<Finalized>,
    ) -> Self {
        Self {
            inner,
            capture: Some(capture),
            signal: Some(signal),
            task: Some(task),
            cache_reply: true,
        }
    }

    /// When `false`, end of stream retires the lifecycle without caching.
    pub fn cache_reply(mut self, cache_reply: bool) -> Self {
        self.cache_reply = cache_reply;
        self
    }

    fn finish(&mut self) {
        if let (Some(capture), Some(signal)) = (self.capture.take(), self.signal.take()) {
            if self.cache_reply {
                signal.complete(capture.finalize());
            } else {
                signal.discard();
            }
        }
    }

    /// Wait for the lifecycle task, then report end of stream.
    fn poll_retire(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Bytes>, axum::Error>>> {
        if let Some(task) = self.task.as_mut() {
            if let Err(e) = ready!(Pin::new(task).poll(cx)) {
                warn!(error = %e, "capture lifecycle task failed");
            }
            self.task = None;
        }
        Poll::Ready(None)
    }
}

impl HttpBody for CaptureBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.signal.is_none() {
            return this.poll_retire(cx);
        }
        match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
            Some(Ok(frame)) => {
                if let (Some(data), Some(capture)) = (frame.data_ref(), this.capture.as_mut()) {
                    capture.on_write(data);
                }
                if this.inner.is_end_stream() {
                    this.finish();
                }
                Poll::Ready(Some(Ok(frame)))
            }
            // A transport error leaves the signal armed; the drop cancels.
            Some(Err(e)) => Poll::Ready(Some(Err(e))),
            None => {
                this.finish();
                this.poll_retire(cx)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.signal.is_none() && self.task.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> &'a str {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("")
}

fn parse_transcript(bytes: &[u8]) -> Result<Vec<Message>, ServerError> {
    let mut body: Value =
        serde_json::from_slice(bytes).map_err(|_| ServerError::BadRequest("invalid JSON".into()))?;
    let messages = match body.get_mut("messages") {
        Some(messages) if messages.is_array() => messages.take(),
        _ => return Err(ServerError::BadRequest("messages field required".into())),
    };
    serde_json::from_value(messages).map_err(|_| ServerError::BadRequest("invalid messages format".into()))
}

fn conversation_id(headers: &HeaderMap, name: &HeaderName) -> String {
    let supplied = header_str(headers, name).trim();
    if supplied.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        supplied.to_owned()
    }
}
