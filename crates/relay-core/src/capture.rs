//! Reconstruction of assistant reply text from raw response bytes.
//!
//! [`ResponseCapture`] is a passive observer: callers forward every chunk to
//! the client themselves and hand a copy to [`ResponseCapture::on_write`].
//! The framing is chosen once from the response `Content-Type`:
//!
//! - `application/json` – chunks are buffered and parsed once on
//!   [`ResponseCapture::finalize`].
//! - `text/event-stream` – chunks are appended to a rolling buffer that is
//!   cut on blank lines (`\n\n`); each complete event contributes its delta
//!   content immediately, the incomplete tail waits for more bytes.
//! - anything else – nothing is captured.
//!
//! A trailing event that never receives its terminating blank line is
//! discarded at finalize time.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use serde_json::Value;
use tracing::{debug, trace};

const EVENT_DELIMITER: &[u8] = b"\n\n";
const DATA_PREFIX: &[u8] = b"data:";

/// Where reply text lives inside upstream payloads, as JSON pointers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSettings {
    /// Content of a complete (non-streamed) completion body.
    pub json_content_pointer: String,
    /// Content delta inside one streamed event.
    pub stream_content_pointer: String,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            json_content_pointer: "/choices/0/message/content".to_owned(),
            stream_content_pointer: "/choices/0/delta/content".to_owned(),
        }
    }
}

/// Response framing, derived from the `Content-Type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Json,
    EventStream,
    Passthrough,
}

impl CaptureMode {
    pub fn from_content_type(content_type: &str) -> Self {
        let content_type = content_type.trim_start().to_ascii_lowercase();
        if content_type.starts_with("text/event-stream") {
            Self::EventStream
        } else if content_type.starts_with("application/json") {
            Self::Json
        } else {
            Self::Passthrough
        }
    }
}

/// Per-request reply accumulator.
#[derive(Debug)]
pub struct ResponseCapture {
    mode: CaptureMode,
    settings: Arc<CaptureSettings>,
    buffer: BytesMut,
    /// Offset in `buffer` before which no delimiter can start.
    scanned: usize,
    assembled: String,
}

impl ResponseCapture {
    pub fn new(mode: CaptureMode, settings: Arc<CaptureSettings>) -> Self {
        Self {
            mode,
            settings,
            buffer: BytesMut::new(),
            scanned: 0,
            assembled: String::new(),
        }
    }

    pub fn for_content_type(content_type: &str, settings: Arc<CaptureSettings>) -> Self {
        Self::new(CaptureMode::from_content_type(content_type), settings)
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    /// Text assembled from the events processed so far.
    pub fn assembled(&self) -> &str {
        &self.assembled
    }

    /// Observe one chunk of the outbound body.
    pub fn on_write(&mut self, chunk: &[u8]) {
        match self.mode {
            CaptureMode::Json => self.buffer.extend_from_slice(chunk),
            CaptureMode::EventStream => {
                self.buffer.extend_from_slice(chunk);
                self.drain_events();
            }
            CaptureMode::Passthrough => {}
        }
    }

    /// Consume the capture and return the reconstructed reply text.
    pub fn finalize(self) -> String {
        match self.mode {
            CaptureMode::Json => {
                extract_str(&self.buffer, &self.settings.json_content_pointer).unwrap_or_default()
            }
            CaptureMode::EventStream => {
                if !self.buffer.trim_ascii().is_empty() {
                    debug!(
                        dropped_bytes = self.buffer.len(),
                        "discarding incomplete trailing stream event"
                    );
                }
                self.assembled
            }
            CaptureMode::Passthrough => String::new(),
        }
    }

    fn drain_events(&mut self) {
        while let Some(end) = find_delimiter(&self.buffer, self.scanned) {
            let event = self.buffer.split_to(end);
            self.buffer.advance(EVENT_DELIMITER.len());
            self.scanned = 0;
            self.process_event(&event);
        }
        // A delimiter may straddle the next chunk boundary.
        self.scanned = self.buffer.len().saturating_sub(EVENT_DELIMITER.len() - 1);
    }

    fn process_event(&mut self, event: &[u8]) {
        let mut data = Vec::new();
        for line in event.split(|b| *b == b'\n') {
            if let Some(rest) = line.trim_ascii().strip_prefix(DATA_PREFIX) {
                data.extend_from_slice(rest.trim_ascii_start());
            }
        }
        if data.is_empty() {
            return;
        }
        if let Some(delta) = extract_str(&data, &self.settings.stream_content_pointer) {
            self.assembled.push_str(&delta);
        }
    }
}

fn find_delimiter(buffer: &[u8], from: usize) -> Option<usize> {
    buffer
        .get(from..)?
        .windows(EVENT_DELIMITER.len())
        .position(|window| window == EVENT_DELIMITER)
        .map(|offset| from + offset)
}

/// Parse `bytes` as JSON and pull the string at `pointer`.
///
/// Malformed JSON and a missing or non-string field both yield `None`.
fn extract_str(bytes: &[u8], pointer: &str) -> Option<String> {
    let value: Value = match serde_json::from_slice(bytes) {
        Ok(v) => v,
        Err(e) => {
            trace!(error = %e, len = bytes.len(), "skipping undecodable payload");
            return None;
        }
    };
    value.pointer(pointer).and_then(Value::as_str).map(str::to_owned)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
