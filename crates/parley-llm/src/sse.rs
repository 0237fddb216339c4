//! Incremental Server-Sent Events framing.
//!
//! Vendors deliver SSE over chunked HTTP, so frame boundaries never line up
//! with network chunks. The decoder buffers raw bytes, splits on `\n`
//! (tolerating `\r\n`), and dispatches a frame at each blank line.

use bytes::BytesMut;
use tracing::warn;

/// One dispatched SSE event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    /// OpenAI-style end-of-stream marker.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

#[derive(Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a network chunk; returns every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line = self.buffer.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            match std::str::from_utf8(&line) {
                Ok(text) => {
                    if let Some(frame) = self.process_line(text) {
                        frames.push(frame);
                    }
                }
                Err(e) => warn!(error = %e, "skipping non-UTF-8 SSE line"),
            }
        }
        frames
    }

    /// Flush at end of body: a trailing line without newline and any undispatched frame.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if !self.buffer.is_empty() {
            let rest = self.buffer.split();
            if let Ok(text) = std::str::from_utf8(&rest) {
                let text = text.trim_end_matches('\r');
                if let Some(frame) = self.process_line(text) {
                    frames.push(frame);
                }
            }
        }
        if let Some(frame) = self.dispatch() {
            frames.push(frame);
        }
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();
        Some(SseFrame {
            event: self.event.take(),
            data,
        })
    }
}
