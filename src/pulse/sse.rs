//! Minimal `text/event-stream` frame decoder for the push channel.

use crate::chat::stream::Utf8Decoder;

/// Splits a server-sent-event body into the `data` payloads of complete
/// events. Comments, `event:`, `id:` and `retry:` fields are ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    text: Utf8Decoder,
    buf: String,
}

impl SseDecoder {
    /// Feed one body chunk; returns the payloads of events it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.push_str(&self.text.push(bytes));
        if self.buf.contains('\r') {
            // A trailing CR may be the first half of a CRLF.
            let held = self.buf.ends_with('\r');
            if held {
                self.buf.pop();
            }
            self.buf = self.buf.replace("\r\n", "\n").replace('\r', "\n");
            if held {
                self.buf.push('\r');
            }
        }

        let mut payloads = Vec::new();
        while let Some(end) = self.buf.find("\n\n") {
            let frame: String = self.buf.drain(..end + 2).collect();
            if let Some(data) = frame_data(&frame) {
                payloads.push(data);
            }
        }
        payloads
    }
}

fn frame_data(frame: &str) -> Option<String> {
    let lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}
