//! Incremental server-sent-events decoder.
//!
//! Both provider streams arrive as SSE over a chunked HTTP body, and the
//! chunk boundaries fall anywhere, including mid-line. The decoder buffers
//! raw bytes, cuts complete lines, and assembles them into frames at each
//! blank-line separator.

/// One decoded SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field, when present.
    pub event: Option<String>,
    /// Concatenated `data:` lines, joined with `\n`.
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk; returns every frame completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(frame) = self.take_frame() {
                    frames.push(frame);
                }
                continue;
            }
            // Comment lines keep streams alive; nothing to decode.
            if line.starts_with(':') {
                continue;
            }
            match line.split_once(':') {
                Some(("event", value)) => {
                    self.event = Some(value.trim_start().to_string());
                }
                Some(("data", value)) => {
                    self.data_lines.push(value.strip_prefix(' ').unwrap_or(value).to_string());
                }
                // Unknown fields (id, retry) are ignored.
                _ => {}
            }
        }
        frames
    }

    /// Flush a trailing frame that was never terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        self.take_frame()
    }

    fn take_frame(&mut self) -> Option<SseFrame> {
        if self.data_lines.is_empty() && self.event.is_none() {
            return None;
        }
        let frame = SseFrame {
            event: self.event.take(),
            data: self.data_lines.join("\n"),
        };
        self.data_lines.clear();
        Some(frame)
    }
}

// ============================================================================
// Tests
// ============================================================================
