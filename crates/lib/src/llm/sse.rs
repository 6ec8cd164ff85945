//! Incremental server-sent-events decoder.
//!
//! Bytes are fed as they arrive from the network; complete events (terminated by a blank line)
//! come out in order. Carriage returns are dropped so `\r\n` framing decodes the same as `\n`.
//! DashScope reports the per-event HTTP status in a `:HTTP_STATUS/<code>` comment line.

/// One decoded event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field, if present.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
    /// Status from a `:HTTP_STATUS/<code>` comment, if present.
    pub http_status: Option<u16>,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    /// Prefix of `buf` already searched for a blank line.
    scanned: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend(chunk.iter().copied().filter(|&b| b != b'\r'));
        let mut events = Vec::new();
        loop {
            let found = self.buf[self.scanned..]
                .windows(2)
                .position(|w| w == b"\n\n");
            let Some(offset) = found else {
                // The last byte may pair with the next chunk.
                self.scanned = self.buf.len().saturating_sub(1);
                break;
            };
            let pos = self.scanned + offset;
            let block: Vec<u8> = self.buf.drain(..pos).collect();
            self.buf.drain(..2);
            self.scanned = 0;
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let block = std::mem::take(&mut self.buf);
        self.scanned = 0;
        parse_block(&String::from_utf8_lossy(&block))
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = SseEvent::default();
    let mut data_lines: Vec<&str> = Vec::new();
    for line in block.lines() {
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix(':') {
            if let Some(code) = comment.trim().strip_prefix("HTTP_STATUS/") {
                event.http_status = code.trim().parse().ok();
            }
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => event.event = Some(value.to_string()),
            "data" => data_lines.push(value),
            _ => {}
        }
    }
    event.data = data_lines.join("\n");
    if event.event.is_none() && event.data.is_empty() && event.http_status.is_none() {
        return None;
    }
    Some(event)
}
