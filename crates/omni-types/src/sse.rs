//! Incremental server-sent-events framing.
//!
//! Network reads split an event stream at arbitrary byte offsets.
//! [`SseDecoder`] buffers bytes until a blank-line boundary and only then
//! yields the event's `data` payload, so the sequence of payloads does not
//! depend on how the bytes were chunked in transit.

/// Buffers raw bytes and yields the `data` payload of every complete event.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the payloads of the events it completed.
    ///
    /// Events without any `data:` line (comments, keep-alives) yield nothing.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        // The buffer holds no boundary yet, but its last three bytes may
        // start one that this chunk completes.
        let mut from = self.buf.len().saturating_sub(3);
        self.buf.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some((end, sep_len)) = find_boundary(&self.buf, from) {
            let block: Vec<u8> = self.buf.drain(..end + sep_len).take(end).collect();
            if let Some(data) = parse_block(&block) {
                payloads.push(data);
            }
            from = 0;
        }
        payloads
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        let block = std::mem::take(&mut self.buf);
        parse_block(&block)
    }
}

/// First `\n\n` or `\r\n\r\n` at or after `from`, as (offset, separator length).
fn find_boundary(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    (from..buf.len()).find_map(|i| {
        let rest = &buf[i..];
        if rest.starts_with(b"\n\n") {
            Some((i, 2))
        } else if rest.starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else {
            None
        }
    })
}

fn parse_block(block: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(block);
    let mut data: Option<String> = None;
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_owned()),
            }
        }
    }
    data
}

// ── Tests ──────────────────────────────────────────────────────────────────────
