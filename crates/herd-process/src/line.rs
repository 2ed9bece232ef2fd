use tracing::warn;

/// Absolute cap on a reassembled line, in bytes. Longer lines are split at
/// the cap and the overflow up to the next newline is discarded.
pub const MAX_LINE_LEN: usize = 8192;

/// Per-stream byte accumulator that turns arbitrary read chunks into whole
/// lines. Trailing `\r` is stripped, empty lines are skipped, and invalid
/// UTF-8 is replaced rather than rejected.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: Vec<u8>,
    /// Set after a cap split; everything up to the next newline is overflow.
    discarding: bool,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        self.buf.extend_from_slice(chunk);
        while let Some(idx) = self.buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=idx).collect();
            if self.discarding {
                self.discarding = false;
                continue;
            }
            if let Some(line) = finish_line(&raw) {
                lines.push(line);
            }
        }
        if self.discarding {
            self.buf.clear();
        } else if self.buf.len() > MAX_LINE_LEN {
            let raw = std::mem::take(&mut self.buf);
            if let Some(line) = finish_line(&raw) {
                lines.push(line);
            }
            self.discarding = true;
        }
        lines
    }

    /// Emit any trailing non-terminated content; called when the source
    /// pipe closes.
    pub fn flush_remainder(&mut self) -> Option<String> {
        if self.discarding {
            self.buf.clear();
            self.discarding = false;
            return None;
        }
        let raw = std::mem::take(&mut self.buf);
        if raw.is_empty() {
            None
        } else {
            finish_line(&raw)
        }
    }

    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

/// Strip the line terminator, decode, and enforce the length cap.
fn finish_line(raw: &[u8]) -> Option<String> {
    let mut end = raw.len();
    while end > 0 && (raw[end - 1] == b'\n' || raw[end - 1] == b'\r') {
        end -= 1;
    }
    if end == 0 {
        return None;
    }
    let mut text = String::from_utf8_lossy(&raw[..end]).into_owned();
    if text.len() > MAX_LINE_LEN {
        warn!(
            len = text.len(),
            max = MAX_LINE_LEN,
            "overlong line split at cap, overflow discarded"
        );
        let mut cut = MAX_LINE_LEN;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    Some(text)
}
