use memchr::memchr_iter;

use super::DemuxedEvent;

/// Newline-delimited JSON splitter.
///
/// Text is buffered until the buffer ends with a newline; only then is it
/// split into one unnamed frame per non-empty line. A chunk that ends
/// mid-line yields nothing until the line is completed.
#[derive(Debug, Default)]
pub struct NdjsonParser {
    buffer: String,
}

impl NdjsonParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<DemuxedEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<DemuxedEvent>) {
        self.buffer.push_str(chunk);
        if !self.buffer.ends_with('\n') {
            return;
        }

        let mut line_start = 0usize;
        for line_end in memchr_iter(b'\n', self.buffer.as_bytes()) {
            let line = self.buffer[line_start..line_end].trim();
            if !line.is_empty() {
                out.push(DemuxedEvent::event(None, line.to_string()));
            }
            line_start = line_end + 1;
        }
        self.buffer.clear();
    }

    #[must_use]
    pub fn remainder(&self) -> &str {
        &self.buffer
    }
}
