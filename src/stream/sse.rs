//! Incremental event-stream tokenizer.
//!
//! Field handling follows the WHATWG server-sent events grammar: `event`
//! names the next frame, `data` lines accumulate (joined by `\n`), `retry`
//! carries a reconnect interval, `id`, comments and unknown fields are
//! dropped, and a blank line dispatches the frame. Lines end in `\n`,
//! `\r\n` or a bare `\r`.

use memchr::memchr2;

use super::DemuxedEvent;

/// Fields collected for the frame currently being assembled.
#[derive(Debug, Default)]
struct PendingFrame {
    name: Option<String>,
    data: String,
    has_data: bool,
}

impl PendingFrame {
    fn apply_line(&mut self, line: &str, out: &mut Vec<DemuxedEvent>) {
        if line.is_empty() {
            self.dispatch(out);
            return;
        }
        let (field, value) = match line.split_once(':') {
            // leading colon: comment line
            Some(("", _)) => return,
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.has_data = true;
                self.data.push_str(value);
            }
            "event" => self.name = Some(value.to_string()),
            "retry" => {
                if let Ok(millis) = value.trim().parse::<u64>() {
                    out.push(DemuxedEvent::reconnect_interval(millis));
                }
            }
            _ => {}
        }
    }

    fn dispatch(&mut self, out: &mut Vec<DemuxedEvent>) {
        let name = self.name.take();
        if !self.has_data {
            return;
        }
        self.has_data = false;
        out.push(DemuxedEvent::event(name, std::mem::take(&mut self.data)));
    }
}

/// Event-stream demuxer. Chunks may split lines, fields or `\r\n` pairs
/// anywhere; frames come out identical regardless of chunking.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    consumed: usize,
    frame: PendingFrame,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<DemuxedEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Append complete frames to `out`, keeping any unterminated line buffered.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<DemuxedEvent>) {
        self.buffer.push_str(chunk);
        let bytes = self.buffer.as_bytes();
        let mut line_start = self.consumed;
        while let Some(offset) = memchr2(b'\r', b'\n', &bytes[line_start..]) {
            let line_end = line_start + offset;
            let next = match (bytes[line_end], bytes.get(line_end + 1)) {
                (b'\n', _) => line_end + 1,
                (_, Some(b'\n')) => line_end + 2,
                (_, Some(_)) => line_end + 1,
                // trailing `\r`: wait to see whether `\n` follows
                (_, None) => break,
            };
            self.frame.apply_line(&self.buffer[line_start..line_end], out);
            line_start = next;
        }
        self.consumed = line_start;
        self.compact();
    }

    /// Text received but not yet terminated by a newline.
    #[must_use]
    pub fn remainder(&self) -> &str {
        &self.buffer[self.consumed..]
    }

    fn compact(&mut self) {
        if self.consumed == self.buffer.len() {
            self.buffer.clear();
            self.consumed = 0;
        } else if self.consumed >= 8 * 1024 || self.consumed * 2 >= self.buffer.len() {
            self.buffer.drain(..self.consumed);
            self.consumed = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::DemuxedKind;

    fn data(frames: &[DemuxedEvent]) -> Vec<&str> {
        frames.iter().map(|frame| frame.data.as_str()).collect()
    }

    #[test]
    fn test_unnamed_openai_frames() {
        let mut parser = SseParser::new();
        let frames = parser.feed("data: {\"a\":1}\n\ndata: [DONE]\n\n");
        assert_eq!(data(&frames), ["{\"a\":1}", "[DONE]"]);
        assert!(frames.iter().all(|frame| frame.name.is_none()));
    }

    #[test]
    fn test_named_anthropic_frame() {
        let mut parser = SseParser::new();
        let frames = parser.feed("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].name.as_deref(), Some("message_stop"));
        assert_eq!(frames[0].kind, DemuxedKind::Event);
    }

    #[test]
    fn test_multiple_data_lines_join_with_newline() {
        let mut parser = SseParser::new();
        let frames = parser.feed("data: a\ndata:b\ndata:  c\n\n");
        assert_eq!(data(&frames), ["a\nb\n c"]);
    }

    #[test]
    fn test_comments_ids_and_unknown_fields_are_dropped() {
        let mut parser = SseParser::new();
        let frames = parser.feed(": keep-alive\nid: 42\nfoo: bar\ndata: x\n\n");
        assert_eq!(data(&frames), ["x"]);
    }

    #[test]
    fn test_field_without_colon() {
        let mut parser = SseParser::new();
        let frames = parser.feed("data\n\n");
        assert_eq!(data(&frames), [""]);
    }

    #[test]
    fn test_blank_line_without_data_drops_name() {
        let mut parser = SseParser::new();
        let frames = parser.feed("event: ping\n\ndata: after\n\n");
        assert_eq!(frames.len(), 1);
        assert!(frames[0].name.is_none());
    }

    #[test]
    fn test_retry_directive() {
        let mut parser = SseParser::new();
        let frames = parser.feed("retry: 2500\nretry: later\n\n");
        assert_eq!(frames, vec![DemuxedEvent::reconnect_interval(2500)]);
    }

    #[test]
    fn test_gemini_crlf_frames() {
        let mut parser = SseParser::new();
        let frames = parser.feed("data: {\"candidates\":[]}\r\n\r\ndata: {}\r\n\r\n");
        assert_eq!(data(&frames), ["{\"candidates\":[]}", "{}"]);
    }

    #[test]
    fn test_crlf_split_between_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed("data: x\r").is_empty());
        assert!(parser.feed("\n\r").is_empty());
        assert_eq!(data(&parser.feed("\n")), ["x"]);
    }

    #[test]
    fn test_bare_cr_line_endings() {
        let mut parser = SseParser::new();
        let frames = parser.feed("event: a\rdata: x\r\rdata: y\r\r");
        assert_eq!(data(&frames), ["x"]);
        assert_eq!(frames[0].name.as_deref(), Some("a"));
        // the final `\r` is held until the next byte shows it is not `\r\n`
        assert_eq!(parser.remainder(), "\r");
        assert_eq!(data(&parser.feed(":\n")), ["y"]);
    }

    #[test]
    fn test_mixed_line_endings_match_across_splits() {
        let input = "data: a\r\rdata: b\n\ndata: c\r\n\r\n";
        let whole = SseParser::new().feed(input);
        assert_eq!(data(&whole), ["a", "b", "c"]);
        for split in 1..input.len() {
            let mut parser = SseParser::new();
            let mut frames = parser.feed(&input[..split]);
            frames.extend(parser.feed(&input[split..]));
            assert_eq!(frames, whole, "split at {split}");
        }
    }

    #[test]
    fn test_remainder_tracks_partial_line() {
        let mut parser = SseParser::new();
        assert!(parser.feed("data: {\"par").is_empty());
        assert_eq!(parser.remainder(), "data: {\"par");
        assert!(parser.feed("tial\":true}\n").is_empty());
        assert_eq!(parser.remainder(), "");
        assert_eq!(data(&parser.feed("\n")), ["{\"partial\":true}"]);
    }

    #[test]
    fn test_feed_into_appends() {
        let mut parser = SseParser::new();
        let mut out = vec![DemuxedEvent::event(None, "earlier".to_string())];
        parser.feed_into("data: later\n\n", &mut out);
        assert_eq!(data(&out), ["earlier", "later"]);
    }

    #[test]
    fn test_char_by_char_matches_single_feed() {
        let input = "event: content_block_delta\ndata: {\"t\":\"é\"}\n\nretry: 10\n\nevent: message_stop\ndata: {}\n\n";
        let whole = SseParser::new().feed(input);

        let mut parser = SseParser::new();
        let mut split = Vec::new();
        for ch in input.chars() {
            parser.feed_into(ch.encode_utf8(&mut [0u8; 4]), &mut split);
        }
        assert_eq!(whole, split);
        assert_eq!(whole.len(), 3);
    }
}
