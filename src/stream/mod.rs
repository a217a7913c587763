pub mod ndjson;
pub mod sse;

pub use ndjson::NdjsonParser;
pub use sse::SseParser;

/// What a demuxed frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DemuxedKind {
    #[default]
    Event,
    /// SSE `retry:` directive; `data` holds the interval in milliseconds.
    ReconnectInterval,
}

/// One discrete frame split out of the upstream body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DemuxedEvent {
    pub kind: DemuxedKind,
    pub name: Option<String>,
    pub data: String,
}

impl DemuxedEvent {
    #[must_use]
    pub fn event(name: Option<String>, data: String) -> Self {
        Self {
            kind: DemuxedKind::Event,
            name,
            data,
        }
    }

    #[must_use]
    pub fn reconnect_interval(millis: u64) -> Self {
        Self {
            kind: DemuxedKind::ReconnectInterval,
            name: None,
            data: millis.to_string(),
        }
    }
}

/// Framing used by an upstream response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DemuxerKind {
    EventStream,
    NewlineJson,
}

impl DemuxerKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DemuxerKind::EventStream => "event-stream",
            DemuxerKind::NewlineJson => "newline-json",
        }
    }

    /// Response content type a vendor answers with under this framing.
    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            DemuxerKind::EventStream => "text/event-stream",
            DemuxerKind::NewlineJson => "application/x-ndjson",
        }
    }

    #[must_use]
    pub fn create(self) -> Demuxer {
        match self {
            DemuxerKind::EventStream => Demuxer::EventStream(SseParser::new()),
            DemuxerKind::NewlineJson => Demuxer::NewlineJson(NdjsonParser::new()),
        }
    }
}

/// Per-connection frame splitter.
pub enum Demuxer {
    EventStream(SseParser),
    NewlineJson(NdjsonParser),
}

impl Demuxer {
    #[must_use]
    pub fn kind(&self) -> DemuxerKind {
        match self {
            Demuxer::EventStream(_) => DemuxerKind::EventStream,
            Demuxer::NewlineJson(_) => DemuxerKind::NewlineJson,
        }
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<DemuxedEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<DemuxedEvent>) {
        match self {
            Demuxer::EventStream(parser) => parser.feed_into(chunk, out),
            Demuxer::NewlineJson(parser) => parser.feed_into(chunk, out),
        }
    }

    /// Buffered text that has not formed a frame yet (diagnostics only).
    #[must_use]
    pub fn remainder(&self) -> &str {
        match self {
            Demuxer::EventStream(parser) => parser.remainder(),
            Demuxer::NewlineJson(parser) => parser.remainder(),
        }
    }
}

/// Decodes body chunks as UTF-8, carrying code points split across chunk
/// boundaries over to the next call.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    remainder: Vec<u8>,
}

impl Utf8ChunkDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes` after any carried-over prefix. Invalid sequences are
    /// replaced with U+FFFD; an incomplete trailing sequence is held back.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.remainder.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.remainder.len());
        let mut start = 0usize;
        loop {
            match std::str::from_utf8(&self.remainder[start..]) {
                Ok(text) => {
                    out.push_str(text);
                    start = self.remainder.len();
                    break;
                }
                Err(err) => {
                    let valid_up_to = start + err.valid_up_to();
                    // Safety: `valid_up_to` is a UTF-8 boundary reported by `from_utf8`.
                    out.push_str(unsafe {
                        std::str::from_utf8_unchecked(&self.remainder[start..valid_up_to])
                    });
                    match err.error_len() {
                        Some(invalid_len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start = valid_up_to + invalid_len;
                        }
                        None => {
                            start = valid_up_to;
                            break;
                        }
                    }
                }
            }
        }
        self.remainder.drain(..start);
        out
    }

    /// Bytes of an incomplete code point still waiting for the next chunk.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.remainder.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demuxer_kind_creates_matching_demuxer() {
        assert_eq!(
            DemuxerKind::EventStream.create().kind(),
            DemuxerKind::EventStream
        );
        assert_eq!(
            DemuxerKind::NewlineJson.create().kind(),
            DemuxerKind::NewlineJson
        );
        assert_eq!(DemuxerKind::NewlineJson.as_str(), "newline-json");
        assert_eq!(DemuxerKind::EventStream.content_type(), "text/event-stream");
    }

    #[test]
    fn test_event_stream_split_boundaries_are_independent() {
        let input = "event: message_start\ndata: {\"x\":1}\n\n";
        let whole = DemuxerKind::EventStream.create().feed(input);

        let mut demuxer = DemuxerKind::EventStream.create();
        let mut split = demuxer.feed(&input[..9]);
        split.extend(demuxer.feed(&input[9..27]));
        split.extend(demuxer.feed(&input[27..]));
        assert_eq!(whole, split);
        assert_eq!(split.len(), 1);
    }

    #[test]
    fn test_utf8_decoder_carries_split_code_point() {
        let bytes = "héllo".as_bytes();
        let mut decoder = Utf8ChunkDecoder::new();
        let first = decoder.decode(&bytes[..2]);
        assert_eq!(first, "h");
        assert_eq!(decoder.pending_bytes(), 1);
        let second = decoder.decode(&bytes[2..]);
        assert_eq!(second, "éllo");
        assert_eq!(decoder.pending_bytes(), 0);
    }

    #[test]
    fn test_utf8_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8ChunkDecoder::new();
        let text = decoder.decode(b"a\xffb");
        assert_eq!(text, "a\u{fffd}b");
        assert_eq!(decoder.pending_bytes(), 0);
    }
}
