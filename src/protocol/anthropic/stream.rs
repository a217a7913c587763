use std::time::Instant;

use crate::error::{parse_frame_json, DispatchError};
use crate::protocol::anthropic::{
    AnthropicContentBlock, AnthropicDelta, AnthropicStreamMessage, ContentBlockDeltaPayload,
    ContentBlockStartPayload, ContentBlockStopPayload, ErrorPayload, MessageDeltaPayload,
    MessageStartPayload,
};
use crate::protocol::canonical::{
    output_rate, DispatchOp, DispatchSet, DispatchStats, IssueSymbol,
};
use crate::protocol::Dialect;

/// Upper bound on content block indices; anything above is treated as corrupt.
const MAX_CONTENT_BLOCKS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    AwaitingStart,
    InMessage,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    ToolUse,
    Other,
}

#[derive(Debug, Clone)]
struct OpenBlock {
    kind: BlockKind,
    content: String,
}

/// Stateful Anthropic Messages stream parser.
///
/// Frames are named (`event: message_start`, ...). Content blocks are
/// addressed by index: a delta or stop for an index that was never opened
/// is a parse error. After an `error` event the parser ignores everything.
pub struct AnthropicParser {
    state: StreamState,
    message: Option<AnthropicStreamMessage>,
    blocks: Vec<Option<OpenBlock>>,
    started_at: Option<Instant>,
    input_tokens: Option<u64>,
}

impl AnthropicParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: StreamState::AwaitingStart,
            message: None,
            blocks: Vec::new(),
            started_at: None,
            input_tokens: None,
        }
    }

    pub fn feed(&mut self, data: &str, name: Option<&str>) -> Result<Vec<DispatchOp>, DispatchError> {
        let mut ops = Vec::with_capacity(2);
        self.feed_into(data, name, &mut ops)?;
        Ok(ops)
    }

    /// Parse one named frame, appending ops to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Parse`] on malformed JSON, an unknown event
    /// name, or a block index that was never opened.
    pub fn feed_into(
        &mut self,
        data: &str,
        name: Option<&str>,
        out: &mut Vec<DispatchOp>,
    ) -> Result<(), DispatchError> {
        let Some(name) = name else {
            return Err(DispatchError::parse(
                Dialect::Anthropic,
                "received a frame without an event name",
            ));
        };

        if self.state == StreamState::Errored {
            tracing::warn!(event = name, "Anthropic: ignoring frame received after an error event");
            return Ok(());
        }

        match name {
            "ping" => Ok(()),
            "message_start" => self.on_message_start(data, out),
            "content_block_start" => self.on_content_block_start(data, out),
            "content_block_delta" => self.on_content_block_delta(data, out),
            "content_block_stop" => self.on_content_block_stop(data),
            "message_delta" => self.on_message_delta(data, Instant::now(), out),
            "message_stop" => {
                self.require_message(name)?;
                out.push(DispatchOp::Close);
                Ok(())
            }
            "error" => {
                let payload: ErrorPayload = parse_frame_json(Dialect::Anthropic, data)?;
                self.state = StreamState::Errored;
                let message = if payload.error.kind.is_empty() {
                    payload.error.message
                } else {
                    format!("{}: {}", payload.error.kind, payload.error.message)
                };
                out.push(DispatchOp::issue(message, IssueSymbol::Generic));
                out.push(DispatchOp::Close);
                Ok(())
            }
            other => Err(DispatchError::parse(
                Dialect::Anthropic,
                format_args!("unexpected event '{other}'"),
            )),
        }
    }

    fn require_message(&self, event: &str) -> Result<(), DispatchError> {
        if self.state == StreamState::InMessage {
            Ok(())
        } else {
            Err(DispatchError::parse(
                Dialect::Anthropic,
                format_args!("'{event}' received before message_start"),
            ))
        }
    }

    fn on_message_start(&mut self, data: &str, out: &mut Vec<DispatchOp>) -> Result<(), DispatchError> {
        let payload: MessageStartPayload = parse_frame_json(Dialect::Anthropic, data)?;
        let first_message = self.message.is_none();
        let message = payload.message;

        let mut set = DispatchSet::default();
        if first_message && !message.model.is_empty() {
            set.model = Some(message.model.clone());
        }
        if let Some(input_tokens) = message.usage.and_then(|usage| usage.input_tokens) {
            self.input_tokens = Some(input_tokens);
            set.stats = Some(DispatchStats {
                input_tokens: i64::try_from(input_tokens).ok(),
                ..DispatchStats::default()
            });
        }
        if set.model.is_some() || set.stats.is_some() {
            out.push(DispatchOp::Set(set));
        }

        self.message = Some(message);
        self.started_at = Some(Instant::now());
        self.state = StreamState::InMessage;
        Ok(())
    }

    fn on_content_block_start(
        &mut self,
        data: &str,
        out: &mut Vec<DispatchOp>,
    ) -> Result<(), DispatchError> {
        self.require_message("content_block_start")?;
        let payload: ContentBlockStartPayload = parse_frame_json(Dialect::Anthropic, data)?;
        let index = payload.index;
        if index >= MAX_CONTENT_BLOCKS {
            return Err(DispatchError::parse(
                Dialect::Anthropic,
                format_args!("content block index {index} out of range"),
            ));
        }

        let (kind, text) = match payload.content_block {
            AnthropicContentBlock::Text { text } => (BlockKind::Text, Some(text)),
            AnthropicContentBlock::ToolUse { id, name, input } => {
                tracing::debug!(tool_use_id = %id, tool = %name, "Anthropic: tool use block surfaced as text");
                (BlockKind::ToolUse, Some(format!("\n[tool use: {name} {input}]")))
            }
            AnthropicContentBlock::Other => (BlockKind::Other, None),
        };

        if index >= self.blocks.len() {
            self.blocks.resize(index + 1, None);
        }
        if self.blocks[index].is_none() {
            self.blocks[index] = Some(OpenBlock {
                kind,
                content: text.clone().unwrap_or_default(),
            });
        }
        if let Some(text) = text {
            out.push(DispatchOp::Text(text));
        }
        Ok(())
    }

    fn open_block_mut(&mut self, index: usize, event: &str) -> Result<&mut OpenBlock, DispatchError> {
        self.blocks
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or_else(|| {
                DispatchError::parse(
                    Dialect::Anthropic,
                    format_args!("'{event}' references unknown content block {index}"),
                )
            })
    }

    fn on_content_block_delta(
        &mut self,
        data: &str,
        out: &mut Vec<DispatchOp>,
    ) -> Result<(), DispatchError> {
        self.require_message("content_block_delta")?;
        let payload: ContentBlockDeltaPayload = parse_frame_json(Dialect::Anthropic, data)?;
        let block = self.open_block_mut(payload.index, "content_block_delta")?;
        let fragment = match payload.delta {
            AnthropicDelta::TextDelta { text } => text,
            AnthropicDelta::InputJsonDelta { partial_json } => partial_json,
            AnthropicDelta::Other => return Ok(()),
        };
        if block.kind == BlockKind::Other {
            return Ok(());
        }
        block.content.push_str(&fragment);
        out.push(DispatchOp::Text(fragment));
        Ok(())
    }

    fn on_content_block_stop(&mut self, data: &str) -> Result<(), DispatchError> {
        self.require_message("content_block_stop")?;
        let payload: ContentBlockStopPayload = parse_frame_json(Dialect::Anthropic, data)?;
        let block = self.open_block_mut(payload.index, "content_block_stop")?;
        tracing::trace!(
            index = payload.index,
            kind = ?block.kind,
            chars = block.content.len(),
            "Anthropic: content block closed"
        );
        Ok(())
    }

    /// `now` is the instant the frame arrived; the output rate is measured
    /// from `message_start` up to it.
    fn on_message_delta(
        &mut self,
        data: &str,
        now: Instant,
        out: &mut Vec<DispatchOp>,
    ) -> Result<(), DispatchError> {
        self.require_message("message_delta")?;
        let payload: MessageDeltaPayload = parse_frame_json(Dialect::Anthropic, data)?;

        if let Some(message) = self.message.as_mut() {
            if let Some(stop_reason) = payload.delta.stop_reason {
                tracing::debug!(stop_reason = %stop_reason, "Anthropic: message stop reason");
                message.stop_reason = Some(stop_reason);
            }
            if payload.delta.stop_sequence.is_some() {
                message.stop_sequence = payload.delta.stop_sequence;
            }
        }

        let Some(output_tokens) = payload.usage.and_then(|usage| usage.output_tokens) else {
            return Ok(());
        };
        if let Some(usage) = self.message.as_mut().and_then(|m| m.usage.as_mut()) {
            usage.output_tokens = Some(output_tokens);
        }
        let elapsed_secs = self
            .started_at
            .map_or(0.0, |started| now.saturating_duration_since(started).as_secs_f64());
        out.push(DispatchOp::stats(DispatchStats {
            input_tokens: self.input_tokens.and_then(|tokens| i64::try_from(tokens).ok()),
            output_tokens: Some(output_tokens),
            output_rate: output_rate(output_tokens, elapsed_secs),
        }));
        Ok(())
    }
}

impl Default for AnthropicParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::protocol::canonical::round2;

    fn feed(parser: &mut AnthropicParser, name: &str, data: &str) -> Vec<DispatchOp> {
        parser.feed(data, Some(name)).expect("frame should parse")
    }

    fn start(parser: &mut AnthropicParser) -> Vec<DispatchOp> {
        feed(
            parser,
            "message_start",
            r#"{"type":"message_start","message":{"id":"msg_1","type":"message","role":"assistant","model":"claude-3-haiku","content":[],"usage":{"input_tokens":5,"output_tokens":1}}}"#,
        )
    }

    #[test]
    fn test_message_start_sets_model_and_input_tokens() {
        let mut parser = AnthropicParser::new();
        let ops = start(&mut parser);
        assert_eq!(
            ops,
            vec![DispatchOp::Set(DispatchSet {
                model: Some("claude-3-haiku".into()),
                stats: Some(DispatchStats {
                    input_tokens: Some(5),
                    ..DispatchStats::default()
                }),
            })]
        );
    }

    #[test]
    fn test_second_message_start_does_not_resend_model() {
        let mut parser = AnthropicParser::new();
        start(&mut parser);
        let ops = feed(
            &mut parser,
            "message_start",
            r#"{"message":{"model":"claude-3-haiku"}}"#,
        );
        assert!(ops.is_empty());
    }

    #[test]
    fn test_ping_is_ignored() {
        let mut parser = AnthropicParser::new();
        assert!(feed(&mut parser, "ping", r#"{"type":"ping"}"#).is_empty());
    }

    #[test]
    fn test_text_block_flow() {
        let mut parser = AnthropicParser::new();
        start(&mut parser);
        let ops = feed(
            &mut parser,
            "content_block_start",
            r#"{"index":0,"content_block":{"type":"text","text":""}}"#,
        );
        assert_eq!(ops, vec![DispatchOp::text("")]);
        let ops = feed(
            &mut parser,
            "content_block_delta",
            r#"{"index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        );
        assert_eq!(ops, vec![DispatchOp::text("Hi")]);
        assert!(feed(&mut parser, "content_block_stop", r#"{"index":0}"#).is_empty());
        assert_eq!(
            feed(&mut parser, "message_stop", r#"{"type":"message_stop"}"#),
            vec![DispatchOp::Close]
        );
    }

    #[test]
    fn test_delta_for_unknown_block_is_parse_error() {
        let mut parser = AnthropicParser::new();
        start(&mut parser);
        let err = parser
            .feed(
                r#"{"index":3,"delta":{"type":"text_delta","text":"x"}}"#,
                Some("content_block_delta"),
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::Parse(_)));
    }

    #[test]
    fn test_stop_for_unknown_block_is_parse_error() {
        let mut parser = AnthropicParser::new();
        start(&mut parser);
        let err = parser
            .feed(r#"{"index":1}"#, Some("content_block_stop"))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Parse(_)));
    }

    #[test]
    fn test_block_before_message_start_is_parse_error() {
        let mut parser = AnthropicParser::new();
        let err = parser
            .feed(
                r#"{"index":0,"content_block":{"type":"text","text":""}}"#,
                Some("content_block_start"),
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::Parse(_)));
    }

    #[test]
    fn test_tool_use_block_surfaces_placeholder_and_json_deltas() {
        let mut parser = AnthropicParser::new();
        start(&mut parser);
        let ops = feed(
            &mut parser,
            "content_block_start",
            r#"{"index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"get_weather","input":{}}}"#,
        );
        assert_eq!(ops, vec![DispatchOp::text("\n[tool use: get_weather {}]")]);
        let ops = feed(
            &mut parser,
            "content_block_delta",
            r#"{"index":1,"delta":{"type":"input_json_delta","partial_json":"{\"city\":"}}"#,
        );
        assert_eq!(ops, vec![DispatchOp::text("{\"city\":")]);
    }

    #[test]
    fn test_unknown_block_type_is_registered_silently() {
        let mut parser = AnthropicParser::new();
        start(&mut parser);
        let ops = feed(
            &mut parser,
            "content_block_start",
            r#"{"index":0,"content_block":{"type":"thinking","thinking":""}}"#,
        );
        assert!(ops.is_empty());
        let ops = feed(
            &mut parser,
            "content_block_delta",
            r#"{"index":0,"delta":{"type":"thinking_delta","thinking":"hmm"}}"#,
        );
        assert!(ops.is_empty());
        assert!(feed(&mut parser, "content_block_stop", r#"{"index":0}"#).is_empty());
    }

    #[test]
    fn test_message_delta_emits_stats_with_output_tokens() {
        let mut parser = AnthropicParser::new();
        start(&mut parser);
        let ops = feed(
            &mut parser,
            "message_delta",
            r#"{"delta":{"stop_reason":"end_turn","stop_sequence":null},"usage":{"output_tokens":12}}"#,
        );
        assert_eq!(ops.len(), 1);
        let DispatchOp::Set(DispatchSet {
            model: None,
            stats: Some(stats),
        }) = &ops[0]
        else {
            panic!("expected stats op, got {ops:?}");
        };
        assert_eq!(stats.input_tokens, Some(5));
        assert_eq!(stats.output_tokens, Some(12));
        let rate = stats.output_rate.expect("rate measured since message_start");
        assert!(rate > 0.0);
        assert_eq!(round2(rate), rate);
    }

    #[test]
    fn test_message_delta_rate_is_tokens_per_second_rounded() {
        let mut parser = AnthropicParser::new();
        start(&mut parser);
        let started = Instant::now();
        parser.started_at = Some(started);

        let mut ops = Vec::new();
        parser
            .on_message_delta(
                r#"{"delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":12}}"#,
                started + Duration::from_secs(7),
                &mut ops,
            )
            .unwrap();
        let DispatchOp::Set(DispatchSet {
            stats: Some(stats), ..
        }) = &ops[0]
        else {
            panic!("expected stats op, got {ops:?}");
        };
        // 12 / 7 = 1.714...
        assert_eq!(stats.output_rate, Some(1.71));
    }

    #[test]
    fn test_message_delta_at_start_instant_has_no_rate() {
        let mut parser = AnthropicParser::new();
        start(&mut parser);
        let started = Instant::now();
        parser.started_at = Some(started);

        let mut ops = Vec::new();
        parser
            .on_message_delta(r#"{"delta":{},"usage":{"output_tokens":3}}"#, started, &mut ops)
            .unwrap();
        let DispatchOp::Set(DispatchSet {
            stats: Some(stats), ..
        }) = &ops[0]
        else {
            panic!("expected stats op, got {ops:?}");
        };
        assert_eq!(stats.output_tokens, Some(3));
        assert_eq!(stats.output_rate, None);
    }

    #[test]
    fn test_message_delta_without_usage_emits_nothing() {
        let mut parser = AnthropicParser::new();
        start(&mut parser);
        let ops = feed(
            &mut parser,
            "message_delta",
            r#"{"delta":{"stop_reason":"end_turn"}}"#,
        );
        assert!(ops.is_empty());
    }

    #[test]
    fn test_error_event_emits_issue_then_close_and_mutes_parser() {
        let mut parser = AnthropicParser::new();
        start(&mut parser);
        let ops = feed(
            &mut parser,
            "error",
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        );
        assert_eq!(
            ops,
            vec![
                DispatchOp::issue("overloaded_error: Overloaded", IssueSymbol::Generic),
                DispatchOp::Close,
            ]
        );
        let ops = feed(
            &mut parser,
            "content_block_delta",
            r#"{"index":9,"delta":{"type":"text_delta","text":"late"}}"#,
        );
        assert!(ops.is_empty());
    }

    #[test]
    fn test_unknown_event_is_parse_error() {
        let mut parser = AnthropicParser::new();
        let err = parser.feed("{}", Some("message_restart")).unwrap_err();
        assert!(matches!(err, DispatchError::Parse(_)));
    }

    #[test]
    fn test_unnamed_frame_is_parse_error() {
        let mut parser = AnthropicParser::new();
        assert!(parser.feed("{}", None).is_err());
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let mut parser = AnthropicParser::new();
        let err = parser.feed("{\"message\":", Some("message_start")).unwrap_err();
        assert!(matches!(err, DispatchError::Parse(_)));
    }
}
