use crate::error::{parse_frame_json, DispatchError};
use crate::protocol::canonical::{output_rate, DispatchOp, DispatchStats, IssueSymbol};
use crate::protocol::ollama::OllamaChatChunk;
use crate::protocol::Dialect;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Ollama chat stream parser. Frames are newline-delimited chunk objects.
#[derive(Debug, Default)]
pub struct OllamaParser {
    model_sent: bool,
}

impl OllamaParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &str) -> Result<Vec<DispatchOp>, DispatchError> {
        let mut ops = Vec::with_capacity(2);
        self.feed_into(data, &mut ops)?;
        Ok(ops)
    }

    /// # Errors
    ///
    /// Returns [`DispatchError::Parse`] on malformed JSON or a chunk that has
    /// neither `message` nor `error`.
    pub fn feed_into(&mut self, data: &str, out: &mut Vec<DispatchOp>) -> Result<(), DispatchError> {
        let chunk: OllamaChatChunk = parse_frame_json(Dialect::Ollama, data)?;

        if let Some(error) = chunk.error {
            out.push(DispatchOp::issue(error, IssueSymbol::Generic));
            out.push(DispatchOp::Close);
            return Ok(());
        }

        if !self.model_sent {
            if let Some(model) = chunk.model {
                self.model_sent = true;
                out.push(DispatchOp::model(model));
            }
        }

        let Some(message) = chunk.message else {
            return Err(DispatchError::parse(
                Dialect::Ollama,
                "chunk carries neither 'message' nor 'error'",
            ));
        };
        out.push(DispatchOp::Text(message.content));

        if let (Some(eval_count), Some(eval_duration)) = (chunk.eval_count, chunk.eval_duration) {
            #[allow(clippy::cast_precision_loss)]
            let elapsed_secs = eval_duration as f64 / NANOS_PER_SEC;
            out.push(DispatchOp::stats(DispatchStats {
                input_tokens: Some(
                    chunk
                        .prompt_eval_count
                        .and_then(|tokens| i64::try_from(tokens).ok())
                        .unwrap_or(-1),
                ),
                output_tokens: Some(eval_count),
                output_rate: output_rate(eval_count, elapsed_secs),
            }));
        }

        if chunk.done {
            out.push(DispatchOp::Close);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_announced_once() {
        let mut parser = OllamaParser::new();
        let frame = r#"{"model":"llama3","message":{"role":"assistant","content":"a"},"done":false}"#;
        assert_eq!(
            parser.feed(frame).unwrap(),
            vec![DispatchOp::model("llama3"), DispatchOp::text("a")]
        );
        assert_eq!(parser.feed(frame).unwrap(), vec![DispatchOp::text("a")]);
    }

    #[test]
    fn test_error_field_yields_issue_and_close() {
        let mut parser = OllamaParser::new();
        let ops = parser.feed(r#"{"error":"model 'x' not found"}"#).unwrap();
        assert_eq!(
            ops,
            vec![
                DispatchOp::issue("model 'x' not found", IssueSymbol::Generic),
                DispatchOp::Close,
            ]
        );
    }

    #[test]
    fn test_final_chunk_stats_with_prompt_count() {
        let mut parser = OllamaParser::new();
        let ops = parser
            .feed(r#"{"message":{"content":""},"done":true,"prompt_eval_count":26,"eval_count":4,"eval_duration":2000000000}"#)
            .unwrap();
        assert_eq!(
            ops,
            vec![
                DispatchOp::text(""),
                DispatchOp::stats(DispatchStats {
                    input_tokens: Some(26),
                    output_tokens: Some(4),
                    output_rate: Some(2.0),
                }),
                DispatchOp::Close,
            ]
        );
    }

    #[test]
    fn test_zero_eval_duration_omits_rate() {
        let mut parser = OllamaParser::new();
        let ops = parser
            .feed(r#"{"message":{"content":""},"done":true,"eval_count":3,"eval_duration":0}"#)
            .unwrap();
        assert_eq!(
            ops[1],
            DispatchOp::stats(DispatchStats {
                input_tokens: Some(-1),
                output_tokens: Some(3),
                output_rate: None,
            })
        );
    }

    #[test]
    fn test_chunk_without_message_is_parse_error() {
        let mut parser = OllamaParser::new();
        let err = parser.feed(r#"{"model":"llama3","done":false}"#).unwrap_err();
        assert!(matches!(err, DispatchError::Parse(_)));
    }
}
