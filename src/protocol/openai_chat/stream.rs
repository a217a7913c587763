use crate::error::{parse_frame_json, DispatchError};
use crate::protocol::canonical::{DispatchOp, DispatchStats, IssueSymbol};
use crate::protocol::Dialect;

use super::{describe_vendor_notice, OpenAiStreamChunk, OpenAiUsage};

/// Terminal sentinel sent as the data of the last event-stream frame.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Parser for `chat.completion.chunk` streams, shared by every
/// OpenAI-compatible dialect. `dialect` only affects error attribution.
pub struct OpenAiParser {
    dialect: Dialect,
    model_sent: bool,
    warned: bool,
}

impl OpenAiParser {
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            model_sent: false,
            warned: false,
        }
    }

    pub fn feed(&mut self, data: &str) -> Result<Vec<DispatchOp>, DispatchError> {
        let mut ops = Vec::with_capacity(2);
        self.feed_into(data, &mut ops)?;
        Ok(ops)
    }

    /// # Errors
    ///
    /// Returns [`DispatchError::Parse`] on malformed JSON, a choice count
    /// other than one outside the two tolerated sentinel shapes, or a
    /// choice index other than zero.
    pub fn feed_into(&mut self, data: &str, out: &mut Vec<DispatchOp>) -> Result<(), DispatchError> {
        if data.trim() == DONE_SENTINEL {
            out.push(DispatchOp::Close);
            return Ok(());
        }

        let chunk: OpenAiStreamChunk = parse_frame_json(self.dialect, data)?;

        if !self.model_sent {
            if let Some(model) = chunk.model.as_deref().filter(|model| !model.is_empty()) {
                self.model_sent = true;
                out.push(DispatchOp::model(model));
            }
        }

        if let Some(error) = &chunk.error {
            out.push(DispatchOp::issue(
                describe_vendor_notice(error),
                IssueSymbol::Generic,
            ));
            out.push(DispatchOp::Close);
            return Ok(());
        }

        if let Some(warning) = &chunk.warning {
            if !self.warned {
                self.warned = true;
                tracing::warn!(
                    dialect = %self.dialect,
                    warning = %describe_vendor_notice(warning),
                    "upstream reported a warning"
                );
            }
        }

        if chunk.choices.len() != 1 {
            if chunk.choices.is_empty() {
                if let Some(usage) = &chunk.usage {
                    tracing::debug!(
                        dialect = %self.dialect,
                        prompt_tokens = ?usage.prompt_tokens,
                        completion_tokens = ?usage.completion_tokens,
                        "usage-only frame"
                    );
                    return Ok(());
                }
            }
            if chunk.is_empty_annotation() {
                tracing::debug!(dialect = %self.dialect, "skipping empty annotation frame");
                return Ok(());
            }
            return Err(DispatchError::parse(
                self.dialect,
                format_args!("expected 1 choice, got {}", chunk.choices.len()),
            ));
        }

        let OpenAiStreamChunk { choices, usage, .. } = chunk;
        let Some(choice) = choices.into_iter().next() else {
            return Ok(());
        };
        if choice.index != 0 {
            return Err(DispatchError::parse(
                self.dialect,
                format_args!("unexpected choice index {}", choice.index),
            ));
        }

        if let Some(content) = choice.delta.content.filter(|content| !content.is_empty()) {
            out.push(DispatchOp::Text(content));
        }
        for tool_call in choice.delta.tool_calls.unwrap_or_default() {
            if let Some(name) = tool_call.function.and_then(|function| function.name) {
                out.push(DispatchOp::Text(format!("\n[function call: {name}]")));
            }
        }
        if let Some(stats) = usage.and_then(usage_stats) {
            out.push(DispatchOp::stats(stats));
        }
        Ok(())
    }
}

fn usage_stats(usage: OpenAiUsage) -> Option<DispatchStats> {
    let output_tokens = usage.completion_tokens?;
    Some(DispatchStats {
        input_tokens: Some(
            usage
                .prompt_tokens
                .and_then(|tokens| i64::try_from(tokens).ok())
                .unwrap_or(-1),
        ),
        output_tokens: Some(output_tokens),
        output_rate: None,
    })
}
