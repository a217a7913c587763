use crate::error::{parse_frame_json, DispatchError};
use crate::protocol::canonical::{DispatchOp, DispatchStats, IssueSymbol, TRUNCATION_MARKER};
use crate::protocol::gemini::{GeminiCandidate, GeminiResponse, GeminiSafetyRating, GeminiUsageMetadata};
use crate::protocol::Dialect;

/// Gemini streamGenerateContent parser.
///
/// Every frame is a complete `GenerateContentResponse` chunk, so the only
/// state carried between frames is whether the model name was announced.
pub struct GeminiParser {
    requested_model: String,
    model_sent: bool,
}

impl GeminiParser {
    /// `requested_model` is announced when the vendor omits `modelVersion`.
    pub fn new(requested_model: impl Into<String>) -> Self {
        Self {
            requested_model: requested_model.into(),
            model_sent: false,
        }
    }

    pub fn feed(&mut self, data: &str) -> Result<Vec<DispatchOp>, DispatchError> {
        let mut ops = Vec::with_capacity(2);
        self.feed_into(data, &mut ops)?;
        Ok(ops)
    }

    /// # Errors
    ///
    /// Returns [`DispatchError::Parse`] on malformed JSON, a candidate count
    /// other than one, an unexpected finish reason without content, or a
    /// content block that is not exactly one text part.
    pub fn feed_into(&mut self, data: &str, out: &mut Vec<DispatchOp>) -> Result<(), DispatchError> {
        let chunk: GeminiResponse = parse_frame_json(Dialect::Gemini, data)?;

        if let Some(reason) = chunk
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
        {
            out.push(DispatchOp::issue(
                format!("Input not allowed: {reason}"),
                IssueSymbol::PromptBlocked,
            ));
            out.push(DispatchOp::Close);
            return Ok(());
        }

        let mut candidates = chunk.candidates.unwrap_or_default();
        if candidates.len() != 1 {
            return Err(DispatchError::parse(
                Dialect::Gemini,
                format_args!("expected 1 candidate, got {}", candidates.len()),
            ));
        }
        let GeminiCandidate {
            content,
            finish_reason,
            safety_ratings,
            ..
        } = candidates.swap_remove(0);

        let Some(content) = content else {
            return self.on_finish_without_content(
                finish_reason.as_deref(),
                &safety_ratings,
                chunk.usage_metadata,
                out,
            );
        };

        let mut parts = content.parts;
        let text = match (parts.len(), parts.pop().and_then(|part| part.text)) {
            (1, Some(text)) => text,
            (count, _) => {
                return Err(DispatchError::parse(
                    Dialect::Gemini,
                    format_args!("expected 1 text part, got {count} part(s)"),
                ));
            }
        };

        if !self.model_sent {
            self.model_sent = true;
            let model = chunk
                .model_version
                .filter(|version| !version.is_empty())
                .unwrap_or_else(|| self.requested_model.clone());
            out.push(DispatchOp::model(model));
        }
        out.push(DispatchOp::Text(text));

        if finish_reason.is_some() {
            push_usage(chunk.usage_metadata, out);
        }
        Ok(())
    }

    fn on_finish_without_content(
        &self,
        finish_reason: Option<&str>,
        safety_ratings: &[GeminiSafetyRating],
        usage: Option<GeminiUsageMetadata>,
        out: &mut Vec<DispatchOp>,
    ) -> Result<(), DispatchError> {
        match finish_reason {
            Some("MAX_TOKENS") => {
                push_usage(usage, out);
                out.push(DispatchOp::text(TRUNCATION_MARKER));
            }
            Some("RECITATION") => out.push(DispatchOp::issue(
                "Generation stopped due to RECITATION",
                IssueSymbol::Recitation,
            )),
            Some("SAFETY") => {
                let explanation = explain_safety_ratings(safety_ratings);
                let message = if explanation.is_empty() {
                    "Generation stopped due to SAFETY".to_string()
                } else {
                    format!("Generation stopped due to SAFETY: {explanation}")
                };
                out.push(DispatchOp::issue(message, IssueSymbol::Filtered));
            }
            other => {
                return Err(DispatchError::parse(
                    Dialect::Gemini,
                    format_args!(
                        "candidate has no content (finish reason: {})",
                        other.unwrap_or("none")
                    ),
                ));
            }
        }
        out.push(DispatchOp::Close);
        Ok(())
    }
}

/// `CATEGORY (PROBABILITY)` pairs, most severe first, negligible ones dropped.
#[must_use]
pub fn explain_safety_ratings(ratings: &[GeminiSafetyRating]) -> String {
    let mut relevant: Vec<&GeminiSafetyRating> = ratings
        .iter()
        .filter(|rating| rating.probability != "NEGLIGIBLE")
        .collect();
    relevant.sort_by(|a, b| b.severity().cmp(&a.severity()));
    relevant
        .iter()
        .map(|rating| format!("{} ({})", rating.category, rating.probability))
        .collect::<Vec<_>>()
        .join(", ")
}

fn push_usage(usage: Option<GeminiUsageMetadata>, out: &mut Vec<DispatchOp>) {
    let Some(usage) = usage else {
        return;
    };
    let Some(output_tokens) = usage.candidates_token_count else {
        return;
    };
    out.push(DispatchOp::stats(DispatchStats {
        input_tokens: Some(
            usage
                .prompt_token_count
                .and_then(|tokens| i64::try_from(tokens).ok())
                .unwrap_or(-1),
        ),
        output_tokens: Some(output_tokens),
        output_rate: None,
    }));
}
