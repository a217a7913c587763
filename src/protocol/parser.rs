use crate::error::DispatchError;
use crate::protocol::anthropic::stream::AnthropicParser;
use crate::protocol::canonical::DispatchOp;
use crate::protocol::gemini::stream::GeminiParser;
use crate::protocol::ollama::stream::OllamaParser;
use crate::protocol::openai_chat::stream::OpenAiParser;
use crate::protocol::Dialect;

/// Per-connection vendor parser, one variant per dialect family.
///
/// A parser is not restartable: once it has produced [`DispatchOp::Close`]
/// the caller drops it.
pub enum VendorParser {
    Anthropic(AnthropicParser),
    Gemini(GeminiParser),
    Ollama(OllamaParser),
    OpenAi(OpenAiParser),
}

impl VendorParser {
    /// Fresh parser for `dialect`. `model_id` is the requested model, used by
    /// dialects that may not echo it back.
    #[must_use]
    pub fn for_dialect(dialect: Dialect, model_id: &str) -> Self {
        match dialect {
            Dialect::Anthropic => VendorParser::Anthropic(AnthropicParser::new()),
            Dialect::Gemini => VendorParser::Gemini(GeminiParser::new(model_id)),
            Dialect::Ollama => VendorParser::Ollama(OllamaParser::new()),
            Dialect::OpenAi
            | Dialect::Azure
            | Dialect::Deepseek
            | Dialect::Groq
            | Dialect::LmStudio
            | Dialect::LocalAi
            | Dialect::Mistral
            | Dialect::OpenRouter
            | Dialect::Perplexity
            | Dialect::TogetherAi => VendorParser::OpenAi(OpenAiParser::new(dialect)),
        }
    }

    pub fn feed(&mut self, data: &str, name: Option<&str>) -> Result<Vec<DispatchOp>, DispatchError> {
        let mut ops = Vec::with_capacity(2);
        self.feed_into(data, name, &mut ops)?;
        Ok(ops)
    }

    /// Parse one frame, appending the resulting ops to `out`. Only the
    /// Anthropic dialect uses frame names.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Parse`] when the frame is malformed or
    /// violates the vendor's stream state machine.
    pub fn feed_into(
        &mut self,
        data: &str,
        name: Option<&str>,
        out: &mut Vec<DispatchOp>,
    ) -> Result<(), DispatchError> {
        match self {
            VendorParser::Anthropic(parser) => parser.feed_into(data, name, out),
            VendorParser::Gemini(parser) => parser.feed_into(data, out),
            VendorParser::Ollama(parser) => parser.feed_into(data, out),
            VendorParser::OpenAi(parser) => parser.feed_into(data, out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_dialect_gets_a_parser() {
        for dialect in Dialect::ALL {
            let parser = VendorParser::for_dialect(dialect, "m");
            let family_matches = match parser {
                VendorParser::Anthropic(_) => dialect == Dialect::Anthropic,
                VendorParser::Gemini(_) => dialect == Dialect::Gemini,
                VendorParser::Ollama(_) => dialect == Dialect::Ollama,
                VendorParser::OpenAi(_) => dialect.is_openai_family(),
            };
            assert!(family_matches, "wrong parser for {dialect}");
        }
    }

    #[test]
    fn test_unnamed_frames_route_to_openai_parser() {
        let mut parser = VendorParser::for_dialect(Dialect::Deepseek, "deepseek-chat");
        let ops = parser
            .feed(
                r#"{"model":"deepseek-chat","choices":[{"index":0,"delta":{"content":"ok"}}]}"#,
                None,
            )
            .unwrap();
        assert_eq!(
            ops,
            vec![DispatchOp::model("deepseek-chat"), DispatchOp::text("ok")]
        );
    }
}
