//! Dispatch request builder.
//!
//! Turns dialect-tagged access, a model descriptor and the conversation
//! history into the outbound request plus the demuxer and parser that will
//! read its response.

pub mod endpoint;

use http::{header, HeaderMap, HeaderValue};
use serde::Serialize;

use crate::error::DispatchError;
use crate::protocol::anthropic::encoder::encode_anthropic_request;
use crate::protocol::gemini::encoder::encode_gemini_request;
use crate::protocol::ollama::encoder::encode_ollama_request;
use crate::protocol::openai_chat::encoder::encode_openai_chat_request;
use crate::protocol::{DispatchAccess, Dialect, HistoryMessage, ModelDescriptor, VendorParser};
use crate::stream::DemuxerKind;

use endpoint::Endpoint;

/// Fully-built outbound request. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    url: String,
    headers: HeaderMap,
    body: serde_json::Value,
}

impl DispatchRequest {
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }
}

/// Everything one connection needs: the request and the matching reader.
pub struct DispatchBundle {
    pub dialect: Dialect,
    pub request: DispatchRequest,
    pub demuxer: DemuxerKind,
    pub parser: VendorParser,
}

/// Build the outbound request for `access`'s dialect.
///
/// # Errors
///
/// Returns [`DispatchError::Prepare`] when credentials are missing, the host
/// is invalid, or the history cannot be encoded.
pub fn dispatch(
    access: &DispatchAccess,
    model: &ModelDescriptor,
    history: &[HistoryMessage],
) -> Result<DispatchBundle, DispatchError> {
    let dialect = access.dialect();
    let (endpoint, body) = match access {
        DispatchAccess::Anthropic(access) => (
            endpoint::anthropic_endpoint(access)?,
            to_body(dialect, &encode_anthropic_request(model, history)?)?,
        ),
        DispatchAccess::Gemini(access) => (
            endpoint::gemini_endpoint(access, &model.id)?,
            to_body(
                dialect,
                &encode_gemini_request(model, history, access.min_safety_level)?,
            )?,
        ),
        DispatchAccess::Ollama(access) => (
            endpoint::ollama_endpoint(access)?,
            to_body(dialect, &encode_ollama_request(model, history)?)?,
        ),
        DispatchAccess::OpenAi(access)
        | DispatchAccess::Azure(access)
        | DispatchAccess::Deepseek(access)
        | DispatchAccess::Groq(access)
        | DispatchAccess::LmStudio(access)
        | DispatchAccess::LocalAi(access)
        | DispatchAccess::Mistral(access)
        | DispatchAccess::OpenRouter(access)
        | DispatchAccess::Perplexity(access)
        | DispatchAccess::TogetherAi(access) => (
            endpoint::openai_family_endpoint(dialect, access, &model.id)?,
            to_body(
                dialect,
                &encode_openai_chat_request(dialect, model, history)?,
            )?,
        ),
    };

    let demuxer = demuxer_for(dialect);
    let Endpoint { url, mut headers } = endpoint;
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(demuxer.content_type()),
    );

    tracing::debug!(dialect = %dialect, url = %url, demuxer = demuxer.as_str(), "dispatch request built");

    Ok(DispatchBundle {
        dialect,
        request: DispatchRequest { url, headers, body },
        demuxer,
        parser: VendorParser::for_dialect(dialect, &model.id),
    })
}

/// Framing a dialect streams its response in.
#[must_use]
pub fn demuxer_for(dialect: Dialect) -> DemuxerKind {
    match dialect {
        Dialect::Ollama => DemuxerKind::NewlineJson,
        Dialect::Anthropic
        | Dialect::Gemini
        | Dialect::OpenAi
        | Dialect::Azure
        | Dialect::Deepseek
        | Dialect::Groq
        | Dialect::LmStudio
        | Dialect::LocalAi
        | Dialect::Mistral
        | Dialect::OpenRouter
        | Dialect::Perplexity
        | Dialect::TogetherAi => DemuxerKind::EventStream,
    }
}

fn to_body<T: Serialize>(dialect: Dialect, body: &T) -> Result<serde_json::Value, DispatchError> {
    serde_json::to_value(body)
        .map_err(|err| DispatchError::prepare(dialect, format_args!("body serialization failed ({err})")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::access::{AnthropicAccess, OllamaAccess, OpenAiAccess};
    use crate::protocol::HistoryRole;

    fn history() -> Vec<HistoryMessage> {
        vec![HistoryMessage::new(HistoryRole::User, "Hi")]
    }

    #[test]
    fn test_ollama_uses_newline_json() {
        let bundle = dispatch(
            &DispatchAccess::Ollama(OllamaAccess::default()),
            &ModelDescriptor::new("llama3"),
            &history(),
        )
        .unwrap();
        assert_eq!(bundle.demuxer, DemuxerKind::NewlineJson);
        assert!(matches!(bundle.parser, VendorParser::Ollama(_)));
        assert_eq!(bundle.request.headers()["accept"], "application/x-ndjson");
        assert_eq!(bundle.request.body()["stream"], true);
    }

    #[test]
    fn test_every_other_dialect_uses_event_stream() {
        for dialect in Dialect::ALL {
            let expected = if dialect == Dialect::Ollama {
                DemuxerKind::NewlineJson
            } else {
                DemuxerKind::EventStream
            };
            assert_eq!(demuxer_for(dialect), expected);
        }
    }

    #[test]
    fn test_anthropic_bundle() {
        let access = DispatchAccess::Anthropic(AnthropicAccess {
            anthropic_key: "sk-ant".into(),
            ..AnthropicAccess::default()
        });
        let bundle = dispatch(&access, &ModelDescriptor::new("claude-3-haiku"), &history()).unwrap();
        assert_eq!(bundle.dialect, Dialect::Anthropic);
        assert_eq!(bundle.request.url(), "https://api.anthropic.com/v1/messages");
        assert_eq!(bundle.request.headers()["content-type"], "application/json");
        assert_eq!(bundle.request.headers()["accept"], "text/event-stream");
        assert_eq!(bundle.request.body()["max_tokens"], 4096);
        assert!(matches!(bundle.parser, VendorParser::Anthropic(_)));
    }

    #[test]
    fn test_missing_credentials_is_prepare_error() {
        let access = DispatchAccess::Mistral(OpenAiAccess::default());
        let result = dispatch(&access, &ModelDescriptor::new("mistral-small"), &history());
        assert!(matches!(result, Err(DispatchError::Prepare(_))));
    }

    #[test]
    fn test_empty_history_is_prepare_error() {
        let access = DispatchAccess::OpenAi(OpenAiAccess {
            oai_key: "sk".into(),
            ..OpenAiAccess::default()
        });
        let result = dispatch(&access, &ModelDescriptor::new("gpt-4o"), &[]);
        assert!(matches!(result, Err(DispatchError::Prepare(_))));
    }
}
