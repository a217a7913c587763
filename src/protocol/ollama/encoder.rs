use crate::error::DispatchError;
use crate::protocol::canonical::{HistoryMessage, HistoryRole, ModelDescriptor};
use crate::protocol::ollama::{OllamaChatRequest, OllamaMessage, OllamaOptions};
use crate::protocol::Dialect;

/// Encode model + history into an Ollama `/api/chat` request.
///
/// # Errors
///
/// Returns [`DispatchError::Prepare`] on empty history.
pub fn encode_ollama_request(
    model: &ModelDescriptor,
    history: &[HistoryMessage],
) -> Result<OllamaChatRequest, DispatchError> {
    if history.is_empty() {
        return Err(DispatchError::prepare(Dialect::Ollama, "history is empty"));
    }
    let messages = history
        .iter()
        .map(|msg| OllamaMessage {
            role: history_role_name(msg.role).to_string(),
            content: msg.content.clone(),
        })
        .collect();

    let options = if model.temperature.is_some() || model.max_tokens.is_some() {
        Some(OllamaOptions {
            temperature: model.temperature,
            num_predict: model.max_tokens,
        })
    } else {
        None
    };

    Ok(OllamaChatRequest {
        model: model.id.clone(),
        messages,
        stream: true,
        options,
    })
}

pub(crate) fn history_role_name(role: HistoryRole) -> &'static str {
    match role {
        HistoryRole::System => "system",
        HistoryRole::User => "user",
        HistoryRole::Assistant => "assistant",
    }
}
