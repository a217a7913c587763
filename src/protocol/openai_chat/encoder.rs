use crate::error::DispatchError;
use crate::protocol::canonical::{HistoryMessage, ModelDescriptor};
use crate::protocol::ollama::encoder::history_role_name;
use crate::protocol::Dialect;

use super::{OpenAiChatRequest, OpenAiMessage};

/// Encode model + history into the `OpenAI` Chat Completions wire format.
///
/// Azure addresses the deployment in the URL, so the body carries no model.
///
/// # Errors
///
/// Returns [`DispatchError::Prepare`] on empty history.
pub fn encode_openai_chat_request(
    dialect: Dialect,
    model: &ModelDescriptor,
    history: &[HistoryMessage],
) -> Result<OpenAiChatRequest, DispatchError> {
    if history.is_empty() {
        return Err(DispatchError::prepare(dialect, "history is empty"));
    }

    let messages = history
        .iter()
        .map(|msg| OpenAiMessage {
            role: history_role_name(msg.role).to_string(),
            content: msg.content.clone(),
        })
        .collect();

    let model_id = if dialect == Dialect::Azure {
        None
    } else {
        Some(model.id.clone())
    };

    Ok(OpenAiChatRequest {
        model: model_id,
        messages,
        temperature: model.temperature,
        max_tokens: model.max_tokens,
        stream: true,
    })
}
