use crate::error::DispatchError;
use crate::protocol::anthropic::{AnthropicMessage, AnthropicRequest};
use crate::protocol::canonical::{HistoryMessage, HistoryRole, ModelDescriptor};
use crate::protocol::Dialect;

/// Anthropic requires `max_tokens`; used when the model descriptor has none.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Encode model + history into the Anthropic Messages API wire format.
///
/// System turns are lifted into the top-level `system` field. The remaining
/// turns must alternate, so consecutive turns of the same role are merged and
/// a conversation opening with an assistant turn gets an empty user turn first.
///
/// # Errors
///
/// Returns [`DispatchError::Prepare`] when no user or assistant turn remains.
pub fn encode_anthropic_request(
    model: &ModelDescriptor,
    history: &[HistoryMessage],
) -> Result<AnthropicRequest, DispatchError> {
    // --- system ---
    let system_parts: Vec<&str> = history
        .iter()
        .filter(|msg| msg.role == HistoryRole::System)
        .map(|msg| msg.content.as_str())
        .filter(|content| !content.is_empty())
        .collect();
    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    // --- messages ---
    let mut messages: Vec<AnthropicMessage> = Vec::with_capacity(history.len());
    for msg in history {
        let role = match msg.role {
            HistoryRole::System => continue,
            HistoryRole::User => "user",
            HistoryRole::Assistant => "assistant",
        };
        match messages.last_mut() {
            Some(last) if last.role == role => {
                last.content.push_str("\n\n");
                last.content.push_str(&msg.content);
            }
            _ => {
                if messages.is_empty() && role == "assistant" {
                    messages.push(AnthropicMessage {
                        role: "user".to_string(),
                        content: String::new(),
                    });
                }
                messages.push(AnthropicMessage {
                    role: role.to_string(),
                    content: msg.content.clone(),
                });
            }
        }
    }
    if messages.is_empty() {
        return Err(DispatchError::prepare(
            Dialect::Anthropic,
            "history has no user or assistant turns",
        ));
    }

    Ok(AnthropicRequest {
        model: model.id.clone(),
        system,
        messages,
        max_tokens: model.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: model.temperature,
        stream: true,
    })
}
