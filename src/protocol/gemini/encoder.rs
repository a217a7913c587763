use crate::error::DispatchError;
use crate::protocol::access::GeminiBlockSafetyLevel;
use crate::protocol::canonical::{HistoryMessage, HistoryRole, ModelDescriptor};
use crate::protocol::gemini::{
    GeminiContent, GeminiGenerationConfig, GeminiPart, GeminiRequest, GeminiSafetySetting,
};
use crate::protocol::Dialect;

/// Harm categories a `min_safety_level` threshold is applied to.
pub const GEMINI_HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Encode model + history into a Gemini streamGenerateContent request.
///
/// # Errors
///
/// Returns [`DispatchError::Prepare`] when no user or assistant turn remains.
pub fn encode_gemini_request(
    model: &ModelDescriptor,
    history: &[HistoryMessage],
    min_safety_level: Option<GeminiBlockSafetyLevel>,
) -> Result<GeminiRequest, DispatchError> {
    let mut system_texts = Vec::new();
    let mut contents = Vec::with_capacity(history.len());
    for msg in history {
        let role = match msg.role {
            HistoryRole::System => {
                system_texts.push(text_part(&msg.content));
                continue;
            }
            HistoryRole::User => "user",
            HistoryRole::Assistant => "model",
        };
        contents.push(GeminiContent {
            role: Some(role.to_string()),
            parts: vec![text_part(&msg.content)],
        });
    }
    if contents.is_empty() {
        return Err(DispatchError::prepare(
            Dialect::Gemini,
            "history has no user or assistant turns",
        ));
    }

    let system_instruction = if system_texts.is_empty() {
        None
    } else {
        Some(GeminiContent {
            role: None,
            parts: system_texts,
        })
    };

    let generation_config = if model.temperature.is_some() || model.max_tokens.is_some() {
        Some(GeminiGenerationConfig {
            temperature: model.temperature,
            max_output_tokens: model.max_tokens,
        })
    } else {
        None
    };

    let safety_settings = min_safety_level.map(|threshold| {
        GEMINI_HARM_CATEGORIES
            .iter()
            .map(|category| GeminiSafetySetting {
                category: (*category).to_string(),
                threshold,
            })
            .collect()
    });

    Ok(GeminiRequest {
        contents,
        system_instruction,
        generation_config,
        safety_settings,
    })
}

fn text_part(text: &str) -> GeminiPart {
    GeminiPart {
        text: Some(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_roles_map_to_user_and_model() {
        let history = vec![
            HistoryMessage::new(HistoryRole::System, "sys"),
            HistoryMessage::new(HistoryRole::User, "Hi"),
            HistoryMessage::new(HistoryRole::Assistant, "Hello"),
        ];
        let req = encode_gemini_request(
            &ModelDescriptor::new("gemini-pro").with_max_tokens(64),
            &history,
            None,
        )
        .unwrap();
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "Hi"}]},
                    {"role": "model", "parts": [{"text": "Hello"}]}
                ],
                "systemInstruction": {"parts": [{"text": "sys"}]},
                "generationConfig": {"maxOutputTokens": 64}
            })
        );
    }

    #[test]
    fn test_safety_level_applies_to_every_category() {
        let history = vec![HistoryMessage::new(HistoryRole::User, "Hi")];
        let req = encode_gemini_request(
            &ModelDescriptor::new("gemini-pro"),
            &history,
            Some(GeminiBlockSafetyLevel::BlockOnlyHigh),
        )
        .unwrap();
        let settings = req.safety_settings.unwrap();
        assert_eq!(settings.len(), 4);
        let json = serde_json::to_value(&settings[0]).unwrap();
        assert_eq!(
            json,
            json!({"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_ONLY_HIGH"})
        );
        assert!(req.generation_config.is_none());
    }

    #[test]
    fn test_empty_history_is_prepare_error() {
        let err = encode_gemini_request(&ModelDescriptor::new("gemini-pro"), &[], None).unwrap_err();
        assert!(matches!(err, DispatchError::Prepare(_)));
    }
}
