use serde::{Deserialize, Serialize};

use super::Dialect;

/// Credentials and endpoint settings, discriminated by the `dialect` tag.
///
/// Schema validation happens upstream; this type only has to carry the
/// fields each vendor needs. Unknown tags fail deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dialect", rename_all = "lowercase")]
pub enum DispatchAccess {
    Anthropic(AnthropicAccess),
    Gemini(GeminiAccess),
    Ollama(OllamaAccess),
    OpenAi(OpenAiAccess),
    Azure(OpenAiAccess),
    Deepseek(OpenAiAccess),
    Groq(OpenAiAccess),
    LmStudio(OpenAiAccess),
    LocalAi(OpenAiAccess),
    Mistral(OpenAiAccess),
    OpenRouter(OpenAiAccess),
    Perplexity(OpenAiAccess),
    TogetherAi(OpenAiAccess),
}

impl DispatchAccess {
    #[must_use]
    pub fn dialect(&self) -> Dialect {
        match self {
            DispatchAccess::Anthropic(_) => Dialect::Anthropic,
            DispatchAccess::Gemini(_) => Dialect::Gemini,
            DispatchAccess::Ollama(_) => Dialect::Ollama,
            DispatchAccess::OpenAi(_) => Dialect::OpenAi,
            DispatchAccess::Azure(_) => Dialect::Azure,
            DispatchAccess::Deepseek(_) => Dialect::Deepseek,
            DispatchAccess::Groq(_) => Dialect::Groq,
            DispatchAccess::LmStudio(_) => Dialect::LmStudio,
            DispatchAccess::LocalAi(_) => Dialect::LocalAi,
            DispatchAccess::Mistral(_) => Dialect::Mistral,
            DispatchAccess::OpenRouter(_) => Dialect::OpenRouter,
            DispatchAccess::Perplexity(_) => Dialect::Perplexity,
            DispatchAccess::TogetherAi(_) => Dialect::TogetherAi,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnthropicAccess {
    #[serde(default)]
    pub anthropic_key: String,
    #[serde(default)]
    pub anthropic_host: Option<String>,
    /// Helicone proxy key; routes through the Helicone gateway when no custom host is set.
    #[serde(default)]
    pub heli_key: Option<String>,
}

/// Minimum harm probability at which Gemini blocks content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeminiBlockSafetyLevel {
    #[serde(rename = "HARM_BLOCK_THRESHOLD_UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "BLOCK_LOW_AND_ABOVE")]
    BlockLowAndAbove,
    #[serde(rename = "BLOCK_MEDIUM_AND_ABOVE")]
    BlockMediumAndAbove,
    #[serde(rename = "BLOCK_ONLY_HIGH")]
    BlockOnlyHigh,
    #[serde(rename = "BLOCK_NONE")]
    BlockNone,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiAccess {
    #[serde(default)]
    pub gemini_key: String,
    #[serde(default)]
    pub gemini_host: Option<String>,
    #[serde(default)]
    pub min_safety_level: Option<GeminiBlockSafetyLevel>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OllamaAccess {
    #[serde(default)]
    pub ollama_host: Option<String>,
}

/// Access shared by every OpenAI-compatible dialect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAiAccess {
    #[serde(default)]
    pub oai_key: String,
    #[serde(default)]
    pub oai_org: Option<String>,
    #[serde(default)]
    pub oai_host: Option<String>,
    #[serde(default)]
    pub heli_key: Option<String>,
}
