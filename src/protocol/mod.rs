pub mod access;
pub mod anthropic;
pub mod canonical;
pub mod gemini;
pub mod ollama;
pub mod openai_chat;
pub mod parser;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DispatchError;

pub use access::DispatchAccess;
pub use canonical::{
    DispatchOp, DispatchSet, DispatchStats, HistoryMessage, HistoryRole, IssueSymbol,
    ModelDescriptor,
};
pub use parser::VendorParser;

/// Vendor wire dialect a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Anthropic,
    Gemini,
    Ollama,
    OpenAi,
    Azure,
    Deepseek,
    Groq,
    LmStudio,
    LocalAi,
    Mistral,
    OpenRouter,
    Perplexity,
    TogetherAi,
}

impl Dialect {
    pub const ALL: [Dialect; 13] = [
        Dialect::Anthropic,
        Dialect::Gemini,
        Dialect::Ollama,
        Dialect::OpenAi,
        Dialect::Azure,
        Dialect::Deepseek,
        Dialect::Groq,
        Dialect::LmStudio,
        Dialect::LocalAi,
        Dialect::Mistral,
        Dialect::OpenRouter,
        Dialect::Perplexity,
        Dialect::TogetherAi,
    ];

    /// Wire tag used in access objects.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Anthropic => "anthropic",
            Dialect::Gemini => "gemini",
            Dialect::Ollama => "ollama",
            Dialect::OpenAi => "openai",
            Dialect::Azure => "azure",
            Dialect::Deepseek => "deepseek",
            Dialect::Groq => "groq",
            Dialect::LmStudio => "lmstudio",
            Dialect::LocalAi => "localai",
            Dialect::Mistral => "mistral",
            Dialect::OpenRouter => "openrouter",
            Dialect::Perplexity => "perplexity",
            Dialect::TogetherAi => "togetherai",
        }
    }

    /// Human-readable vendor name used in inline issue annotations.
    #[must_use]
    pub fn pretty_name(self) -> &'static str {
        match self {
            Dialect::Anthropic => "Anthropic",
            Dialect::Gemini => "Gemini",
            Dialect::Ollama => "Ollama",
            Dialect::OpenAi => "OpenAI",
            Dialect::Azure => "Azure",
            Dialect::Deepseek => "Deepseek",
            Dialect::Groq => "Groq",
            Dialect::LmStudio => "LM Studio",
            Dialect::LocalAi => "LocalAI",
            Dialect::Mistral => "Mistral",
            Dialect::OpenRouter => "OpenRouter",
            Dialect::Perplexity => "Perplexity",
            Dialect::TogetherAi => "Together AI",
        }
    }

    /// Whether this dialect streams OpenAI-compatible chat completion chunks.
    #[must_use]
    pub fn is_openai_family(self) -> bool {
        match self {
            Dialect::Anthropic | Dialect::Gemini | Dialect::Ollama => false,
            Dialect::OpenAi
            | Dialect::Azure
            | Dialect::Deepseek
            | Dialect::Groq
            | Dialect::LmStudio
            | Dialect::LocalAi
            | Dialect::Mistral
            | Dialect::OpenRouter
            | Dialect::Perplexity
            | Dialect::TogetherAi => true,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dialect::ALL
            .into_iter()
            .find(|dialect| dialect.as_str() == s)
            .ok_or_else(|| DispatchError::Prepare(format!("unknown dialect '{s}'")))
    }
}
