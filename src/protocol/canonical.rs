use serde::{Deserialize, Serialize};

/// Text appended when a vendor stops because the output token limit was hit.
pub const TRUNCATION_MARKER: &str = "\n\n✂️ [output truncated at the token limit]";

/// Role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    System,
    User,
    Assistant,
}

/// One turn of the conversation history sent upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: HistoryRole,
    pub content: String,
}

impl HistoryMessage {
    pub fn new(role: HistoryRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Model selection and sampling parameters for one generation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Visible marker distinguishing the kind of issue a vendor reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueSymbol {
    Generic,
    PromptBlocked,
    Recitation,
    Filtered,
}

impl IssueSymbol {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            IssueSymbol::Generic => "❌",
            IssueSymbol::PromptBlocked => "🚫",
            IssueSymbol::Recitation => "🦜",
            IssueSymbol::Filtered => "🛡️",
        }
    }
}

/// Generation statistics. `input_tokens == -1` means the vendor did not report it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_rate: Option<f64>,
}

/// Metadata update carried by a `set` op.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<DispatchStats>,
}

/// A normalized, vendor-agnostic unit produced by a parser.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOp {
    Text(String),
    Issue {
        message: String,
        symbol: IssueSymbol,
    },
    Set(DispatchSet),
    Close,
}

impl DispatchOp {
    pub fn text(text: impl Into<String>) -> Self {
        DispatchOp::Text(text.into())
    }

    pub fn issue(message: impl Into<String>, symbol: IssueSymbol) -> Self {
        DispatchOp::Issue {
            message: message.into(),
            symbol,
        }
    }

    pub fn model(model: impl Into<String>) -> Self {
        DispatchOp::Set(DispatchSet {
            model: Some(model.into()),
            stats: None,
        })
    }

    #[must_use]
    pub fn stats(stats: DispatchStats) -> Self {
        DispatchOp::Set(DispatchSet {
            model: None,
            stats: Some(stats),
        })
    }

    #[must_use]
    pub fn is_close(&self) -> bool {
        matches!(self, DispatchOp::Close)
    }
}

/// Round to two decimal places.
#[inline]
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Output tokens per second, `None` when no time has elapsed.
#[inline]
#[must_use]
pub fn output_rate(tokens: u64, elapsed_secs: f64) -> Option<f64> {
    if elapsed_secs > 0.0 && elapsed_secs.is_finite() {
        #[allow(clippy::cast_precision_loss)]
        Some(round2(tokens as f64 / elapsed_secs))
    } else {
        None
    }
}
