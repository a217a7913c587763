use serde::Serialize;

use crate::protocol::Dialect;

/// Error raised anywhere along a dispatch connection.
///
/// Each variant maps to exactly one [`IssueId`] reported to the client. A
/// connection terminates on the first error it raises.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Request preparation failed: {0}")]
    Prepare(String),
    #[error("Upstream fetch failed: {0}")]
    Fetch(String),
    #[error("Upstream read failed: {0}")]
    Read(String),
    #[error("Parsing error: {0}")]
    Parse(String),
}

/// Client-visible identifier for a fatal dispatch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IssueId {
    #[serde(rename = "dispatch-prepare")]
    DispatchPrepare,
    #[serde(rename = "dispatch-fetch")]
    DispatchFetch,
    #[serde(rename = "dispatch-read")]
    DispatchRead,
    #[serde(rename = "dispatch-parse")]
    DispatchParse,
}

impl IssueId {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            IssueId::DispatchPrepare => "dispatch-prepare",
            IssueId::DispatchFetch => "dispatch-fetch",
            IssueId::DispatchRead => "dispatch-read",
            IssueId::DispatchParse => "dispatch-parse",
        }
    }
}

impl std::fmt::Display for IssueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DispatchError {
    #[must_use]
    pub fn issue_id(&self) -> IssueId {
        match self {
            DispatchError::Prepare(_) => IssueId::DispatchPrepare,
            DispatchError::Fetch(_) => IssueId::DispatchFetch,
            DispatchError::Read(_) => IssueId::DispatchRead,
            DispatchError::Parse(_) => IssueId::DispatchParse,
        }
    }

    pub(crate) fn prepare(dialect: Dialect, message: impl std::fmt::Display) -> Self {
        DispatchError::Prepare(format!("{}: {message}", dialect.pretty_name()))
    }

    pub(crate) fn parse(dialect: Dialect, message: impl std::fmt::Display) -> Self {
        DispatchError::Parse(format!("{}: {message}", dialect.pretty_name()))
    }
}

/// Deserialize one frame payload, mapping JSON failures to a parse error.
pub(crate) fn parse_frame_json<'a, T>(dialect: Dialect, data: &'a str) -> Result<T, DispatchError>
where
    T: serde::Deserialize<'a>,
{
    serde_json::from_str(data)
        .map_err(|err| DispatchError::parse(dialect, format_args!("malformed frame ({err})")))
}
