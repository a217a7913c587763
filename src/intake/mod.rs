//! Intake: sequences parser ops into the client-visible protocol.

pub mod pipeline;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::error::{DispatchError, IssueId};
use crate::protocol::{Dialect, DispatchOp, DispatchSet};

/// One event of the downstream protocol, serialized as a single JSON object.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// `{"type":"start"}`
    Start,
    /// `{"t": text}`
    Text(String),
    /// `{"set": {model?, stats?}}`
    Set(DispatchSet),
    /// `{"type":"done"}`
    Done,
    /// `{"issueId": id, "issueText": text}`, only for failures outside parsing.
    Issue { id: IssueId, text: String },
}

impl ProtocolEvent {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProtocolEvent::Done | ProtocolEvent::Issue { .. })
    }
}

impl Serialize for ProtocolEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if matches!(self, ProtocolEvent::Issue { .. }) { 2 } else { 1 };
        let mut map = serializer.serialize_map(Some(len))?;
        match self {
            ProtocolEvent::Start => map.serialize_entry("type", "start")?,
            ProtocolEvent::Text(text) => map.serialize_entry("t", text)?,
            ProtocolEvent::Set(set) => map.serialize_entry("set", set)?,
            ProtocolEvent::Done => map.serialize_entry("type", "done")?,
            ProtocolEvent::Issue { id, text } => {
                map.serialize_entry("issueId", id)?;
                map.serialize_entry("issueText", text)?;
            }
        }
        map.end()
    }
}

/// Why a connection produced its terminal event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The parser yielded `close`.
    ParserDone,
    /// The upstream body ended before the parser closed.
    UpstreamEnd,
}

impl TerminationReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TerminationReason::ParserDone => "parser-done",
            TerminationReason::UpstreamEnd => "upstream-end",
        }
    }
}

/// Per-connection protocol encoder.
///
/// Guarantees a single leading `start` and a single terminal event (`done`
/// or an issue). Anything yielded after termination is dropped.
#[derive(Debug)]
pub struct IntakeEncoder {
    dialect: Dialect,
    started: bool,
    terminated: bool,
}

impl IntakeEncoder {
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            started: false,
            terminated: false,
        }
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn yield_start(&mut self, out: &mut Vec<ProtocolEvent>) {
        if self.started || self.terminated {
            tracing::debug!("start marker already emitted or connection terminated");
            return;
        }
        self.started = true;
        out.push(ProtocolEvent::Start);
    }

    /// Translate parser ops. `Close` terminates the connection; ops after it
    /// are dropped.
    pub fn yield_ops(
        &mut self,
        ops: impl IntoIterator<Item = DispatchOp>,
        out: &mut Vec<ProtocolEvent>,
    ) {
        for op in ops {
            if self.terminated {
                tracing::warn!(dialect = %self.dialect, ?op, "dropping op after termination");
                continue;
            }
            match op {
                DispatchOp::Text(text) => out.push(ProtocolEvent::Text(text)),
                DispatchOp::Issue { message, symbol } => out.push(ProtocolEvent::Text(format!(
                    " {} [{} Issue]: {message}",
                    symbol.as_str(),
                    self.dialect.pretty_name()
                ))),
                DispatchOp::Set(set) => out.push(ProtocolEvent::Set(set)),
                DispatchOp::Close => self.yield_termination(TerminationReason::ParserDone, out),
            }
        }
    }

    /// Emit `done` once; later calls are no-ops.
    pub fn yield_termination(&mut self, reason: TerminationReason, out: &mut Vec<ProtocolEvent>) {
        if self.terminated {
            tracing::debug!(reason = reason.as_str(), "termination already emitted");
            return;
        }
        self.terminated = true;
        tracing::info!(dialect = %self.dialect, reason = reason.as_str(), "connection terminated");
        out.push(ProtocolEvent::Done);
    }

    /// Report a failure outside op translation (prepare, fetch, read, parse).
    pub fn yield_error(&mut self, id: IssueId, text: impl Into<String>, out: &mut Vec<ProtocolEvent>) {
        let text = text.into();
        if self.terminated {
            tracing::warn!(issue_id = %id, text = %text, "dropping error after termination");
            return;
        }
        self.terminated = true;
        tracing::error!(dialect = %self.dialect, issue_id = %id, text = %text, "connection failed");
        out.push(ProtocolEvent::Issue { id, text });
    }

    pub fn yield_dispatch_error(&mut self, err: &DispatchError, out: &mut Vec<ProtocolEvent>) {
        self.yield_error(err.issue_id(), err.to_string(), out);
    }
}
