//! Pull-based connection pipeline: body chunks -> demuxer -> parser -> encoder.
//!
//! The upstream body is only polled when every event produced from the
//! previous chunk has been handed downstream. Dropping the returned stream
//! drops the body, which cancels the upstream read.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use smallvec::SmallVec;
use tracing::Instrument;

use crate::dispatch::{dispatch, DispatchBundle, DispatchRequest};
use crate::error::DispatchError;
use crate::intake::{IntakeEncoder, ProtocolEvent, TerminationReason};
use crate::protocol::{
    Dialect, DispatchAccess, DispatchOp, HistoryMessage, ModelDescriptor, VendorParser,
};
use crate::stream::{DemuxedEvent, DemuxedKind, Demuxer, Utf8ChunkDecoder};

/// Upstream response body as a stream of byte chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes, DispatchError>>;

/// Executes a built [`DispatchRequest`]. Implementations own connection
/// setup, TLS and timeouts; the pipeline owns everything after the body.
pub trait UpstreamTransport: Send + Sync {
    /// Send the request and return the response body.
    ///
    /// Errors must be [`DispatchError::Fetch`]; body chunk errors must be
    /// [`DispatchError::Read`].
    fn fetch<'a>(
        &'a self,
        request: &'a DispatchRequest,
    ) -> BoxFuture<'a, Result<ByteStream, DispatchError>>;
}

/// FIFO of encoded events waiting for the consumer.
struct PendingEvents {
    events: SmallVec<[ProtocolEvent; 8]>,
    head: usize,
}

impl PendingEvents {
    fn new() -> Self {
        Self {
            events: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<ProtocolEvent> {
        if self.head >= self.events.len() {
            return None;
        }
        let event = std::mem::replace(&mut self.events[self.head], ProtocolEvent::Done);
        self.head += 1;
        if self.head == self.events.len() {
            self.events.clear();
            self.head = 0;
        }
        Some(event)
    }

    #[inline]
    fn extend_from(&mut self, produced: &mut Vec<ProtocolEvent>) {
        if produced.is_empty() {
            return;
        }
        self.events.reserve(produced.len());
        self.events.extend(produced.drain(..));
    }
}

struct IntakeState {
    body: Option<ByteStream>,
    decoder: Utf8ChunkDecoder,
    demuxer: Demuxer,
    parser: VendorParser,
    encoder: IntakeEncoder,
    pending: PendingEvents,
    frames: Vec<DemuxedEvent>,
    ops: Vec<DispatchOp>,
    produced: Vec<ProtocolEvent>,
}

impl IntakeState {
    /// Run one decoded chunk through demuxer, parser and encoder.
    fn process_text(&mut self, text: &str) {
        self.demuxer.feed_into(text, &mut self.frames);
        for frame in self.frames.drain(..) {
            if self.encoder.is_terminated() {
                break;
            }
            match frame.kind {
                DemuxedKind::ReconnectInterval => {
                    tracing::debug!(millis = %frame.data, "ignoring reconnect interval");
                    continue;
                }
                DemuxedKind::Event => {}
            }
            self.ops.clear();
            match self
                .parser
                .feed_into(&frame.data, frame.name.as_deref(), &mut self.ops)
            {
                Ok(()) => self.encoder.yield_ops(self.ops.drain(..), &mut self.produced),
                Err(err) => {
                    // ops before the failing frame were already delivered
                    tracing::debug!(frame = %frame.data, "frame rejected by parser");
                    self.encoder.yield_dispatch_error(&err, &mut self.produced);
                }
            }
        }
        self.frames.clear();
    }

    fn finish_upstream(&mut self) {
        let remainder = self.demuxer.remainder();
        if !remainder.trim().is_empty() {
            tracing::warn!(
                remainder = %remainder,
                demuxer = self.demuxer.kind().as_str(),
                "upstream ended with an incomplete frame"
            );
        }
        if self.decoder.pending_bytes() > 0 {
            tracing::warn!(
                bytes = self.decoder.pending_bytes(),
                "upstream ended inside a UTF-8 sequence"
            );
        }
        self.encoder
            .yield_termination(TerminationReason::UpstreamEnd, &mut self.produced);
    }

    fn flush_produced(&mut self) {
        self.pending.extend_from(&mut self.produced);
        if self.encoder.is_terminated() {
            // nothing is parsed after the terminal event
            self.body = None;
        }
    }
}

/// Stream protocol events for an already-fetched upstream body.
///
/// Emits `start`, then the translated ops, and exactly one terminal event.
pub fn intake_stream(bundle: DispatchBundle, body: ByteStream) -> BoxStream<'static, ProtocolEvent> {
    let DispatchBundle {
        dialect,
        demuxer,
        parser,
        ..
    } = bundle;
    let mut state = IntakeState {
        body: Some(body),
        decoder: Utf8ChunkDecoder::new(),
        demuxer: demuxer.create(),
        parser,
        encoder: IntakeEncoder::new(dialect),
        pending: PendingEvents::new(),
        frames: Vec::with_capacity(8),
        ops: Vec::with_capacity(4),
        produced: Vec::with_capacity(8),
    };
    state.encoder.yield_start(&mut state.produced);
    state.flush_produced();

    let span = tracing::info_span!("intake", dialect = %dialect);
    stream::unfold(state, move |mut state| {
        let span = span.clone();
        async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Some((event, state));
                }
                let next = match state.body.as_mut() {
                    Some(body) => body.next().await,
                    None => return None,
                };
                match next {
                    Some(Ok(chunk)) => {
                        let text = state.decoder.decode(&chunk);
                        if !text.is_empty() {
                            state.process_text(&text);
                        }
                    }
                    Some(Err(err)) => {
                        let err = match err {
                            DispatchError::Read(_) => err,
                            other => DispatchError::Read(other.to_string()),
                        };
                        state.encoder.yield_dispatch_error(&err, &mut state.produced);
                    }
                    None => {
                        state.body = None;
                        state.finish_upstream();
                    }
                }
                state.flush_produced();
            }
        }
        .instrument(span)
    })
    .boxed()
}

/// Dispatch, fetch and stream one generation request end to end.
///
/// Prepare and fetch failures produce a single issue event in place of the
/// normal sequence.
pub fn run_intake<T>(
    transport: Arc<T>,
    access: DispatchAccess,
    model: ModelDescriptor,
    history: Vec<HistoryMessage>,
) -> BoxStream<'static, ProtocolEvent>
where
    T: UpstreamTransport + ?Sized + 'static,
{
    let connection =
        tracing::info_span!("connection", dialect = %access.dialect(), model = %model.id);
    run_intake_in_span(connection, transport, access, model, history)
}

/// [`run_intake`] with a caller-provided `connection` span, so the caller can
/// attach its own fields (for example a connection id).
pub fn run_intake_in_span<T>(
    connection: tracing::Span,
    transport: Arc<T>,
    access: DispatchAccess,
    model: ModelDescriptor,
    history: Vec<HistoryMessage>,
) -> BoxStream<'static, ProtocolEvent>
where
    T: UpstreamTransport + ?Sized + 'static,
{
    let dialect = access.dialect();

    let bundle = match connection.in_scope(|| dispatch(&access, &model, &history)) {
        Ok(bundle) => bundle,
        Err(err) => return single_error(dialect, &err),
    };

    let fetched = async move {
        tracing::info!(url = %bundle.request.url(), "dispatching upstream request");
        let result = transport.fetch(&bundle.request).await;
        result.map(|body| (bundle, body))
    };

    let fetched = fetched.instrument(connection.clone());

    stream::once(fetched)
        .flat_map(move |result| {
            let _entered = connection.enter();
            match result {
                Ok((bundle, body)) => intake_stream(bundle, body),
                Err(err) => {
                    let err = match err {
                        DispatchError::Fetch(_) => err,
                        other => DispatchError::Fetch(other.to_string()),
                    };
                    single_error(dialect, &err)
                }
            }
        })
        .boxed()
}

fn single_error(dialect: Dialect, err: &DispatchError) -> BoxStream<'static, ProtocolEvent> {
    let mut encoder = IntakeEncoder::new(dialect);
    let mut out = Vec::with_capacity(1);
    encoder.yield_dispatch_error(err, &mut out);
    stream::iter(out).boxed()
}
