//! The unit of work that flows from a TCP connection, through the dedup
//! cache, into the serialization engine, and back out as a response PDU.

use tokio::sync::oneshot;

use crate::error::GatewayError;
use crate::protocol::ParsedRequest;
use crate::types::timestamp_ns;

/// Monotonically increasing marks captured as a request moves through the
/// pipeline. Used only for logging/observability, never for correctness.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestTimestamps {
    pub enqueued_ns: u64,
    pub dequeued_ns: Option<u64>,
    pub wire_out_ns: Option<u64>,
    pub wire_in_ns: Option<u64>,
    pub completed_ns: Option<u64>,
}

impl RequestTimestamps {
    pub fn new_enqueued() -> Self {
        Self {
            enqueued_ns: timestamp_ns(),
            ..Default::default()
        }
    }
}

/// The outcome delivered through a request's completion slot: the response
/// PDU bytes (function code + payload, no framing) on success.
pub type ResponseOutcome = Result<Vec<u8>, GatewayError>;

/// A single decoded Modbus operation in flight. Exactly one component ever
/// signals `completion`, and it does so exactly once.
pub struct Request {
    pub unit_id: u8,
    pub parsed: ParsedRequest,
    pub completion: oneshot::Sender<ResponseOutcome>,
    pub timestamps: RequestTimestamps,
}

impl Request {
    pub fn new(unit_id: u8, parsed: ParsedRequest, completion: oneshot::Sender<ResponseOutcome>) -> Self {
        Self {
            unit_id,
            parsed,
            completion,
            timestamps: RequestTimestamps::new_enqueued(),
        }
    }

    /// Marks the moment the worker pulled this request off the queue.
    pub fn mark_dequeued(&mut self) {
        self.timestamps.dequeued_ns = Some(timestamp_ns());
    }

    /// Signals completion with `outcome`. A failure here means the
    /// receiver was already dropped (the TCP handler abandoned its wait,
    /// e.g. after a client-side timeout or disconnect) and is logged at
    /// debug level by the caller, not treated as an error.
    pub fn complete(mut self, outcome: ResponseOutcome) -> Result<(), ResponseOutcome> {
        self.timestamps.completed_ns = Some(timestamp_ns());
        self.completion.send(outcome)
    }
}
