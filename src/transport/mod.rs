//! RTU transport abstraction.
//!
//! The serialization engine talks to the bus through this trait rather
//! than the concrete `SerialStream` type so it can be exercised in tests
//! against an in-memory fake without a real RS-485 adapter attached.

mod serial;

pub use serial::{SerialTransport, SerialTransportConfig};

use async_trait::async_trait;

use crate::error::Result;
use crate::types::SessionState;

/// One RTU transaction at a time. `transact` returns the response PDU
/// (function code + data, with the unit-id byte and CRC already stripped
/// and verified) for a normal unit, or `None` for a broadcast write that
/// received no reply.
#[async_trait]
pub trait RtuTransport: Send {
    async fn ensure_open(&mut self) -> Result<()>;
    async fn transact(&mut self, unit_id: u8, pdu: &[u8]) -> Result<Option<Vec<u8>>>;
    fn state(&self) -> SessionState;
}
