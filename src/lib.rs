//! A Modbus TCP-to-RTU protocol gateway.
//!
//! Accepts many concurrent Modbus TCP client connections and multiplexes
//! their requests onto a single half-duplex RS-485 serial bus running
//! Modbus RTU, preserving Modbus request/response semantics end-to-end.
//!
//! The gateway is built from four cooperating components, composed by
//! [`gateway::Gateway`]:
//!
//! - [`transport`]: owns the RTU serial port and performs one transaction
//!   at a time.
//! - [`engine`]: the single FIFO work queue that guarantees no two
//!   transactions are ever in flight on the bus simultaneously.
//! - [`dedup`]: short-circuits redundant repeat writes within a TTL.
//! - [`frontend`]: terminates Modbus TCP, decodes/encodes MBAP+PDU
//!   frames, and bridges them to the engine.
//!
//! It does not interpret register semantics (no scaling, no alarms, no
//! per-tag polling) and does not persist state across restarts.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use modbus_gateway::{config, Gateway, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = config::load()?;
//!     let gateway = Gateway::start(config).await?;
//!     tokio::signal::ctrl_c().await.map_err(modbus_gateway::GatewayError::Io)?;
//!     gateway.shutdown();
//!     gateway.wait().await?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod frontend;
pub mod gateway;
pub mod protocol;
pub mod request;
pub mod transport;
pub mod types;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use gateway::Gateway;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
