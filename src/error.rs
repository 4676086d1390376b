//! Gateway error taxonomy.
//!
//! Mirrors the grouped, numbered error-family convention used for protocol
//! gateways elsewhere in this codebase: each variant maps to a stable
//! `error_code()` and carries enough context to decide whether it is
//! recoverable and which Modbus exception (if any) it should surface as.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Error, Debug)]
pub enum GatewayError {
    // --- Protocol errors (1xx) ---
    #[error("device returned modbus exception {exception_code:#04x} for function {function_code:#04x}")]
    ModbusException {
        function_code: u8,
        exception_code: u8,
    },

    #[error("unsupported function code {function_code:#04x}")]
    IllegalFunction { function_code: u8 },

    #[error("illegal data value: {reason}")]
    IllegalDataValue { reason: String },

    #[error("malformed request: {reason}")]
    InvalidRequest { reason: String },

    // --- RTU transport errors (2xx) ---
    #[error("rtu i/o error on unit {unit_id}: {reason}")]
    RtuIoError { unit_id: u8, reason: String },

    #[error("rtu crc mismatch: expected {expected:#06x}, got {actual:#06x}")]
    CrcError { expected: u16, actual: u16 },

    #[error("rtu session unavailable: {reason}")]
    RtuUnavailable { reason: String },

    // --- Engine errors (3xx) ---
    #[error("engine queue full (bound {bound})")]
    Backpressure { bound: usize },

    #[error("gateway timeout after {deadline_ms}ms")]
    GatewayTimeout { deadline_ms: u64 },

    #[error("engine is shutting down")]
    ShuttingDown,

    // --- Configuration errors (4xx) ---
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // --- Internal / ambient errors (9xx) ---
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("internal channel closed")]
    ChannelClosed,
}

impl GatewayError {
    /// Stable numeric identifier for logging and metrics, grouped by family.
    pub fn error_code(&self) -> u16 {
        match self {
            GatewayError::ModbusException { .. } => 101,
            GatewayError::IllegalFunction { .. } => 102,
            GatewayError::IllegalDataValue { .. } => 103,
            GatewayError::InvalidRequest { .. } => 104,
            GatewayError::RtuIoError { .. } => 201,
            GatewayError::CrcError { .. } => 202,
            GatewayError::RtuUnavailable { .. } => 203,
            GatewayError::Backpressure { .. } => 301,
            GatewayError::GatewayTimeout { .. } => 302,
            GatewayError::ShuttingDown => 303,
            GatewayError::InvalidConfig { .. } => 401,
            GatewayError::Io(_) => 901,
            GatewayError::ChannelClosed => 902,
        }
    }

    /// Whether a retry of the same request might succeed without operator
    /// intervention (used only for logging tone, the gateway never retries
    /// on behalf of a client).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GatewayError::RtuIoError { .. }
                | GatewayError::RtuUnavailable { .. }
                | GatewayError::Backpressure { .. }
                | GatewayError::GatewayTimeout { .. }
        )
    }

    /// Whether this request was rejected before ever being scheduled
    /// (malformed or out-of-range), as opposed to failing during or after
    /// an attempted bus transaction.
    pub fn is_request_rejection(&self) -> bool {
        matches!(
            self,
            GatewayError::IllegalFunction { .. }
                | GatewayError::IllegalDataValue { .. }
                | GatewayError::InvalidRequest { .. }
        )
    }

    /// Maps this error onto the Modbus exception code that should be
    /// returned to the TCP client, per the gateway's exception-surfacing
    /// policy. Errors that are not request-scoped (e.g. `Io`) have no
    /// sensible mapping and are not expected to reach this path.
    pub fn modbus_exception_code(&self) -> u8 {
        match self {
            GatewayError::ModbusException { exception_code, .. } => *exception_code,
            GatewayError::IllegalFunction { .. } => 0x01,
            GatewayError::IllegalDataValue { .. } => 0x03,
            GatewayError::InvalidRequest { .. } => 0x03,
            GatewayError::RtuIoError { .. } => 0x0B,
            GatewayError::RtuUnavailable { .. } => 0x0A,
            GatewayError::Backpressure { .. } => 0x06,
            GatewayError::GatewayTimeout { .. } => 0x0B,
            GatewayError::ShuttingDown => 0x0B,
            GatewayError::CrcError { .. } => 0x0B,
            GatewayError::InvalidConfig { .. } | GatewayError::Io(_) | GatewayError::ChannelClosed => 0x0B,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_grouped_by_family() {
        assert_eq!(
            GatewayError::ModbusException {
                function_code: 0x03,
                exception_code: 0x02
            }
            .error_code(),
            101
        );
        assert_eq!(GatewayError::ShuttingDown.error_code(), 303);
        assert_eq!(GatewayError::ChannelClosed.error_code(), 902);
    }

    #[test]
    fn recoverable_flags_match_transport_vs_protocol() {
        assert!(GatewayError::RtuUnavailable { reason: "port closed".into() }.is_recoverable());
        assert!(!GatewayError::IllegalFunction { function_code: 0x07 }.is_recoverable());
    }

    #[test]
    fn illegal_function_and_data_value_map_to_distinct_exception_codes() {
        assert_eq!(
            GatewayError::IllegalFunction { function_code: 0x07 }.modbus_exception_code(),
            0x01
        );
        assert_eq!(
            GatewayError::IllegalDataValue { reason: "count out of range".into() }.modbus_exception_code(),
            0x03
        );
    }

    #[test]
    fn gateway_timeout_and_rtu_io_surface_as_0x0b() {
        assert_eq!(
            GatewayError::GatewayTimeout { deadline_ms: 2000 }.modbus_exception_code(),
            0x0B
        );
        assert_eq!(
            GatewayError::RtuUnavailable { reason: "no port".into() }.modbus_exception_code(),
            0x0A
        );
        assert_eq!(
            GatewayError::Backpressure { bound: 1024 }.modbus_exception_code(),
            0x06
        );
    }
}
