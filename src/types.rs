//! Shared value types used across the protocol, dedup and engine layers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Which addressable data kind a register address refers to. Coils and
/// holding/input registers occupy independent address spaces, so the same
/// numeric address means different things depending on kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Coil,
    Register,
}

impl Kind {
    /// Derives the addressed kind from a Modbus function code.
    pub fn from_function_code(fc: u8) -> Option<Self> {
        match fc {
            1 | 2 | 5 | 15 => Some(Kind::Coil),
            3 | 4 | 6 | 16 => Some(Kind::Register),
            _ => None,
        }
    }
}

/// Lifecycle state of the RTU serial session:
/// `Closed -> Connecting -> Open <-> Degraded -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Connecting,
    Open,
    Degraded,
}

/// Parity setting for the RTU serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialParity {
    None,
    Even,
    Odd,
}

impl std::str::FromStr for SerialParity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "N" | "NONE" => Ok(SerialParity::None),
            "E" | "EVEN" => Ok(SerialParity::Even),
            "O" | "ODD" => Ok(SerialParity::Odd),
            other => Err(format!("invalid serial parity: {other}")),
        }
    }
}

/// Current monotonic-ish wall clock in nanoseconds, used only for
/// observability timestamps on a `Request` — never for correctness
/// decisions (those go through the injectable `Clock` abstraction).
pub fn timestamp_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
