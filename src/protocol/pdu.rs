//! Modbus PDU decoding and encoding, shared between the TCP and RTU sides
//! since the PDU (function code + payload) is byte-identical in both
//! framings. Only MBAP and the RTU address/CRC wrapper differ.

use crate::error::{GatewayError, Result};
use crate::types::Kind;

pub const MAX_READ_REGISTERS: u16 = 125;
pub const MAX_READ_COILS: u16 = 2000;
pub const MAX_WRITE_REGISTERS: u16 = 123;
pub const MAX_WRITE_COILS: u16 = 1968;

/// Normalized write payload extracted from a decoded PDU, used as the
/// dedup cache's comparison value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteValues {
    Single(u16),
    Multi(Vec<u16>),
}

/// A request decoded from a Modbus PDU (TCP or RTU), independent of which
/// framing it arrived in.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub function_code: u8,
    pub address: u16,
    pub count: u16,
    pub kind: Kind,
    pub write_values: Option<WriteValues>,
    /// The exact bytes this PDU arrived as; forwarded verbatim to the RTU
    /// bus on a cache miss since the wire encoding does not change.
    pub raw_pdu: Vec<u8>,
}

/// Decodes a PDU for one of the eight supported function codes. Rejects
/// anything else as `IllegalFunction`, and rejects out-of-range counts or
/// malformed payloads as `IllegalDataValue`.
pub fn decode_pdu(pdu: &[u8]) -> Result<ParsedRequest> {
    if pdu.is_empty() {
        return Err(GatewayError::IllegalDataValue {
            reason: "empty pdu".into(),
        });
    }
    let function_code = pdu[0];
    let kind = Kind::from_function_code(function_code)
        .ok_or(GatewayError::IllegalFunction { function_code })?;

    let request = match function_code {
        1 | 2 | 3 | 4 => decode_read(function_code, kind, pdu)?,
        5 => decode_write_single_coil(pdu)?,
        6 => decode_write_single_register(pdu)?,
        15 => decode_write_multiple_coils(pdu)?,
        16 => decode_write_multiple_registers(pdu)?,
        _ => unreachable!("function code already validated by Kind::from_function_code"),
    };
    Ok(request)
}

fn need(pdu: &[u8], len: usize) -> Result<()> {
    if pdu.len() < len {
        Err(GatewayError::IllegalDataValue {
            reason: format!("pdu too short: need {len}, have {}", pdu.len()),
        })
    } else {
        Ok(())
    }
}

fn decode_read(function_code: u8, kind: Kind, pdu: &[u8]) -> Result<ParsedRequest> {
    need(pdu, 5)?;
    let address = u16::from_be_bytes([pdu[1], pdu[2]]);
    let count = u16::from_be_bytes([pdu[3], pdu[4]]);

    let max = match kind {
        Kind::Coil => MAX_READ_COILS,
        Kind::Register => MAX_READ_REGISTERS,
    };
    if count == 0 || count > max {
        return Err(GatewayError::IllegalDataValue {
            reason: format!("read count {count} out of range (1..={max})"),
        });
    }

    Ok(ParsedRequest {
        function_code,
        address,
        count,
        kind,
        write_values: None,
        raw_pdu: pdu.to_vec(),
    })
}

fn decode_write_single_coil(pdu: &[u8]) -> Result<ParsedRequest> {
    need(pdu, 5)?;
    let address = u16::from_be_bytes([pdu[1], pdu[2]]);
    let raw_value = u16::from_be_bytes([pdu[3], pdu[4]]);
    let normalized = match raw_value {
        0xFF00 => 1u16,
        0x0000 => 0u16,
        other => {
            return Err(GatewayError::IllegalDataValue {
                reason: format!("invalid coil value {other:#06x}, expected 0xFF00 or 0x0000"),
            })
        }
    };

    Ok(ParsedRequest {
        function_code: 5,
        address,
        count: 1,
        kind: Kind::Coil,
        write_values: Some(WriteValues::Single(normalized)),
        raw_pdu: pdu.to_vec(),
    })
}

fn decode_write_single_register(pdu: &[u8]) -> Result<ParsedRequest> {
    need(pdu, 5)?;
    let address = u16::from_be_bytes([pdu[1], pdu[2]]);
    let value = u16::from_be_bytes([pdu[3], pdu[4]]);

    Ok(ParsedRequest {
        function_code: 6,
        address,
        count: 1,
        kind: Kind::Register,
        write_values: Some(WriteValues::Single(value)),
        raw_pdu: pdu.to_vec(),
    })
}

fn decode_write_multiple_coils(pdu: &[u8]) -> Result<ParsedRequest> {
    need(pdu, 6)?;
    let address = u16::from_be_bytes([pdu[1], pdu[2]]);
    let count = u16::from_be_bytes([pdu[3], pdu[4]]);
    let byte_count = pdu[5] as usize;

    if count == 0 || count > MAX_WRITE_COILS {
        return Err(GatewayError::IllegalDataValue {
            reason: format!("write count {count} out of range (1..={MAX_WRITE_COILS})"),
        });
    }
    let expected_bytes = (count as usize + 7) / 8;
    if byte_count != expected_bytes {
        return Err(GatewayError::IllegalDataValue {
            reason: format!("byte count {byte_count} does not match quantity {count}"),
        });
    }
    need(pdu, 6 + byte_count)?;
    let data = &pdu[6..6 + byte_count];

    let mut values = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let byte = data[i / 8];
        let bit = (byte >> (i % 8)) & 0x01;
        values.push(bit as u16);
    }

    Ok(ParsedRequest {
        function_code: 15,
        address,
        count,
        kind: Kind::Coil,
        write_values: Some(WriteValues::Multi(values)),
        raw_pdu: pdu.to_vec(),
    })
}

fn decode_write_multiple_registers(pdu: &[u8]) -> Result<ParsedRequest> {
    need(pdu, 6)?;
    let address = u16::from_be_bytes([pdu[1], pdu[2]]);
    let count = u16::from_be_bytes([pdu[3], pdu[4]]);
    let byte_count = pdu[5] as usize;

    if count == 0 || count > MAX_WRITE_REGISTERS {
        return Err(GatewayError::IllegalDataValue {
            reason: format!("write count {count} out of range (1..={MAX_WRITE_REGISTERS})"),
        });
    }
    if byte_count != count as usize * 2 {
        return Err(GatewayError::IllegalDataValue {
            reason: format!("byte count {byte_count} does not match quantity {count}"),
        });
    }
    need(pdu, 6 + byte_count)?;
    let data = &pdu[6..6 + byte_count];

    let values = data
        .chunks_exact(2)
        .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
        .collect();

    Ok(ParsedRequest {
        function_code: 16,
        address,
        count,
        kind: Kind::Register,
        write_values: Some(WriteValues::Multi(values)),
        raw_pdu: pdu.to_vec(),
    })
}

/// The response PDU a write request would get without ever touching the
/// bus: for FC5/6 the response is byte-identical to the request; for
/// FC15/16 it is the first five bytes (function, address, quantity).
/// Used both by the dedup cache to synthesize a skip response and, after a
/// real bus round trip, as the shape the RTU device's own reply should
/// take (validated, not synthesized).
pub fn synthesize_write_echo(request: &ParsedRequest) -> Vec<u8> {
    match request.function_code {
        5 | 6 => request.raw_pdu.clone(),
        15 | 16 => request.raw_pdu[0..5].to_vec(),
        other => unreachable!("synthesize_write_echo called for non-write function {other}"),
    }
}

/// Builds an exception PDU: original function code with the high bit set,
/// followed by the exception code.
pub fn encode_exception(function_code: u8, exception_code: u8) -> Vec<u8> {
    vec![function_code | 0x80, exception_code]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_read_holding_registers() {
        let pdu = [0x03, 0x00, 0x14, 0x00, 0x01];
        let req = decode_pdu(&pdu).unwrap();
        assert_eq!(req.function_code, 3);
        assert_eq!(req.address, 20);
        assert_eq!(req.count, 1);
        assert_eq!(req.kind, Kind::Register);
    }

    #[test]
    fn rejects_read_count_above_max() {
        let pdu = [0x03, 0x00, 0x00, 0x00, 126];
        assert!(decode_pdu(&pdu).is_err());
    }

    #[test]
    fn decodes_write_single_coil_scenario_one() {
        let pdu = [0x05, 0x03, 0xE9, 0xFF, 0x00];
        let req = decode_pdu(&pdu).unwrap();
        assert_eq!(req.address, 1001);
        assert_eq!(req.write_values, Some(WriteValues::Single(1)));
    }

    #[test]
    fn rejects_invalid_coil_value() {
        let pdu = [0x05, 0x03, 0xE9, 0x12, 0x34];
        assert!(decode_pdu(&pdu).is_err());
    }

    #[test]
    fn decodes_write_multiple_coils_scenario_six() {
        // unit 0 broadcast FC15 addr=1001 values=[1,1,1,1,1,1,1,1]
        let pdu = [0x0F, 0x03, 0xE9, 0x00, 0x08, 0x01, 0xFF];
        let req = decode_pdu(&pdu).unwrap();
        assert_eq!(req.count, 8);
        assert_eq!(
            req.write_values,
            Some(WriteValues::Multi(vec![1, 1, 1, 1, 1, 1, 1, 1]))
        );
    }

    #[test]
    fn synthesized_echo_for_single_write_is_identical_pdu() {
        let pdu = [0x05, 0x03, 0xE9, 0xFF, 0x00];
        let req = decode_pdu(&pdu).unwrap();
        assert_eq!(synthesize_write_echo(&req), pdu.to_vec());
    }

    #[test]
    fn synthesized_echo_for_multi_write_drops_data_bytes() {
        let pdu = [0x0F, 0x03, 0xE9, 0x00, 0x08, 0x01, 0xFF];
        let req = decode_pdu(&pdu).unwrap();
        assert_eq!(
            synthesize_write_echo(&req),
            vec![0x0F, 0x03, 0xE9, 0x00, 0x08]
        );
    }

    #[test]
    fn unsupported_function_code_is_invalid_request() {
        let pdu = [0x07];
        assert!(decode_pdu(&pdu).is_err());
    }
}
