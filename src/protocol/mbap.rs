//! MBAP (Modbus Application Protocol) header framing for the TCP side.

use crate::error::{GatewayError, Result};

pub const MBAP_HEADER_LEN: usize = 7;

/// A decoded MBAP header plus the PDU bytes that followed it.
#[derive(Debug, Clone)]
pub struct MbapFrame<'a> {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub pdu: &'a [u8],
}

/// Parses a 7-byte MBAP header plus trailing PDU out of `data`. Returns the
/// number of bytes the caller should have buffered (header + PDU) alongside
/// the decoded frame, or `None` if `data` does not yet contain a complete
/// frame (caller should read more).
pub fn try_parse_mbap(data: &[u8]) -> Result<Option<(MbapFrame<'_>, usize)>> {
    if data.len() < MBAP_HEADER_LEN {
        return Ok(None);
    }
    let transaction_id = u16::from_be_bytes([data[0], data[1]]);
    let protocol_id = u16::from_be_bytes([data[2], data[3]]);
    let length = u16::from_be_bytes([data[4], data[5]]) as usize;
    let unit_id = data[6];

    if protocol_id != 0 {
        return Err(GatewayError::InvalidRequest {
            reason: format!("non-zero protocol id {protocol_id}"),
        });
    }
    if length == 0 {
        return Err(GatewayError::InvalidRequest {
            reason: "mbap length field is zero".into(),
        });
    }

    let pdu_len = length - 1; // length includes the unit_id byte
    let total = MBAP_HEADER_LEN + pdu_len;
    if data.len() < total {
        return Ok(None);
    }

    Ok(Some((
        MbapFrame {
            transaction_id,
            unit_id,
            pdu: &data[MBAP_HEADER_LEN..total],
        },
        total,
    )))
}

/// Builds an MBAP header for a response carrying `pdu_len` bytes of PDU.
pub fn build_mbap(transaction_id: u16, unit_id: u8, pdu_len: usize) -> [u8; MBAP_HEADER_LEN] {
    let length = (pdu_len + 1) as u16;
    let tid = transaction_id.to_be_bytes();
    let len = length.to_be_bytes();
    [tid[0], tid[1], 0x00, 0x00, len[0], len[1], unit_id]
}

/// Wraps a PDU with its MBAP header into a single response buffer.
pub fn encode_response(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    out.extend_from_slice(&build_mbap(transaction_id, unit_id, pdu.len()));
    out.extend_from_slice(pdu);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_frame() {
        let mut data = vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x11];
        data.extend_from_slice(&[0x03, 0x00, 0x14, 0x00, 0x01]);
        let (frame, consumed) = try_parse_mbap(&data).unwrap().unwrap();
        assert_eq!(frame.transaction_id, 1);
        assert_eq!(frame.unit_id, 0x11);
        assert_eq!(frame.pdu, &[0x03, 0x00, 0x14, 0x00, 0x01]);
        assert_eq!(consumed, data.len());
    }

    #[test]
    fn reports_incomplete_frame() {
        let data = vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x11, 0x03];
        assert!(try_parse_mbap(&data).unwrap().is_none());
    }

    #[test]
    fn rejects_nonzero_protocol_id() {
        let data = vec![0x00, 0x01, 0x00, 0x01, 0x00, 0x02, 0x11, 0x03];
        assert!(try_parse_mbap(&data).is_err());
    }

    #[test]
    fn build_mbap_round_trips_through_encode_response() {
        let pdu = [0x03, 0x02, 0x00, 0x0A];
        let encoded = encode_response(42, 0x11, &pdu);
        let (frame, _) = try_parse_mbap(&encoded).unwrap().unwrap();
        assert_eq!(frame.transaction_id, 42);
        assert_eq!(frame.unit_id, 0x11);
        assert_eq!(frame.pdu, &pdu);
    }
}
