//! Wire protocol handling: CRC, MBAP framing, and PDU decode/encode shared
//! between the TCP and RTU sides.

pub mod crc;
pub mod mbap;
pub mod pdu;

pub use crc::{append_crc, crc16, verify_and_strip_crc};
pub use mbap::{build_mbap, encode_response, try_parse_mbap, MbapFrame, MBAP_HEADER_LEN};
pub use pdu::{decode_pdu, encode_exception, synthesize_write_echo, ParsedRequest, WriteValues};
