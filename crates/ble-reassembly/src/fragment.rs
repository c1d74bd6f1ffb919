//! Fragment header parsing.
//!
//! Each BLE advertisement carries one fragment of a larger logical message in
//! its manufacturer-specific data. This module turns those raw bytes into a
//! typed [`FragmentHeader`] and rejects anything that is not ours.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Wire layout
//
// All multi-byte fields are little-endian.
//
//   Bytes   0 ..  1 = company id      (u16, must be COMPANY_ID)
//   Byte    2       = protocol id     (u8,  must be PROTOCOL_ID)
//   Byte    3       = message type    (u8,  selects the payload decoder)
//   Bytes   4 ..  9 = opaque          (sender MAC on current firmware, ignored)
//   Bytes  10 .. 11 = stream id       (u16)
//   Byte   12       = total fragments (u8)
//   Byte   13       = sequence        (u8, 0-based, < total fragments)
//   Bytes  14 .. 15 = declared length (u16, total reassembled payload length)
//   Bytes  16 ..    = payload slice
// ---------------------------------------------------------------------------

pub const COMPANY_ID: u16 = 0xFFE5;
pub const PROTOCOL_ID: u8 = 0xAA;

pub const HEADER_LEN: usize = 16;

const COMPANY_OFF: usize = 0;
const PROTOCOL_OFF: usize = 2;
const TYPE_OFF: usize = 3;
const STREAM_OFF: usize = 10;
const TOTAL_OFF: usize = 12;
const SEQUENCE_OFF: usize = 13;
const LENGTH_OFF: usize = 14;

/// Message type tags carried in byte 3.
pub mod message_type {
    /// Single-packet sensor data.
    pub const LEGACY: u8 = 0x01;
    /// Multi-packet opaque binary stream.
    pub const BINARY: u8 = 0x02;
    /// Multi-packet UTF-8 JSON document.
    pub const JSON: u8 = 0x03;
    /// Raw capacitive touch samples.
    pub const CAPTOUCH: u8 = 0xDD;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FragmentError {
    #[error("fragment too short: {len} bytes (header is {HEADER_LEN})")]
    TooShort { len: usize },

    #[error("unknown company id 0x{0:04X}")]
    UnknownCompany(u16),

    #[error("unknown protocol id 0x{0:02X}")]
    UnknownProtocol(u8),

    #[error("invalid sequence {sequence} >= total {total}")]
    InvalidSequence { sequence: u8, total: u8 },

    #[error("invalid manufacturer data hex: {0}")]
    InvalidHex(String),
}

/// One parsed fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentHeader {
    pub company_id: u16,
    pub protocol_id: u8,
    pub message_type: u8,
    pub stream_id: u16,
    pub total_fragments: u8,
    pub sequence: u8,
    pub declared_length: u16,
    pub payload: Vec<u8>,
}

impl FragmentHeader {
    /// Parse a raw fragment. Pure function of its input.
    pub fn parse(bytes: &[u8]) -> Result<Self, FragmentError> {
        if bytes.len() < HEADER_LEN {
            return Err(FragmentError::TooShort { len: bytes.len() });
        }

        let company_id = u16::from_le_bytes([bytes[COMPANY_OFF], bytes[COMPANY_OFF + 1]]);
        if company_id != COMPANY_ID {
            return Err(FragmentError::UnknownCompany(company_id));
        }

        let protocol_id = bytes[PROTOCOL_OFF];
        if protocol_id != PROTOCOL_ID {
            return Err(FragmentError::UnknownProtocol(protocol_id));
        }

        let total_fragments = bytes[TOTAL_OFF];
        let sequence = bytes[SEQUENCE_OFF];
        if sequence >= total_fragments {
            return Err(FragmentError::InvalidSequence { sequence, total: total_fragments });
        }

        Ok(Self {
            company_id,
            protocol_id,
            message_type: bytes[TYPE_OFF],
            stream_id: u16::from_le_bytes([bytes[STREAM_OFF], bytes[STREAM_OFF + 1]]),
            total_fragments,
            sequence,
            declared_length: u16::from_le_bytes([bytes[LENGTH_OFF], bytes[LENGTH_OFF + 1]]),
            payload: bytes[HEADER_LEN..].to_vec(),
        })
    }

    /// Build a fragment for this protocol. The opaque region is zeroed.
    pub fn new(
        message_type: u8,
        stream_id: u16,
        total_fragments: u8,
        sequence: u8,
        declared_length: u16,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            company_id: COMPANY_ID,
            protocol_id: PROTOCOL_ID,
            message_type,
            stream_id,
            total_fragments,
            sequence,
            declared_length,
            payload,
        }
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[COMPANY_OFF..COMPANY_OFF + 2].copy_from_slice(&self.company_id.to_le_bytes());
        buf[PROTOCOL_OFF] = self.protocol_id;
        buf[TYPE_OFF] = self.message_type;
        buf[STREAM_OFF..STREAM_OFF + 2].copy_from_slice(&self.stream_id.to_le_bytes());
        buf[TOTAL_OFF] = self.total_fragments;
        buf[SEQUENCE_OFF] = self.sequence;
        buf[LENGTH_OFF..LENGTH_OFF + 2].copy_from_slice(&self.declared_length.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// Convert manufacturer data as reported by scanners ("0xE5FF AA:DD ...") to bytes.
///
/// Every `0x` marker, space and colon is stripped before hex decoding.
pub fn normalize_manufacturer_data(text: &str) -> Result<Vec<u8>, FragmentError> {
    let cleaned: String = text
        .replace("0x", "")
        .chars()
        .filter(|c| *c != ' ' && *c != ':')
        .collect();

    if let Some(bad) = cleaned.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(FragmentError::InvalidHex(format!("unexpected character {:?}", bad)));
    }
    if cleaned.len() % 2 != 0 {
        return Err(FragmentError::InvalidHex(format!(
            "odd number of hex digits ({})",
            cleaned.len()
        )));
    }

    (0..cleaned.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&cleaned[i..i + 2], 16)
                .map_err(|_| FragmentError::InvalidHex(format!("bad digit pair at {}", i)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference captouch packet in the 16-byte header layout: stream 1,
    // fragment 0 of 14, 168-byte payload, first six samples.
    const FIRST_FRAGMENT: [u8; 28] = [
        0xE5, 0xFF, 0xAA, 0xDD, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x0E, 0x00,
        0xA8, 0x00, 0x05, 0x91, 0x05, 0x90, 0x05, 0x93, 0x05, 0x91, 0x05, 0x94, 0x05, 0x90,
    ];

    #[test]
    fn test_parse_reference_fragment() {
        let h = FragmentHeader::parse(&FIRST_FRAGMENT).expect("should parse");
        assert_eq!(h.company_id, COMPANY_ID);
        assert_eq!(h.protocol_id, PROTOCOL_ID);
        assert_eq!(h.message_type, message_type::CAPTOUCH);
        assert_eq!(h.stream_id, 1);
        assert_eq!(h.total_fragments, 14);
        assert_eq!(h.sequence, 0);
        assert_eq!(h.declared_length, 168);
        assert_eq!(h.payload.len(), 12);
        assert_eq!(&h.payload[..2], &[0x05, 0x91]);
    }

    #[test]
    fn test_opaque_bytes_ignored() {
        let mut bytes = FIRST_FRAGMENT;
        bytes[4..10].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        let h = FragmentHeader::parse(&bytes).unwrap();
        assert_eq!(h, FragmentHeader::parse(&FIRST_FRAGMENT).unwrap());
    }

    #[test]
    fn test_header_only_has_empty_payload() {
        let h = FragmentHeader::parse(&FIRST_FRAGMENT[..HEADER_LEN]).unwrap();
        assert!(h.payload.is_empty());
    }

    #[test]
    fn test_too_short() {
        assert_eq!(
            FragmentHeader::parse(&[0u8; 9]),
            Err(FragmentError::TooShort { len: 9 })
        );
        assert_eq!(
            FragmentHeader::parse(&FIRST_FRAGMENT[..15]),
            Err(FragmentError::TooShort { len: 15 })
        );
    }

    #[test]
    fn test_wrong_company_rejected() {
        let mut bytes = FIRST_FRAGMENT;
        bytes[0] = 0x4C;
        bytes[1] = 0x00;
        assert_eq!(
            FragmentHeader::parse(&bytes),
            Err(FragmentError::UnknownCompany(0x004C))
        );
    }

    #[test]
    fn test_wrong_protocol_rejected() {
        let mut bytes = FIRST_FRAGMENT;
        bytes[2] = 0xAB;
        assert_eq!(FragmentHeader::parse(&bytes), Err(FragmentError::UnknownProtocol(0xAB)));
    }

    #[test]
    fn test_sequence_out_of_range_rejected() {
        let mut bytes = FIRST_FRAGMENT;
        bytes[13] = 14;
        assert_eq!(
            FragmentHeader::parse(&bytes),
            Err(FragmentError::InvalidSequence { sequence: 14, total: 14 })
        );

        // total_fragments == 0 can never hold a valid sequence
        let mut bytes = FIRST_FRAGMENT;
        bytes[12] = 0;
        assert!(matches!(
            FragmentHeader::parse(&bytes),
            Err(FragmentError::InvalidSequence { .. })
        ));
    }

    #[test]
    fn test_encode_matches_capture() {
        let h = FragmentHeader::new(
            message_type::CAPTOUCH,
            1,
            14,
            0,
            168,
            FIRST_FRAGMENT[HEADER_LEN..].to_vec(),
        );
        assert_eq!(h.encode(), FIRST_FRAGMENT.to_vec());
    }

    #[test]
    fn test_normalize_manufacturer_data() {
        assert_eq!(
            normalize_manufacturer_data("0xE5 0xFF AA:DD").unwrap(),
            vec![0xE5, 0xFF, 0xAA, 0xDD]
        );
        assert_eq!(normalize_manufacturer_data("e5ffaadd").unwrap(), vec![0xE5, 0xFF, 0xAA, 0xDD]);
        assert_eq!(normalize_manufacturer_data("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_normalize_rejects_bad_hex() {
        assert!(matches!(
            normalize_manufacturer_data("E5F"),
            Err(FragmentError::InvalidHex(_))
        ));
        assert!(matches!(
            normalize_manufacturer_data("ZZ"),
            Err(FragmentError::InvalidHex(_))
        ));
    }
}
