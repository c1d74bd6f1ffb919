//! Per-stream fragment accumulation.
//!
//! One [`StreamState`] exists per `(device, stream)` while its fragments are
//! arriving. The first fragment's header fixes the stream's shape (type, fragment
//! count, declared length); later fragments only contribute payload.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

use crate::registry::DecodedPayload;

/// A fully reassembled message, delivered exactly once per stream.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedMessage {
    pub device_id: String,
    pub stream_id: u16,
    pub message_type: u8,
    /// Arrival time of the stream's first accepted fragment (ns).
    pub timestamp_ns: u64,
    #[serde(serialize_with = "serialize_hex")]
    pub data: Vec<u8>,
    pub length: usize,
    pub declared_length: u16,
    pub fragments_received: usize,
    pub fragments_expected: u8,
    /// False iff a sequence gap was found while concatenating.
    pub complete: bool,
    pub missing_sequences: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decoded: Option<DecodedPayload>,
}

fn serialize_hex<S: Serializer>(data: &[u8], s: S) -> Result<S::Ok, S::Error> {
    let hex: String = data.iter().map(|b| format!("{:02x}", b)).collect();
    s.serialize_str(&hex)
}

#[derive(Debug)]
pub struct StreamState {
    device_id: String,
    stream_id: u16,
    message_type: u8,
    total_fragments: u8,
    declared_length: u16,
    first_seen_ns: u64,
    /// Payloads keyed by sequence; ordered so assembly is a straight walk.
    fragments: BTreeMap<u8, Vec<u8>>,
}

impl StreamState {
    pub fn new(
        device_id: String,
        stream_id: u16,
        message_type: u8,
        total_fragments: u8,
        declared_length: u16,
        first_seen_ns: u64,
    ) -> Self {
        Self {
            device_id,
            stream_id,
            message_type,
            total_fragments,
            declared_length,
            first_seen_ns,
            fragments: BTreeMap::new(),
        }
    }

    /// Store the payload for `sequence`. An occupied slot is overwritten.
    pub fn add_fragment(&mut self, sequence: u8, payload: Vec<u8>) {
        if self.fragments.insert(sequence, payload).is_some() {
            tracing::warn!(
                device = %self.device_id,
                stream_id = self.stream_id,
                sequence,
                "overwriting already-received fragment"
            );
        }
    }

    pub fn is_complete(&self) -> bool {
        self.fragments.len() == self.total_fragments as usize
    }

    pub fn fragments_received(&self) -> usize {
        self.fragments.len()
    }

    pub fn bytes_received(&self) -> usize {
        self.fragments.values().map(Vec::len).sum()
    }

    pub fn total_fragments(&self) -> u8 {
        self.total_fragments
    }

    pub fn first_seen_ns(&self) -> u64 {
        self.first_seen_ns
    }

    pub fn stream_id(&self) -> u16 {
        self.stream_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Concatenate payloads for sequences `0..total_fragments`, record any gaps,
    /// and trim to the declared length. Consumes the stream.
    pub fn assemble(self) -> CompletedMessage {
        let fragments_received = self.fragments.len();
        let mut fragments = self.fragments;
        let mut data = Vec::with_capacity(self.declared_length as usize);
        let mut missing_sequences = Vec::new();

        for seq in 0..self.total_fragments {
            match fragments.remove(&seq) {
                Some(payload) => data.extend_from_slice(&payload),
                None => missing_sequences.push(seq),
            }
        }

        data.truncate(self.declared_length as usize);

        if !missing_sequences.is_empty() {
            tracing::warn!(
                device = %self.device_id,
                stream_id = self.stream_id,
                missing = ?missing_sequences,
                "stream assembled with missing fragments"
            );
        }

        CompletedMessage {
            device_id: self.device_id,
            stream_id: self.stream_id,
            message_type: self.message_type,
            timestamp_ns: self.first_seen_ns,
            length: data.len(),
            data,
            declared_length: self.declared_length,
            fragments_received,
            fragments_expected: self.total_fragments,
            complete: missing_sequences.is_empty(),
            missing_sequences,
            decoded: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(total: u8, declared: u16) -> StreamState {
        StreamState::new("dev".into(), 7, 0x02, total, declared, 1_000)
    }

    #[test]
    fn test_completion_counts_distinct_sequences() {
        let mut s = stream(3, 9);
        s.add_fragment(0, vec![1, 2, 3]);
        s.add_fragment(2, vec![7, 8, 9]);
        assert!(!s.is_complete());
        s.add_fragment(1, vec![4, 5, 6]);
        assert!(s.is_complete());
        assert_eq!(s.bytes_received(), 9);
    }

    #[test]
    fn test_assemble_orders_by_sequence() {
        let mut s = stream(3, 9);
        s.add_fragment(2, vec![7, 8, 9]);
        s.add_fragment(0, vec![1, 2, 3]);
        s.add_fragment(1, vec![4, 5, 6]);

        let msg = s.assemble();
        assert_eq!(msg.data, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(msg.length, 9);
        assert!(msg.complete);
        assert!(msg.missing_sequences.is_empty());
        assert_eq!(msg.fragments_received, 3);
        assert_eq!(msg.fragments_expected, 3);
        assert_eq!(msg.timestamp_ns, 1_000);
        assert_eq!(msg.stream_id, 7);
        assert_eq!(msg.message_type, 0x02);
    }

    #[test]
    fn test_assemble_truncates_to_declared_length() {
        let mut s = stream(2, 5);
        s.add_fragment(0, vec![1, 2, 3, 4]);
        s.add_fragment(1, vec![5, 0, 0, 0]); // zero padding in the last fragment
        let msg = s.assemble();
        assert_eq!(msg.data, vec![1, 2, 3, 4, 5]);
        assert_eq!(msg.length, 5);
        assert_eq!(msg.declared_length, 5);
    }

    #[test]
    fn test_assemble_short_data_is_not_padded() {
        let mut s = stream(2, 100);
        s.add_fragment(0, vec![1, 2]);
        s.add_fragment(1, vec![3]);
        let msg = s.assemble();
        assert_eq!(msg.length, 3);
        assert_eq!(msg.declared_length, 100);
    }

    #[test]
    fn test_assemble_reports_missing_sequences() {
        let mut s = stream(4, 16);
        s.add_fragment(0, vec![1, 1]);
        s.add_fragment(3, vec![4, 4]);
        let msg = s.assemble();
        assert!(!msg.complete);
        assert_eq!(msg.missing_sequences, vec![1, 2]);
        assert_eq!(msg.data, vec![1, 1, 4, 4]);
        assert_eq!(msg.fragments_received, 2);
    }

    #[test]
    fn test_overwrite_keeps_latest_payload() {
        let mut s = stream(2, 4);
        s.add_fragment(0, vec![9, 9]);
        s.add_fragment(0, vec![1, 2]);
        assert_eq!(s.fragments_received(), 1);
        s.add_fragment(1, vec![3, 4]);
        assert_eq!(s.assemble().data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_completed_message_json_shape() {
        let mut s = stream(1, 2);
        s.add_fragment(0, vec![0xAB, 0x01]);
        let v = serde_json::to_value(s.assemble()).unwrap();
        assert_eq!(v["data"], "ab01");
        assert_eq!(v["device_id"], "dev");
        assert!(v.get("decoded").is_none());
    }
}
