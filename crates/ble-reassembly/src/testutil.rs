//! Fragment builders shared by the unit tests.

use crate::captouch::PAYLOAD_LEN;
use crate::fragment::{message_type, FragmentHeader};

pub const DEVICE: &str = "AA:BB:CC:DD:EE:FF";
pub const CAPTOUCH_FRAGMENTS: u8 = 14;
pub const SAMPLES_PER_FRAGMENT: usize = 6;

/// Sample values for fragment `seq`, distinct per fragment so order is checkable.
pub fn fragment_samples(seq: u8) -> Vec<i16> {
    (0..SAMPLES_PER_FRAGMENT as i16).map(|i| seq as i16 * 100 + i).collect()
}

/// One captouch fragment: 6 big-endian samples, 168-byte declared length.
pub fn captouch_fragment(stream_id: u16, seq: u8) -> Vec<u8> {
    let payload = fragment_samples(seq).into_iter().flat_map(i16::to_be_bytes).collect();
    FragmentHeader::new(
        message_type::CAPTOUCH,
        stream_id,
        CAPTOUCH_FRAGMENTS,
        seq,
        PAYLOAD_LEN as u16,
        payload,
    )
    .encode()
}

/// All 14 fragments of one captouch measurement, in sequence order.
pub fn captouch_stream(stream_id: u16) -> Vec<Vec<u8>> {
    (0..CAPTOUCH_FRAGMENTS).map(|seq| captouch_fragment(stream_id, seq)).collect()
}

/// The 84 samples a correctly reassembled captouch stream must decode to.
pub fn expected_samples() -> Vec<i16> {
    (0..CAPTOUCH_FRAGMENTS).flat_map(fragment_samples).collect()
}

/// A stream of `total` fragments of `chunk` bytes each for an arbitrary type.
pub fn generic_stream(msg_type: u8, stream_id: u16, total: u8, chunk: usize, declared: u16) -> Vec<Vec<u8>> {
    (0..total)
        .map(|seq| {
            FragmentHeader::new(msg_type, stream_id, total, seq, declared, vec![seq; chunk]).encode()
        })
        .collect()
}
