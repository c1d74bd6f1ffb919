//! Capacitive-touch raw sample decoder (message type 0xDD).
//!
//! One measurement is 84 big-endian `i16` samples (168 bytes), laid out as:
//!
//! | samples  | count | name             |
//! |----------|-------|------------------|
//! | 0 .. 8   | 8     | `vdd_ref`        |
//! | 8 .. 16  | 8     | `gnd_ref`        |
//! | 16 .. 50 | 34    | `self_cap_raw`   |
//! | 50 .. 84 | 34    | `mutual_cap_raw` |

use serde::Serialize;

use crate::assembler::CompletedMessage;
use crate::registry::{DecodeError, DecodedPayload, PayloadDecoder};

pub const SAMPLE_COUNT: usize = 84;
pub const PAYLOAD_LEN: usize = SAMPLE_COUNT * 2;

const VDD_REF: std::ops::Range<usize> = 0..8;
const GND_REF: std::ops::Range<usize> = 8..16;
const SELF_CAP: std::ops::Range<usize> = 16..50;
const MUTUAL_CAP: std::ops::Range<usize> = 50..84;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptouchReading {
    pub total_samples: usize,
    pub vdd_ref: Vec<i16>,
    pub gnd_ref: Vec<i16>,
    pub self_cap_raw: Vec<i16>,
    pub mutual_cap_raw: Vec<i16>,
    pub vdd_avg: f64,
    pub gnd_avg: f64,
    /// `vdd_avg - gnd_avg`, the usable ADC span for this measurement.
    pub adc_range: f64,
}

impl CaptouchReading {
    /// All samples in wire order.
    pub fn samples(&self) -> Vec<i16> {
        let mut out = Vec::with_capacity(self.total_samples);
        out.extend_from_slice(&self.vdd_ref);
        out.extend_from_slice(&self.gnd_ref);
        out.extend_from_slice(&self.self_cap_raw);
        out.extend_from_slice(&self.mutual_cap_raw);
        out
    }
}

/// Decode a 168-byte captouch payload.
pub fn parse_captouch(data: &[u8]) -> Result<CaptouchReading, DecodeError> {
    let samples = parse_samples(data)?;

    let vdd_ref = samples[VDD_REF].to_vec();
    let gnd_ref = samples[GND_REF].to_vec();
    let vdd_avg = mean(&vdd_ref);
    let gnd_avg = mean(&gnd_ref);

    Ok(CaptouchReading {
        total_samples: samples.len(),
        self_cap_raw: samples[SELF_CAP].to_vec(),
        mutual_cap_raw: samples[MUTUAL_CAP].to_vec(),
        vdd_ref,
        gnd_ref,
        vdd_avg,
        gnd_avg,
        adc_range: vdd_avg - gnd_avg,
    })
}

fn parse_samples(data: &[u8]) -> Result<Vec<i16>, DecodeError> {
    if data.len() < PAYLOAD_LEN {
        return Err(DecodeError::Incomplete { expected: PAYLOAD_LEN, actual: data.len() });
    }
    if data.len() > PAYLOAD_LEN {
        return Err(DecodeError::Oversized { expected: PAYLOAD_LEN, actual: data.len() });
    }
    Ok(data
        .chunks_exact(2)
        .map(|pair| i16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

fn mean(values: &[i16]) -> f64 {
    values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64
}

/// Registry adapter for [`parse_captouch`].
pub struct CaptouchDecoder;

impl PayloadDecoder for CaptouchDecoder {
    fn name(&self) -> &'static str {
        "captouch"
    }

    fn decode(&self, data: &[u8]) -> Result<DecodedPayload, DecodeError> {
        parse_captouch(data).map(DecodedPayload::Captouch)
    }
}

/// Pull the 84 samples out of a completed captouch message.
///
/// Uses the decoded reading when present, otherwise parses the raw bytes.
/// Returns `None` if the message does not hold a valid captouch payload.
pub fn extract_samples(msg: &CompletedMessage) -> Option<Vec<i16>> {
    if let Some(DecodedPayload::Captouch(reading)) = &msg.decoded {
        return Some(reading.samples());
    }
    parse_samples(&msg.data).ok()
}
