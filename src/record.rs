//! JSONL capture records.
//!
//! One advertisement per line:
//!
//! ```text
//! {"device_id": "AA:BB:CC:DD:EE:FF", "data": "e5ffaa dd 2a00 0e00 a800 ...", "ts_ms": 1718000000123}
//! ```
//!
//! `data` is manufacturer data as hex (`0x`, spaces and colons allowed).
//! The timestamp is either `ts_ms` (milliseconds) or `ts` (RFC 3339); both
//! are optional. Blank lines and lines starting with `#` are skipped.

use anyhow::{Context, Result};
use ble_reassembly::{metrics::NANOS_PER_SEC, normalize_manufacturer_data, FragmentError};
use chrono::DateTime;
use serde::{Deserialize, Serialize};

const NANOS_PER_MS: u64 = NANOS_PER_SEC / 1_000;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CaptureRecord {
    pub device_id: String,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
}

impl CaptureRecord {
    /// Parse one line. `Ok(None)` for blank and comment lines.
    pub fn from_line(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let record: Self = serde_json::from_str(line).context("invalid capture record")?;
        Ok(Some(record))
    }

    /// Capture time in nanoseconds, if the record carries one. `ts_ms` wins
    /// over `ts` when both are present.
    pub fn timestamp_ns(&self) -> Result<Option<u64>> {
        if let Some(ms) = self.ts_ms {
            return Ok(Some(ms.saturating_mul(NANOS_PER_MS)));
        }
        let Some(ts) = &self.ts else {
            return Ok(None);
        };
        let parsed = DateTime::parse_from_rfc3339(ts)
            .with_context(|| format!("invalid RFC 3339 timestamp: {}", ts))?;
        let ns = parsed
            .timestamp_nanos_opt()
            .and_then(|ns| u64::try_from(ns).ok())
            .with_context(|| format!("timestamp out of range: {}", ts))?;
        Ok(Some(ns))
    }

    /// Raw manufacturer-data bytes.
    pub fn payload(&self) -> Result<Vec<u8>, FragmentError> {
        normalize_manufacturer_data(&self.data)
    }
}
