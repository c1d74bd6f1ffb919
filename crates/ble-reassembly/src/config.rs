//! Receiver tuning knobs.

use serde::{Deserialize, Serialize};

use crate::metrics::secs_to_ns;

/// Timeouts and bounds for a [`crate::FragmentReceiver`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReceiverConfig {
    /// Incomplete streams older than this are dropped by garbage collection.
    #[serde(default = "ReceiverConfig::default_stream_timeout_secs")]
    pub stream_timeout_secs: u64,
    /// How long an accepted fragment is remembered for duplicate rejection.
    #[serde(default = "ReceiverConfig::default_dedup_timeout_secs")]
    pub dedup_timeout_secs: u64,
    /// Period of the background garbage collector.
    #[serde(default = "ReceiverConfig::default_gc_interval_secs")]
    pub gc_interval_secs: u64,
    /// Maximum number of completed messages kept for `take_completed`.
    /// The oldest message is dropped when full.
    #[serde(default = "ReceiverConfig::default_completed_queue_cap")]
    pub completed_queue_cap: usize,
}

impl ReceiverConfig {
    fn default_stream_timeout_secs() -> u64 { 60 }
    fn default_dedup_timeout_secs() -> u64 { 120 }
    fn default_gc_interval_secs() -> u64 { 10 }
    fn default_completed_queue_cap() -> usize { 256 }

    pub fn stream_timeout_ns(&self) -> u64 {
        secs_to_ns(self.stream_timeout_secs)
    }

    pub fn dedup_timeout_ns(&self) -> u64 {
        secs_to_ns(self.dedup_timeout_secs)
    }

    pub fn gc_interval(&self) -> std::time::Duration {
        // A zero interval would spin the collector thread.
        std::time::Duration::from_secs(self.gc_interval_secs.max(1))
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            stream_timeout_secs: Self::default_stream_timeout_secs(),
            dedup_timeout_secs: Self::default_dedup_timeout_secs(),
            gc_interval_secs: Self::default_gc_interval_secs(),
            completed_queue_cap: Self::default_completed_queue_cap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = ReceiverConfig::default();
        assert_eq!(c.stream_timeout_secs, 60);
        assert_eq!(c.dedup_timeout_secs, 120);
        assert_eq!(c.gc_interval_secs, 10);
        assert_eq!(c.stream_timeout_ns(), 60_000_000_000);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let c: ReceiverConfig = serde_json::from_str(r#"{"stream_timeout_secs": 5}"#).unwrap();
        assert_eq!(c.stream_timeout_secs, 5);
        assert_eq!(c.dedup_timeout_secs, 120);
        assert_eq!(c.completed_queue_cap, 256);
    }

    #[test]
    fn test_zero_gc_interval_clamped() {
        let c = ReceiverConfig { gc_interval_secs: 0, ..Default::default() };
        assert_eq!(c.gc_interval(), std::time::Duration::from_secs(1));
    }
}
