use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// ReceiverMetrics
// ---------------------------------------------------------------------------

/// Atomic process-wide reassembly counters.
/// All atomic writes use Relaxed ordering — these are sampling metrics, not synchronisation.
#[derive(Debug, Default)]
pub struct ReceiverMetrics {
    /// Every fragment handed to the receiver, including malformed ones.
    pub fragments_received: AtomicU64,
    /// Retransmissions rejected by the dedup index.
    pub fragments_duplicate: AtomicU64,
    pub streams_completed: AtomicU64,
    /// Incomplete streams dropped by garbage collection.
    pub streams_timed_out: AtomicU64,
    /// Completed streams whose registered decoder rejected the payload.
    pub decode_errors: AtomicU64,
}

/// Plain-struct snapshot of the receiver counters plus derived gauges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverStats {
    pub received: u64,
    pub duplicate: u64,
    pub completed: u64,
    pub timed_out: u64,
    pub decode_errors: u64,
    pub active_streams: usize,
    pub dedup_index_size: usize,
    pub completed_pending: usize,
}

/// Gauges read from shared receiver state at snapshot time.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateGauges {
    pub active_streams: usize,
    pub dedup_index_size: usize,
    pub completed_pending: usize,
}

impl ReceiverMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Percentage of received fragments that were retransmission duplicates,
    /// or None if nothing has been received.
    pub fn duplicate_rate_pct(&self) -> Option<f64> {
        self.snapshot(StateGauges::default()).duplicate_rate_pct()
    }

    /// Capture a point-in-time snapshot (slight skew possible between atomics).
    pub fn snapshot(&self, gauges: StateGauges) -> ReceiverStats {
        ReceiverStats {
            received: self.fragments_received.load(Relaxed),
            duplicate: self.fragments_duplicate.load(Relaxed),
            completed: self.streams_completed.load(Relaxed),
            timed_out: self.streams_timed_out.load(Relaxed),
            decode_errors: self.decode_errors.load(Relaxed),
            active_streams: gauges.active_streams,
            dedup_index_size: gauges.dedup_index_size,
            completed_pending: gauges.completed_pending,
        }
    }
}

impl ReceiverStats {
    pub fn duplicate_rate_pct(&self) -> Option<f64> {
        if self.received == 0 {
            return None;
        }
        Some(self.duplicate as f64 / self.received as f64 * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_rate() {
        let m = ReceiverMetrics::new();
        assert!(m.duplicate_rate_pct().is_none());
        m.fragments_received.store(4, Relaxed);
        m.fragments_duplicate.store(3, Relaxed);
        let rate = m.duplicate_rate_pct().unwrap();
        assert!((rate - 75.0).abs() < 0.01);
    }

    #[test]
    fn test_snapshot_carries_gauges() {
        let m = ReceiverMetrics::new();
        m.fragments_received.store(56, Relaxed);
        m.streams_completed.store(1, Relaxed);
        let s = m.snapshot(StateGauges {
            active_streams: 2,
            dedup_index_size: 14,
            completed_pending: 1,
        });
        assert_eq!(s.received, 56);
        assert_eq!(s.completed, 1);
        assert_eq!(s.active_streams, 2);
        assert_eq!(s.dedup_index_size, 14);
        assert_eq!(s.completed_pending, 1);
    }

    #[test]
    fn test_stats_json_field_names() {
        let v = serde_json::to_value(ReceiverStats::default()).unwrap();
        for key in [
            "received",
            "duplicate",
            "completed",
            "timedOut",
            "decodeErrors",
            "activeStreams",
            "dedupIndexSize",
            "completedPending",
        ] {
            assert!(v.get(key).is_some(), "missing {}", key);
        }
    }
}
