//! Retransmission deduplication.
//!
//! Advertisers repeat every fragment several times because nothing is ever
//! acknowledged. The index remembers each accepted `(device, stream, sequence)`
//! with the time it was first accepted; repeats inside the window are rejected.
//!
//! Entries are never refreshed by a repeat sighting. Once an entry ages out,
//! a late retransmission of the same fragment is treated as new again.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// `(stream_id, sequence)` within one device.
type FragmentSlot = (u16, u8);

#[derive(Debug, Default)]
pub struct DedupIndex {
    /// Keyed per device first so duplicate lookups can borrow the device id.
    seen: HashMap<String, HashMap<FragmentSlot, u64>>,
    len: usize,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff this fragment was accepted and has not been evicted yet.
    pub fn is_duplicate(&self, device_id: &str, stream_id: u16, sequence: u8) -> bool {
        self.seen
            .get(device_id)
            .is_some_and(|slots| slots.contains_key(&(stream_id, sequence)))
    }

    /// Record an accepted fragment. An existing entry keeps its original timestamp.
    pub fn mark_seen(&mut self, device_id: &str, stream_id: u16, sequence: u8, timestamp_ns: u64) {
        let slots = self.seen.entry(device_id.to_owned()).or_default();
        if let Entry::Vacant(e) = slots.entry((stream_id, sequence)) {
            e.insert(timestamp_ns);
            self.len += 1;
        }
    }

    /// Remove every entry recorded before `horizon_ns`. Returns the number removed.
    pub fn evict_older_than(&mut self, horizon_ns: u64) -> usize {
        let mut removed = 0;
        self.seen.retain(|_, slots| {
            let before = slots.len();
            slots.retain(|_, &mut ts| ts >= horizon_ns);
            removed += before - slots.len();
            !slots.is_empty()
        });
        self.len -= removed;
        removed
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[cfg(test)]
    pub(crate) fn seen_at(&self, device_id: &str, stream_id: u16, sequence: u8) -> Option<u64> {
        self.seen.get(device_id)?.get(&(stream_id, sequence)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEV: &str = "AA:BB:CC:DD:EE:FF";

    #[test]
    fn test_mark_then_duplicate() {
        let mut idx = DedupIndex::new();
        assert!(!idx.is_duplicate(DEV, 100, 0));
        idx.mark_seen(DEV, 100, 0, 1_000);
        assert!(idx.is_duplicate(DEV, 100, 0));
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn test_key_components_are_independent() {
        let mut idx = DedupIndex::new();
        idx.mark_seen(DEV, 100, 0, 1_000);
        assert!(!idx.is_duplicate(DEV, 100, 1));
        assert!(!idx.is_duplicate(DEV, 101, 0));
        assert!(!idx.is_duplicate("11:22:33:44:55:66", 100, 0));
    }

    #[test]
    fn test_mark_seen_does_not_refresh() {
        let mut idx = DedupIndex::new();
        idx.mark_seen(DEV, 1, 0, 1_000);
        idx.mark_seen(DEV, 1, 0, 9_000);
        assert_eq!(idx.seen_at(DEV, 1, 0), Some(1_000));
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn test_evict_older_than() {
        let mut idx = DedupIndex::new();
        idx.mark_seen(DEV, 1, 0, 100);
        idx.mark_seen(DEV, 1, 1, 200);
        idx.mark_seen("other", 7, 0, 300);

        assert_eq!(idx.evict_older_than(200), 1);
        assert!(!idx.is_duplicate(DEV, 1, 0));
        assert!(idx.is_duplicate(DEV, 1, 1));
        assert_eq!(idx.len(), 2);

        assert_eq!(idx.evict_older_than(1_000), 2);
        assert!(idx.is_empty());
        assert!(idx.seen.is_empty(), "empty device maps are dropped");
    }

    #[test]
    fn test_evicted_fragment_is_new_again() {
        let mut idx = DedupIndex::new();
        idx.mark_seen(DEV, 1, 0, 100);
        idx.evict_older_than(101);
        assert!(!idx.is_duplicate(DEV, 1, 0));
        idx.mark_seen(DEV, 1, 0, 500);
        assert_eq!(idx.seen_at(DEV, 1, 0), Some(500));
    }
}
