//! Fragment reassembly core.
//!
//! [`FragmentReceiver`] owns the dedup index and the table of in-flight streams
//! and turns a sequence of raw advertisements into at most one
//! [`CompletedMessage`] per stream.
//!
//! ## Concurrency
//! Both structures live behind a single mutex so that "check duplicate, mark
//! seen" and "check complete, remove" are each atomic with respect to other
//! ingest threads and the garbage collector. The lock covers map operations
//! only: assembly, payload decoding and completion callbacks all run after the
//! stream has been removed from the table and the lock released.
//!
//! Nothing in here returns an error to the caller. Malformed fragments,
//! duplicates and decoder failures are logged and counted.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering::Relaxed;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::assembler::{CompletedMessage, StreamState};
use crate::config::ReceiverConfig;
use crate::dedup::DedupIndex;
use crate::fragment::FragmentHeader;
use crate::metrics;
use crate::registry::{DecoderRegistry, PayloadDecoder};
use crate::stats::{ReceiverMetrics, ReceiverStats, StateGauges};

/// Observer invoked once per completed message.
pub type CompletionCallback = Arc<dyn Fn(&CompletedMessage) + Send + Sync>;

/// `(device_id, stream_id)`
type StreamKey = (String, u16);

#[derive(Default)]
struct ReassemblyState {
    dedup: DedupIndex,
    streams: HashMap<StreamKey, StreamState>,
}

/// Outcome of one garbage-collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    pub streams_timed_out: usize,
    /// Buffered fragments dropped with the timed-out streams.
    pub fragments_discarded: usize,
    pub dedup_evicted: usize,
}

pub struct FragmentReceiver {
    config: ReceiverConfig,
    state: Mutex<ReassemblyState>,
    registry: DecoderRegistry,
    metrics: Arc<ReceiverMetrics>,
    /// Completed messages not yet taken by a poller. Bounded by `completed_queue_cap`.
    completed: Mutex<VecDeque<CompletedMessage>>,
    callbacks: RwLock<Vec<CompletionCallback>>,
}

impl FragmentReceiver {
    /// Receiver with an empty decoder registry.
    pub fn new(config: ReceiverConfig) -> Self {
        Self::with_registry(config, DecoderRegistry::new())
    }

    pub fn with_registry(config: ReceiverConfig, registry: DecoderRegistry) -> Self {
        Self {
            config,
            state: Mutex::new(ReassemblyState::default()),
            registry,
            metrics: ReceiverMetrics::new(),
            completed: Mutex::new(VecDeque::new()),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    pub fn registry(&self) -> &DecoderRegistry {
        &self.registry
    }

    /// Register (or replace) the payload decoder for `message_type`.
    pub fn register_decoder(
        &self,
        message_type: u8,
        decoder: Arc<dyn PayloadDecoder>,
    ) -> Option<Arc<dyn PayloadDecoder>> {
        self.registry.register(message_type, decoder)
    }

    /// Register an observer for completed messages. Observers run on the
    /// ingesting thread after the state lock is released; a panicking
    /// observer is logged and skipped.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: Fn(&CompletedMessage) + Send + Sync + 'static,
    {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Feed one raw fragment. Returns the reassembled message if this fragment
    /// completed its stream. `timestamp_ns` defaults to [`metrics::now_ns`].
    pub fn process_fragment(
        &self,
        device_id: &str,
        raw: &[u8],
        timestamp_ns: Option<u64>,
    ) -> Option<CompletedMessage> {
        self.metrics.fragments_received.fetch_add(1, Relaxed);

        let header = match FragmentHeader::parse(raw) {
            Ok(h) => h,
            Err(e) => {
                tracing::debug!(device = %device_id, err = %e, "dropping malformed fragment");
                return None;
            }
        };
        let timestamp_ns = timestamp_ns.unwrap_or_else(metrics::now_ns);

        let FragmentHeader {
            message_type,
            stream_id,
            total_fragments,
            sequence,
            declared_length,
            payload,
            ..
        } = header;

        let finished = {
            let mut guard = self.lock_state();
            let state = &mut *guard;

            if state.dedup.is_duplicate(device_id, stream_id, sequence) {
                self.metrics.fragments_duplicate.fetch_add(1, Relaxed);
                tracing::debug!(device = %device_id, stream_id, sequence, "duplicate fragment");
                return None;
            }
            state.dedup.mark_seen(device_id, stream_id, sequence, timestamp_ns);

            let key = (device_id.to_owned(), stream_id);
            let stream = state.streams.entry(key.clone()).or_insert_with(|| {
                StreamState::new(
                    device_id.to_owned(),
                    stream_id,
                    message_type,
                    total_fragments,
                    declared_length,
                    timestamp_ns,
                )
            });
            stream.add_fragment(sequence, payload);

            tracing::debug!(
                device = %device_id,
                stream_id,
                "fragment {}/{} ({} bytes buffered, {} declared)",
                sequence as usize + 1,
                stream.total_fragments(),
                stream.bytes_received(),
                declared_length
            );

            if stream.is_complete() {
                // Counted before the lock drops so stats never see a stream
                // that is neither active nor completed.
                self.metrics.streams_completed.fetch_add(1, Relaxed);
                state.streams.remove(&key)
            } else {
                None
            }
        };

        finished.map(|stream| self.complete(stream))
    }

    /// Assemble, decode and publish a stream that has already left the table.
    fn complete(&self, stream: StreamState) -> CompletedMessage {
        let mut msg = stream.assemble();

        match self.registry.decode(msg.message_type, &msg.data) {
            Some(Ok(decoded)) => msg.decoded = Some(decoded),
            Some(Err(e)) => {
                self.metrics.decode_errors.fetch_add(1, Relaxed);
                tracing::error!(
                    device = %msg.device_id,
                    stream_id = msg.stream_id,
                    err = %e,
                    "payload decoder failed for message type 0x{:02X}",
                    msg.message_type
                );
            }
            None => {}
        }

        tracing::info!(
            device = %msg.device_id,
            stream_id = msg.stream_id,
            "stream complete: {} bytes, type 0x{:02X}",
            msg.length,
            msg.message_type
        );

        self.push_completed(msg.clone());

        // Snapshot so observers may register further observers.
        let callbacks: Vec<CompletionCallback> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for callback in &callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&msg))).is_err() {
                tracing::error!(
                    device = %msg.device_id,
                    stream_id = msg.stream_id,
                    "completion callback panicked"
                );
            }
        }

        msg
    }

    fn push_completed(&self, msg: CompletedMessage) {
        let cap = self.config.completed_queue_cap;
        if cap == 0 {
            return;
        }
        let mut queue = self.completed.lock().unwrap_or_else(PoisonError::into_inner);
        while queue.len() >= cap {
            queue.pop_front();
        }
        queue.push_back(msg);
    }

    /// Pop the oldest completed message not yet taken.
    pub fn take_completed(&self) -> Option<CompletedMessage> {
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Drop streams older than the stream timeout and dedup entries older than
    /// the dedup window. `now_ns` defaults to [`metrics::now_ns`].
    pub fn collect_garbage(&self, now_ns: Option<u64>) -> GcReport {
        let now = now_ns.unwrap_or_else(metrics::now_ns);
        let stream_timeout = self.config.stream_timeout_ns();
        let dedup_horizon = now.saturating_sub(self.config.dedup_timeout_ns());

        let mut guard = self.lock_state();
        let state = &mut *guard;

        let mut streams_timed_out = 0;
        let mut fragments_discarded = 0;
        state.streams.retain(|_, stream| {
            if now.saturating_sub(stream.first_seen_ns()) <= stream_timeout {
                return true;
            }
            tracing::warn!(
                device = %stream.device_id(),
                stream_id = stream.stream_id(),
                "timeout: stream incomplete ({}/{} fragments)",
                stream.fragments_received(),
                stream.total_fragments()
            );
            streams_timed_out += 1;
            fragments_discarded += stream.fragments_received();
            false
        });
        let dedup_evicted = state.dedup.evict_older_than(dedup_horizon);
        drop(guard);

        self.metrics
            .streams_timed_out
            .fetch_add(streams_timed_out as u64, Relaxed);
        tracing::debug!(
            streams_timed_out,
            fragments_discarded,
            dedup_evicted,
            "garbage collection pass"
        );

        GcReport { streams_timed_out, fragments_discarded, dedup_evicted }
    }

    pub fn stats(&self) -> ReceiverStats {
        let (active_streams, dedup_index_size) = {
            let state = self.lock_state();
            (state.streams.len(), state.dedup.len())
        };
        let completed_pending = self
            .completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        self.metrics.snapshot(StateGauges {
            active_streams,
            dedup_index_size,
            completed_pending,
        })
    }

    pub fn active_streams(&self) -> usize {
        self.lock_state().streams.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, ReassemblyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FragmentReceiver {
    fn default() -> Self {
        Self::new(ReceiverConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
