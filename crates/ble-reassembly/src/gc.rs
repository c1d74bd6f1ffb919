//! Background garbage collection for a [`FragmentReceiver`].
//!
//! A dedicated thread calls [`FragmentReceiver::collect_garbage`] on a fixed
//! interval. Stopping drops the signal sender, which wakes the thread's
//! `recv_timeout` with `Disconnected`; the join is bounded by a caller timeout.

use anyhow::Result;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::receiver::FragmentReceiver;

/// How long `Drop` waits for the collector thread.
const DROP_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

pub struct GarbageCollector {
    /// Dropping this signals the thread to exit.
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    passes: Arc<AtomicU64>,
}

impl GarbageCollector {
    /// Start collecting every `gc_interval_secs` from the receiver's config.
    pub fn start(receiver: Arc<FragmentReceiver>) -> Result<Self> {
        let interval = receiver.config().gc_interval();
        Self::start_with_interval(receiver, interval)
    }

    pub fn start_with_interval(receiver: Arc<FragmentReceiver>, interval: Duration) -> Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let passes = Arc::new(AtomicU64::new(0));
        let thread_passes = passes.clone();

        let thread = std::thread::Builder::new()
            .name("frag-gc".into())
            .spawn(move || {
                tracing::info!(?interval, "garbage collector started");
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            receiver.collect_garbage(None);
                            thread_passes.fetch_add(1, Relaxed);
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::info!("garbage collector stopped");
            })?;

        Ok(Self { stop_tx: Some(stop_tx), thread: Some(thread), passes })
    }

    /// Number of completed collection passes.
    pub fn passes(&self) -> u64 {
        self.passes.load(Relaxed)
    }

    /// Signal the thread and wait up to `timeout` for it to exit.
    /// Returns false if the thread was still running at the deadline.
    pub fn stop(mut self, timeout: Duration) -> bool {
        self.shutdown(timeout)
    }

    fn shutdown(&mut self, timeout: Duration) -> bool {
        drop(self.stop_tx.take());
        let Some(handle) = self.thread.take() else {
            return true;
        };

        // A pass in progress holds the state lock only for map operations,
        // so the thread normally exits well inside the deadline.
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!(?timeout, "garbage collector did not stop in time; detaching");
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        handle.join().is_ok()
    }
}

impl Drop for GarbageCollector {
    fn drop(&mut self) {
        self.shutdown(DROP_JOIN_TIMEOUT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReceiverConfig;
    use crate::testutil::{captouch_fragment, DEVICE};

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_periodic_collection_times_out_streams() {
        let config = ReceiverConfig { stream_timeout_secs: 0, ..Default::default() };
        let rx = Arc::new(FragmentReceiver::new(config));
        rx.process_fragment(DEVICE, &captouch_fragment(1, 0), None);
        assert_eq!(rx.active_streams(), 1);

        let gc = GarbageCollector::start_with_interval(rx.clone(), Duration::from_millis(10)).unwrap();
        assert!(wait_for(|| rx.stats().timed_out == 1));
        assert_eq!(rx.active_streams(), 0);
        assert!(gc.passes() >= 1);
        assert!(gc.stop(Duration::from_secs(1)));
    }

    #[test]
    fn test_stop_is_prompt_with_long_interval() {
        let rx = Arc::new(FragmentReceiver::default());
        let gc = GarbageCollector::start_with_interval(rx, Duration::from_secs(3600)).unwrap();
        let started = Instant::now();
        assert!(gc.stop(Duration::from_secs(1)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_stop_preserves_in_flight_state() {
        let rx = Arc::new(FragmentReceiver::default());
        rx.process_fragment(DEVICE, &captouch_fragment(1, 0), None);
        let gc = GarbageCollector::start_with_interval(rx.clone(), Duration::from_millis(10)).unwrap();
        assert!(wait_for(|| gc.passes() >= 2));
        drop(gc);

        // Fresh stream is well inside the 60 s default timeout
        let s = rx.stats();
        assert_eq!(s.active_streams, 1);
        assert_eq!(s.dedup_index_size, 1);
        assert_eq!(s.timed_out, 0);
    }
}
