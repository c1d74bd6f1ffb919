//! Threaded ingestion: channel-fed workers sharing one [`FragmentReceiver`].
//!
//! Transports (HTTP handlers, bus consumers, capture replay) push
//! [`RawFragment`]s into a bounded channel; each worker drains it and forwards
//! completed messages downstream. Workers exit when every sender is dropped.

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::assembler::CompletedMessage;
use crate::receiver::FragmentReceiver;

/// One advertisement as delivered by a transport.
#[derive(Debug, Clone)]
pub struct RawFragment {
    pub device_id: String,
    pub data: Vec<u8>,
    pub recv_timestamp_ns: u64,
}

/// Spawn `workers` ingest threads (at least one).
pub fn start_ingest_workers(
    workers: usize,
    receiver: Arc<FragmentReceiver>,
    rx: Receiver<RawFragment>,
    out: Sender<CompletedMessage>,
) -> Result<Vec<JoinHandle<()>>> {
    (0..workers.max(1))
        .map(|i| -> Result<JoinHandle<()>> {
            let receiver = receiver.clone();
            let rx = rx.clone();
            let out = out.clone();
            let handle = std::thread::Builder::new()
                .name(format!("frag-ingest-{}", i))
                .spawn(move || run_worker(&receiver, &rx, &out))?;
            Ok(handle)
        })
        .collect()
}

fn run_worker(
    receiver: &FragmentReceiver,
    rx: &Receiver<RawFragment>,
    out: &Sender<CompletedMessage>,
) {
    tracing::debug!("ingest worker started");
    for raw in rx {
        let Some(msg) = receiver.process_fragment(&raw.device_id, &raw.data, Some(raw.recv_timestamp_ns))
        else {
            continue;
        };
        match out.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => {
                tracing::warn!(
                    device = %msg.device_id,
                    stream_id = msg.stream_id,
                    "output channel full; dropping completed message"
                );
            }
            // Nobody is listening; completions are still queued on the receiver.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
    tracing::debug!("ingest worker exiting");
}
