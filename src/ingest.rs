//! `bleframe ingest` — live reassembly of capture records read from stdin.
//!
//! A reader thread parses records into `RawFragment`s stamped with the local
//! monotonic clock, `workers` threads reassemble them, and a writer thread
//! prints completed messages as JSON lines. The garbage collector runs in the
//! background. Statistics are logged every `stats_interval` seconds until EOF
//! or Ctrl-C.

use anyhow::Result;
use ble_reassembly::{
    metrics::now_ns, start_ingest_workers, CompletedMessage, FragmentReceiver, GarbageCollector,
    RawFragment, ReceiverStats,
};
use chrono::Local;
use crossbeam_channel::Sender;
use libc;
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::GatewayConfig;
use crate::record::CaptureRecord;

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn handle_sigint(_: libc::c_int) {
    RUNNING.store(false, Ordering::SeqCst);
}

const CHANNEL_CAPACITY: usize = 4096;
const POLL_INTERVAL: Duration = Duration::from_millis(200);
const GC_STOP_TIMEOUT: Duration = Duration::from_secs(2);

pub fn run(config: &GatewayConfig, workers: usize, stats_interval_secs: u64) -> Result<()> {
    let receiver = Arc::new(FragmentReceiver::with_registry(
        config.receiver.clone(),
        config.build_registry()?,
    ));
    let gc = GarbageCollector::start(receiver.clone())?;

    let (in_tx, in_rx) = crossbeam_channel::bounded::<RawFragment>(CHANNEL_CAPACITY);
    let (out_tx, out_rx) = crossbeam_channel::bounded::<CompletedMessage>(CHANNEL_CAPACITY);
    let worker_handles = start_ingest_workers(workers, receiver.clone(), in_rx, out_tx)?;

    let writer = std::thread::Builder::new()
        .name("completed-out".into())
        .spawn(move || {
            let stdout = std::io::stdout();
            for msg in out_rx {
                let mut out = stdout.lock();
                let written = serde_json::to_writer(&mut out, &msg)
                    .map_err(std::io::Error::from)
                    .and_then(|()| writeln!(out))
                    .and_then(|()| out.flush());
                if let Err(e) = written {
                    tracing::warn!("failed to write completed message: {}", e);
                }
            }
        })?;

    let reader = std::thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || read_stdin(in_tx))?;

    RUNNING.store(true, Ordering::SeqCst);
    unsafe { libc::signal(libc::SIGINT, handle_sigint as *const () as libc::sighandler_t) };

    tracing::info!(
        workers = worker_handles.len(),
        decoders = receiver.registry().len(),
        stats_interval_secs,
        "ingesting capture records from stdin (Ctrl-C to stop)"
    );

    let stats_interval = Duration::from_secs(stats_interval_secs.max(1));
    let mut last_stats = Instant::now();
    while RUNNING.load(Ordering::SeqCst) && !reader.is_finished() {
        std::thread::sleep(POLL_INTERVAL);
        if last_stats.elapsed() >= stats_interval {
            log_stats(&receiver.stats());
            last_stats = Instant::now();
        }
    }

    if RUNNING.load(Ordering::SeqCst) {
        // EOF: the reader dropped its sender, so workers drain and exit,
        // which in turn closes the writer's channel.
        join_logged("stdin-reader", reader);
        for h in worker_handles {
            join_logged("frag-ingest", h);
        }
        join_logged("completed-out", writer);
        tracing::info!("end of input");
    } else {
        // stdin may still be blocked in read(); leave the pipeline to process exit.
        tracing::info!("interrupted");
    }

    gc.stop(GC_STOP_TIMEOUT);
    print_final(&receiver.stats());
    Ok(())
}

/// Join a pipeline thread, logging instead of propagating a panic.
/// Returns false if the thread panicked.
fn join_logged(name: &str, handle: JoinHandle<()>) -> bool {
    match handle.join() {
        Ok(()) => true,
        Err(e) => {
            let reason = e
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| e.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            tracing::warn!(thread = name, "pipeline thread panicked: {}", reason);
            false
        }
    }
}

fn read_stdin(tx: Sender<RawFragment>) {
    let stdin = std::io::stdin();
    for (idx, line) in stdin.lock().lines().enumerate() {
        if !RUNNING.load(Ordering::SeqCst) {
            break;
        }
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!("stdin read error: {}", e);
                break;
            }
        };
        let Some(raw) = parse_raw(idx + 1, &line) else {
            continue;
        };
        if tx.send(raw).is_err() {
            break;
        }
    }
}

/// Live records are stamped on arrival; capture timestamps are ignored so the
/// garbage collector's clock and the fragment clock agree.
fn parse_raw(line_no: usize, line: &str) -> Option<RawFragment> {
    let record = match CaptureRecord::from_line(line) {
        Ok(Some(r)) => r,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(line = line_no, "skipping record: {:#}", e);
            return None;
        }
    };
    match record.payload() {
        Ok(data) => Some(RawFragment {
            device_id: record.device_id,
            data,
            recv_timestamp_ns: now_ns(),
        }),
        Err(e) => {
            tracing::warn!(line = line_no, device = %record.device_id, "skipping record: {}", e);
            None
        }
    }
}

fn log_stats(s: &ReceiverStats) {
    tracing::info!(
        received = s.received,
        duplicate = s.duplicate,
        completed = s.completed,
        timed_out = s.timed_out,
        decode_errors = s.decode_errors,
        active_streams = s.active_streams,
        dedup_index_size = s.dedup_index_size,
        duplicate_rate_pct = s.duplicate_rate_pct().unwrap_or(0.0),
        "receiver stats"
    );
}

fn print_final(s: &ReceiverStats) {
    eprintln!();
    eprintln!("{:=<60}", "");
    eprintln!("{:^60}", format!(" INGEST STOPPED  {} ", Local::now().format("%Y-%m-%d %H:%M:%S")));
    eprintln!("{:=<60}", "");
    match serde_json::to_string_pretty(s) {
        Ok(json) => eprintln!("{}", json),
        Err(e) => tracing::warn!("failed to serialize stats: {}", e),
    }
}
