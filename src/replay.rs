//! `bleframe replay` — reassemble a JSONL capture file offline.
//!
//! Records are processed in file order using their own timestamps. A record
//! without a timestamp inherits the previous record's. Garbage collection runs
//! on the record clock: whenever it has advanced by `gc_interval_secs` since
//! the last pass, a pass runs before the record is processed, as the live
//! collector thread would have. Completed messages are written as JSON lines;
//! a final pass at the latest timestamp sweeps whatever has expired by then,
//! and streams still in flight are reported in the summary.

use anyhow::{Context, Result};
use ble_reassembly::{metrics::secs_to_ns, FragmentReceiver, ReceiverStats};
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::GatewayConfig;
use crate::record::CaptureRecord;

#[derive(Debug, Default, Serialize)]
pub struct ReplaySummary {
    pub records: u64,
    pub skipped: u64,
    pub messages_written: u64,
    pub last_timestamp_ns: Option<u64>,
    /// Garbage-collection passes run during the replay.
    pub gc_passes: u64,
    pub streams_timed_out: u64,
}

pub fn run(config: &GatewayConfig, input: &Path, output: Option<PathBuf>) -> Result<()> {
    let receiver = FragmentReceiver::with_registry(config.receiver.clone(), config.build_registry()?);

    let file = File::open(input)
        .with_context(|| format!("failed to open capture file: {}", input.display()))?;
    let reader = BufReader::new(file);

    let mut summary = match &output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create output file: {}", path.display()))?;
            let mut out = BufWriter::new(file);
            let summary = replay(&receiver, reader, &mut out)?;
            out.flush()?;
            summary
        }
        None => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            let summary = replay(&receiver, reader, &mut out)?;
            out.flush()?;
            summary
        }
    };

    let gc = receiver.collect_garbage(summary.last_timestamp_ns);
    summary.gc_passes += 1;
    summary.streams_timed_out += gc.streams_timed_out as u64;
    print_summary(&summary, &receiver.stats());
    if let Some(path) = output {
        eprintln!("Completed messages written to {}", path.display());
    }
    Ok(())
}

/// Feed every record from `input` through `receiver`, writing completions to `out`.
pub fn replay<R: BufRead, W: Write>(
    receiver: &FragmentReceiver,
    input: R,
    out: &mut W,
) -> Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();
    let gc_interval_ns = secs_to_ns(receiver.config().gc_interval().as_secs());
    let mut last_gc_ns: Option<u64> = None;

    tracing::debug!(decoders = receiver.registry().len(), "replay started");
    for (idx, line) in input.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.with_context(|| format!("failed to read line {}", line_no))?;

        let record = match CaptureRecord::from_line(&line) {
            Ok(Some(r)) => r,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(line = line_no, "skipping record: {:#}", e);
                summary.skipped += 1;
                continue;
            }
        };
        let data = match record.payload() {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(line = line_no, device = %record.device_id, "skipping record: {}", e);
                summary.skipped += 1;
                continue;
            }
        };
        let ts = match record.timestamp_ns() {
            Ok(Some(ts)) => ts,
            Ok(None) => summary.last_timestamp_ns.unwrap_or(0),
            Err(e) => {
                tracing::warn!(line = line_no, "skipping record: {:#}", e);
                summary.skipped += 1;
                continue;
            }
        };
        summary.records += 1;
        summary.last_timestamp_ns = Some(summary.last_timestamp_ns.map_or(ts, |prev| prev.max(ts)));

        match last_gc_ns {
            None => last_gc_ns = Some(ts),
            Some(prev) if ts.saturating_sub(prev) >= gc_interval_ns => {
                let gc = receiver.collect_garbage(Some(ts));
                summary.gc_passes += 1;
                summary.streams_timed_out += gc.streams_timed_out as u64;
                last_gc_ns = Some(ts);
            }
            Some(_) => {}
        }

        if let Some(msg) = receiver.process_fragment(&record.device_id, &data, Some(ts)) {
            serde_json::to_writer(&mut *out, &msg)?;
            writeln!(out)?;
            summary.messages_written += 1;
        }
    }

    Ok(summary)
}

fn print_summary(summary: &ReplaySummary, stats: &ReceiverStats) {
    eprintln!();
    eprintln!("{:=<60}", "");
    eprintln!("{:^60}", " REPLAY SUMMARY ");
    eprintln!("{:=<60}", "");
    eprintln!("  records processed   {:>10}", summary.records);
    eprintln!("  records skipped     {:>10}", summary.skipped);
    eprintln!("  messages written    {:>10}", summary.messages_written);
    eprintln!("  duplicates          {:>10}", stats.duplicate);
    match stats.duplicate_rate_pct() {
        Some(pct) => eprintln!("  duplicate rate      {:>9.1}%", pct),
        None => eprintln!("  duplicate rate      {:>10}", "-"),
    }
    eprintln!("  timed-out streams   {:>10}", summary.streams_timed_out);
    eprintln!("  in flight at end    {:>10}", stats.active_streams);
    eprintln!("  gc passes           {:>10}", summary.gc_passes);
    eprintln!("  decode errors       {:>10}", stats.decode_errors);
    eprintln!("{:=<60}", "");
    match serde_json::to_string(stats) {
        Ok(json) => eprintln!("{}", json),
        Err(e) => tracing::warn!("failed to serialize stats: {}", e),
    }
}
