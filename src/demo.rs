//! `bleframe demo` — reassemble a synthetic captouch burst.
//!
//! A sensor advertises each of its 14 fragments four times, in a different
//! order per round, as a scanner would see it. The demo feeds that burst
//! through a receiver and prints the decoded reading and the counters.

use anyhow::{bail, Result};
use ble_reassembly::{
    captouch::{PAYLOAD_LEN, SAMPLE_COUNT},
    extract_samples, message_type, CompletedMessage, DecodedPayload, FragmentHeader,
    FragmentReceiver,
};

use crate::config::GatewayConfig;

const DEVICE: &str = "C0:FF:EE:00:00:01";
const STREAM_ID: u16 = 42;
const FRAGMENTS: u8 = 14;
const RETRANSMISSIONS: usize = 4;
/// Per-round walk strides, each coprime with `FRAGMENTS`.
const STRIDES: [usize; RETRANSMISSIONS] = [1, 3, 5, 9];
/// Spacing between advertisements.
const ADV_INTERVAL_NS: u64 = 20_000_000;

pub fn run(config: &GatewayConfig) -> Result<()> {
    let receiver = FragmentReceiver::with_registry(config.receiver.clone(), config.build_registry()?);

    let mut completed: Option<CompletedMessage> = None;
    for (i, (device, frag)) in burst().into_iter().enumerate() {
        let ts = i as u64 * ADV_INTERVAL_NS;
        if let Some(msg) = receiver.process_fragment(device, &frag, Some(ts)) {
            completed = Some(msg);
        }
    }
    let Some(msg) = completed else {
        bail!("demo stream did not complete");
    };

    let stats = receiver.stats();
    let width = 60;
    println!("{:=<width$}", "");
    println!("{:^width$}", " BLEFRAME DEMO ");
    println!("{:=<width$}", "");
    println!("  device              {}", msg.device_id);
    println!("  stream              {}", msg.stream_id);
    println!("  fragments           {}/{}", msg.fragments_received, msg.fragments_expected);
    println!("  bytes               {}/{}", msg.length, msg.declared_length);
    println!(
        "  advertisements      {} received, {} duplicate ({:.1}%)",
        stats.received,
        stats.duplicate,
        stats.duplicate_rate_pct().unwrap_or(0.0)
    );

    match &msg.decoded {
        Some(DecodedPayload::Captouch(r)) => {
            println!("  vdd_avg             {:.2}", r.vdd_avg);
            println!("  gnd_avg             {:.2}", r.gnd_avg);
            println!("  adc_range           {:.2}", r.adc_range);
            println!("  self_cap[0..4]      {:?}", &r.self_cap_raw[..4]);
            println!("  mutual_cap[0..4]    {:?}", &r.mutual_cap_raw[..4]);
        }
        Some(other) => println!("  decoded             {:?}", other),
        None => println!("  decoded             (no decoder registered)"),
    }
    if let Some(samples) = extract_samples(&msg) {
        println!("  samples             {}", samples.len());
    }
    println!("{:=<width$}", "");
    println!("{}", serde_json::to_string(&stats)?);
    Ok(())
}

/// Sample `i` of the synthetic reading: a flat VDD reference, a near-zero GND
/// reference, then two slowly varying capacitance channels.
fn sample(i: usize) -> i16 {
    match i {
        0..=7 => 1425 + (i % 3) as i16,
        8..=15 => 12 - (i % 2) as i16,
        16..=49 => 700 + (i as i16 - 16) * 3,
        _ => 540 - (i as i16 - 50) * 2,
    }
}

fn payload() -> Vec<u8> {
    (0..SAMPLE_COUNT).flat_map(|i| sample(i).to_be_bytes()).collect()
}

fn fragments() -> Vec<Vec<u8>> {
    let payload = payload();
    let chunk = PAYLOAD_LEN / FRAGMENTS as usize;
    payload
        .chunks(chunk)
        .enumerate()
        .map(|(seq, part)| {
            FragmentHeader::new(
                message_type::CAPTOUCH,
                STREAM_ID,
                FRAGMENTS,
                seq as u8,
                PAYLOAD_LEN as u16,
                part.to_vec(),
            )
            .encode()
        })
        .collect()
}

/// Every fragment `RETRANSMISSIONS` times; round `r` walks the fragments with
/// `STRIDES[r]` starting at `r`.
fn burst() -> Vec<(&'static str, Vec<u8>)> {
    let frags = fragments();
    let n = frags.len();
    let mut out = Vec::with_capacity(n * RETRANSMISSIONS);
    for (round, stride) in STRIDES.into_iter().enumerate() {
        for k in 0..n {
            let seq = (round + k * stride) % n;
            out.push((DEVICE, frags[seq].clone()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_each_round_covers_every_fragment() {
        let burst = burst();
        assert_eq!(burst.len(), FRAGMENTS as usize * RETRANSMISSIONS);
        for round in burst.chunks(FRAGMENTS as usize) {
            let seqs: HashSet<u8> = round
                .iter()
                .map(|(_, f)| FragmentHeader::parse(f).unwrap().sequence)
                .collect();
            assert_eq!(seqs.len(), FRAGMENTS as usize);
        }
    }

    #[test]
    fn test_burst_reassembles_to_payload() {
        let receiver = FragmentReceiver::with_registry(
            GatewayConfig::default().receiver,
            GatewayConfig::default().build_registry().unwrap(),
        );
        let mut done = Vec::new();
        for (i, (device, frag)) in burst().into_iter().enumerate() {
            if let Some(msg) = receiver.process_fragment(device, &frag, Some(i as u64)) {
                done.push(msg);
            }
        }
        assert_eq!(done.len(), 1);
        let msg = &done[0];
        assert!(msg.complete);
        assert_eq!(msg.data, payload());

        let samples = extract_samples(msg).unwrap();
        assert_eq!(samples.len(), SAMPLE_COUNT);
        assert_eq!(samples[0], 1425);

        let stats = receiver.stats();
        assert_eq!(stats.received, 56);
        assert_eq!(stats.duplicate, 42);
        assert_eq!(stats.completed, 1);
    }

    #[test]
    fn test_run_succeeds_with_defaults() {
        run(&GatewayConfig::default()).unwrap();
    }
}
