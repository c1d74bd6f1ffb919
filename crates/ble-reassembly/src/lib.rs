pub mod assembler;
pub mod captouch;
pub mod config;
pub mod dedup;
pub mod fragment;
pub mod gc;
pub mod metrics;
pub mod receiver;
pub mod registry;
pub mod source;
pub mod stats;

#[cfg(test)]
mod testutil;

pub use assembler::{CompletedMessage, StreamState};
pub use captouch::{extract_samples, CaptouchDecoder, CaptouchReading};
pub use config::ReceiverConfig;
pub use dedup::DedupIndex;
pub use fragment::{message_type, normalize_manufacturer_data, FragmentError, FragmentHeader};
pub use gc::GarbageCollector;
pub use receiver::{FragmentReceiver, GcReport};
pub use registry::{DecodeError, DecodedPayload, DecoderRegistry, FnDecoder, JsonDecoder, PayloadDecoder};
pub use source::{start_ingest_workers, RawFragment};
pub use stats::{ReceiverMetrics, ReceiverStats};
