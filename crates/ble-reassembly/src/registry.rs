//! Payload decoders keyed by message type tag.
//!
//! Decoders run once per completed stream. A failing decoder never blocks
//! delivery of the reassembled bytes; the caller just gets no `decoded` field.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::captouch::CaptouchReading;
use crate::fragment::message_type;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("incomplete payload: {actual}/{expected} bytes")]
    Incomplete { expected: usize, actual: usize },

    #[error("oversized payload: {actual}/{expected} bytes")]
    Oversized { expected: usize, actual: usize },

    #[error("invalid payload: {0}")]
    Invalid(String),
}

/// Structured result of a successful payload decode.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DecodedPayload {
    Captouch(CaptouchReading),
    Json(serde_json::Value),
}

/// Turns the reassembled bytes of one message type into a [`DecodedPayload`].
pub trait PayloadDecoder: Send + Sync {
    fn name(&self) -> &'static str;
    fn decode(&self, data: &[u8]) -> Result<DecodedPayload, DecodeError>;
}

/// Adapts a plain function or closure into a [`PayloadDecoder`].
pub struct FnDecoder<F> {
    name: &'static str,
    f: F,
}

impl<F> FnDecoder<F>
where
    F: Fn(&[u8]) -> Result<DecodedPayload, DecodeError> + Send + Sync,
{
    pub fn new(name: &'static str, f: F) -> Self {
        Self { name, f }
    }
}

impl<F> PayloadDecoder for FnDecoder<F>
where
    F: Fn(&[u8]) -> Result<DecodedPayload, DecodeError> + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn decode(&self, data: &[u8]) -> Result<DecodedPayload, DecodeError> {
        (self.f)(data)
    }
}

/// UTF-8 JSON documents (message type 0x03).
pub struct JsonDecoder;

impl PayloadDecoder for JsonDecoder {
    fn name(&self) -> &'static str {
        "json"
    }

    fn decode(&self, data: &[u8]) -> Result<DecodedPayload, DecodeError> {
        serde_json::from_slice(data)
            .map(DecodedPayload::Json)
            .map_err(|e| DecodeError::Invalid(e.to_string()))
    }
}

/// Concurrent tag → decoder map. Read-mostly: registration normally happens at
/// startup, lookups happen on every completed stream from any ingest thread.
#[derive(Default)]
pub struct DecoderRegistry {
    decoders: DashMap<u8, Arc<dyn PayloadDecoder>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in captouch and JSON decoders.
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register(message_type::CAPTOUCH, Arc::new(crate::captouch::CaptouchDecoder));
        registry.register(message_type::JSON, Arc::new(JsonDecoder));
        registry
    }

    /// Associate `decoder` with `message_type`, returning the decoder it replaced.
    pub fn register(
        &self,
        message_type: u8,
        decoder: Arc<dyn PayloadDecoder>,
    ) -> Option<Arc<dyn PayloadDecoder>> {
        tracing::info!(
            decoder = decoder.name(),
            "registered decoder for message type 0x{:02X}",
            message_type
        );
        self.decoders.insert(message_type, decoder)
    }

    pub fn contains(&self, message_type: u8) -> bool {
        self.decoders.contains_key(&message_type)
    }

    /// Decode `data` with the decoder for `message_type`.
    /// Returns `None` when no decoder is registered for the tag.
    pub fn decode(
        &self,
        message_type: u8,
        data: &[u8],
    ) -> Option<Result<DecodedPayload, DecodeError>> {
        // Clone the Arc so the shard lock is not held while the decoder runs.
        let decoder = self.decoders.get(&message_type).map(|d| d.value().clone())?;
        Some(decoder.decode(data))
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}
