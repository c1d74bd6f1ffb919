//! `bleframe.toml` configuration.

use anyhow::{bail, Context, Result};
use ble_reassembly::{message_type, CaptouchDecoder, DecoderRegistry, JsonDecoder, ReceiverConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Reassembly timeouts and bounds.
    #[serde(default)]
    pub receiver: ReceiverConfig,
    /// Built-in payload decoders to register: "captouch" (0xDD), "json" (0x03).
    #[serde(default = "GatewayConfig::default_decoders")]
    pub decoders: Vec<String>,
}

impl GatewayConfig {
    fn default_decoders() -> Vec<String> {
        vec!["captouch".into(), "json".into()]
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("no config at {}; using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let cfg: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(cfg)
    }

    /// Returns the config printed by `bleframe init`.
    pub fn default_example() -> Self {
        Self::default()
    }

    /// Registry holding the decoders named in `decoders`.
    pub fn build_registry(&self) -> Result<DecoderRegistry> {
        let registry = DecoderRegistry::new();
        for name in &self.decoders {
            match name.as_str() {
                "captouch" => {
                    registry.register(message_type::CAPTOUCH, Arc::new(CaptouchDecoder));
                }
                "json" => {
                    registry.register(message_type::JSON, Arc::new(JsonDecoder));
                }
                other => bail!("unknown decoder '{}' (expected \"captouch\" or \"json\")", other),
            }
        }
        Ok(registry)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            receiver: ReceiverConfig::default(),
            decoders: Self::default_decoders(),
        }
    }
}
