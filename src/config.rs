//! Configuration loading and persistence.
//!
//! One TOML file covers every subsystem. Every field has a default, so a
//! missing file and a partial file both work; unknown sections are ignored
//! for forward compatibility.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::anim::ProceduralConfig;
use crate::error::{Result, WispError};
use crate::gaze::GazeConfig;
use crate::hover::HoverConfig;
use crate::tts::EngineKind;
use crate::viseme::SpectralConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WispConfig {
    pub gateway: GatewayConfig,
    pub tts: TtsConfig,
    pub lipsync: LipSyncConfig,
    pub spectral: SpectralConfig,
    pub gaze: GazeConfig,
    pub hover: HoverConfig,
    pub procedural: ProceduralConfig,
    pub audio: AudioConfig,
}

/// Gateway connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateway WebSocket URL.
    pub url: String,
    /// Auth token, when the gateway requires one.
    pub token: Option<String>,
    /// Client identifier reported in the connect handshake.
    pub client_id: String,
    /// Device identity for signed connects; bare token auth when absent.
    pub device_id: Option<String>,
    /// Shared secret used to sign challenge nonces.
    pub device_secret: Option<String>,
    /// Scopes requested in the connect handshake.
    pub scopes: Vec<String>,
    /// Explicit session key to bind to; `None` auto-binds to the most
    /// recently active session.
    pub session: Option<String>,
    /// Initial reconnect backoff in milliseconds.
    pub base_backoff_ms: u64,
    /// Reconnect backoff ceiling in milliseconds.
    pub max_backoff_ms: u64,
    /// Per-session avatar model overrides, session key to model path.
    pub session_avatars: HashMap<String, String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:18789".to_owned(),
            token: None,
            client_id: "wisp-overlay".to_owned(),
            device_id: None,
            device_secret: None,
            scopes: vec!["sessions.read".to_owned(), "chat".to_owned()],
            session: None,
            base_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            session_avatars: HashMap::new(),
        }
    }
}

/// Speech synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub enabled: bool,
    /// Engine to start with.
    pub engine: EngineKind,
    /// Voice id on the active engine; `None` keeps the engine default.
    pub voice: Option<String>,
    /// Speech rate multiplier for viseme timing estimates.
    pub rate: f32,
    pub local: LocalTtsConfig,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            engine: EngineKind::System,
            voice: None,
            rate: 1.0,
            local: LocalTtsConfig::default(),
        }
    }
}

/// Local ONNX engine assets and tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalTtsConfig {
    /// HuggingFace repo carrying the model, tokenizer, and voices.
    pub repo: String,
    /// Model quantization variant (`fp32`, `fp16`, `q8`, `q4`).
    pub variant: String,
    /// Built-in voice name or absolute path to a custom `.bin`.
    pub voice: String,
    /// Synthesis speed, clamped to 0.5..=2.0 at load.
    pub speed: f32,
}

impl Default for LocalTtsConfig {
    fn default() -> Self {
        Self {
            repo: "onnx-community/Kokoro-82M-v1.0-ONNX".to_owned(),
            variant: "q8".to_owned(),
            voice: "af_heart".to_owned(),
            speed: 1.0,
        }
    }
}

/// Lip-sync tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LipSyncConfig {
    /// Scales mouth openness across all drive modes.
    pub energy_multiplier: f32,
}

impl Default for LipSyncConfig {
    fn default() -> Self {
        Self {
            energy_multiplier: 1.0,
        }
    }
}

/// Audio output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device name; `None` uses the system default.
    pub output_device: Option<String>,
}

impl WispConfig {
    /// Load from a TOML file; missing fields fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| WispError::Config(e.to_string()))
    }

    /// Load the file if it exists, logging and falling back to defaults on
    /// any failure.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::from_file(path) {
            Ok(config) => config,
            Err(err) => {
                warn!("failed to load {}: {err}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Save to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| WispError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default config file path: `<config dir>/wisp/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp/wisp-config"))
            .join("wisp")
            .join("config.toml")
    }
}
