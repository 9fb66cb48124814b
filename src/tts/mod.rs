//! Text-to-speech orchestration.
//!
//! Engines are polymorphic behind a fixed method set — no capability
//! probing. Two engines ship: a platform system-voice engine (low latency,
//! reliable word boundaries) and a local ONNX model engine (higher latency,
//! sentence batching and prefetch). The controller hides the difference.

mod controller;
mod local;
pub mod segment;
mod system;

pub use controller::{EngineFactory, TtsController, TtsControllerConfig, TtsEvent};
pub use local::LocalTts;
pub use system::SystemVoice;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::audio::AudioTap;
use crate::error::Result;

/// Which engine implementation is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Platform speech binary (`say` / `espeak`).
    #[default]
    System,
    /// Local ONNX model.
    Local,
}

impl EngineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::System => "system",
            EngineKind::Local => "local",
        }
    }
}

/// A selectable voice, engine-specific.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub id: String,
    pub name: String,
}

/// Synthesized audio for one segment; consumed exactly once by playback.
#[derive(Debug, Clone)]
pub struct GeneratedAudio {
    /// f32 mono samples.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// The text this audio was generated from.
    pub source_text: String,
}

impl GeneratedAudio {
    /// Playback duration in milliseconds.
    pub fn duration_ms(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32 * 1000.0
    }
}

/// Fixed engine interface.
///
/// Engine-specific extras (the spectral tap off the playback graph) are part
/// of the shared interface returning an optional value rather than ad hoc
/// downcasting.
#[async_trait]
pub trait TtsEngine: Send + Sync {
    /// Which engine this is.
    fn kind(&self) -> EngineKind;

    /// Synthesize one segment of text.
    ///
    /// # Errors
    ///
    /// Returns an error if synthesis fails; the controller decides the
    /// fallback policy.
    async fn generate(&self, text: &str) -> Result<GeneratedAudio>;

    /// Cooperatively cancel any in-flight synthesis.
    fn cancel(&self);

    /// Voices this engine offers.
    fn voices(&self) -> Vec<Voice>;

    /// Select a voice by id.
    ///
    /// # Errors
    ///
    /// Returns an error for an id this engine does not offer.
    fn set_voice(&self, voice_id: &str) -> Result<()>;

    /// Release all resources (audio nodes, workers, model handles). Every
    /// later call on the engine must be a no-op.
    fn dispose(&self);

    /// Estimated spoken duration used to scale boundary viseme frames.
    fn estimate_duration_ms(&self, text: &str) -> f32 {
        crate::viseme::estimate_duration_ms(text, 160.0)
    }

    /// Tap on the engine's live playback graph, when it has one.
    fn playback_tap(&self) -> Option<AudioTap> {
        None
    }
}
