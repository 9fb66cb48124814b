//! Audio output for synthesized speech.
//!
//! Exactly one playback pipeline exists per avatar instance. The sink
//! exposes a tap — a bounded ring of recently played samples — which the
//! spectral analyzer reads each frame. The tap sits on the live output
//! path, not the source buffer, so streamed segments analyse correctly.

mod playback;

pub use playback::CpalSink;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::Result;
use crate::tts::GeneratedAudio;

/// Upper bound on buffered tap samples (~0.5 s at 48 kHz).
const TAP_CAP: usize = 24_000;

/// Shared ring of recently played samples.
#[derive(Clone, Default)]
pub struct AudioTap {
    inner: Arc<Mutex<VecDeque<f32>>>,
}

impl AudioTap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append played samples, dropping the oldest past the cap.
    pub fn push(&self, samples: &[f32]) {
        let Ok(mut ring) = self.inner.lock() else {
            return;
        };
        for &sample in samples {
            if ring.len() >= TAP_CAP {
                ring.pop_front();
            }
            ring.push_back(sample);
        }
    }

    /// Take everything buffered since the last drain.
    pub fn drain(&self) -> Vec<f32> {
        match self.inner.lock() {
            Ok(mut ring) => ring.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Drop buffered samples without reading them.
    pub fn clear(&self) {
        if let Ok(mut ring) = self.inner.lock() {
            ring.clear();
        }
    }
}

/// Playback output owned by the TTS controller.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play one generated segment to completion (or until stopped).
    ///
    /// # Errors
    ///
    /// Returns an error if the output stream cannot be created or started.
    async fn play(&self, audio: &GeneratedAudio) -> Result<()>;

    /// Interrupt the current segment, if any. Idempotent. The sink swallows
    /// every `play` until `resume` re-arms it, so a play racing the stop
    /// cannot sound stale audio.
    fn stop(&self);

    /// Re-arm playback after a `stop`.
    fn resume(&self);

    /// The live-output sample tap.
    fn tap(&self) -> AudioTap;
}
