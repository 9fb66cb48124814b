//! Shared test utilities used across multiple test modules.
//!
//! Consolidates the recording model stub and the scripted TTS engine stub
//! used by the viseme, expression, gaze, anim, tts, and animator tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::audio::{AudioSink, AudioTap};
use crate::error::{Result, WispError};
use crate::model::{AvatarBone, AvatarModel, BoneRotation, ModelFormat};
use crate::tts::{EngineKind, GeneratedAudio, TtsEngine, Voice};

/// Recording implementation of [`AvatarModel`].
///
/// Stores every write so tests can assert on blend weights, bone rotations,
/// and mixer calls; `finish_clip` simulates a natural clip finish.
pub struct StubModel {
    pub format: ModelFormat,
    pub blend: HashMap<String, f32>,
    pub bones: HashMap<AvatarBone, BoneRotation>,
    /// `(clip, fade_secs, looping, hold_last_frame)` per crossfade call.
    pub crossfades: Vec<(String, f32, bool, bool)>,
    pub stopped: bool,
    finished: VecDeque<String>,
}

impl Default for StubModel {
    fn default() -> Self {
        Self::new()
    }
}

impl StubModel {
    pub fn new() -> Self {
        Self {
            format: ModelFormat::Vrm0,
            blend: HashMap::new(),
            bones: HashMap::new(),
            crossfades: Vec::new(),
            stopped: false,
            finished: VecDeque::new(),
        }
    }

    /// Queue a natural-finish event for the named clip.
    pub fn finish_clip(&mut self, clip: &str) {
        self.finished.push_back(clip.to_owned());
    }

    /// Last rotation written to a bone (zero when untouched).
    pub fn bone(&self, bone: AvatarBone) -> BoneRotation {
        self.bones.get(&bone).copied().unwrap_or_default()
    }
}

impl AvatarModel for StubModel {
    fn format(&self) -> ModelFormat {
        self.format
    }

    fn has_blend_channel(&self, _name: &str) -> bool {
        true
    }

    fn blend_weight(&self, name: &str) -> f32 {
        self.blend.get(name).copied().unwrap_or(0.0)
    }

    fn set_blend_weight(&mut self, name: &str, weight: f32) {
        self.blend.insert(name.to_owned(), weight.clamp(0.0, 1.0));
    }

    fn set_bone_rotation(&mut self, bone: AvatarBone, rotation: BoneRotation) {
        self.bones.insert(bone, rotation);
    }

    fn crossfade_to(&mut self, clip: &str, fade_secs: f32, looping: bool, hold_last_frame: bool) {
        self.crossfades
            .push((clip.to_owned(), fade_secs, looping, hold_last_frame));
    }

    fn take_finished_clip(&mut self) -> Option<String> {
        self.finished.pop_front()
    }

    fn stop_clips(&mut self, _fade_secs: f32) {
        self.stopped = true;
    }
}

/// Scripted [`TtsEngine`] that records synthesis requests.
///
/// Generation returns a short silent buffer immediately, or fails when
/// `fail` is set (for fallback tests).
pub struct StubEngine {
    kind: EngineKind,
    pub synthesized: Arc<std::sync::Mutex<Vec<String>>>,
    pub cancelled: Arc<AtomicUsize>,
    pub disposed: Arc<AtomicBool>,
    pub fail: bool,
    /// Artificial generation latency, for in-flight cancellation tests.
    pub delay_ms: u64,
    voice: std::sync::Mutex<Option<String>>,
}

impl StubEngine {
    pub fn new(kind: EngineKind) -> Self {
        Self {
            kind,
            synthesized: Arc::new(std::sync::Mutex::new(Vec::new())),
            cancelled: Arc::new(AtomicUsize::new(0)),
            disposed: Arc::new(AtomicBool::new(false)),
            fail: false,
            delay_ms: 0,
            voice: std::sync::Mutex::new(None),
        }
    }

    pub fn failing(kind: EngineKind) -> Self {
        Self {
            fail: true,
            ..Self::new(kind)
        }
    }

    pub fn slow(kind: EngineKind, delay_ms: u64) -> Self {
        Self {
            delay_ms,
            ..Self::new(kind)
        }
    }

    /// Texts synthesized so far.
    pub fn texts(&self) -> Vec<String> {
        self.synthesized
            .lock()
            .map(|texts| texts.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TtsEngine for StubEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    async fn generate(&self, text: &str) -> Result<GeneratedAudio> {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail {
            return Err(WispError::Tts("stub generation failure".to_owned()));
        }
        if let Ok(mut texts) = self.synthesized.lock() {
            texts.push(text.to_owned());
        }
        Ok(GeneratedAudio {
            samples: vec![0.0; 240],
            sample_rate: 24_000,
            source_text: text.to_owned(),
        })
    }

    fn cancel(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }

    fn voices(&self) -> Vec<Voice> {
        vec![Voice {
            id: "stub-voice".to_owned(),
            name: "Stub Voice".to_owned(),
        }]
    }

    fn set_voice(&self, voice_id: &str) -> Result<()> {
        if voice_id != "stub-voice" {
            return Err(WispError::Tts(format!("unknown voice: {voice_id}")));
        }
        if let Ok(mut voice) = self.voice.lock() {
            *voice = Some(voice_id.to_owned());
        }
        Ok(())
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

/// [`AudioSink`] that records what was played and never touches a device.
///
/// Honors the stop/resume contract: once stopped, plays are swallowed until
/// the next `resume`.
pub struct NullSink {
    tap: AudioTap,
    pub played: Arc<std::sync::Mutex<Vec<String>>>,
    pub stops: Arc<AtomicUsize>,
    stopped: AtomicBool,
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl NullSink {
    pub fn new() -> Self {
        Self {
            tap: AudioTap::new(),
            played: Arc::new(std::sync::Mutex::new(Vec::new())),
            stops: Arc::new(AtomicUsize::new(0)),
            stopped: AtomicBool::new(false),
        }
    }

    /// Source texts played so far, in order.
    pub fn played_texts(&self) -> Vec<String> {
        self.played
            .lock()
            .map(|texts| texts.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&self, audio: &GeneratedAudio) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(());
        }
        if let Ok(mut played) = self.played.lock() {
            played.push(audio.source_text.clone());
        }
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }

    fn tap(&self) -> AudioTap {
        self.tap.clone()
    }
}
