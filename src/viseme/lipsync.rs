//! Three-mode lip-sync engine.
//!
//! Owns the mouth-shape weights and arbitrates between the three drive
//! sources in one place, in fixed priority order: realtime spectral weights,
//! then the audio-timer viseme queue, then the text timer. Whichever source
//! is active wins for the whole frame; the others never write.

use std::collections::VecDeque;

use crate::model::AvatarModel;
use crate::viseme::{char_to_viseme, CharShape, Viseme, VisemeFrame, ALL_VISEMES};

/// Drive mode selectable by the TTS layer. Realtime is not a mode — it
/// activates implicitly when spectral weights arrive and is disabled by any
/// `set_mode` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LipSyncMode {
    /// Fixed-interval character consumption (50 ms/char).
    #[default]
    Text,
    /// Timed viseme frames from TTS boundary events.
    Audio,
}

/// Interval between consumed characters in text mode.
const TEXT_CHAR_INTERVAL_MS: f32 = 50.0;
/// Audio-timer queue cap; oldest frames dropped on overflow.
const AUDIO_QUEUE_CAP: usize = 100;
/// Exponential blend rate toward targets, per second.
const BLEND_RATE: f32 = 15.0;
/// Below this every channel snaps to zero.
const WEIGHT_EPSILON: f32 = 0.005;

/// Mouth-weight owner for one character.
pub struct LipSyncEngine {
    mode: LipSyncMode,

    // Text-timer state.
    text_buffer: Vec<char>,
    text_read: usize,
    text_timer_ms: f32,
    /// Shape held over consonants.
    text_held: Option<(Viseme, f32)>,

    // Audio-timer state.
    audio_queue: VecDeque<VisemeFrame>,
    audio_elapsed_ms: f32,
    active_frame: Option<VisemeFrame>,

    // Realtime spectral state.
    realtime: Option<[f32; 5]>,

    /// Smoothed per-viseme weights, indexed by [`Viseme::index`].
    weights: [f32; 5],
    energy_multiplier: f32,
    disposed: bool,
}

impl Default for LipSyncEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LipSyncEngine {
    pub fn new() -> Self {
        Self {
            mode: LipSyncMode::Text,
            text_buffer: Vec::new(),
            text_read: 0,
            text_timer_ms: 0.0,
            text_held: None,
            audio_queue: VecDeque::new(),
            audio_elapsed_ms: 0.0,
            active_frame: None,
            realtime: None,
            weights: [0.0; 5],
            energy_multiplier: 1.0,
            disposed: false,
        }
    }

    /// Buffer text for the text-timer drive mode.
    pub fn feed_text(&mut self, text: &str) {
        if self.disposed {
            return;
        }
        self.text_buffer.extend(text.chars());
    }

    /// Enqueue timed viseme frames for the audio-timer drive mode.
    ///
    /// The queue is capped; oldest frames are dropped first on overflow so
    /// a stalled consumer never grows memory unbounded.
    pub fn feed_viseme_frames(&mut self, frames: &[VisemeFrame]) {
        if self.disposed {
            return;
        }
        for frame in frames {
            if self.audio_queue.len() >= AUDIO_QUEUE_CAP {
                self.audio_queue.pop_front();
            }
            self.audio_queue.push_back(*frame);
        }
    }

    /// Direct per-viseme targets from the spectral analyzer.
    ///
    /// Takes priority over both timer modes until the next `set_mode` call.
    pub fn set_realtime_weights(&mut self, weights: [f32; 5]) {
        if self.disposed {
            return;
        }
        self.realtime = Some(weights);
    }

    /// Switch the timer drive mode.
    ///
    /// Clears the *other* mode's queue (no stale carryover) and preserves
    /// the active mode's queue. Always disables realtime drive.
    pub fn set_mode(&mut self, mode: LipSyncMode) {
        self.realtime = None;
        match mode {
            LipSyncMode::Text => {
                self.audio_queue.clear();
                self.audio_elapsed_ms = 0.0;
                self.active_frame = None;
            }
            LipSyncMode::Audio => {
                // Drain the text buffer fully rather than truncating it, so
                // the read index documents what was consumed.
                self.text_read = self.text_buffer.len();
                self.text_timer_ms = 0.0;
                self.text_held = None;
            }
        }
        self.mode = mode;
    }

    pub fn mode(&self) -> LipSyncMode {
        self.mode
    }

    /// Drop everything queued without touching the current mode.
    pub fn clear_queue(&mut self) {
        self.text_buffer.clear();
        self.text_read = 0;
        self.text_held = None;
        self.audio_queue.clear();
        self.active_frame = None;
        self.audio_elapsed_ms = 0.0;
    }

    /// Stop speaking: clear all sources and let weights decay to closed.
    pub fn stop(&mut self) {
        self.clear_queue();
        self.realtime = None;
    }

    /// Global scale on all mouth targets, 0..=1.
    pub fn set_energy_multiplier(&mut self, multiplier: f32) {
        self.energy_multiplier = multiplier.clamp(0.0, 1.0);
    }

    /// Whether any drive source is still producing mouth motion.
    pub fn is_speaking(&self) -> bool {
        if self.realtime.is_some_and(|w| w.iter().any(|&v| v > WEIGHT_EPSILON)) {
            return true;
        }
        match self.mode {
            LipSyncMode::Text => self.text_read < self.text_buffer.len(),
            LipSyncMode::Audio => self.active_frame.is_some() || !self.audio_queue.is_empty(),
        }
    }

    /// Advance timers and smooth weights toward the active source's targets.
    ///
    /// `delta` is seconds since the last frame. Synchronous and
    /// non-blocking; called from the render loop.
    pub fn update(&mut self, delta: f32) {
        if self.disposed {
            return;
        }

        // Single arbitration point: first active source wins.
        let targets = if let Some(realtime) = self.realtime {
            realtime
        } else {
            match self.mode {
                LipSyncMode::Audio => self.audio_targets(delta),
                LipSyncMode::Text => self.text_targets(delta),
            }
        };

        let k = (BLEND_RATE * delta).min(1.0);
        for i in 0..5 {
            let target = (targets[i] * self.energy_multiplier).clamp(0.0, 1.0);
            self.weights[i] += (target - self.weights[i]) * k;
            if self.weights[i] < WEIGHT_EPSILON {
                self.weights[i] = 0.0;
            }
        }
    }

    /// Smoothed weight for one viseme channel.
    pub fn weight(&self, viseme: Viseme) -> f32 {
        self.weights[viseme.index()]
    }

    /// Write weights onto the model with max-merge.
    ///
    /// The expression controller may target the same channels (a viseme like
    /// "aa" can be part of an expression compound); the higher momentary
    /// value wins, never a blind overwrite.
    pub fn apply(&self, model: &mut dyn AvatarModel) {
        for viseme in ALL_VISEMES {
            let channel = viseme.channel();
            let current = model.blend_weight(channel);
            let ours = self.weights[viseme.index()];
            if ours > current {
                model.set_blend_weight(channel, ours);
            }
        }
    }

    /// No-op every public method from here on; guards async callers that
    /// outlive the avatar instance.
    pub fn dispose(&mut self) {
        self.stop();
        self.weights = [0.0; 5];
        self.disposed = true;
    }

    fn audio_targets(&mut self, delta: f32) -> [f32; 5] {
        self.audio_elapsed_ms += delta * 1000.0;

        // Advance past expired frames.
        loop {
            let Some(frame) = self.active_frame else {
                match self.audio_queue.pop_front() {
                    Some(next) => {
                        self.active_frame = Some(next);
                        continue;
                    }
                    None => {
                        self.audio_elapsed_ms = 0.0;
                        break;
                    }
                }
            };
            if self.audio_elapsed_ms >= frame.duration_ms {
                self.audio_elapsed_ms -= frame.duration_ms;
                self.active_frame = self.audio_queue.pop_front();
                if self.active_frame.is_none() {
                    // Queue exhausted: close the mouth and reset the clock.
                    self.audio_elapsed_ms = 0.0;
                    break;
                }
            } else {
                break;
            }
        }

        let mut targets = [0.0; 5];
        if let Some(frame) = self.active_frame {
            targets[frame.viseme.index()] = frame.weight;
        }
        targets
    }

    fn text_targets(&mut self, delta: f32) -> [f32; 5] {
        self.text_timer_ms += delta * 1000.0;

        while self.text_timer_ms >= TEXT_CHAR_INTERVAL_MS && self.text_read < self.text_buffer.len()
        {
            self.text_timer_ms -= TEXT_CHAR_INTERVAL_MS;
            let c = self.text_buffer[self.text_read];
            self.text_read += 1;
            match char_to_viseme(c) {
                CharShape::Vowel(v) => self.text_held = Some((v, 0.9)),
                CharShape::Consonant => {
                    if let Some((v, _)) = self.text_held {
                        self.text_held = Some((v, 0.4));
                    }
                }
                CharShape::Silence => self.text_held = None,
            }
        }

        if self.text_read >= self.text_buffer.len() {
            // Cap the timer so late-arriving text doesn't burst-consume.
            self.text_timer_ms = self.text_timer_ms.min(TEXT_CHAR_INTERVAL_MS);
            if self.text_read == self.text_buffer.len() && self.text_buffer.len() > 4096 {
                // Compact a fully drained buffer.
                self.text_buffer.clear();
                self.text_read = 0;
            }
            if self.text_read >= self.text_buffer.len() && self.text_held.is_some() {
                // Nothing left to say.
                self.text_held = None;
            }
        }

        let mut targets = [0.0; 5];
        if let Some((v, w)) = self.text_held {
            targets[v.index()] = w;
        }
        targets
    }

    #[cfg(test)]
    fn audio_queue_len(&self) -> usize {
        self.audio_queue.len()
    }

    #[cfg(test)]
    fn text_fully_drained(&self) -> bool {
        self.text_read == self.text_buffer.len()
    }
}
