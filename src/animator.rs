//! Per-avatar animation composition.
//!
//! One `Animator` owns every animation subsystem for one character and runs
//! them in a fixed order each frame: hover awareness feeds the expression
//! overlay and gaze sensitivity, the spectral analyzer feeds realtime mouth
//! weights off the playback tap, then clip selection, expression, lip-sync,
//! and gaze write onto the model. Procedural motion covers any phase without
//! clips. The lip-sync engine is shared with the TTS controller, which
//! drives its mode and queues from the audio side.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::agent::AgentPhase;
use crate::anim::{AnimationStateMachine, ProceduralMotion};
use crate::audio::AudioTap;
use crate::config::WispConfig;
use crate::expression::{Expression, ExpressionController};
use crate::gaze::GazeController;
use crate::hover::{AwarenessState, HoverAwareness};
use crate::model::AvatarModel;
use crate::viseme::{LipSyncEngine, SpectralAnalyzer, ALL_VISEMES};

/// Empty tap drains tolerated before silence is assumed.
const TAP_STARVE_GRACE_SECS: f32 = 0.25;
/// Zero samples shifted into the analyzer window per starved frame.
const SILENT_CHUNK: [f32; 512] = [0.0; 512];

/// Composition root for one avatar's animation stack.
pub struct Animator {
    model: Option<Box<dyn AvatarModel>>,
    lipsync: Arc<Mutex<LipSyncEngine>>,
    spectral: SpectralAnalyzer,
    /// Live playback tap from the TTS controller, once wired.
    tap: Option<AudioTap>,
    /// Whether the spectral path currently drives the mouth.
    realtime_active: bool,
    /// Seconds the tap has been drained empty.
    tap_starved_secs: f32,
    expression: ExpressionController,
    gaze: GazeController,
    hover: HoverAwareness,
    machine: AnimationStateMachine,
    procedural: ProceduralMotion,
    phase: AgentPhase,
}

impl Animator {
    pub fn new(config: &WispConfig) -> Self {
        let mut lipsync = LipSyncEngine::new();
        lipsync.set_energy_multiplier(config.lipsync.energy_multiplier);

        Self {
            model: None,
            lipsync: Arc::new(Mutex::new(lipsync)),
            spectral: SpectralAnalyzer::new(config.spectral.clone()),
            tap: None,
            realtime_active: false,
            tap_starved_secs: 0.0,
            expression: ExpressionController::new(),
            gaze: GazeController::new(config.gaze.clone()),
            hover: HoverAwareness::new(config.hover.clone()),
            machine: AnimationStateMachine::new(),
            procedural: ProceduralMotion::new(config.procedural.clone()),
            phase: AgentPhase::Idle,
        }
    }

    /// Handle to the shared lip-sync engine for the TTS controller.
    pub fn lipsync_handle(&self) -> Arc<Mutex<LipSyncEngine>> {
        Arc::clone(&self.lipsync)
    }

    /// Wire the playback tap the spectral analyzer reads each frame.
    pub fn set_playback_tap(&mut self, tap: AudioTap) {
        self.tap = Some(tap);
    }

    /// Install a freshly loaded model, resetting every subsystem.
    ///
    /// `None` removes the current model; updates keep running so async
    /// callers during the load race stay safe.
    pub fn set_model(&mut self, model: Option<Box<dyn AvatarModel>>) {
        self.machine.reset(self.model.as_deref_mut());
        self.expression.reset();
        self.gaze.reset();
        self.hover.reset();
        self.procedural.reset();
        if let Ok(mut lipsync) = self.lipsync.lock() {
            lipsync.stop();
        }
        if let Some(model) = &model {
            self.gaze.set_format(model.format());
        }
        self.phase = AgentPhase::Idle;
        self.model = model;
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Load the motion clip pools.
    pub fn init_animations(
        &mut self,
        pools: std::collections::HashMap<AgentPhase, Vec<String>>,
    ) {
        self.machine.init(pools);
    }

    /// Agent phase transition: picks a clip from the new pool (or records
    /// the phase for the procedural fallback).
    pub fn set_phase(&mut self, phase: AgentPhase) {
        if phase != self.phase {
            debug!(?phase, "animator phase change");
        }
        self.phase = phase;
        self.machine.set_phase(phase, self.model.as_deref_mut());
        self.procedural.set_phase(phase);
    }

    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    pub fn set_expression(&mut self, expression: Expression) {
        self.expression.set_expression(expression);
    }

    pub fn expression(&self) -> Expression {
        self.expression.expression()
    }

    /// Hover boolean from the overlay window's hit test.
    pub fn set_hovering(&mut self, hovering: bool) {
        self.hover.set_hovering(hovering);
    }

    pub fn awareness(&self) -> AwarenessState {
        self.hover.state()
    }

    /// Cursor position in screen pixels.
    pub fn set_gaze_screen_position(&mut self, x: f32, y: f32, screen_w: f32, screen_h: f32) {
        self.gaze.set_screen_position(x, y, screen_w, screen_h);
    }

    /// Buffer text for the text-timer mouth drive (TTS disabled path).
    pub fn feed_lip_sync_text(&self, text: &str) {
        if let Ok(mut lipsync) = self.lipsync.lock() {
            lipsync.feed_text(text);
        }
    }

    /// Silence the mouth immediately.
    pub fn stop_lip_sync(&self) {
        if let Ok(mut lipsync) = self.lipsync.lock() {
            lipsync.stop();
        }
    }

    /// Whether any lip-sync drive source is still producing motion.
    pub fn is_speaking(&self) -> bool {
        self.lipsync
            .lock()
            .map(|lipsync| lipsync.is_speaking())
            .unwrap_or(false)
    }

    /// Advance every subsystem by `delta` seconds and write onto the model.
    ///
    /// Call once per render frame. Safe without a model; the subsystems
    /// still advance so state is current when one arrives.
    pub fn update(&mut self, delta: f32) {
        self.hover.update(delta);
        self.expression.set_overlay(self.hover.expression_overlay());
        self.gaze.set_multiplier(self.hover.gaze_multiplier());

        self.drive_spectral(delta);

        if let Ok(mut lipsync) = self.lipsync.lock() {
            lipsync.update(delta);
        }
        self.expression.update(delta);
        self.gaze.update(delta);
        self.procedural.update(delta);

        let Some(model) = self.model.as_deref_mut() else {
            return;
        };

        self.machine.update(model);
        if !self.machine.has_clips() || self.machine.phase_pool_empty() {
            self.procedural.apply(model);
        }

        // Viseme channels are rewritten from scratch each frame; expression
        // writes first so lip-sync max-merge keeps the louder of the two.
        for viseme in ALL_VISEMES {
            model.set_blend_weight(viseme.channel(), 0.0);
        }
        self.expression.apply(model);
        if let Ok(lipsync) = self.lipsync.lock() {
            lipsync.apply(model);
        }
        self.gaze.apply(model);
    }

    /// Drain the playback tap into the spectral analyzer and hand any live
    /// weights to the lip-sync engine.
    ///
    /// Zeros are pushed exactly once after speech dies down; the mouth
    /// closes and the timer modes regain control on the next `set_mode`.
    fn drive_spectral(&mut self, delta: f32) {
        let Some(tap) = &self.tap else {
            return;
        };
        let samples = tap.drain();
        if samples.is_empty() {
            self.tap_starved_secs += delta;
        } else {
            self.tap_starved_secs = 0.0;
        }

        // An empty drain usually just means the frame outpaced the audio
        // callback; reuse the last window. Past the grace period the
        // pipeline has actually gone quiet, so shift silence in and let the
        // analyzer's gating close the mouth.
        let weights = if samples.is_empty() && self.tap_starved_secs >= TAP_STARVE_GRACE_SECS {
            self.spectral.process(&SILENT_CHUNK, delta)
        } else {
            self.spectral.process(&samples, delta)
        };
        let live = weights.iter().any(|&w| w > 0.0);

        if live {
            self.realtime_active = true;
            if let Ok(mut lipsync) = self.lipsync.lock() {
                lipsync.set_realtime_weights(weights);
            }
        } else if self.realtime_active {
            self.realtime_active = false;
            if let Ok(mut lipsync) = self.lipsync.lock() {
                lipsync.set_realtime_weights([0.0; 5]);
            }
        }
    }

    /// Tear down every subsystem; the animator is inert afterwards.
    pub fn dispose(&mut self) {
        self.machine.reset(self.model.as_deref_mut());
        if let Ok(mut lipsync) = self.lipsync.lock() {
            lipsync.dispose();
        }
        self.spectral.dispose();
        self.expression.dispose();
        self.model = None;
    }
}
