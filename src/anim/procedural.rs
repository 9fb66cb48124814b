//! Procedural idle motion.
//!
//! Keeps the character alive when no motion clips are loaded (or the current
//! phase's pool is empty): sine-wave breathing on the chest, a slow
//! Lissajous sway on the spine, and a timed blink on the reserved blink
//! channel.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::agent::AgentPhase;
use crate::model::{AvatarBone, AvatarModel, BoneRotation, BLINK_CHANNEL};

/// Tuning for procedural motion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProceduralConfig {
    /// Breathing cycles per second.
    pub breath_rate: f32,
    /// Chest pitch amplitude, radians.
    pub breath_amplitude: f32,
    /// Sway amplitude, radians.
    pub sway_amplitude: f32,
    /// Min/max seconds between blinks.
    pub blink_interval: (f32, f32),
    /// Seconds for one full blink (close + open).
    pub blink_duration: f32,
}

impl Default for ProceduralConfig {
    fn default() -> Self {
        Self {
            breath_rate: 0.25,
            breath_amplitude: 0.02,
            sway_amplitude: 0.015,
            blink_interval: (2.0, 6.0),
            blink_duration: 0.24,
        }
    }
}

/// Breathing, sway, and blink generator.
pub struct ProceduralMotion {
    config: ProceduralConfig,
    elapsed: f32,
    phase: AgentPhase,
    rng: StdRng,
    /// Seconds until the next blink starts.
    blink_timer: f32,
    /// Progress through the current blink, `None` between blinks.
    blink_progress: Option<f32>,
}

impl ProceduralMotion {
    pub fn new(config: ProceduralConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    fn with_rng(config: ProceduralConfig, mut rng: StdRng) -> Self {
        let blink_timer = rng.gen_range(config.blink_interval.0..config.blink_interval.1);
        Self {
            config,
            elapsed: 0.0,
            phase: AgentPhase::Idle,
            rng,
            blink_timer,
            blink_progress: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn seeded(config: ProceduralConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    /// Record the agent phase; motion energy varies slightly with it.
    pub fn set_phase(&mut self, phase: AgentPhase) {
        self.phase = phase;
    }

    /// Advance timers.
    pub fn update(&mut self, delta: f32) {
        self.elapsed += delta;

        match self.blink_progress {
            Some(progress) => {
                let next = progress + delta / self.config.blink_duration.max(0.01);
                self.blink_progress = if next >= 1.0 { None } else { Some(next) };
            }
            None => {
                self.blink_timer -= delta;
                if self.blink_timer <= 0.0 {
                    self.blink_progress = Some(0.0);
                    let (lo, hi) = self.config.blink_interval;
                    self.blink_timer = self.rng.gen_range(lo..hi);
                }
            }
        }
    }

    /// Current blink channel weight, 0..=1 triangular envelope.
    pub fn blink_weight(&self) -> f32 {
        match self.blink_progress {
            Some(p) if p < 0.5 => p * 2.0,
            Some(p) => (1.0 - p) * 2.0,
            None => 0.0,
        }
    }

    /// Write breathing, sway, and blink onto the model.
    pub fn apply(&self, model: &mut dyn AvatarModel) {
        let energy = match self.phase {
            AgentPhase::Idle => 1.0,
            AgentPhase::Thinking => 1.2,
            AgentPhase::Speaking => 1.4,
            AgentPhase::Working => 1.2,
        };

        let two_pi = 2.0 * std::f32::consts::PI;
        let breath = (self.elapsed * self.config.breath_rate * two_pi).sin()
            * self.config.breath_amplitude
            * energy;
        model.set_bone_rotation(AvatarBone::Chest, BoneRotation::new(breath, 0.0, 0.0));

        // Lissajous: incommensurate frequencies keep the sway from looping
        // visibly.
        let sway_yaw = (self.elapsed * 0.31 * two_pi).sin() * self.config.sway_amplitude * energy;
        let sway_roll = (self.elapsed * 0.23 * two_pi).sin() * self.config.sway_amplitude * energy;
        model.set_bone_rotation(AvatarBone::Spine, BoneRotation::new(0.0, sway_yaw, sway_roll));

        model.set_blend_weight(BLINK_CHANNEL, self.blink_weight());
    }

    pub fn reset(&mut self) {
        self.elapsed = 0.0;
        self.blink_progress = None;
    }
}
