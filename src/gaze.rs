//! Cursor-driven gaze with procedural saccades.
//!
//! Two independently smoothed tracks: eyes snap toward a new point of
//! interest quickly, the head drifts after them more deliberately. A pixel
//! deadzone suppresses micro-jitter and an idle timeout recenters both
//! tracks so the saccade generator can take over instead of pinning gaze to
//! a stale cursor position.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::model::{AvatarBone, AvatarModel, BoneRotation, ModelFormat};

/// Tuning for the gaze controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GazeConfig {
    /// Eye smoothing rate, per second.
    pub eye_rate: f32,
    /// Head smoothing rate, per second.
    pub head_rate: f32,
    /// Maximum deflection of either track, degrees.
    pub max_angle_deg: f32,
    /// Cursor movement below this many pixels does not retarget.
    pub deadzone_px: f32,
    /// Seconds without cursor movement before gaze decays to center.
    pub idle_timeout_secs: f32,
    /// Min/max seconds between idle saccades.
    pub saccade_interval: (f32, f32),
    /// Saccade magnitude in radians (eyes only).
    pub saccade_magnitude: f32,
}

impl Default for GazeConfig {
    fn default() -> Self {
        Self {
            eye_rate: 10.0,
            head_rate: 4.0,
            max_angle_deg: 20.0,
            deadzone_px: 50.0,
            idle_timeout_secs: 3.0,
            saccade_interval: (0.8, 3.2),
            saccade_magnitude: 0.06,
        }
    }
}

/// Head and eye rotation producer for one character.
pub struct GazeController {
    config: GazeConfig,
    /// Signed pitch multiplier for the loaded model format.
    pitch_sign: f32,
    /// Normalized target, -1..=1 from screen center.
    target: (f32, f32),
    /// Last accepted cursor position in pixels.
    last_cursor: Option<(f32, f32)>,
    idle_elapsed: f32,
    /// Sensitivity from hover awareness, 1.0 baseline.
    multiplier: f32,

    // Smoothed outputs, radians (yaw, pitch).
    eye: (f32, f32),
    head: (f32, f32),

    // Saccade generator.
    rng: StdRng,
    saccade_timer: f32,
    saccade: (f32, f32),
}

impl GazeController {
    pub fn new(config: GazeConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    fn with_rng(config: GazeConfig, mut rng: StdRng) -> Self {
        let saccade_timer = rng.gen_range(config.saccade_interval.0..config.saccade_interval.1);
        Self {
            config,
            pitch_sign: ModelFormat::default().pitch_sign(),
            target: (0.0, 0.0),
            last_cursor: None,
            idle_elapsed: 0.0,
            multiplier: 1.0,
            eye: (0.0, 0.0),
            head: (0.0, 0.0),
            rng,
            saccade_timer,
            saccade: (0.0, 0.0),
        }
    }

    #[cfg(test)]
    pub(crate) fn seeded(config: GazeConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    /// Record the model format once at load time.
    pub fn set_format(&mut self, format: ModelFormat) {
        self.pitch_sign = format.pitch_sign();
    }

    /// Hover-awareness gaze sensitivity, 1.0 baseline.
    pub fn set_multiplier(&mut self, multiplier: f32) {
        self.multiplier = multiplier.max(0.0);
    }

    /// Feed a cursor position in screen pixels.
    ///
    /// Movement inside the deadzone is ignored entirely: it neither
    /// retargets nor resets the idle timer.
    pub fn set_screen_position(&mut self, x: f32, y: f32, screen_w: f32, screen_h: f32) {
        if screen_w <= 0.0 || screen_h <= 0.0 {
            return;
        }
        if let Some((lx, ly)) = self.last_cursor {
            let dist = ((x - lx).powi(2) + (y - ly).powi(2)).sqrt();
            if dist < self.config.deadzone_px {
                return;
            }
        }
        self.last_cursor = Some((x, y));
        self.idle_elapsed = 0.0;
        // Normalize to -1..=1 from screen center; screen y grows downward.
        self.target = (
            (x / screen_w * 2.0 - 1.0).clamp(-1.0, 1.0),
            (y / screen_h * 2.0 - 1.0).clamp(-1.0, 1.0),
        );
    }

    /// Advance smoothing, idle decay, and the saccade generator.
    pub fn update(&mut self, delta: f32) {
        self.idle_elapsed += delta;

        let idle = self.idle_elapsed >= self.config.idle_timeout_secs;
        if idle {
            // Decay toward center so saccades read as natural wandering.
            self.target = (0.0, 0.0);
        }

        self.saccade_timer -= delta;
        if self.saccade_timer <= 0.0 {
            let (lo, hi) = self.config.saccade_interval;
            self.saccade_timer = self.rng.gen_range(lo..hi);
            let m = self.config.saccade_magnitude;
            self.saccade = if idle {
                (self.rng.gen_range(-m..m), self.rng.gen_range(-m..m))
            } else {
                // Tracking a live cursor: micro-saccades only.
                (self.rng.gen_range(-m..m) * 0.3, self.rng.gen_range(-m..m) * 0.3)
            };
        }

        let max = self.config.max_angle_deg.to_radians();
        let gain = (self.multiplier).min(2.0);
        let eye_target = (
            (self.target.0 * max * gain + self.saccade.0).clamp(-max, max),
            (self.target.1 * max * gain + self.saccade.1).clamp(-max, max),
        );
        let head_target = (
            (self.target.0 * max * gain).clamp(-max, max),
            (self.target.1 * max * gain).clamp(-max, max),
        );

        let ke = (self.config.eye_rate * delta).min(1.0);
        let kh = (self.config.head_rate * delta).min(1.0);
        self.eye.0 += (eye_target.0 - self.eye.0) * ke;
        self.eye.1 += (eye_target.1 - self.eye.1) * ke;
        self.head.0 += (head_target.0 - self.head.0) * kh;
        self.head.1 += (head_target.1 - self.head.1) * kh;
    }

    /// Smoothed eye rotation (yaw, pitch) in radians.
    pub fn eye_rotation(&self) -> (f32, f32) {
        self.eye
    }

    /// Smoothed head rotation (yaw, pitch) in radians.
    pub fn head_rotation(&self) -> (f32, f32) {
        self.head
    }

    /// Write head and eye bone rotations onto the model.
    pub fn apply(&self, model: &mut dyn AvatarModel) {
        let head = BoneRotation::new(self.head.1 * self.pitch_sign, self.head.0, 0.0);
        model.set_bone_rotation(AvatarBone::Head, head);

        let eye = BoneRotation::new(self.eye.1 * self.pitch_sign, self.eye.0, 0.0);
        model.set_bone_rotation(AvatarBone::LeftEye, eye);
        model.set_bone_rotation(AvatarBone::RightEye, eye);
    }

    /// Zero all smoothed state (model swap).
    pub fn reset(&mut self) {
        self.target = (0.0, 0.0);
        self.last_cursor = None;
        self.idle_elapsed = 0.0;
        self.eye = (0.0, 0.0);
        self.head = (0.0, 0.0);
        self.saccade = (0.0, 0.0);
        self.multiplier = 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> GazeController {
        GazeController::seeded(GazeConfig::default(), 7)
    }

    #[test]
    fn deadzone_suppresses_micro_jitter() {
        let mut gaze = controller();
        gaze.set_screen_position(960.0, 540.0, 1920.0, 1080.0);
        let target = gaze.target;
        // 10 px wiggle: inside the 50 px deadzone.
        gaze.set_screen_position(966.0, 548.0, 1920.0, 1080.0);
        assert_eq!(gaze.target, target);
        // 200 px jump: retargets.
        gaze.set_screen_position(1160.0, 540.0, 1920.0, 1080.0);
        assert!(gaze.target.0 > target.0);
    }

    #[test]
    fn eyes_lead_the_head() {
        let mut gaze = controller();
        gaze.set_screen_position(1920.0, 540.0, 1920.0, 1080.0);
        for _ in 0..6 {
            gaze.update(1.0 / 60.0);
        }
        let (eye_yaw, _) = gaze.eye_rotation();
        let (head_yaw, _) = gaze.head_rotation();
        assert!(
            eye_yaw.abs() > head_yaw.abs(),
            "eyes {eye_yaw} should lead head {head_yaw}"
        );
    }

    #[test]
    fn idle_timeout_recenters_gaze() {
        let mut gaze = controller();
        gaze.set_screen_position(1920.0, 1080.0, 1920.0, 1080.0);
        for _ in 0..30 {
            gaze.update(1.0 / 60.0);
        }
        assert!(gaze.eye_rotation().0.abs() > 0.1);

        // Past the 3 s idle timeout the target decays to center.
        for _ in 0..600 {
            gaze.update(1.0 / 60.0);
        }
        let (yaw, _) = gaze.head_rotation();
        assert!(yaw.abs() < 0.05, "head yaw {yaw} not recentered");
    }

    #[test]
    fn saccades_fire_during_idle() {
        let mut gaze = controller();
        let mut saw_offset = false;
        // 10 simulated seconds of idle.
        for _ in 0..600 {
            gaze.update(1.0 / 60.0);
            if gaze.saccade != (0.0, 0.0) {
                saw_offset = true;
            }
        }
        assert!(saw_offset);
    }

    #[test]
    fn multiplier_widens_deflection() {
        let mut low = controller();
        let mut high = controller();
        high.set_multiplier(1.5);
        for gaze in [&mut low, &mut high] {
            gaze.set_screen_position(1440.0, 540.0, 1920.0, 1080.0);
            for _ in 0..120 {
                gaze.update(1.0 / 60.0);
            }
        }
        assert!(high.eye_rotation().0 > low.eye_rotation().0);
    }

    #[test]
    fn pitch_sign_follows_model_format() {
        use crate::test_utils::StubModel;

        let mut gaze = controller();
        gaze.set_format(ModelFormat::Vrm1);
        gaze.set_screen_position(960.0, 1080.0, 1920.0, 1080.0);
        for _ in 0..120 {
            gaze.update(1.0 / 60.0);
        }
        let mut model = StubModel::new();
        gaze.apply(&mut model);
        let vrm1_pitch = model.bone(AvatarBone::Head).pitch;

        gaze.set_format(ModelFormat::Vrm0);
        gaze.apply(&mut model);
        let vrm0_pitch = model.bone(AvatarBone::Head).pitch;
        assert!((vrm1_pitch + vrm0_pitch).abs() < 1e-5);
        assert!(vrm1_pitch != 0.0);
    }

    #[test]
    fn reset_zeroes_everything() {
        let mut gaze = controller();
        gaze.set_screen_position(1920.0, 1080.0, 1920.0, 1080.0);
        for _ in 0..60 {
            gaze.update(1.0 / 60.0);
        }
        gaze.reset();
        assert_eq!(gaze.eye_rotation(), (0.0, 0.0));
        assert_eq!(gaze.head_rotation(), (0.0, 0.0));
    }
}
