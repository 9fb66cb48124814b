//! Opaque avatar model handle.
//!
//! The renderer owns the actual 3D model (VRM/glTF loading is out of scope
//! here); animation subsystems talk to it through the small capability
//! surface below: named blend-shape channels, a few named bones, and a clip
//! mixer. Every subsystem must tolerate running without a model during the
//! load race.

/// Reserved blend channel for procedural blinking.
///
/// Expression compounds must never target this channel — blinking is owned
/// by the procedural motion layer.
pub const BLINK_CHANNEL: &str = "blink";

/// Model format version, detected once at load time.
///
/// VRM 0.x and 1.0 differ in forward-axis handedness, which flips the sign
/// of pitch applied to look-at bones. Detected once and threaded through as
/// a signed multiplier, never re-detected per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelFormat {
    /// VRM 0.x: model faces +Z, pitch is inverted relative to screen space.
    #[default]
    Vrm0,
    /// VRM 1.0: model faces -Z.
    Vrm1,
}

impl ModelFormat {
    /// Signed multiplier applied to gaze pitch for this format.
    pub fn pitch_sign(self) -> f32 {
        match self {
            ModelFormat::Vrm0 => -1.0,
            ModelFormat::Vrm1 => 1.0,
        }
    }
}

/// Bones the animation core drives directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AvatarBone {
    Head,
    LeftEye,
    RightEye,
    Chest,
    Spine,
}

/// Euler rotation in radians applied to a bone.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoneRotation {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

impl BoneRotation {
    pub fn new(pitch: f32, yaw: f32, roll: f32) -> Self {
        Self { pitch, yaw, roll }
    }
}

/// Capability surface of a loaded character model.
///
/// Implemented by the renderer's model wrapper; a stub implementation lives
/// in [`crate::test_utils`] for unit tests.
pub trait AvatarModel: Send {
    /// Format version detected at load time.
    fn format(&self) -> ModelFormat;

    /// Whether the model exposes a blend channel with this name.
    fn has_blend_channel(&self, name: &str) -> bool;

    /// Current weight of a blend channel (0 when absent).
    fn blend_weight(&self, name: &str) -> f32;

    /// Write a blend channel weight (clamped to 0..=1 by the implementor).
    fn set_blend_weight(&mut self, name: &str, weight: f32);

    /// Apply a rotation to a named bone. Unknown bones are a no-op.
    fn set_bone_rotation(&mut self, bone: AvatarBone, rotation: BoneRotation);

    /// Cross-fade the mixer to the named clip over `fade_secs`.
    ///
    /// `looping` clips repeat; non-looping clips with `hold_last_frame`
    /// clamp on their final frame instead of snapping back to bind pose.
    fn crossfade_to(&mut self, clip: &str, fade_secs: f32, looping: bool, hold_last_frame: bool);

    /// Drain the name of a clip that finished naturally since the last
    /// call, if any. Looping clips never finish.
    fn take_finished_clip(&mut self) -> Option<String>;

    /// Fade out whatever the mixer is playing.
    fn stop_clips(&mut self, fade_secs: f32);
}
