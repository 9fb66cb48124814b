//! Facial expression blending.
//!
//! Each named expression is a compound: a weighted set of blend-channel
//! targets. Channels transition independently with an eased ramp, so a new
//! expression can fade in while the old one fades out without lockstep.
//! Hover awareness layers an additive overlay expression on top of the
//! primary one.

use std::collections::HashMap;

use crate::model::{AvatarModel, BLINK_CHANNEL};

/// Named facial expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Expression {
    /// All channels relax to zero.
    #[default]
    Neutral,
    Happy,
    Sad,
    Angry,
    Surprised,
    Relaxed,
}

impl Expression {
    /// Weighted blend-channel targets for this expression.
    ///
    /// The reserved blink channel is never part of a compound — blinking is
    /// procedural and must not be overwritten by expression blending.
    pub fn compound(self) -> &'static [(&'static str, f32)] {
        match self {
            Expression::Neutral => &[],
            Expression::Happy => &[("happy", 1.0), ("ee", 0.25)],
            Expression::Sad => &[("sad", 1.0), ("oh", 0.15)],
            Expression::Angry => &[("angry", 1.0)],
            Expression::Surprised => &[("surprised", 1.0), ("aa", 0.3)],
            Expression::Relaxed => &[("relaxed", 1.0)],
        }
    }

    pub const ALL: [Expression; 6] = [
        Expression::Neutral,
        Expression::Happy,
        Expression::Sad,
        Expression::Angry,
        Expression::Surprised,
        Expression::Relaxed,
    ];
}

/// Seconds for a channel to ramp between targets.
const TRANSITION_SECS: f32 = 0.3;
/// Exponential smoothing rate for the overlay weight, per second.
const OVERLAY_RATE: f32 = 6.0;

/// One independently eased channel ramp.
#[derive(Debug, Clone, Copy)]
struct ChannelRamp {
    start: f32,
    target: f32,
    elapsed: f32,
}

impl ChannelRamp {
    fn value(&self) -> f32 {
        let t = (self.elapsed / TRANSITION_SECS).clamp(0.0, 1.0);
        self.start + (self.target - self.start) * ease_quad_in_out(t)
    }

    fn done(&self) -> bool {
        self.elapsed >= TRANSITION_SECS
    }
}

fn ease_quad_in_out(t: f32) -> f32 {
    if t < 0.5 {
        2.0 * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
    }
}

/// Blends the primary expression plus an additive overlay onto the model.
pub struct ExpressionController {
    primary: Expression,
    ramps: HashMap<&'static str, ChannelRamp>,
    overlay: Option<(Expression, f32)>,
    /// Smoothed overlay strength.
    overlay_level: f32,
    disposed: bool,
}

impl Default for ExpressionController {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpressionController {
    pub fn new() -> Self {
        Self {
            primary: Expression::Neutral,
            ramps: HashMap::new(),
            overlay: None,
            overlay_level: 0.0,
            disposed: false,
        }
    }

    /// Switch the primary expression, retargeting every affected channel.
    ///
    /// Channels of the previous compound not present in the new one ramp
    /// back to zero.
    pub fn set_expression(&mut self, expression: Expression) {
        if self.disposed || expression == self.primary {
            return;
        }

        let mut targets: HashMap<&'static str, f32> = HashMap::new();
        for &(channel, weight) in expression.compound() {
            debug_assert_ne!(channel, BLINK_CHANNEL);
            targets.insert(channel, weight);
        }

        // Retarget existing ramps, adding zero targets for dropped channels.
        for (channel, ramp) in self.ramps.iter_mut() {
            let target = targets.remove(channel).unwrap_or(0.0);
            *ramp = ChannelRamp {
                start: ramp.value(),
                target,
                elapsed: 0.0,
            };
        }
        for (channel, target) in targets {
            self.ramps.insert(
                channel,
                ChannelRamp {
                    start: 0.0,
                    target,
                    elapsed: 0.0,
                },
            );
        }

        self.primary = expression;
    }

    /// Current primary expression.
    pub fn expression(&self) -> Expression {
        self.primary
    }

    /// Additive overlay, typically driven by hover awareness.
    pub fn set_overlay(&mut self, overlay: Option<(Expression, f32)>) {
        if self.disposed {
            return;
        }
        self.overlay = overlay.map(|(e, w)| (e, w.clamp(0.0, 1.0)));
    }

    /// Advance channel ramps and overlay smoothing.
    pub fn update(&mut self, delta: f32) {
        if self.disposed {
            return;
        }
        // Drop fully-relaxed channels only once a previous `apply` has had
        // the chance to write their final zero: sweep before advancing, so a
        // ramp finishing this frame survives into this frame's apply.
        self.ramps
            .retain(|_, ramp| !(ramp.done() && ramp.target == 0.0));
        for ramp in self.ramps.values_mut() {
            ramp.elapsed += delta;
        }

        let overlay_target = self.overlay.map(|(_, w)| w).unwrap_or(0.0);
        let k = (OVERLAY_RATE * delta).min(1.0);
        self.overlay_level += (overlay_target - self.overlay_level) * k;
        if self.overlay_level < 0.001 {
            self.overlay_level = 0.0;
        }
    }

    /// Resolved weight for one channel, primary plus overlay.
    pub fn channel_weight(&self, channel: &str) -> f32 {
        let mut weight = self
            .ramps
            .get(channel)
            .map(|ramp| ramp.value())
            .unwrap_or(0.0);

        if self.overlay_level > 0.0 {
            if let Some((expression, _)) = self.overlay {
                for &(overlay_channel, overlay_weight) in expression.compound() {
                    if overlay_channel == channel {
                        weight += overlay_weight * self.overlay_level;
                    }
                }
            }
        }

        weight.clamp(0.0, 1.0)
    }

    /// Write all resolved channel weights onto the model.
    pub fn apply(&self, model: &mut dyn AvatarModel) {
        for (channel, _) in self.ramps.iter() {
            model.set_blend_weight(channel, self.channel_weight(channel));
        }
        if let Some((expression, _)) = self.overlay {
            if self.overlay_level > 0.0 {
                for &(channel, _) in expression.compound() {
                    if !self.ramps.contains_key(channel) {
                        model.set_blend_weight(channel, self.channel_weight(channel));
                    }
                }
            }
        }
    }

    /// Zero every weight and forget all ramps (model swap).
    pub fn reset(&mut self) {
        self.primary = Expression::Neutral;
        self.ramps.clear();
        self.overlay = None;
        self.overlay_level = 0.0;
    }

    pub fn dispose(&mut self) {
        self.reset();
        self.disposed = true;
    }
}
