//! Hover awareness.
//!
//! Small state machine fed a hover boolean every frame. While hovering the
//! state walks forward one gate at a time — never skipping — until it
//! reaches the stable `Curious` state. When the cursor leaves, any state
//! decays straight back to `Unaware` once the fade-out window elapses.
//! Outputs (expression overlay, gaze multiplier) are read by other
//! components; this controller never writes to the character.

use serde::{Deserialize, Serialize};

use crate::expression::Expression;

/// Awareness progression while the cursor hovers the avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AwarenessState {
    #[default]
    Unaware,
    Noticing,
    Attentive,
    Curious,
}

/// Tuning for the awareness gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HoverConfig {
    /// Seconds in `Noticing` before `Attentive`.
    pub noticing_secs: f32,
    /// Seconds in `Attentive` before `Curious`.
    pub attentive_secs: f32,
    /// Seconds after hover end before decaying to `Unaware`.
    pub fade_out_secs: f32,
}

impl Default for HoverConfig {
    fn default() -> Self {
        Self {
            noticing_secs: 0.6,
            attentive_secs: 1.5,
            fade_out_secs: 1.0,
        }
    }
}

/// Hover-driven awareness machine.
pub struct HoverAwareness {
    config: HoverConfig,
    state: AwarenessState,
    hovering: bool,
    /// Seconds in the current state (while hovering) or since hover end.
    timer: f32,
}

impl HoverAwareness {
    pub fn new(config: HoverConfig) -> Self {
        Self {
            config,
            state: AwarenessState::Unaware,
            hovering: false,
            timer: 0.0,
        }
    }

    /// Feed the hover boolean.
    ///
    /// The jump from `Unaware` to `Noticing` is immediate, not a ramp.
    pub fn set_hovering(&mut self, hovering: bool) {
        if hovering == self.hovering {
            return;
        }
        self.hovering = hovering;
        self.timer = 0.0;
        if hovering && self.state == AwarenessState::Unaware {
            self.state = AwarenessState::Noticing;
        }
    }

    /// Advance gates by `delta` seconds.
    pub fn update(&mut self, delta: f32) {
        self.timer += delta;

        if self.hovering {
            match self.state {
                AwarenessState::Unaware => {
                    // set_hovering already promoted; only reachable if
                    // hovering started true at construction.
                    self.state = AwarenessState::Noticing;
                    self.timer = 0.0;
                }
                AwarenessState::Noticing if self.timer >= self.config.noticing_secs => {
                    self.state = AwarenessState::Attentive;
                    self.timer = 0.0;
                }
                AwarenessState::Attentive if self.timer >= self.config.attentive_secs => {
                    self.state = AwarenessState::Curious;
                    self.timer = 0.0;
                }
                // Curious is terminal while hovering continues.
                _ => {}
            }
        } else if self.state != AwarenessState::Unaware && self.timer >= self.config.fade_out_secs {
            // Single step back, immediate once the window elapses.
            self.state = AwarenessState::Unaware;
            self.timer = 0.0;
        }
    }

    pub fn state(&self) -> AwarenessState {
        self.state
    }

    /// Expression overlay for the current state, if any.
    pub fn expression_overlay(&self) -> Option<(Expression, f32)> {
        match self.state {
            AwarenessState::Unaware => None,
            AwarenessState::Noticing => Some((Expression::Surprised, 0.2)),
            AwarenessState::Attentive => Some((Expression::Happy, 0.4)),
            AwarenessState::Curious => Some((Expression::Happy, 0.7)),
        }
    }

    /// Gaze sensitivity multiplier, 1.0 baseline.
    pub fn gaze_multiplier(&self) -> f32 {
        match self.state {
            AwarenessState::Unaware => 1.0,
            AwarenessState::Noticing => 1.1,
            AwarenessState::Attentive => 1.3,
            AwarenessState::Curious => 1.5,
        }
    }

    pub fn reset(&mut self) {
        self.state = AwarenessState::Unaware;
        self.hovering = false;
        self.timer = 0.0;
    }
}
