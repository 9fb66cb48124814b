//! Wisp: a desktop overlay companion that animates a 3D avatar mirroring a
//! remote conversational agent.
//!
//! # Architecture
//!
//! A gateway client follows one agent session over WebSocket and normalizes
//! its stream into phase/text events. Those drive two stacks that meet at
//! the avatar model:
//! - **Speech**: the TTS controller segments the agent transcript,
//!   synthesizes audio (system voice or local ONNX model), plays it through
//!   a single `cpal` pipeline, and feeds the lip-sync engine.
//! - **Motion**: the animator composes lip-sync, expressions, gaze, hover
//!   awareness, clip selection, and procedural idle motion, writing blend
//!   weights and bone rotations once per frame.

pub mod agent;
pub mod anim;
pub mod animator;
pub mod audio;
pub mod config;
pub mod error;
pub mod expression;
pub mod gateway;
pub mod gaze;
pub mod hover;
pub mod model;
pub mod tts;
pub mod viseme;

#[cfg(test)]
pub(crate) mod test_utils;

pub use agent::{AgentPhase, AgentState};
pub use animator::Animator;
pub use config::WispConfig;
pub use error::{Result, WispError};
pub use gateway::{GatewayClient, GatewayEvent};
pub use tts::{TtsController, TtsControllerConfig, TtsEvent};
