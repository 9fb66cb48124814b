//! Normalized agent state delivered by the gateway client.

use serde::{Deserialize, Serialize};

/// Lifecycle phase of the remote agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentPhase {
    /// Nothing in flight; the avatar rests.
    Idle,
    /// The agent is reasoning before producing output.
    Thinking,
    /// The agent is streaming assistant text.
    Speaking,
    /// The agent is executing a tool.
    Working,
}

impl AgentPhase {
    /// Whether motion clips for this phase loop naturally.
    ///
    /// Looping phases rotate between loop clips on finish; one-shot phases
    /// play another one-shot and hold the last frame.
    pub fn is_looping(self) -> bool {
        matches!(self, AgentPhase::Idle | AgentPhase::Speaking)
    }
}

/// One normalized agent event.
///
/// `text` is cumulative for the current speaking turn, not a delta — the
/// TTS layer tracks the spoken prefix itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentState {
    /// Current lifecycle phase.
    pub phase: AgentPhase,
    /// Cumulative assistant text for this speaking turn.
    pub text: Option<String>,
    /// Originating agent id, when the gateway supplied one.
    pub agent_id: Option<String>,
}

impl AgentState {
    /// An event carrying only a phase change.
    pub fn phase(phase: AgentPhase) -> Self {
        Self {
            phase,
            text: None,
            agent_id: None,
        }
    }

    /// A speaking event with cumulative text.
    pub fn speaking(text: impl Into<String>) -> Self {
        Self {
            phase: AgentPhase::Speaking,
            text: Some(text.into()),
            agent_id: None,
        }
    }
}
