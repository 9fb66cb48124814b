//! Phase-driven motion clip selection.
//!
//! Each agent phase maps to a pool of pre-retargeted motion clips. Phase
//! transitions cross-fade to a random clip from the new pool; within a phase
//! the machine rotates clips on natural finish so the same loop is never
//! visibly repeated. Procedural motion ([`procedural`]) covers the no-clip
//! case entirely and any phase whose pool is empty.

mod procedural;

pub use procedural::{ProceduralConfig, ProceduralMotion};

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::agent::AgentPhase;
use crate::model::AvatarModel;

/// Cross-fade on phase change, seconds.
const PHASE_FADE_SECS: f32 = 0.5;
/// Cross-fade when rotating clips within a phase, seconds.
const ROTATE_FADE_SECS: f32 = 0.3;

/// Clip-pool state machine over agent phases.
pub struct AnimationStateMachine {
    pools: HashMap<AgentPhase, Vec<String>>,
    phase: AgentPhase,
    current_clip: Option<String>,
    rng: StdRng,
}

impl Default for AnimationStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl AnimationStateMachine {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            pools: HashMap::new(),
            phase: AgentPhase::Idle,
            current_clip: None,
            rng,
        }
    }

    #[cfg(test)]
    pub(crate) fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    /// Load the clip pools (clip names per phase, already retargeted).
    pub fn init(&mut self, pools: HashMap<AgentPhase, Vec<String>>) {
        self.pools = pools;
        self.current_clip = None;
    }

    /// Whether any clips are loaded at all.
    pub fn has_clips(&self) -> bool {
        self.pools.values().any(|pool| !pool.is_empty())
    }

    /// Whether the current phase has to fall back to procedural motion.
    pub fn phase_pool_empty(&self) -> bool {
        self.pools
            .get(&self.phase)
            .map(|pool| pool.is_empty())
            .unwrap_or(true)
    }

    /// Recorded phase, consulted by the procedural fallback.
    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    /// Currently playing clip, if any.
    pub fn current_clip(&self) -> Option<&str> {
        self.current_clip.as_deref()
    }

    /// Transition to a new phase.
    ///
    /// Same phase is a no-op. An empty pool leaves whatever was playing
    /// running — the phase is still recorded for the procedural fallback.
    pub fn set_phase(&mut self, phase: AgentPhase, model: Option<&mut (dyn AvatarModel + 'static)>) {
        if phase == self.phase {
            return;
        }
        self.phase = phase;

        let Some(pool) = self.pools.get(&phase).filter(|p| !p.is_empty()) else {
            debug!(?phase, "no clips for phase, leaving current action");
            return;
        };

        // Fresh phase: any clip from the pool qualifies.
        let clip = pool[self.rng.gen_range(0..pool.len())].clone();
        debug!(?phase, clip, "phase transition");
        if let Some(model) = model {
            model.crossfade_to(&clip, PHASE_FADE_SECS, phase.is_looping(), !phase.is_looping());
        }
        self.current_clip = Some(clip);
    }

    /// Poll for naturally finished clips and rotate within the phase.
    ///
    /// Call once per frame. With more than one clip in the pool, a finished
    /// clip is followed by a *different* one; a single-clip one-shot pool
    /// simply holds its last frame.
    pub fn update(&mut self, model: &mut dyn AvatarModel) {
        let Some(finished) = model.take_finished_clip() else {
            return;
        };
        if self.current_clip.as_deref() != Some(finished.as_str()) {
            // Stale finish event from a clip we already faded out.
            return;
        }

        let Some(pool) = self.pools.get(&self.phase).filter(|p| p.len() > 1) else {
            return;
        };

        let candidates: Vec<&String> = pool.iter().filter(|c| **c != finished).collect();
        let next = candidates[self.rng.gen_range(0..candidates.len())].clone();
        debug!(phase = ?self.phase, clip = next, "rotating clip");
        model.crossfade_to(
            &next,
            ROTATE_FADE_SECS,
            self.phase.is_looping(),
            !self.phase.is_looping(),
        );
        self.current_clip = Some(next);
    }

    /// Fade out all clips and forget the current one (model swap).
    pub fn reset(&mut self, model: Option<&mut (dyn AvatarModel + 'static)>) {
        if let Some(model) = model {
            model.stop_clips(ROTATE_FADE_SECS);
        }
        self.current_clip = None;
        self.phase = AgentPhase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::StubModel;

    fn pools() -> HashMap<AgentPhase, Vec<String>> {
        let mut pools = HashMap::new();
        pools.insert(
            AgentPhase::Idle,
            vec!["idle_a".to_owned(), "idle_b".to_owned(), "idle_c".to_owned()],
        );
        pools.insert(AgentPhase::Thinking, vec!["think_a".to_owned()]);
        pools.insert(AgentPhase::Speaking, vec!["talk_a".to_owned(), "talk_b".to_owned()]);
        pools.insert(AgentPhase::Working, Vec::new());
        pools
    }

    #[test]
    fn same_phase_is_a_no_op() {
        let mut machine = AnimationStateMachine::seeded(1);
        machine.init(pools());
        let mut model = StubModel::new();
        machine.set_phase(AgentPhase::Thinking, Some(&mut model));
        let fades = model.crossfades.len();
        machine.set_phase(AgentPhase::Thinking, Some(&mut model));
        assert_eq!(model.crossfades.len(), fades);
    }

    #[test]
    fn phase_change_crossfades_to_pool_clip() {
        let mut machine = AnimationStateMachine::seeded(1);
        machine.init(pools());
        let mut model = StubModel::new();
        machine.set_phase(AgentPhase::Speaking, Some(&mut model));

        let (clip, fade, looping, hold) = model.crossfades.last().cloned().unwrap_or_default();
        assert!(clip.starts_with("talk_"));
        assert!((fade - PHASE_FADE_SECS).abs() < f32::EPSILON);
        assert!(looping);
        assert!(!hold);
    }

    #[test]
    fn one_shot_phases_clamp_last_frame() {
        let mut machine = AnimationStateMachine::seeded(1);
        machine.init(pools());
        let mut model = StubModel::new();
        machine.set_phase(AgentPhase::Thinking, Some(&mut model));

        let (_, _, looping, hold) = model.crossfades.last().cloned().unwrap_or_default();
        assert!(!looping);
        assert!(hold);
    }

    #[test]
    fn empty_pool_leaves_current_action_but_records_phase() {
        let mut machine = AnimationStateMachine::seeded(1);
        machine.init(pools());
        let mut model = StubModel::new();
        machine.set_phase(AgentPhase::Idle, Some(&mut model));
        let fades = model.crossfades.len();

        machine.set_phase(AgentPhase::Working, Some(&mut model));
        assert_eq!(model.crossfades.len(), fades);
        assert_eq!(machine.phase(), AgentPhase::Working);
        assert!(machine.phase_pool_empty());
    }

    #[test]
    fn finished_clip_rotates_to_a_different_one() {
        let mut machine = AnimationStateMachine::seeded(3);
        machine.init(pools());
        let mut model = StubModel::new();
        machine.set_phase(AgentPhase::Idle, Some(&mut model));
        let first = machine.current_clip().unwrap_or_default().to_owned();

        for _ in 0..20 {
            model.finish_clip(machine.current_clip().unwrap_or_default());
            machine.update(&mut model);
            let next = machine.current_clip().unwrap_or_default().to_owned();
            assert_ne!(next, "", "rotation lost the clip");
            assert!(machine.pools[&AgentPhase::Idle].contains(&next));
        }
        // With three clips and twenty rotations at least one differs.
        assert!(model
            .crossfades
            .iter()
            .any(|(clip, _, _, _)| *clip != first));
    }

    #[test]
    fn rotation_uses_shorter_fade() {
        let mut machine = AnimationStateMachine::seeded(3);
        machine.init(pools());
        let mut model = StubModel::new();
        machine.set_phase(AgentPhase::Idle, Some(&mut model));

        model.finish_clip(machine.current_clip().unwrap_or_default());
        machine.update(&mut model);
        let (_, fade, _, _) = model.crossfades.last().cloned().unwrap_or_default();
        assert!((fade - ROTATE_FADE_SECS).abs() < f32::EPSILON);
    }

    #[test]
    fn single_clip_one_shot_pool_holds() {
        let mut machine = AnimationStateMachine::seeded(1);
        machine.init(pools());
        let mut model = StubModel::new();
        machine.set_phase(AgentPhase::Thinking, Some(&mut model));
        let fades = model.crossfades.len();

        model.finish_clip("think_a");
        machine.update(&mut model);
        assert_eq!(model.crossfades.len(), fades);
        assert_eq!(machine.current_clip(), Some("think_a"));
    }

    #[test]
    fn no_library_reports_procedural_fallback() {
        let machine = AnimationStateMachine::seeded(1);
        assert!(!machine.has_clips());
        assert!(machine.phase_pool_empty());
    }

    #[test]
    fn stale_finish_events_are_ignored() {
        let mut machine = AnimationStateMachine::seeded(1);
        machine.init(pools());
        let mut model = StubModel::new();
        machine.set_phase(AgentPhase::Idle, Some(&mut model));
        let fades = model.crossfades.len();

        model.finish_clip("talk_a");
        machine.update(&mut model);
        assert_eq!(model.crossfades.len(), fades);
    }
}
