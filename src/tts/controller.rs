//! TTS orchestration.
//!
//! Sits between the cumulative agent transcript and the audio sink. Tracks
//! how much of the transcript has already been routed so repeated deliveries
//! synthesize nothing, segments the new suffix (whole deltas for the system
//! voice, complete sentences for the local engine), prefetches generation a
//! few segments ahead of playback, and feeds the lip-sync engine timed
//! frames scaled to each segment's real audio duration.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::segment::{PendingSegment, SentenceBuffer};
use super::{EngineKind, GeneratedAudio, TtsEngine, Voice};
use crate::audio::{AudioSink, AudioTap};
use crate::error::Result;
use crate::viseme::{scale_frames_to, text_to_viseme_frames, LipSyncEngine, LipSyncMode};

/// Segments generated ahead of playback before the synth worker stalls.
const PREFETCH_DEPTH: usize = 3;
/// Synth worker wakeup period; drives the idle flush valve.
const IDLE_TICK: Duration = Duration::from_millis(250);

/// Builds an engine on demand; injected so tests can script engines and the
/// host can wire real ones.
pub type EngineFactory = Arc<dyn Fn(EngineKind) -> Result<Arc<dyn TtsEngine>> + Send + Sync>;

/// Notifications published by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TtsEvent {
    SpeakingStarted,
    SpeakingFinished,
    /// The active engine failed before producing any audio and was replaced.
    EngineFellBack { from: EngineKind, to: EngineKind },
    /// A segment failed to generate and was dropped.
    GenerationFailed(String),
}

#[derive(Debug, Clone)]
pub struct TtsControllerConfig {
    pub enabled: bool,
    /// Engine to start with.
    pub engine: EngineKind,
    /// Generated-but-unplayed segment cap.
    pub prefetch_depth: usize,
    /// Speech rate multiplier for estimated viseme timings.
    pub rate: f32,
}

impl Default for TtsControllerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            engine: EngineKind::System,
            prefetch_depth: PREFETCH_DEPTH,
            rate: 1.0,
        }
    }
}

/// State shared between the public API and the two workers.
///
/// Plain mutex, never held across an await.
struct Shared {
    pending: VecDeque<PendingSegment>,
    ready: VecDeque<GeneratedAudio>,
    sentences: SentenceBuffer,
    /// Segment currently being generated, if any; kept visible so cancel
    /// can reach it.
    in_flight: Option<PendingSegment>,
    /// Cumulative transcript already routed to segmentation.
    spoken: String,
    speaking: bool,
    /// Set once any generation succeeds; gates the engine fallback.
    had_audio: bool,
}

impl Shared {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            ready: VecDeque::new(),
            sentences: SentenceBuffer::new(),
            in_flight: None,
            spoken: String::new(),
            speaking: false,
            had_audio: false,
        }
    }
}

/// Everything the workers need, cloned per task.
#[derive(Clone)]
struct WorkerCtx {
    shared: Arc<Mutex<Shared>>,
    engine: Arc<Mutex<Arc<dyn TtsEngine>>>,
    factory: EngineFactory,
    sink: Arc<dyn AudioSink>,
    lipsync: Arc<Mutex<LipSyncEngine>>,
    synth_wake: Arc<Notify>,
    play_wake: Arc<Notify>,
    events: mpsc::UnboundedSender<TtsEvent>,
    shutdown: CancellationToken,
    prefetch_depth: usize,
    rate: f32,
}

/// Orchestrates segmentation, generation, playback, and lip-sync timing.
pub struct TtsController {
    config: TtsControllerConfig,
    shared: Arc<Mutex<Shared>>,
    engine: Arc<Mutex<Arc<dyn TtsEngine>>>,
    factory: EngineFactory,
    sink: Arc<dyn AudioSink>,
    lipsync: Arc<Mutex<LipSyncEngine>>,
    synth_wake: Arc<Notify>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<TtsEvent>>>,
    shutdown: CancellationToken,
}

impl TtsController {
    /// Build the controller and spawn its synth and playback workers.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured engine cannot be constructed.
    pub fn new(
        config: TtsControllerConfig,
        factory: EngineFactory,
        sink: Arc<dyn AudioSink>,
        lipsync: Arc<Mutex<LipSyncEngine>>,
    ) -> Result<Self> {
        let engine = (factory)(config.engine)?;
        info!("tts controller starting with {} engine", engine.kind().as_str());

        let shared = Arc::new(Mutex::new(Shared::new()));
        let engine = Arc::new(Mutex::new(engine));
        let synth_wake = Arc::new(Notify::new());
        let play_wake = Arc::new(Notify::new());
        let (events, event_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let ctx = WorkerCtx {
            shared: Arc::clone(&shared),
            engine: Arc::clone(&engine),
            factory: Arc::clone(&factory),
            sink: Arc::clone(&sink),
            lipsync: Arc::clone(&lipsync),
            synth_wake: Arc::clone(&synth_wake),
            play_wake: Arc::clone(&play_wake),
            events,
            shutdown: shutdown.clone(),
            prefetch_depth: config.prefetch_depth.max(1),
            rate: config.rate,
        };
        tokio::spawn(synth_worker(ctx.clone()));
        tokio::spawn(play_worker(ctx));

        Ok(Self {
            config,
            shared,
            engine,
            factory,
            sink,
            lipsync,
            synth_wake,
            event_rx: Mutex::new(Some(event_rx)),
            shutdown,
        })
    }

    /// Feed the cumulative agent transcript.
    ///
    /// Only the suffix beyond what was previously delivered is routed;
    /// delivering the same text twice synthesizes nothing. Text that no
    /// longer extends the known transcript starts a fresh utterance.
    pub fn speak(&self, text: &str) {
        if !self.config.enabled || self.shutdown.is_cancelled() {
            return;
        }

        let kind = self.engine_kind();
        {
            let mut shared = self.lock_shared();
            let delta = if text.starts_with(&shared.spoken) {
                &text[shared.spoken.len()..]
            } else {
                debug!("transcript diverged, restarting delta tracking");
                text
            };
            if delta.is_empty() {
                return;
            }
            let delta = delta.to_owned();
            shared.spoken = text.to_owned();

            match kind {
                // The system voice is cheap per call; speak deltas as they
                // arrive for minimum latency.
                EngineKind::System => {
                    let trimmed = delta.trim();
                    if !trimmed.is_empty() {
                        shared.pending.push_back(PendingSegment::new(trimmed));
                    }
                }
                // The local model pays a fixed latency per call; batch into
                // sentences so each call carries a full prosodic unit.
                EngineKind::Local => {
                    let sentences = shared.sentences.push(&delta);
                    for sentence in sentences {
                        shared.pending.push_back(PendingSegment::new(sentence));
                    }
                }
            }
        }
        // A prior cancel left the sink stopped; new speech re-arms it.
        self.sink.resume();
        self.synth_wake.notify_one();
    }

    /// The agent's turn ended; flush any buffered partial sentence.
    pub fn finish_turn(&self) {
        let flushed = self.lock_shared().sentences.flush();
        if let Some(text) = flushed {
            self.lock_shared().pending.push_back(PendingSegment::new(text));
            self.sink.resume();
            self.synth_wake.notify_one();
        }
    }

    /// Stop everything: queued segments, in-flight generation, playback,
    /// and the mouth. Safe to call repeatedly.
    pub fn cancel(&self) {
        {
            let mut shared = self.lock_shared();
            for segment in &shared.pending {
                segment.cancel();
            }
            if let Some(segment) = &shared.in_flight {
                segment.cancel();
            }
            shared.pending.clear();
            shared.ready.clear();
            shared.sentences.clear();
        }
        self.current_engine().cancel();
        self.sink.stop();
        if let Ok(mut lipsync) = self.lipsync.lock() {
            lipsync.stop();
        }
    }

    /// Cancel and forget the transcript; the next `speak` starts fresh.
    pub fn reset_for_new_session(&self) {
        self.cancel();
        self.lock_shared().spoken.clear();
    }

    /// Swap the active engine, disposing the old one. No-op when the kind
    /// is already active.
    ///
    /// # Errors
    ///
    /// Returns an error if the new engine cannot be constructed; the old
    /// engine stays active.
    pub fn set_engine(&self, kind: EngineKind) -> Result<()> {
        if self.engine_kind() == kind {
            return Ok(());
        }
        let replacement = (self.factory)(kind)?;

        self.cancel();
        let old = {
            let mut slot = match self.engine.lock() {
                Ok(slot) => slot,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::replace(&mut *slot, replacement)
        };
        old.dispose();
        // Segmentation differs per engine; any realtime analysis attached to
        // the old engine is stale too.
        if let Ok(mut lipsync) = self.lipsync.lock() {
            lipsync.set_mode(LipSyncMode::Text);
        }
        info!("tts engine switched to {}", kind.as_str());
        Ok(())
    }

    pub fn engine_kind(&self) -> EngineKind {
        self.current_engine().kind()
    }

    /// Voices offered by the active engine.
    pub fn voices(&self) -> Vec<Voice> {
        self.current_engine().voices()
    }

    /// Select a voice on the active engine.
    ///
    /// # Errors
    ///
    /// Returns an error for a voice the active engine does not offer.
    pub fn set_voice(&self, voice_id: &str) -> Result<()> {
        self.current_engine().set_voice(voice_id)
    }

    /// True while audio is playing or segments are queued behind it.
    pub fn is_speaking(&self) -> bool {
        let shared = self.lock_shared();
        shared.speaking
            || !shared.ready.is_empty()
            || !shared.pending.is_empty()
            || shared.in_flight.as_ref().is_some_and(|s| !s.is_cancelled())
    }

    /// Tap carrying exactly the samples reaching the speakers. Prefers the
    /// engine's own playback graph when it has one.
    pub fn playback_tap(&self) -> AudioTap {
        self.current_engine()
            .playback_tap()
            .unwrap_or_else(|| self.sink.tap())
    }

    /// Take the event stream. Yields `None` after the first call.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TtsEvent>> {
        self.event_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    /// Stop the workers and release the engine. The controller is inert
    /// afterwards.
    pub fn dispose(&self) {
        self.shutdown.cancel();
        self.cancel();
        self.current_engine().dispose();
    }

    fn current_engine(&self) -> Arc<dyn TtsEngine> {
        match self.engine.lock() {
            Ok(slot) => Arc::clone(&slot),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn lock_shared(&self) -> std::sync::MutexGuard<'_, Shared> {
        match self.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for TtsController {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn lock<'a>(shared: &'a Arc<Mutex<Shared>>) -> std::sync::MutexGuard<'a, Shared> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A segment was dropped with no audio coming; the audio timer would starve,
/// so give the mouth back to the text timer and report the failure.
fn fail_segment(ctx: &WorkerCtx, err: &crate::error::WispError) {
    if let Ok(mut lipsync) = ctx.lipsync.lock() {
        lipsync.set_mode(LipSyncMode::Text);
    }
    let _ = ctx.events.send(TtsEvent::GenerationFailed(err.to_string()));
}

/// Pulls pending segments, generates audio, and fills the ready queue up to
/// the prefetch depth.
async fn synth_worker(ctx: WorkerCtx) {
    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            _ = ctx.synth_wake.notified() => {}
            _ = tokio::time::sleep(IDLE_TICK) => {
                let flushed = lock(&ctx.shared).sentences.take_if_idle();
                if let Some(text) = flushed {
                    debug!("idle flush: {} chars", text.chars().count());
                    lock(&ctx.shared).pending.push_back(PendingSegment::new(text));
                }
            }
        }

        loop {
            let segment = {
                let mut shared = lock(&ctx.shared);
                if shared.ready.len() >= ctx.prefetch_depth {
                    None
                } else {
                    let next = loop {
                        match shared.pending.pop_front() {
                            Some(segment) if segment.is_cancelled() => continue,
                            other => break other,
                        }
                    };
                    shared.in_flight = next.clone();
                    next
                }
            };
            let Some(segment) = segment else { break };

            let engine = {
                match ctx.engine.lock() {
                    Ok(slot) => Arc::clone(&slot),
                    Err(poisoned) => Arc::clone(&poisoned.into_inner()),
                }
            };
            let outcome = engine.generate(&segment.text).await;
            lock(&ctx.shared).in_flight = None;
            match outcome {
                Ok(audio) => {
                    // A cancel may have landed while generation ran; stale
                    // audio must not play.
                    if segment.is_cancelled() || ctx.shutdown.is_cancelled() {
                        continue;
                    }
                    let mut shared = lock(&ctx.shared);
                    shared.had_audio = true;
                    shared.ready.push_back(audio);
                    drop(shared);
                    ctx.play_wake.notify_one();
                }
                Err(err) => {
                    let had_audio = lock(&ctx.shared).had_audio;
                    if !had_audio && engine.kind() == EngineKind::Local {
                        warn!("local tts failed before first audio: {err}");
                        match (ctx.factory)(EngineKind::System) {
                            Ok(fallback) => {
                                engine.dispose();
                                match ctx.engine.lock() {
                                    Ok(mut slot) => *slot = fallback,
                                    Err(poisoned) => *poisoned.into_inner() = fallback,
                                }
                                let _ = ctx.events.send(TtsEvent::EngineFellBack {
                                    from: EngineKind::Local,
                                    to: EngineKind::System,
                                });
                                if !segment.is_cancelled() {
                                    lock(&ctx.shared).pending.push_front(segment);
                                }
                            }
                            Err(factory_err) => {
                                warn!("system voice fallback unavailable: {factory_err}");
                                fail_segment(&ctx, &err);
                            }
                        }
                    } else {
                        warn!("tts generation failed, dropping segment: {err}");
                        fail_segment(&ctx, &err);
                    }
                }
            }
        }
    }
}

/// Plays ready audio in order, driving lip-sync timing from each segment's
/// real duration.
async fn play_worker(ctx: WorkerCtx) {
    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            _ = ctx.play_wake.notified() => {}
        }

        loop {
            // Pop in a standalone statement; the guard must be gone before
            // the play await below.
            let next = lock(&ctx.shared).ready.pop_front();
            let Some(audio) = next else { break };

            lock(&ctx.shared).speaking = true;
            let _ = ctx.events.send(TtsEvent::SpeakingStarted);

            {
                let mut frames = text_to_viseme_frames(&audio.source_text, ctx.rate);
                scale_frames_to(&mut frames, audio.duration_ms());
                if let Ok(mut lipsync) = ctx.lipsync.lock() {
                    lipsync.set_mode(LipSyncMode::Audio);
                    lipsync.feed_viseme_frames(&frames);
                }
            }

            if let Err(err) = ctx.sink.play(&audio).await {
                warn!("audio playback failed: {err}");
            }

            lock(&ctx.shared).speaking = false;
            let _ = ctx.events.send(TtsEvent::SpeakingFinished);
            // Playback freed a prefetch slot.
            ctx.synth_wake.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{NullSink, StubEngine};

    struct Harness {
        controller: TtsController,
        system: Arc<StubEngine>,
        local: Arc<StubEngine>,
        sink: Arc<NullSink>,
        lipsync: Arc<Mutex<LipSyncEngine>>,
    }

    fn harness_with(config: TtsControllerConfig, system: StubEngine, local: StubEngine) -> Harness {
        let system = Arc::new(system);
        let local = Arc::new(local);
        let sink = Arc::new(NullSink::new());
        let lipsync = Arc::new(Mutex::new(LipSyncEngine::new()));

        let factory: EngineFactory = {
            let system = Arc::clone(&system);
            let local = Arc::clone(&local);
            Arc::new(move |kind| {
                Ok(match kind {
                    EngineKind::System => Arc::clone(&system) as Arc<dyn TtsEngine>,
                    EngineKind::Local => Arc::clone(&local) as Arc<dyn TtsEngine>,
                })
            })
        };

        let controller = TtsController::new(
            config,
            factory,
            Arc::clone(&sink) as Arc<dyn AudioSink>,
            Arc::clone(&lipsync),
        )
        .unwrap();

        Harness {
            controller,
            system,
            local,
            sink,
            lipsync,
        }
    }

    fn harness(engine: EngineKind) -> Harness {
        harness_with(
            TtsControllerConfig {
                engine,
                ..TtsControllerConfig::default()
            },
            StubEngine::new(EngineKind::System),
            StubEngine::new(EngineKind::Local),
        )
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met within 1s");
    }

    #[tokio::test]
    async fn system_engine_speaks_deltas_immediately() {
        let h = harness(EngineKind::System);
        h.controller.speak("Hello there");
        wait_for(|| h.sink.played_texts() == vec!["Hello there"]).await;
        assert_eq!(h.system.texts(), vec!["Hello there"]);
    }

    #[tokio::test]
    async fn repeated_cumulative_text_synthesizes_nothing_new() {
        let h = harness(EngineKind::System);
        h.controller.speak("Hello there.");
        wait_for(|| h.system.texts().len() == 1).await;
        h.controller.speak("Hello there.");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.system.texts(), vec!["Hello there."]);
    }

    #[tokio::test]
    async fn extending_cumulative_text_synthesizes_only_the_suffix() {
        let h = harness(EngineKind::System);
        h.controller.speak("Hello there");
        wait_for(|| h.system.texts().len() == 1).await;
        h.controller.speak("Hello there, friend");
        wait_for(|| h.system.texts().len() == 2).await;
        assert_eq!(h.system.texts(), vec!["Hello there", ", friend"]);
    }

    #[tokio::test]
    async fn diverging_text_starts_a_fresh_utterance() {
        let h = harness(EngineKind::System);
        h.controller.speak("First answer.");
        wait_for(|| h.system.texts().len() == 1).await;
        h.controller.speak("Completely different.");
        wait_for(|| h.system.texts().len() == 2).await;
        assert_eq!(h.system.texts()[1], "Completely different.");
    }

    #[tokio::test]
    async fn local_engine_batches_complete_sentences() {
        let h = harness(EngineKind::Local);
        h.controller.speak("Hello world. And then");
        wait_for(|| h.local.texts() == vec!["Hello world."]).await;

        // The unterminated tail stays buffered until the turn ends.
        h.controller.finish_turn();
        wait_for(|| h.local.texts().len() == 2).await;
        assert_eq!(h.local.texts()[1], "And then");
    }

    #[tokio::test]
    async fn cancellation_is_total() {
        let h = harness_with(
            TtsControllerConfig {
                engine: EngineKind::Local,
                ..TtsControllerConfig::default()
            },
            StubEngine::new(EngineKind::System),
            StubEngine::slow(EngineKind::Local, 200),
        );
        h.controller.speak("One. Two. Three.");
        // Let the first generation get in flight.
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.controller.cancel();
        // Idempotent.
        h.controller.cancel();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(h.sink.played_texts().is_empty());
        assert!(!h.controller.is_speaking());
        assert!(h.sink.stops.load(std::sync::atomic::Ordering::SeqCst) >= 2);
        assert!(h.local.cancelled.load(std::sync::atomic::Ordering::SeqCst) >= 1);
        assert!(!h.lipsync.lock().unwrap().is_speaking());
    }

    #[tokio::test]
    async fn queued_segments_play_in_order_while_state_stays_queryable() {
        let h = harness(EngineKind::Local);
        h.controller.speak("One. Two. Three.");
        // Poll the shared-state API while the playback worker drains the
        // ready queue.
        wait_for(|| {
            let _ = h.controller.is_speaking();
            h.sink.played_texts().len() == 3
        })
        .await;
        assert_eq!(h.sink.played_texts(), vec!["One.", "Two.", "Three."]);
    }

    #[tokio::test]
    async fn cancel_keeps_the_sink_closed_until_new_speech() {
        let h = harness(EngineKind::System);
        h.controller.speak("One.");
        wait_for(|| h.sink.played_texts().len() == 1).await;

        h.controller.cancel();
        // A play racing the cancel must not un-stop the sink.
        let stale = GeneratedAudio {
            samples: vec![0.0; 240],
            sample_rate: 24_000,
            source_text: "stale".to_owned(),
        };
        h.sink.play(&stale).await.unwrap();
        assert_eq!(h.sink.played_texts(), vec!["One."]);

        // New speech re-arms playback.
        h.controller.speak("One. Two.");
        wait_for(|| h.sink.played_texts() == vec!["One.", "Two."]).await;
    }

    #[tokio::test]
    async fn generation_failure_is_reported_and_returns_the_mouth_to_text() {
        let h = harness_with(
            TtsControllerConfig::default(),
            StubEngine::failing(EngineKind::System),
            StubEngine::new(EngineKind::Local),
        );
        let mut events = h.controller.take_events().unwrap();
        h.lipsync.lock().unwrap().set_mode(LipSyncMode::Audio);

        h.controller.speak("Hello there.");
        let mut failure = None;
        for _ in 0..200 {
            if let Ok(TtsEvent::GenerationFailed(message)) = events.try_recv() {
                failure = Some(message);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(failure.is_some(), "no failure event");
        assert_eq!(h.lipsync.lock().unwrap().mode(), LipSyncMode::Text);
        assert!(h.sink.played_texts().is_empty());
    }

    #[tokio::test]
    async fn falls_back_to_system_before_first_audio() {
        let h = harness_with(
            TtsControllerConfig {
                engine: EngineKind::Local,
                ..TtsControllerConfig::default()
            },
            StubEngine::new(EngineKind::System),
            StubEngine::failing(EngineKind::Local),
        );
        let mut events = h.controller.take_events().unwrap();

        h.controller.speak("Hello there.");
        wait_for(|| h.system.texts() == vec!["Hello there."]).await;
        assert_eq!(h.controller.engine_kind(), EngineKind::System);
        assert!(h.local.disposed.load(std::sync::atomic::Ordering::SeqCst));

        let mut saw_fallback = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, TtsEvent::EngineFellBack { .. }) {
                saw_fallback = true;
            }
        }
        assert!(saw_fallback);
    }

    #[tokio::test]
    async fn engine_switch_disposes_the_old_engine() {
        let h = harness(EngineKind::System);
        h.controller.set_engine(EngineKind::Local).unwrap();
        assert_eq!(h.controller.engine_kind(), EngineKind::Local);
        assert!(h.system.disposed.load(std::sync::atomic::Ordering::SeqCst));

        // Same kind again: no-op.
        h.controller.set_engine(EngineKind::Local).unwrap();
    }

    #[tokio::test]
    async fn playback_switches_lipsync_to_audio_mode() {
        let h = harness(EngineKind::System);
        assert_eq!(h.lipsync.lock().unwrap().mode(), LipSyncMode::Text);
        h.controller.speak("Hello.");
        wait_for(|| !h.sink.played_texts().is_empty()).await;
        assert_eq!(h.lipsync.lock().unwrap().mode(), LipSyncMode::Audio);
    }

    #[tokio::test]
    async fn disabled_controller_routes_nothing() {
        let h = harness_with(
            TtsControllerConfig {
                enabled: false,
                ..TtsControllerConfig::default()
            },
            StubEngine::new(EngineKind::System),
            StubEngine::new(EngineKind::Local),
        );
        h.controller.speak("Hello there.");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.system.texts().is_empty());
        assert!(h.sink.played_texts().is_empty());
    }

    #[tokio::test]
    async fn reset_forgets_the_transcript() {
        let h = harness(EngineKind::System);
        h.controller.speak("Hello there.");
        wait_for(|| h.system.texts().len() == 1).await;

        h.controller.reset_for_new_session();
        h.controller.speak("Hello there.");
        wait_for(|| h.system.texts().len() == 2).await;
        assert_eq!(h.system.texts(), vec!["Hello there.", "Hello there."]);
    }
}
