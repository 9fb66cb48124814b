//! Host binary: connects the gateway, TTS, and animator.
//!
//! The renderer process embeds [`wisp::Animator`] directly; this binary is
//! the headless host used for development and for driving audio without a
//! window. It runs the same wiring: gateway events set the agent phase and
//! transcript, the TTS controller speaks, and the animator ticks at ~60 Hz.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use wisp::agent::AgentPhase;
use wisp::audio::CpalSink;
use wisp::tts::{EngineFactory, EngineKind, LocalTts, SystemVoice, TtsEngine};
use wisp::{
    Animator, GatewayClient, GatewayEvent, TtsController, TtsControllerConfig, TtsEvent,
    WispConfig,
};

/// Wisp: desktop overlay companion for a remote conversational agent.
#[derive(Parser)]
#[command(name = "wisp", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to the gateway and animate (default).
    Run,
    /// List voices offered by the configured TTS engine.
    Voices,
    /// List audio output devices.
    Devices,
    /// Write a default config file.
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("wisp=info,hf_hub=warn,ort=warn")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(WispConfig::default_config_path);
    let config = WispConfig::load_or_default(&config_path);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Voices => list_voices(&config),
        Command::Devices => list_devices(),
        Command::Init => init_config(&config_path),
    }
}

fn engine_factory(config: &WispConfig) -> EngineFactory {
    let local = config.tts.local.clone();
    Arc::new(move |kind| match kind {
        EngineKind::System => SystemVoice::new().map(|e| Arc::new(e) as Arc<dyn TtsEngine>),
        EngineKind::Local => LocalTts::new(&local).map(|e| Arc::new(e) as Arc<dyn TtsEngine>),
    })
}

async fn run(config: WispConfig) -> anyhow::Result<()> {
    let mut animator = Animator::new(&config);

    let sink = Arc::new(CpalSink::new(config.audio.output_device.as_deref())?);
    let tts = TtsController::new(
        TtsControllerConfig {
            enabled: config.tts.enabled,
            engine: config.tts.engine,
            rate: config.tts.rate,
            ..TtsControllerConfig::default()
        },
        engine_factory(&config),
        sink,
        animator.lipsync_handle(),
    )?;
    if let Some(voice) = &config.tts.voice {
        if let Err(err) = tts.set_voice(voice) {
            warn!("configured voice rejected: {err}");
        }
    }
    animator.set_playback_tap(tts.playback_tap());

    let gateway = GatewayClient::connect(config.gateway.clone());
    let mut gateway_events = gateway
        .take_events()
        .ok_or_else(|| anyhow::anyhow!("gateway event stream already taken"))?;
    let mut tts_events = tts
        .take_events()
        .ok_or_else(|| anyhow::anyhow!("tts event stream already taken"))?;

    let mut frame = tokio::time::interval(Duration::from_millis(16));
    frame.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_tick = Instant::now();
    // Cumulative transcript for the text-mode mouth when TTS is off.
    let mut turn_text = String::new();
    let tts_enabled = config.tts.enabled;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
            _ = frame.tick() => {
                let now = Instant::now();
                let delta = (now - last_tick).as_secs_f32();
                last_tick = now;
                animator.update(delta);
            }
            Some(event) = gateway_events.recv() => {
                let fatal =
                    on_gateway_event(event, &mut animator, &tts, tts_enabled, &mut turn_text);
                if fatal {
                    break;
                }
            }
            Some(event) = tts_events.recv() => match event {
                TtsEvent::SpeakingStarted => debug!("speech started"),
                TtsEvent::SpeakingFinished => debug!("speech finished"),
                TtsEvent::EngineFellBack { from, to } => {
                    warn!("tts engine {} failed, fell back to {}", from.as_str(), to.as_str());
                }
                TtsEvent::GenerationFailed(message) => {
                    warn!("tts generation failed: {message}");
                }
            },
        }
    }

    gateway.destroy();
    tts.dispose();
    animator.dispose();
    Ok(())
}

/// Apply one gateway event. Returns true when the host should exit.
fn on_gateway_event(
    event: GatewayEvent,
    animator: &mut Animator,
    tts: &TtsController,
    tts_enabled: bool,
    turn_text: &mut String,
) -> bool {
    match event {
        GatewayEvent::Connected => {
            info!("gateway connected");
        }
        GatewayEvent::Disconnected => {
            tts.cancel();
            animator.stop_lip_sync();
            animator.set_phase(AgentPhase::Idle);
        }
        GatewayEvent::SessionChanged { key, avatar } => {
            info!("following session {key}");
            if let Some(model) = avatar {
                // The renderer owns model loading; announce the override.
                info!("session avatar override: {model}");
            }
            tts.reset_for_new_session();
            animator.stop_lip_sync();
            turn_text.clear();
        }
        GatewayEvent::Agent(state) => {
            let was_speaking = animator.phase() == AgentPhase::Speaking;
            animator.set_phase(state.phase);

            if state.phase == AgentPhase::Speaking {
                if let Some(text) = &state.text {
                    if tts_enabled {
                        tts.speak(text);
                    } else {
                        feed_text_mouth(animator, text, turn_text);
                    }
                }
            } else if was_speaking {
                tts.finish_turn();
                turn_text.clear();
            }
        }
        GatewayEvent::ProtocolMismatch(message) => {
            error!("gateway protocol mismatch: {message}");
            return true;
        }
    }
    false
}

/// Route the cumulative transcript into the text-timer mouth drive.
fn feed_text_mouth(animator: &mut Animator, text: &str, turn_text: &mut String) {
    match text.strip_prefix(turn_text.as_str()) {
        Some(delta) => animator.feed_lip_sync_text(delta),
        None => {
            // New utterance; drop the stale buffer first.
            animator.stop_lip_sync();
            animator.feed_lip_sync_text(text);
        }
    }
    *turn_text = text.to_owned();
}

fn list_voices(config: &WispConfig) -> anyhow::Result<()> {
    let voices = match config.tts.engine {
        EngineKind::System => SystemVoice::new()?.voices(),
        EngineKind::Local => LocalTts::new(&config.tts.local)?.voices(),
    };
    if voices.is_empty() {
        println!("no voices reported by the {} engine", config.tts.engine.as_str());
    }
    for voice in voices {
        println!("{}\t{}", voice.id, voice.name);
    }
    Ok(())
}

fn list_devices() -> anyhow::Result<()> {
    for name in CpalSink::list_output_devices()? {
        println!("{name}");
    }
    Ok(())
}

fn init_config(path: &std::path::Path) -> anyhow::Result<()> {
    if path.exists() {
        anyhow::bail!("refusing to overwrite existing config at {}", path.display());
    }
    WispConfig::default().save_to_file(path)?;
    println!("wrote {}", path.display());
    Ok(())
}
