//! cpal playback sink with a live-output tap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use tracing::{error, info};

use super::{AudioSink, AudioTap};
use crate::error::{Result, WispError};
use crate::tts::GeneratedAudio;

/// Audio playback to system speakers via cpal.
pub struct CpalSink {
    device: cpal::Device,
    tap: AudioTap,
    /// Set by `stop`; every `play` is swallowed until `resume`.
    stopped: Arc<AtomicBool>,
}

impl CpalSink {
    /// Create a sink on the named output device (or the system default).
    ///
    /// # Errors
    ///
    /// Returns an error if no output device is available.
    pub fn new(output_device: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(name) = output_device {
            host.output_devices()
                .map_err(|e| WispError::Audio(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| WispError::Audio(format!("output device '{name}' not found")))?
        } else {
            host.default_output_device()
                .ok_or_else(|| WispError::Audio("no default output device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using output device: {device_name}");

        Ok(Self {
            device,
            tap: AudioTap::new(),
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| WispError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

#[async_trait]
impl AudioSink for CpalSink {
    async fn play(&self, audio: &GeneratedAudio) -> Result<()> {
        if audio.samples.is_empty() || self.stopped.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = self.device.clone();
        let tap = self.tap.clone();
        let stopped = Arc::clone(&self.stopped);
        let samples = audio.samples.clone();
        let sample_rate = audio.sample_rate;

        // cpal streams are not Send; build and wait on a blocking thread.
        tokio::task::spawn_blocking(move || play_blocking(device, samples, sample_rate, tap, stopped))
            .await
            .map_err(|e| WispError::Audio(format!("playback task join failed: {e}")))?
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }

    fn tap(&self) -> AudioTap {
        self.tap.clone()
    }
}

/// Internal buffer for tracking playback progress.
struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
}

fn play_blocking(
    device: cpal::Device,
    samples: Vec<f32>,
    sample_rate: u32,
    tap: AudioTap,
    stopped: Arc<AtomicBool>,
) -> Result<()> {
    let stream_config = StreamConfig {
        channels: 1,
        sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let buffer = Arc::new(Mutex::new(PlaybackBuffer {
        samples,
        position: 0,
        finished: false,
    }));
    let buffer_clone = Arc::clone(&buffer);
    let cb_stopped = Arc::clone(&stopped);

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let mut buf = match buffer_clone.lock() {
                    Ok(b) => b,
                    Err(_) => return,
                };
                if cb_stopped.load(Ordering::SeqCst) {
                    data.iter_mut().for_each(|s| *s = 0.0);
                    buf.finished = true;
                    return;
                }

                let start = buf.position;
                for sample in data.iter_mut() {
                    if buf.position < buf.samples.len() {
                        *sample = buf.samples[buf.position];
                        buf.position += 1;
                    } else {
                        *sample = 0.0;
                        buf.finished = true;
                    }
                }
                // Mirror exactly what went to the device onto the tap.
                let end = buf.position;
                if end > start {
                    let played: Vec<f32> = buf.samples[start..end].to_vec();
                    drop(buf);
                    tap.push(&played);
                }
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| WispError::Audio(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| WispError::Audio(format!("failed to start output stream: {e}")))?;

    loop {
        std::thread::sleep(std::time::Duration::from_millis(10));
        if stopped.load(Ordering::SeqCst) {
            break;
        }
        let finished = buffer
            .lock()
            .map(|b| b.finished)
            .unwrap_or(true);
        if finished {
            break;
        }
    }

    drop(stream);
    Ok(())
}
