//! Platform system-voice engine.
//!
//! Shells out to the OS speech binary (`say` on macOS, `espeak`/`espeak-ng`
//! elsewhere) and decodes its WAV output into the shared sample format.
//! Latency per call is low, so the controller feeds this engine raw deltas
//! instead of batched sentences.

use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{EngineKind, GeneratedAudio, TtsEngine, Voice};
use crate::error::{Result, WispError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpeechBinary {
    /// macOS `say`.
    Say,
    /// `espeak` or `espeak-ng`.
    Espeak,
}

/// TTS via the operating system's speech binary.
pub struct SystemVoice {
    binary: SpeechBinary,
    path: PathBuf,
    voice: Mutex<Option<String>>,
    cancelled: AtomicBool,
    disposed: AtomicBool,
}

impl SystemVoice {
    /// Locate a speech binary on this machine.
    ///
    /// # Errors
    ///
    /// Returns an error when neither `say` nor `espeak` is on the path.
    pub fn new() -> Result<Self> {
        let (binary, path) = discover()?;
        info!("system voice: {}", path.display());
        Ok(Self {
            binary,
            path,
            voice: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        })
    }

    fn selected_voice(&self) -> Option<String> {
        self.voice.lock().ok().and_then(|v| v.clone())
    }
}

fn discover() -> Result<(SpeechBinary, PathBuf)> {
    if let Ok(path) = which::which("say") {
        return Ok((SpeechBinary::Say, path));
    }
    for name in ["espeak-ng", "espeak"] {
        if let Ok(path) = which::which(name) {
            return Ok((SpeechBinary::Espeak, path));
        }
    }
    Err(WispError::Tts(
        "no system speech binary found (say / espeak)".into(),
    ))
}

#[async_trait]
impl TtsEngine for SystemVoice {
    fn kind(&self) -> EngineKind {
        EngineKind::System
    }

    async fn generate(&self, text: &str) -> Result<GeneratedAudio> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(WispError::Tts("engine disposed".into()));
        }
        self.cancelled.store(false, Ordering::SeqCst);

        let (samples, sample_rate) = match self.binary {
            SpeechBinary::Say => self.generate_say(text).await?,
            SpeechBinary::Espeak => self.generate_espeak(text).await?,
        };
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(WispError::Tts("generation cancelled".into()));
        }

        debug!(
            "system voice: {} chars -> {} samples @ {sample_rate}Hz",
            text.chars().count(),
            samples.len()
        );
        Ok(GeneratedAudio {
            samples,
            sample_rate,
            source_text: text.to_owned(),
        })
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn voices(&self) -> Vec<Voice> {
        let output = match self.binary {
            SpeechBinary::Say => std::process::Command::new(&self.path).args(["-v", "?"]).output(),
            SpeechBinary::Espeak => std::process::Command::new(&self.path).arg("--voices").output(),
        };
        let Ok(output) = output else {
            return Vec::new();
        };
        let listing = String::from_utf8_lossy(&output.stdout);
        match self.binary {
            SpeechBinary::Say => parse_say_voices(&listing),
            SpeechBinary::Espeak => parse_espeak_voices(&listing),
        }
    }

    fn set_voice(&self, voice_id: &str) -> Result<()> {
        let known = self.voices();
        if !known.is_empty() && !known.iter().any(|v| v.id == voice_id) {
            return Err(WispError::Tts(format!("unknown voice: {voice_id}")));
        }
        if let Ok(mut voice) = self.voice.lock() {
            *voice = Some(voice_id.to_owned());
        }
        Ok(())
    }

    fn dispose(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.disposed.store(true, Ordering::SeqCst);
    }
}

impl SystemVoice {
    /// `say` only writes to a file; use a temp path and clean it up.
    async fn generate_say(&self, text: &str) -> Result<(Vec<f32>, u32)> {
        let out_path =
            std::env::temp_dir().join(format!("wisp-say-{}.wav", uuid::Uuid::new_v4()));

        let mut command = Command::new(&self.path);
        command.arg("-o").arg(&out_path).arg("--data-format=LEF32@24000");
        if let Some(voice) = self.selected_voice() {
            command.args(["-v", &voice]);
        }
        command.arg(text);

        let output = command
            .output()
            .await
            .map_err(|e| WispError::Tts(format!("failed to run say: {e}")))?;
        if !output.status.success() {
            let _ = std::fs::remove_file(&out_path);
            return Err(WispError::Tts(format!(
                "say exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let file = std::fs::File::open(&out_path)
            .map_err(|e| WispError::Tts(format!("cannot open say output: {e}")))?;
        let decoded = decode_wav(file);
        let _ = std::fs::remove_file(&out_path);
        decoded
    }

    async fn generate_espeak(&self, text: &str) -> Result<(Vec<f32>, u32)> {
        let mut command = Command::new(&self.path);
        command.arg("--stdout");
        if let Some(voice) = self.selected_voice() {
            command.args(["-v", &voice]);
        }
        command.arg(text);

        let output = command
            .output()
            .await
            .map_err(|e| WispError::Tts(format!("failed to run espeak: {e}")))?;
        if !output.status.success() {
            return Err(WispError::Tts(format!(
                "espeak exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        decode_wav(std::io::Cursor::new(output.stdout))
    }
}

/// Decode a WAV stream to mono f32 samples.
fn decode_wav(source: impl Read) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::new(source)
        .map_err(|e| WispError::Tts(format!("cannot decode speech output: {e}")))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| {
                    s.map_err(|e| WispError::Tts(format!("WAV read error: {e}")))
                        .map(|v| v as f32 / max)
                })
                .collect::<Result<Vec<f32>>>()?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map_err(|e| WispError::Tts(format!("WAV read error: {e}"))))
            .collect::<Result<Vec<f32>>>()?,
    };

    let samples = if spec.channels > 1 {
        let ch = spec.channels as usize;
        samples
            .chunks(ch)
            .map(|frame| frame.iter().sum::<f32>() / ch as f32)
            .collect()
    } else {
        samples
    };

    Ok((samples, spec.sample_rate))
}

/// Parse `say -v ?` output: name, whitespace run, language, `#` comment.
fn parse_say_voices(listing: &str) -> Vec<Voice> {
    listing
        .lines()
        .filter_map(|line| {
            let name = line.split("  ").next()?.trim();
            if name.is_empty() {
                return None;
            }
            Some(Voice {
                id: name.to_owned(),
                name: name.to_owned(),
            })
        })
        .collect()
}

/// Parse `espeak --voices` output: the voice name is the fourth column.
fn parse_espeak_voices(listing: &str) -> Vec<Voice> {
    listing
        .lines()
        .skip(1)
        .filter_map(|line| {
            let name = line.split_whitespace().nth(3)?;
            Some(Voice {
                id: name.to_owned(),
                name: name.to_owned(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(samples: &[i16], channels: u16, sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn decodes_mono_int_wav() {
        let bytes = wav_bytes(&[0, 16384, -16384, 0], 1, 22_050);
        let (samples, rate) = decode_wav(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(rate, 22_050);
        assert_eq!(samples.len(), 4);
        assert!((samples[1] - 0.5).abs() < 0.001);
        assert!((samples[2] + 0.5).abs() < 0.001);
    }

    #[test]
    fn stereo_wav_mixes_to_mono() {
        let bytes = wav_bytes(&[16384, -16384, 8192, 8192], 2, 24_000);
        let (samples, _) = decode_wav(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples[0].abs() < 0.001);
        assert!((samples[1] - 0.25).abs() < 0.001);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(decode_wav(std::io::Cursor::new(vec![1u8, 2, 3, 4])).is_err());
    }

    #[test]
    fn parses_say_voice_listing() {
        let listing = "\
Alex                en_US    # Most people recognize me by my voice.
Samantha            en_US    # Hello, my name is Samantha.
";
        let voices = parse_say_voices(listing);
        assert_eq!(voices.len(), 2);
        assert_eq!(voices[0].id, "Alex");
        assert_eq!(voices[1].id, "Samantha");
    }

    #[test]
    fn parses_espeak_voice_listing() {
        let listing = "\
Pty Language Age/Gender VoiceName          File          Other Languages
 5  af             M  afrikaans            other/af
 5  en-gb          M  english              en
";
        let voices = parse_espeak_voices(listing);
        assert_eq!(voices.len(), 2);
        assert_eq!(voices[0].id, "afrikaans");
        assert_eq!(voices[1].id, "english");
    }
}
