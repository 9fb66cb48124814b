//! Local ONNX TTS engine.
//!
//! Single-model synthesis: tokenize → ONNX inference → 24 kHz mono audio.
//! Assets (model, tokenizer, voice style tensors) come from HuggingFace Hub
//! and are cached on disk, so only the first run downloads anything. Higher
//! latency per call than the system voice; the controller batches whole
//! sentences for it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info};

use super::{EngineKind, GeneratedAudio, TtsEngine, Voice};
use crate::config::LocalTtsConfig;
use crate::error::{Result, WispError};

/// Maximum model context length, pad tokens included.
const MAX_CONTEXT: usize = 512;

/// Output sample rate in Hz.
const SAMPLE_RATE: u32 = 24_000;

/// Dimensionality of one voice style vector.
const STYLE_DIM: usize = 256;

/// Voices shipped in the default model repo, `(id, display name)`.
const BUILTIN_VOICES: [(&str, &str); 6] = [
    ("af_heart", "Heart (US female)"),
    ("af_bella", "Bella (US female)"),
    ("am_adam", "Adam (US male)"),
    ("am_michael", "Michael (US male)"),
    ("bf_emma", "Emma (UK female)"),
    ("bm_george", "George (UK male)"),
];

/// Local single-model ONNX TTS.
pub struct LocalTts {
    session: Mutex<Session>,
    tokenizer: tokenizers::Tokenizer,
    repo: String,
    voice: Mutex<String>,
    /// Raw voice style tensor, shape `(N, 1, 256)` stored flat and indexed
    /// by token count.
    voice_styles: Mutex<Vec<f32>>,
    speed: f32,
    cancelled: AtomicBool,
    disposed: AtomicBool,
}

impl LocalTts {
    /// Download (or reuse cached) assets and load the model.
    ///
    /// # Errors
    ///
    /// Returns an error if any asset download or model load fails.
    pub fn new(config: &LocalTtsConfig) -> Result<Self> {
        let api = hf_hub::api::sync::Api::new()
            .map_err(|e| WispError::Model(format!("HF Hub API init failed: {e}")))?;
        let repo = api.model(config.repo.clone());

        let model_file = model_filename(&config.variant);
        info!("ensuring model: {}/{model_file}", config.repo);
        let model_path = repo
            .get(model_file)
            .map_err(|e| WispError::Model(format!("failed to download {model_file}: {e}")))?;

        info!("ensuring tokenizer.json");
        let tokenizer_path = repo
            .get("tokenizer.json")
            .map_err(|e| WispError::Model(format!("failed to download tokenizer.json: {e}")))?;

        let voice_path = fetch_voice(&repo, &config.voice)?;

        info!("loading ONNX model");
        let session = Session::builder()
            .and_then(|b| Ok(b.with_intra_threads(4)?))
            .and_then(|mut b| b.commit_from_file(&model_path))
            .map_err(|e| WispError::Tts(format!("failed to load ONNX model: {e}")))?;

        let tokenizer = load_tokenizer(&tokenizer_path)?;
        let voice_styles = load_voice_styles(&voice_path)?;

        info!("local tts ready (voice={})", config.voice);
        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            repo: config.repo.clone(),
            voice: Mutex::new(config.voice.clone()),
            voice_styles: Mutex::new(voice_styles),
            speed: config.speed.clamp(0.5, 2.0),
            cancelled: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        })
    }

    /// The currently selected voice id.
    pub fn current_voice(&self) -> String {
        self.voice
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    fn run_inference(&self, token_ids: &[i64], style: &[f32]) -> Result<Vec<f32>> {
        use ort::session::{SessionInputValue, SessionInputs};

        let seq_len = token_ids.len();

        let input_ids = Tensor::from_array(([1_usize, seq_len], token_ids.to_vec()))
            .map_err(|e| WispError::Tts(format!("failed to create input_ids tensor: {e}")))?;
        let style_tensor = Tensor::from_array(([1_usize, STYLE_DIM], style.to_vec()))
            .map_err(|e| WispError::Tts(format!("failed to create style tensor: {e}")))?;
        let speed_tensor = Tensor::from_array(([1_usize], vec![self.speed]))
            .map_err(|e| WispError::Tts(format!("failed to create speed tensor: {e}")))?;

        let mut feed: HashMap<String, SessionInputValue> = HashMap::new();
        feed.insert("input_ids".to_owned(), input_ids.into());
        feed.insert("style".to_owned(), style_tensor.into());
        feed.insert("speed".to_owned(), speed_tensor.into());

        let mut session = match self.session.lock() {
            Ok(session) => session,
            Err(poisoned) => poisoned.into_inner(),
        };
        let outputs = session
            .run(SessionInputs::from(feed))
            .map_err(|e| WispError::Tts(format!("ONNX inference failed: {e}")))?;

        let (_shape, data) = outputs[0_usize]
            .try_extract_tensor::<f32>()
            .map_err(|e| WispError::Tts(format!("failed to extract output tensor: {e}")))?;
        Ok(data.to_vec())
    }
}

#[async_trait]
impl TtsEngine for LocalTts {
    fn kind(&self) -> EngineKind {
        EngineKind::Local
    }

    async fn generate(&self, text: &str) -> Result<GeneratedAudio> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(WispError::Tts("engine disposed".into()));
        }
        self.cancelled.store(false, Ordering::SeqCst);
        if text.trim().is_empty() {
            return Ok(GeneratedAudio {
                samples: Vec::new(),
                sample_rate: SAMPLE_RATE,
                source_text: text.to_owned(),
            });
        }

        let start = std::time::Instant::now();

        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| WispError::Tts(format!("tokenization failed: {e}")))?;
        // Wrap with pad tokens (id 0); the post-processor was stripped at
        // load time.
        let mut token_ids: Vec<i64> = Vec::with_capacity(encoding.get_ids().len() + 2);
        token_ids.push(0);
        token_ids.extend(encoding.get_ids().iter().map(|&id| id as i64));
        token_ids.push(0);

        if token_ids.len() > MAX_CONTEXT {
            return Err(WispError::Tts(format!(
                "input too long: {} tokens (max {MAX_CONTEXT})",
                token_ids.len()
            )));
        }

        let style = {
            let styles = match self.voice_styles.lock() {
                Ok(styles) => styles,
                Err(poisoned) => poisoned.into_inner(),
            };
            style_for_length(&styles, token_ids.len().saturating_sub(2)).to_vec()
        };

        // Inference is synchronous CPU work.
        let samples = tokio::task::block_in_place(|| self.run_inference(&token_ids, &style))?;

        if self.cancelled.load(Ordering::SeqCst) {
            return Err(WispError::Tts("generation cancelled".into()));
        }

        debug!(
            "synthesized {:.1}s of audio in {:.0}ms",
            samples.len() as f32 / SAMPLE_RATE as f32,
            start.elapsed().as_millis()
        );
        Ok(GeneratedAudio {
            samples,
            sample_rate: SAMPLE_RATE,
            source_text: text.to_owned(),
        })
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn voices(&self) -> Vec<Voice> {
        BUILTIN_VOICES
            .iter()
            .map(|&(id, name)| Voice {
                id: id.to_owned(),
                name: name.to_owned(),
            })
            .collect()
    }

    fn set_voice(&self, voice_id: &str) -> Result<()> {
        if voice_asset(voice_id).is_some()
            && !BUILTIN_VOICES.iter().any(|&(id, _)| id == voice_id)
        {
            return Err(WispError::Tts(format!("unknown voice: {voice_id}")));
        }

        let api = hf_hub::api::sync::Api::new()
            .map_err(|e| WispError::Model(format!("HF Hub API init failed: {e}")))?;
        let repo = api.model(self.repo.clone());
        let path = fetch_voice(&repo, voice_id)?;
        let styles = load_voice_styles(&path)?;

        match self.voice_styles.lock() {
            Ok(mut slot) => *slot = styles,
            Err(poisoned) => *poisoned.into_inner() = styles,
        }
        if let Ok(mut voice) = self.voice.lock() {
            *voice = voice_id.to_owned();
        }
        info!("local voice switched to {voice_id}");
        Ok(())
    }

    fn dispose(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.disposed.store(true, Ordering::SeqCst);
    }
}

/// Map a variant name to the ONNX filename inside the repo's `onnx/` folder.
fn model_filename(variant: &str) -> &'static str {
    match variant {
        "fp32" => "onnx/model.onnx",
        "fp16" => "onnx/model_fp16.onnx",
        "q8" | "quantized" => "onnx/model_quantized.onnx",
        "q4" => "onnx/model_q4.onnx",
        _ => {
            info!("unknown model variant '{variant}', falling back to q8");
            "onnx/model_quantized.onnx"
        }
    }
}

/// Repo-relative voice asset path, or `None` when `voice` is already an
/// absolute path to a `.bin` file on disk.
fn voice_asset(voice: &str) -> Option<String> {
    let path = Path::new(voice);
    if path.extension().is_some_and(|ext| ext == "bin") && path.is_absolute() {
        None
    } else {
        Some(format!("voices/{voice}.bin"))
    }
}

fn fetch_voice(repo: &hf_hub::api::sync::ApiRepo, voice: &str) -> Result<PathBuf> {
    match voice_asset(voice) {
        Some(asset) => {
            info!("ensuring voice: {asset}");
            repo.get(&asset)
                .map_err(|e| WispError::Model(format!("failed to download {asset}: {e}")))
        }
        None => Ok(PathBuf::from(voice)),
    }
}

/// Style vector for an input of `content_len` tokens.
fn style_for_length(styles: &[f32], content_len: usize) -> &[f32] {
    let entries = styles.len() / STYLE_DIM;
    let index = content_len.max(1).min(entries.saturating_sub(1));
    &styles[index * STYLE_DIM..(index + 1) * STYLE_DIM]
}

/// Load and patch the tokenizer definition.
///
/// `tokenizers` v0.22 cannot deserialize the `TemplateProcessing`
/// post-processor these repos ship; strip it (pad tokens are inserted
/// manually) and fill in the `WordLevel` model fields it expects.
fn load_tokenizer(path: &Path) -> Result<tokenizers::Tokenizer> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| WispError::Tts(format!("failed to read tokenizer {}: {e}", path.display())))?;
    let patched = patch_tokenizer_json(&raw)?;
    tokenizers::Tokenizer::from_bytes(patched)
        .map_err(|e| WispError::Tts(format!("failed to load tokenizer: {e}")))
}

fn patch_tokenizer_json(raw: &str) -> Result<String> {
    let mut json: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| WispError::Tts(format!("failed to parse tokenizer JSON: {e}")))?;

    if let Some(obj) = json.as_object_mut() {
        obj.remove("post_processor");
        if let Some(model) = obj.get_mut("model").and_then(|m| m.as_object_mut()) {
            if !model.contains_key("type") {
                model.insert("type".to_owned(), "WordLevel".into());
            }
            if !model.contains_key("unk_token") {
                model.insert("unk_token".to_owned(), "$".into());
            }
        }
    }

    serde_json::to_string(&json)
        .map_err(|e| WispError::Tts(format!("failed to serialize patched tokenizer: {e}")))
}

/// Load a voice style `.bin` as a flat f32 vector, shape `(N, 1, 256)`.
fn load_voice_styles(path: &Path) -> Result<Vec<f32>> {
    let bytes = std::fs::read(path)
        .map_err(|e| WispError::Tts(format!("failed to read voice file {}: {e}", path.display())))?;

    if bytes.len() % 4 != 0 {
        return Err(WispError::Tts(format!(
            "voice file size {} is not an f32 array",
            bytes.len()
        )));
    }
    let float_count = bytes.len() / 4;
    if float_count == 0 || float_count % STYLE_DIM != 0 {
        return Err(WispError::Tts(format!(
            "voice file has {float_count} floats, not a multiple of {STYLE_DIM}"
        )));
    }

    let floats = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect::<Vec<f32>>();
    debug!("loaded voice style: {} entries", float_count / STYLE_DIM);
    Ok(floats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_maps_to_model_file() {
        assert_eq!(model_filename("fp32"), "onnx/model.onnx");
        assert_eq!(model_filename("q8"), "onnx/model_quantized.onnx");
        assert_eq!(model_filename("nonsense"), "onnx/model_quantized.onnx");
    }

    #[test]
    fn named_voice_resolves_to_repo_asset() {
        assert_eq!(voice_asset("af_heart").as_deref(), Some("voices/af_heart.bin"));
    }

    #[test]
    fn absolute_bin_path_bypasses_the_repo() {
        assert!(voice_asset("/home/user/custom.bin").is_none());
    }

    #[test]
    fn style_lookup_indexes_by_token_count_and_clamps() {
        let styles: Vec<f32> = (0..4 * STYLE_DIM).map(|i| i as f32).collect();
        assert_eq!(style_for_length(&styles, 2)[0], (2 * STYLE_DIM) as f32);
        // Beyond the table: clamps to the last entry.
        assert_eq!(style_for_length(&styles, 99)[0], (3 * STYLE_DIM) as f32);
        // Zero-length input still gets a valid vector.
        assert_eq!(style_for_length(&styles, 0)[0], STYLE_DIM as f32);
    }

    #[test]
    fn voice_style_loader_rejects_bad_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice.bin");

        std::fs::write(&path, [0u8; 7]).unwrap();
        assert!(load_voice_styles(&path).is_err());

        std::fs::write(&path, [0u8; 12]).unwrap();
        assert!(load_voice_styles(&path).is_err());

        std::fs::write(&path, vec![0u8; 4 * STYLE_DIM]).unwrap();
        assert_eq!(load_voice_styles(&path).unwrap().len(), STYLE_DIM);
    }

    #[test]
    fn tokenizer_patch_strips_post_processor_and_fills_model_fields() {
        let raw = r#"{
            "post_processor": {"type": "TemplateProcessing"},
            "model": {"vocab": {"a": 1}}
        }"#;
        let patched = patch_tokenizer_json(raw).unwrap();
        let json: serde_json::Value = serde_json::from_str(&patched).unwrap();
        assert!(json.get("post_processor").is_none());
        assert_eq!(json["model"]["type"], "WordLevel");
        assert_eq!(json["model"]["unk_token"], "$");
    }
}
