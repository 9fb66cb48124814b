//! Viseme mapping for lip-sync animation.
//!
//! A viseme is a visual mouth shape corresponding to a sound. Five canonical
//! shapes are the universal currency between the three lip-sync drive modes
//! and the model's blend-shape channels.

mod lipsync;
mod spectral;

pub use lipsync::{LipSyncEngine, LipSyncMode};
pub use spectral::{SpectralAnalyzer, SpectralConfig};

/// The five canonical mouth shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Viseme {
    /// /a/ — mouth open wide.
    Aa = 0,
    /// /i/ — mouth wide, teeth apart. Also carries sibilants.
    Ih = 1,
    /// /u/ — rounded, small.
    Ou = 2,
    /// /e/ — mouth medium.
    Ee = 3,
    /// /o/ — rounded, medium.
    Oh = 4,
}

/// All visemes in channel order.
pub const ALL_VISEMES: [Viseme; 5] = [Viseme::Aa, Viseme::Ih, Viseme::Ou, Viseme::Ee, Viseme::Oh];

impl Viseme {
    /// Blend channel name on the model for this mouth shape.
    pub fn channel(self) -> &'static str {
        match self {
            Viseme::Aa => "aa",
            Viseme::Ih => "ih",
            Viseme::Ou => "ou",
            Viseme::Ee => "ee",
            Viseme::Oh => "oh",
        }
    }

    /// Index into per-viseme weight arrays.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// One timed mouth shape, consumed by the audio-timer queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisemeFrame {
    pub viseme: Viseme,
    /// How long this shape is held, in milliseconds.
    pub duration_ms: f32,
    /// Target openness, 0..=1.
    pub weight: f32,
}

impl VisemeFrame {
    pub fn new(viseme: Viseme, duration_ms: f32, weight: f32) -> Self {
        Self {
            viseme,
            duration_ms: duration_ms.max(0.0),
            weight: weight.clamp(0.0, 1.0),
        }
    }
}

/// Map a single character to a mouth shape.
///
/// Vowels map directly. Consonants return `None` — the caller holds the
/// previous viseme over them. Whitespace and punctuation close the mouth.
pub fn char_to_viseme(c: char) -> CharShape {
    match c.to_ascii_lowercase() {
        'a' => CharShape::Vowel(Viseme::Aa),
        'i' | 'y' => CharShape::Vowel(Viseme::Ih),
        'u' | 'w' => CharShape::Vowel(Viseme::Ou),
        'e' => CharShape::Vowel(Viseme::Ee),
        'o' => CharShape::Vowel(Viseme::Oh),
        c if c.is_alphanumeric() => CharShape::Consonant,
        _ => CharShape::Silence,
    }
}

/// Classification of a character for the text-timer drive mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharShape {
    /// Direct vowel mapping.
    Vowel(Viseme),
    /// Hold whatever shape is active.
    Consonant,
    /// Close the mouth.
    Silence,
}

/// Base duration per mapped character in the pure mapper, milliseconds.
const CHAR_DURATION_MS: f32 = 80.0;

/// Convert word text to a timed viseme sequence. Pure, no state.
///
/// Consecutive identical shapes are merged by extending the previous frame,
/// which smooths the resulting animation. `rate` scales durations: 2.0 talks
/// twice as fast.
pub fn text_to_viseme_frames(text: &str, rate: f32) -> Vec<VisemeFrame> {
    let duration = CHAR_DURATION_MS / rate.max(0.5);
    let mut frames: Vec<VisemeFrame> = Vec::new();
    let mut held: Option<Viseme> = None;

    for c in text.chars() {
        let (viseme, weight) = match char_to_viseme(c) {
            CharShape::Vowel(v) => {
                held = Some(v);
                (v, 0.9)
            }
            CharShape::Consonant => match held {
                // Consonants keep the previous vowel shape, slightly closed.
                Some(v) => (v, 0.4),
                None => continue,
            },
            CharShape::Silence => {
                held = None;
                continue;
            }
        };

        if let Some(last) = frames.last_mut() {
            if last.viseme == viseme && (last.weight - weight).abs() < f32::EPSILON {
                last.duration_ms += duration;
                continue;
            }
        }
        frames.push(VisemeFrame::new(viseme, duration, weight));
    }

    frames
}

/// Estimate the spoken duration of text in milliseconds.
pub fn estimate_duration_ms(text: &str, words_per_minute: f32) -> f32 {
    let word_count = text.split_whitespace().count() as f32;
    let minutes = word_count / words_per_minute.max(30.0);
    minutes * 60.0 * 1000.0
}

/// Scale a frame sequence so its total duration matches `target_ms`.
///
/// Used to fit boundary-estimated frames to an engine's reported utterance
/// length. A zero-length sequence is returned unchanged.
pub fn scale_frames_to(frames: &mut [VisemeFrame], target_ms: f32) {
    let total: f32 = frames.iter().map(|f| f.duration_ms).sum();
    if total <= f32::EPSILON || target_ms <= 0.0 {
        return;
    }
    let factor = target_ms / total;
    for frame in frames {
        frame.duration_ms *= factor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vowels_map_directly() {
        assert_eq!(char_to_viseme('a'), CharShape::Vowel(Viseme::Aa));
        assert_eq!(char_to_viseme('E'), CharShape::Vowel(Viseme::Ee));
        assert_eq!(char_to_viseme('o'), CharShape::Vowel(Viseme::Oh));
    }

    #[test]
    fn consonants_hold_and_punctuation_closes() {
        assert_eq!(char_to_viseme('k'), CharShape::Consonant);
        assert_eq!(char_to_viseme(' '), CharShape::Silence);
        assert_eq!(char_to_viseme('.'), CharShape::Silence);
    }

    #[test]
    fn mapper_merges_repeated_shapes() {
        // "aa" merges into a single longer Aa frame.
        let frames = text_to_viseme_frames("aa", 1.0);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].viseme, Viseme::Aa);
        assert!(frames[0].duration_ms > CHAR_DURATION_MS);
    }

    #[test]
    fn mapper_skips_leading_consonants() {
        // No vowel yet, nothing to hold.
        let frames = text_to_viseme_frames("str", 1.0);
        assert!(frames.is_empty());
    }

    #[test]
    fn mapper_produces_frames_for_words() {
        let frames = text_to_viseme_frames("hello world", 1.0);
        assert!(!frames.is_empty());
        assert!(frames.iter().all(|f| f.weight > 0.0 && f.weight <= 1.0));
    }

    #[test]
    fn estimate_duration_sane() {
        let ms = estimate_duration_ms("hello there friend", 150.0);
        assert!(ms > 500.0 && ms < 3000.0);
    }

    #[test]
    fn scale_frames_matches_target() {
        let mut frames = text_to_viseme_frames("hello world", 1.0);
        scale_frames_to(&mut frames, 1000.0);
        let total: f32 = frames.iter().map(|f| f.duration_ms).sum();
        assert!((total - 1000.0).abs() < 0.5);
    }
}
