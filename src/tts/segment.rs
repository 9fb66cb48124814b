//! Sentence segmentation for streaming TTS.
//!
//! Cumulative agent text arrives in irregular bursts; the local engine's
//! per-call latency makes it worth synthesizing as soon as a complete
//! sentence exists instead of waiting for the whole response. Two safety
//! valves cover unpunctuated streams (length flush) and stalled streams
//! (idle flush).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Force-flush once the buffer exceeds this many characters without a
/// sentence terminator (code, lists).
const MAX_BUFFERED_CHARS: usize = 200;
/// Force-flush after this long with no new boundary (stalled stream).
const IDLE_FLUSH: Duration = Duration::from_secs(3);

/// A segment queued for generation.
///
/// `cancelled` is shared with any in-flight generation task so a late
/// result can be dropped instead of playing stale audio.
#[derive(Debug, Clone)]
pub struct PendingSegment {
    pub text: String,
    cancelled: Arc<AtomicBool>,
}

impl PendingSegment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Split complete sentences off the front of `text`.
///
/// A sentence ends at `.`, `?`, or `!` followed by whitespace or end of
/// input. Returns the extracted sentences (trimmed) and the unterminated
/// remainder.
pub fn extract_sentences(text: &str) -> (Vec<String>, String) {
    let mut sentences = Vec::new();
    let mut start = 0;

    let bytes = text.char_indices().collect::<Vec<_>>();
    let mut i = 0;
    while i < bytes.len() {
        let (idx, c) = bytes[i];
        if matches!(c, '.' | '?' | '!') {
            let end = idx + c.len_utf8();
            let terminated = match text[end..].chars().next() {
                None => true,
                Some(next) => next.is_whitespace(),
            };
            if terminated {
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_owned());
                }
                start = end;
            }
        }
        i += 1;
    }

    (sentences, text[start..].trim_start().to_owned())
}

/// Rolling buffer that turns delta text into generation-ready segments.
pub struct SentenceBuffer {
    buffer: String,
    last_push: Instant,
}

impl Default for SentenceBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl SentenceBuffer {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            last_push: Instant::now(),
        }
    }

    /// Append delta text and extract whatever complete sentences now exist.
    ///
    /// The length valve fires here too: an overlong unterminated buffer is
    /// flushed whole.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);
        self.last_push = Instant::now();

        let (mut sentences, remainder) = extract_sentences(&self.buffer);
        self.buffer = remainder;

        if self.buffer.chars().count() > MAX_BUFFERED_CHARS {
            sentences.push(std::mem::take(&mut self.buffer));
        }
        sentences
    }

    /// Flush the remainder if the stream has stalled past the idle window.
    pub fn take_if_idle(&mut self) -> Option<String> {
        if self.buffer.trim().is_empty() || self.last_push.elapsed() < IDLE_FLUSH {
            return None;
        }
        Some(std::mem::take(&mut self.buffer))
    }

    /// Unconditionally flush the remainder (end of turn).
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_owned())
        }
    }

    /// Drop buffered text without emitting it.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    #[cfg(test)]
    fn pending(&self) -> &str {
        &self.buffer
    }
}
