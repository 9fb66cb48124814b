//! Realtime spectral lip-sync analysis.
//!
//! Consumes a tap off the live playback graph (never the source buffer, so
//! streamed segments work too), extracts six band energies per frame and
//! projects them onto the five canonical visemes. The winner and runner-up
//! bands drive the mouth; everything else is zeroed. Per-channel smoothing
//! uses a faster attack than release so the mouth opens snappily and closes
//! gently.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::viseme::Viseme;

/// Frequency bands analysed per frame, in Hz, with the viseme each projects
/// onto. The sibilant band has no mouth shape of its own and rides on `ih`
/// as the closest visual.
const BANDS: [(f32, f32, Viseme); 6] = [
    (100.0, 400.0, Viseme::Ou),
    (400.0, 800.0, Viseme::Oh),
    (800.0, 1500.0, Viseme::Aa),
    (1500.0, 2500.0, Viseme::Ee),
    (2500.0, 4000.0, Viseme::Ih),
    // Sibilant energy.
    (4000.0, 8000.0, Viseme::Ih),
];

/// Below this smoothed value a channel snaps to zero instead of decaying
/// asymptotically forever.
const SNAP_EPSILON: f32 = 0.01;

/// Tuning for the spectral analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    /// Sample rate of the tapped audio in Hz.
    pub sample_rate: u32,
    /// FFT size (power of two).
    pub fft_size: usize,
    /// Cap applied to the winner and runner-up weights.
    pub max_weight: f32,
    /// RMS amplitude below which the frame counts as silence.
    pub silence_amplitude: f32,
    /// Winner band energy floor; quieter winners count as silence.
    pub winner_floor: f32,
    /// Seconds of persistent silence before all targets are forced to zero.
    pub idle_window_secs: f32,
    /// Smoothing rate toward a louder target, per second.
    pub attack_rate: f32,
    /// Smoothing rate toward a quieter target, per second.
    pub release_rate: f32,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            fft_size: 1024,
            max_weight: 0.8,
            silence_amplitude: 0.01,
            winner_floor: 1e-4,
            idle_window_secs: 0.15,
            attack_rate: 24.0,
            release_rate: 8.0,
        }
    }
}

/// Per-frame spectral analysis with winner/runner viseme selection.
pub struct SpectralAnalyzer {
    config: SpectralConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    /// Rolling sample history, always `fft_size` long.
    history: Vec<f32>,
    /// Smoothed per-viseme outputs.
    smoothed: [f32; 5],
    silence_elapsed: f32,
    disposed: bool,
}

impl SpectralAnalyzer {
    pub fn new(config: SpectralConfig) -> Self {
        let fft_size = config.fft_size.max(64);
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);

        // Hann window.
        let window: Vec<f32> = (0..fft_size)
            .map(|i| {
                let x = i as f32 / (fft_size - 1) as f32;
                0.5 - 0.5 * (2.0 * std::f32::consts::PI * x).cos()
            })
            .collect();

        Self {
            config: SpectralConfig { fft_size, ..config },
            fft,
            window,
            history: vec![0.0; fft_size],
            smoothed: [0.0; 5],
            silence_elapsed: 0.0,
            disposed: false,
        }
    }

    /// Feed tapped playback samples and advance smoothing by `delta` seconds.
    ///
    /// Returns the smoothed per-viseme weights, indexed by
    /// [`Viseme::index`]. Call every frame; an empty `samples` slice reuses
    /// the previous window (the tap may drain faster than it fills).
    pub fn process(&mut self, samples: &[f32], delta: f32) -> [f32; 5] {
        if self.disposed {
            return [0.0; 5];
        }

        self.push_history(samples);
        let targets = self.frame_targets(delta);

        for i in 0..5 {
            let target = targets[i];
            let rate = if target > self.smoothed[i] {
                self.config.attack_rate
            } else {
                self.config.release_rate
            };
            let k = (rate * delta).min(1.0);
            self.smoothed[i] += (target - self.smoothed[i]) * k;
            if self.smoothed[i] < SNAP_EPSILON {
                self.smoothed[i] = 0.0;
            }
        }

        self.smoothed
    }

    /// Current smoothed weights without feeding new samples.
    pub fn weights(&self) -> [f32; 5] {
        self.smoothed
    }

    /// Zero all state; subsequent calls are no-ops.
    pub fn dispose(&mut self) {
        self.smoothed = [0.0; 5];
        self.history.iter_mut().for_each(|s| *s = 0.0);
        self.disposed = true;
    }

    fn push_history(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        let n = self.config.fft_size;
        if samples.len() >= n {
            self.history.copy_from_slice(&samples[samples.len() - n..]);
        } else {
            self.history.rotate_left(samples.len());
            let start = n - samples.len();
            self.history[start..].copy_from_slice(samples);
        }
    }

    fn frame_targets(&mut self, delta: f32) -> [f32; 5] {
        let rms = compute_rms(&self.history);
        // Amplitude compression: quiet speech still moves the mouth.
        let amplitude = (rms * 0.9).min(1.0).powf(0.7);

        let energies = self.band_energies();
        let (winner, runner) = rank_bands(&energies);

        let silent = rms < self.config.silence_amplitude
            || energies[winner] < self.config.winner_floor;
        if silent {
            self.silence_elapsed += delta;
        } else {
            self.silence_elapsed = 0.0;
        }
        if silent && self.silence_elapsed >= self.config.idle_window_secs {
            // Idle noise must not twitch the mouth.
            return [0.0; 5];
        }
        if silent {
            // Within the idle window: hold current targets at zero change by
            // aiming at the existing smoothed values.
            return self.smoothed;
        }

        let mut targets = [0.0f32; 5];
        let winner_weight = amplitude.min(self.config.max_weight);
        let winner_viseme = BANDS[winner].2;
        targets[winner_viseme.index()] = winner_weight;

        if let Some(runner) = runner {
            let ratio = if energies[winner] > 0.0 {
                (energies[runner] / energies[winner]).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let runner_weight = (amplitude * ratio).min(self.config.max_weight);
            let idx = BANDS[runner].2.index();
            // Winner and runner can project onto the same viseme (sibilant
            // rides on ih); keep the louder of the two.
            targets[idx] = targets[idx].max(runner_weight);
        }

        targets
    }

    fn band_energies(&self) -> [f32; 6] {
        let n = self.config.fft_size;
        let mut buffer: Vec<Complex<f32>> = self
            .history
            .iter()
            .zip(self.window.iter())
            .map(|(&s, &w)| Complex::new(s * w, 0.0))
            .collect();
        self.fft.process(&mut buffer);

        let bin_hz = self.config.sample_rate as f32 / n as f32;
        let mut energies = [0.0f32; 6];
        for (band, &(lo, hi, _)) in BANDS.iter().enumerate() {
            let lo_bin = (lo / bin_hz) as usize;
            let hi_bin = ((hi / bin_hz) as usize).min(n / 2);
            if lo_bin >= hi_bin {
                continue;
            }
            let sum: f32 = buffer[lo_bin..hi_bin].iter().map(|c| c.norm_sqr()).sum();
            energies[band] = sum / (hi_bin - lo_bin) as f32;
        }
        energies
    }
}

fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Indices of the loudest and second-loudest bands.
fn rank_bands(energies: &[f32; 6]) -> (usize, Option<usize>) {
    let mut winner = 0;
    for i in 1..6 {
        if energies[i] > energies[winner] {
            winner = i;
        }
    }
    let mut runner: Option<usize> = None;
    for i in 0..6 {
        if i == winner {
            continue;
        }
        match runner {
            Some(r) if energies[i] <= energies[r] => {}
            _ => runner = Some(i),
        }
    }
    (winner, runner.filter(|&r| energies[r] > 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                amplitude * (2.0 * std::f32::consts::PI * freq * t).sin()
            })
            .collect()
    }

    #[test]
    fn silence_produces_no_motion() {
        let mut analyzer = SpectralAnalyzer::new(SpectralConfig::default());
        let silence = vec![0.0f32; 1024];
        let mut weights = [0.0; 5];
        for _ in 0..30 {
            weights = analyzer.process(&silence, 1.0 / 60.0);
        }
        assert_eq!(weights, [0.0; 5]);
    }

    #[test]
    fn low_tone_drives_rounded_viseme() {
        let mut analyzer = SpectralAnalyzer::new(SpectralConfig::default());
        let tone = sine(250.0, 24_000, 1024, 0.6);
        let mut weights = [0.0; 5];
        for _ in 0..60 {
            weights = analyzer.process(&tone, 1.0 / 60.0);
        }
        let ou = weights[Viseme::Ou.index()];
        assert!(ou > 0.1, "ou weight {ou} too small: {weights:?}");
        for v in [Viseme::Aa, Viseme::Ee] {
            assert!(weights[v.index()] <= ou);
        }
    }

    #[test]
    fn sibilant_band_projects_onto_ih() {
        let mut analyzer = SpectralAnalyzer::new(SpectralConfig::default());
        let hiss = sine(6000.0, 24_000, 1024, 0.5);
        let mut weights = [0.0; 5];
        for _ in 0..60 {
            weights = analyzer.process(&hiss, 1.0 / 60.0);
        }
        assert!(weights[Viseme::Ih.index()] > 0.1, "{weights:?}");
    }

    #[test]
    fn weights_respect_cap() {
        let config = SpectralConfig {
            max_weight: 0.5,
            ..SpectralConfig::default()
        };
        let mut analyzer = SpectralAnalyzer::new(config);
        let tone = sine(1000.0, 24_000, 1024, 1.0);
        for _ in 0..120 {
            analyzer.process(&tone, 1.0 / 60.0);
        }
        for w in analyzer.weights() {
            assert!(w <= 0.5 + 1e-3);
        }
    }

    #[test]
    fn attack_faster_than_release() {
        let mut analyzer = SpectralAnalyzer::new(SpectralConfig::default());
        let tone = sine(1000.0, 24_000, 1024, 0.8);

        // One loud frame: mouth opens quickly.
        analyzer.process(&tone, 1.0 / 30.0);
        let after_attack = analyzer.weights()[Viseme::Aa.index()];
        assert!(after_attack > 0.0);

        // One silent frame of equal length closes more slowly than it opened.
        let silence = vec![0.0f32; 1024];
        analyzer.process(&silence, 1.0 / 30.0);
        let after_release = analyzer.weights()[Viseme::Aa.index()];
        let opened = after_attack;
        let closed = opened - after_release;
        assert!(closed < opened, "release {closed} not gentler than attack {opened}");
    }

    #[test]
    fn sustained_silence_snaps_to_zero() {
        let mut analyzer = SpectralAnalyzer::new(SpectralConfig::default());
        let tone = sine(1000.0, 24_000, 1024, 0.8);
        for _ in 0..30 {
            analyzer.process(&tone, 1.0 / 60.0);
        }
        let silence = vec![0.0f32; 1024];
        for _ in 0..120 {
            analyzer.process(&silence, 1.0 / 60.0);
        }
        assert_eq!(analyzer.weights(), [0.0; 5]);
    }

    #[test]
    fn disposed_analyzer_returns_zeros() {
        let mut analyzer = SpectralAnalyzer::new(SpectralConfig::default());
        analyzer.dispose();
        let tone = sine(1000.0, 24_000, 1024, 0.8);
        assert_eq!(analyzer.process(&tone, 0.1), [0.0; 5]);
    }

    #[test]
    fn rank_bands_orders_by_energy() {
        let energies = [0.1, 0.5, 0.3, 0.0, 0.0, 0.0];
        let (winner, runner) = rank_bands(&energies);
        assert_eq!(winner, 1);
        assert_eq!(runner, Some(2));
    }
}
