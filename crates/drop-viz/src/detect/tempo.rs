//! Tempo tracking via autocorrelation of the onset-strength series.
//!
//! More robust than inter-onset-interval statistics: periodicity shows up
//! as autocorrelation peaks even when individual onsets are missed. Octave
//! and fifth errors are the classic failure mode. Two defenses: peaks are
//! weighted by a log-Gaussian tempo prior (a strictly periodic click train
//! has identical correlation at every multiple of its period, so raw peak
//! height alone cannot pick the octave), and near-harmonic peaks of
//! comparable weighted strength resolve to the longer lag (the fundamental).
//!
//! A manual tap tempo overrides the estimator entirely until taps stop.

use std::collections::VecDeque;

use crate::utils::History;

#[derive(Clone, Copy, Debug)]
pub struct TempoConfig {
    pub min_bpm: f32,
    pub max_bpm: f32,
    /// Analysis frame rate the lag window is derived from.
    pub frame_rate: f32,
    /// Maximum BPM change per estimator update.
    pub max_step: f32,
    /// A harmonic peak at this fraction of the best correlation wins.
    pub harmonic_ratio: f32,
    /// Center of the log-Gaussian tempo prior.
    pub prior_bpm: f32,
    /// Width of the tempo prior, in octaves.
    pub prior_octaves: f32,
    pub initial_bpm: f32,
    /// Taps further apart than this reset the tap sequence.
    pub tap_timeout_ms: f64,
    pub max_taps: usize,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            min_bpm: 60.0,
            max_bpm: 180.0,
            frame_rate: 60.0,
            max_step: 5.0,
            harmonic_ratio: 0.70,
            prior_bpm: 120.0,
            prior_octaves: 0.5,
            initial_bpm: 128.0,
            tap_timeout_ms: 3000.0,
            max_taps: 8,
        }
    }
}

/// Per-frame beat scheduling output.
#[derive(Clone, Copy, Debug, Default)]
pub struct BeatFrame {
    pub beat: bool,
    pub bar: bool,
    /// Position within the current 4-beat bar (0-3).
    pub beat_in_bar: u8,
}

pub struct TempoTracker {
    config: TempoConfig,
    bpm: f32,
    beat_interval_ms: f64,
    confidence: f32,
    beat_count: u64,
    last_beat_ms: f64,
    /// True once at least one autocorrelation estimate has landed; the
    /// first estimate snaps directly instead of being rate-limited.
    seeded: bool,
    tap_times: VecDeque<f64>,
    tap_bpm: Option<f32>,
    tap_active: bool,
    tap_confidence: f32,
}

impl TempoTracker {
    pub fn new(config: TempoConfig) -> Self {
        Self {
            bpm: config.initial_bpm,
            beat_interval_ms: 60_000.0 / config.initial_bpm as f64,
            confidence: 0.0,
            beat_count: 0,
            last_beat_ms: 0.0,
            seeded: false,
            tap_times: VecDeque::with_capacity(config.max_taps + 1),
            tap_bpm: None,
            tap_active: false,
            tap_confidence: 0.0,
            config,
        }
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    pub fn beat_interval_ms(&self) -> f64 {
        self.beat_interval_ms
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn beat_count(&self) -> u64 {
        self.beat_count
    }

    pub fn bar_count(&self) -> u64 {
        self.beat_count / 4
    }

    pub fn tap_active(&self) -> bool {
        self.tap_active
    }

    /// Tempo locked by the current tap sequence, if one is live.
    pub fn tap_bpm(&self) -> Option<f32> {
        self.tap_bpm
    }

    /// Milliseconds until the next bar boundary on the current beat clock.
    pub fn ms_to_next_bar(&self, now_ms: f64) -> f64 {
        let into_beat = (now_ms - self.last_beat_ms).clamp(0.0, self.beat_interval_ms);
        let beats_left = (4 - (self.beat_count % 4)) as f64;
        (beats_left * self.beat_interval_ms - into_beat).max(0.0)
    }

    /// Re-estimate tempo from the per-frame onset-strength history.
    /// Called when an onset fires; a no-op while tap tempo is active.
    pub fn update_estimate(&mut self, odf_history: &History) {
        if self.tap_active {
            return;
        }

        let mut signal = odf_history.to_vec();
        let n = signal.len();

        // Mean-center first: the combined ODF carries a large sustained
        // component (HFC), and its DC offset would flatten the correlation
        // peaks into the floor.
        if n > 0 {
            let mean = signal.iter().sum::<f32>() / n as f32;
            for v in &mut signal {
                *v -= mean;
            }
        }

        let min_lag =
            ((self.config.frame_rate * 60.0 / self.config.max_bpm).floor() as usize).max(2);
        let max_lag =
            ((self.config.frame_rate * 60.0 / self.config.min_bpm).floor() as usize).max(min_lag);
        if n < min_lag * 2 {
            return;
        }

        // Autocorrelation at every candidate lag, weighted by the tempo
        // prior. Entries are (lag, raw correlation, weighted correlation).
        let mut correlations: Vec<(usize, f32, f32)> =
            Vec::with_capacity(max_lag - min_lag + 1);
        for lag in min_lag..=max_lag.min(n / 2) {
            let mut corr = 0.0f32;
            let count = n - lag;
            for i in 0..count {
                corr += signal[i] * signal[i + lag];
            }
            let corr = corr / count as f32;
            correlations.push((lag, corr, corr * self.lag_prior(lag)));
        }
        if correlations.is_empty() {
            return;
        }

        correlations
            .sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        let (mut best_lag, mut best_raw, best_weighted) = correlations[0];

        // Harmonic rejection: if a longer, near-integer-ratio lag is almost
        // as strong, it is the fundamental - prefer it over the harmonic.
        for &(lag, raw, weighted) in correlations.iter().take(10).skip(1) {
            let ratio = lag as f32 / best_lag as f32;
            let is_harmonic = (1.8..=2.2).contains(&ratio)       // 2:1 octave
                || (1.4..=1.6).contains(&ratio)                  // 3:2 fifth
                || (1.25..1.4).contains(&ratio)                  // 4:3 / 5:4
                || (1.1..1.25).contains(&ratio);
            if is_harmonic && weighted > best_weighted * self.config.harmonic_ratio {
                best_lag = lag;
                best_raw = raw;
                break;
            }
        }

        let estimated = self.config.frame_rate * 60.0 / best_lag as f32;
        if estimated < self.config.min_bpm || estimated > self.config.max_bpm {
            return;
        }

        let prev = self.bpm;
        if !self.seeded {
            // First estimate initializes the tracker directly.
            self.bpm = estimated;
            self.seeded = true;
        } else {
            // Two-phase smoothing: lock hard when close, converge fast when far.
            let diff = (estimated - prev).abs();
            let smoothing = if diff < 5.0 {
                0.90
            } else if diff < 15.0 {
                0.70
            } else {
                0.40
            };
            self.bpm = prev * smoothing + estimated * (1.0 - smoothing);

            // Rate limit so the readout never visibly jumps.
            let delta = self.bpm - prev;
            if delta.abs() > self.config.max_step {
                self.bpm = prev + self.config.max_step.copysign(delta);
            }
        }
        self.beat_interval_ms = 60_000.0 / self.bpm as f64;

        // Confidence from peak strength relative to signal energy.
        let energy = signal.iter().map(|v| v * v).sum::<f32>() / n as f32;
        self.confidence = if energy > 0.0 {
            (best_raw / energy).clamp(0.0, 1.0)
        } else {
            0.0
        };
    }

    /// Log-Gaussian prior over the tempo a lag implies. Without it, a
    /// strictly periodic train reads the same at its period and at every
    /// multiple, and octave choice degenerates to sort order.
    fn lag_prior(&self, lag: usize) -> f32 {
        let bpm = self.config.frame_rate * 60.0 / lag as f32;
        let octaves = (bpm / self.config.prior_bpm).log2() / self.config.prior_octaves;
        (-0.5 * octaves * octaves).exp()
    }

    /// Advance the beat clock one frame. Onsets near the expected beat time
    /// phase-lock the clock; during silence the tempo-driven fallback beat
    /// is suppressed (no phantom pulse).
    pub fn tick(&mut self, onset: bool, silent: bool, now_ms: f64) -> BeatFrame {
        self.expire_taps(now_ms);

        let elapsed = now_ms - self.last_beat_ms;
        let mut beat = false;

        if elapsed >= self.beat_interval_ms * 0.85 {
            if onset && elapsed <= self.beat_interval_ms * 1.15 {
                beat = true;
                self.last_beat_ms = now_ms;
            } else if elapsed >= self.beat_interval_ms && !silent {
                beat = true;
                self.last_beat_ms = now_ms;
            }
        }

        let mut beat_in_bar = (self.beat_count % 4) as u8;
        let mut bar = false;
        if beat {
            self.beat_count += 1;
            beat_in_bar = (self.beat_count % 4) as u8;
            bar = beat_in_bar == 0;
        }

        BeatFrame { beat, bar, beat_in_bar }
    }

    /// Register a manual tap. Two or more taps lock the tempo and disable
    /// the autocorrelation estimator until the taps time out.
    pub fn tap(&mut self, now_ms: f64) {
        if let Some(&last) = self.tap_times.back() {
            if now_ms - last > self.config.tap_timeout_ms {
                self.tap_times.clear();
                self.tap_active = false;
            }
        }
        self.tap_times.push_back(now_ms);
        if self.tap_times.len() > self.config.max_taps {
            self.tap_times.pop_front();
        }

        if self.tap_times.len() >= 2 {
            let mut interval_sum = 0.0f64;
            let mut count = 0usize;
            for pair in self.tap_times.iter().zip(self.tap_times.iter().skip(1)) {
                interval_sum += pair.1 - pair.0;
                count += 1;
            }
            let avg_interval = interval_sum / count as f64;
            let tap_bpm = (60_000.0 / avg_interval) as f32;

            if tap_bpm >= self.config.min_bpm && tap_bpm <= self.config.max_bpm {
                self.tap_bpm = Some(tap_bpm);
                self.tap_active = true;
                self.tap_confidence =
                    (count as f32 / (self.config.max_taps - 1) as f32).min(1.0);
                self.bpm = tap_bpm;
                self.beat_interval_ms = avg_interval;
                self.confidence = self.tap_confidence;
                self.seeded = true;
            }
        }
    }

    /// Drop tap-tempo lock if the last tap is stale.
    fn expire_taps(&mut self, now_ms: f64) {
        if self.tap_active {
            if let Some(&last) = self.tap_times.back() {
                if now_ms - last > self.config.tap_timeout_ms {
                    self.tap_times.clear();
                    self.tap_active = false;
                    self.tap_bpm = None;
                    self.tap_confidence = 0.0;
                }
            }
        }
    }

    pub fn reset_taps(&mut self) {
        self.tap_times.clear();
        self.tap_bpm = None;
        self.tap_active = false;
        self.tap_confidence = 0.0;
    }

    pub fn reset(&mut self) {
        self.bpm = self.config.initial_bpm;
        self.beat_interval_ms = 60_000.0 / self.config.initial_bpm as f64;
        self.confidence = 0.0;
        self.beat_count = 0;
        self.last_beat_ms = 0.0;
        self.seeded = false;
        self.reset_taps();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Per-frame ODF series with impulses of `strengths` cycling at `period`.
    fn impulse_train(frames: usize, period: usize, strengths: &[f32]) -> History {
        let mut h = History::new(frames);
        let mut pulse = 0usize;
        for i in 0..frames {
            if i % period == 0 {
                h.push(strengths[pulse % strengths.len()]);
                pulse += 1;
            } else {
                h.push(0.0);
            }
        }
        h
    }

    #[test]
    fn test_click_train_locks_to_120() {
        let mut tracker = TempoTracker::new(TempoConfig::default());
        // 120 BPM at 60 fps = one impulse every 30 frames.
        let history = impulse_train(180, 30, &[1.0]);
        tracker.update_estimate(&history);
        assert!((tracker.bpm() - 120.0).abs() < 2.0, "bpm {}", tracker.bpm());
        assert!(tracker.confidence() > 0.0);
    }

    #[test]
    fn test_harmonic_rejection_prefers_fundamental() {
        // True tempo 100 BPM (lag 36) with a strong half-period pulse that
        // makes the 200 BPM lag (18) comparably strong.
        let config = TempoConfig { max_bpm: 220.0, ..Default::default() };
        let mut tracker = TempoTracker::new(config);
        let history = impulse_train(180, 18, &[1.0, 0.9]);
        tracker.update_estimate(&history);
        assert!(
            (tracker.bpm() - 100.0).abs() < 10.0,
            "expected ~100 BPM, got {}",
            tracker.bpm()
        );
    }

    #[test]
    fn test_rate_limited_after_seed() {
        let mut tracker = TempoTracker::new(TempoConfig::default());
        tracker.update_estimate(&impulse_train(180, 30, &[1.0])); // seed at 120
        let before = tracker.bpm();
        // Jump to 90 BPM material (period 40): one update moves at most 5 BPM.
        tracker.update_estimate(&impulse_train(180, 40, &[1.0]));
        assert!((tracker.bpm() - before).abs() <= 5.0 + 1e-3);
    }

    #[test]
    fn test_beat_suppressed_in_silence() {
        let mut tracker = TempoTracker::new(TempoConfig::default());
        let interval = tracker.beat_interval_ms();
        let mut beats = 0;
        let mut t = 0.0;
        for _ in 0..600 {
            t += 16.7;
            if tracker.tick(false, true, t).beat {
                beats += 1;
            }
        }
        assert_eq!(beats, 0, "phantom pulse during silence");
        // With audio present, the fallback beat runs at the tempo.
        for _ in 0..60 {
            t += 16.7;
            if tracker.tick(false, false, t).beat {
                beats += 1;
            }
        }
        let expected = (60.0 * 16.7 / interval) as i32;
        assert!((beats - expected).abs() <= 1, "beats {} expected {}", beats, expected);
    }

    #[test]
    fn test_tap_overrides_and_times_out() {
        let mut tracker = TempoTracker::new(TempoConfig::default());
        // Tap at 100 BPM (600 ms apart).
        for i in 0..4 {
            tracker.tap(i as f64 * 600.0);
        }
        assert!(tracker.tap_active());
        assert!((tracker.bpm() - 100.0).abs() < 1.0);
        let locked = tracker.tap_bpm().expect("tap lock should report its tempo");
        assert!((locked - 100.0).abs() < 1.0);

        // Estimator must not move the tempo while taps are live.
        tracker.update_estimate(&impulse_train(180, 30, &[1.0]));
        assert!((tracker.bpm() - 100.0).abs() < 1.0);

        // After the timeout the lock releases and the estimator pulls the
        // tempo back toward 120, rate-limited to one 5 BPM step.
        tracker.tick(false, true, 4.0 * 600.0 + 4000.0);
        assert!(!tracker.tap_active());
        assert!(tracker.tap_bpm().is_none());
        tracker.update_estimate(&impulse_train(180, 30, &[1.0]));
        assert!((tracker.bpm() - 105.0).abs() < 0.5, "bpm {}", tracker.bpm());
    }
}
