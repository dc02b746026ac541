//! Onset detection from one or more onset detection functions (ODFs).
//!
//! The full configuration combines bass-weighted spectral flux with
//! high-frequency content and a phase-deviation proxy; the reduced
//! configuration runs on flux alone. The threshold adapts to recent ODF
//! statistics - loudness varies far too much for a fixed constant.

use crate::utils::History;

/// ODF history capacity (3 seconds at 60 fps).
const ODF_HISTORY: usize = 180;

/// Minimum ODF history before the adaptive threshold engages.
const ADAPTIVE_MIN_SAMPLES: usize = 30;

/// ODFs operate on an 8-bit-equivalent magnitude scale (0-255) so the
/// established threshold tuning carries over from the capture pipeline.
const MAG_SCALE: f32 = 255.0;

#[derive(Clone, Copy, Debug)]
pub struct OnsetConfig {
    /// Floor for the adaptive threshold.
    pub base_threshold: f32,
    /// Minimum time between onsets; one transient must not fire twice.
    pub cooldown_ms: f64,
    /// Adaptive threshold is `median + k * stddev` of recent ODF values.
    pub threshold_k: f32,
    /// Include the high-frequency-content ODF (full configuration).
    pub use_hfc: bool,
    /// Include the phase-deviation proxy ODF (full configuration).
    pub use_phase: bool,
}

impl Default for OnsetConfig {
    fn default() -> Self {
        Self {
            base_threshold: 10.0,
            cooldown_ms: 150.0,
            threshold_k: 1.2,
            use_hfc: true,
            use_phase: true,
        }
    }
}

/// A fired onset. Consumed immediately by the tempo estimator.
#[derive(Clone, Copy, Debug)]
pub struct OnsetEvent {
    /// Combined ODF value at the moment of firing.
    pub odf: f32,
    /// Adaptive threshold it exceeded.
    pub threshold: f32,
    /// `odf / threshold`; 1.0 is a marginal onset, 3.0+ a very strong one.
    pub strength: f32,
}

/// Per-frame onset analysis output.
#[derive(Clone, Copy, Debug, Default)]
pub struct OnsetFrame {
    pub onset: Option<OnsetEvent>,
    /// Combined ODF value this frame.
    pub odf: f32,
    /// Spectral flux component alone.
    pub flux: f32,
    /// Current adaptive threshold.
    pub threshold: f32,
}

pub struct OnsetDetector {
    config: OnsetConfig,
    prev_spectrum: Vec<f32>,
    threshold: f32,
    odf_history: History,
    last_onset_ms: f64,
    onsets_detected: u64,
}

impl OnsetDetector {
    pub fn new(config: OnsetConfig) -> Self {
        Self {
            threshold: config.base_threshold,
            config,
            prev_spectrum: Vec::new(),
            odf_history: History::new(ODF_HISTORY),
            last_onset_ms: f64::MIN,
            onsets_detected: 0,
        }
    }

    /// Process one magnitude spectrum (0-1 normalized bins).
    pub fn process(&mut self, spectrum: &[f32], now_ms: f64) -> OnsetFrame {
        let n = spectrum.len();
        if n == 0 {
            return OnsetFrame::default();
        }
        if self.prev_spectrum.len() != n {
            self.prev_spectrum = vec![0.0; n];
        }

        // ODF 1: spectral flux - positive bin-wise increases, bass-weighted
        // because beats live in the low end.
        let mut flux = 0.0f32;
        let mut weight_sum = 0.0f32;
        let bass_cut = (n as f32 * 0.15) as usize;
        let lowmid_cut = (n as f32 * 0.4) as usize;
        for i in 0..n {
            let mag = sanitize(spectrum[i]) * MAG_SCALE;
            let diff = mag - self.prev_spectrum[i];
            if diff > 0.0 {
                let weight = if i < bass_cut {
                    2.5
                } else if i < lowmid_cut {
                    1.8
                } else {
                    1.0
                };
                flux += diff * weight;
                weight_sum += weight;
            }
        }
        if weight_sum > 0.0 {
            flux /= weight_sum;
        }

        // ODF 2: high-frequency content - bin-weighted magnitude sum.
        let hfc = if self.config.use_hfc {
            let mut acc = 0.0f32;
            for (i, &m) in spectrum.iter().enumerate() {
                acc += sanitize(m) * MAG_SCALE * (i + 1) as f32;
            }
            acc / (n as f32 * MAG_SCALE)
        } else {
            0.0
        };

        // ODF 3: phase-deviation proxy - absolute change in the upper half.
        let phase = if self.config.use_phase {
            let start = n / 2;
            let mut acc = 0.0f32;
            for i in start..n {
                acc += (sanitize(spectrum[i]) * MAG_SCALE - self.prev_spectrum[i]).abs();
            }
            acc / (n - start).max(1) as f32
        } else {
            0.0
        };

        let odf = 0.6 * flux + 0.25 * hfc * 100.0 + 0.15 * phase;

        self.odf_history.push(odf);
        if self.odf_history.len() > ADAPTIVE_MIN_SAMPLES {
            let median = self.odf_history.median();
            let std = self.odf_history.variance().sqrt();
            self.threshold =
                (median + self.config.threshold_k * std).max(self.config.base_threshold);
        }

        for (slot, &m) in self.prev_spectrum.iter_mut().zip(spectrum.iter()) {
            *slot = sanitize(m) * MAG_SCALE;
        }

        let onset = if odf > self.threshold
            && now_ms - self.last_onset_ms > self.config.cooldown_ms
        {
            self.last_onset_ms = now_ms;
            self.onsets_detected += 1;
            Some(OnsetEvent {
                odf,
                threshold: self.threshold,
                strength: odf / self.threshold,
            })
        } else {
            None
        };

        OnsetFrame { onset, odf, flux, threshold: self.threshold }
    }

    /// Per-frame onset-strength series the tempo estimator autocorrelates.
    pub fn odf_history(&self) -> &History {
        &self.odf_history
    }

    pub fn onsets_detected(&self) -> u64 {
        self.onsets_detected
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn reset(&mut self) {
        self.prev_spectrum.clear();
        self.threshold = self.config.base_threshold;
        self.odf_history.clear();
        self.last_onset_ms = f64::MIN;
        self.onsets_detected = 0;
    }
}

fn sanitize(v: f32) -> f32 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
