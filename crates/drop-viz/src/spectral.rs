//! FFT front-end: turns raw sample frames into the spectral features the
//! detector and governor consume.
//!
//! One FFT per frame, pre-planned and windowed, with pre-computed band bin
//! ranges. Everything downstream (ODFs, multi-band RMS, STE/ZCR) reads from
//! the resulting `SpectralFrame` so no component recomputes spectra.

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use crate::filter::BandFrame;

/// FFT size - large enough for good low-frequency resolution.
/// At 44.1kHz: 2048 gives ~21.5 Hz bins (resolves the 20-60 Hz sub range).
pub const FFT_SIZE: usize = 2048;

/// Number of magnitude bins in a spectral frame.
pub const SPECTRUM_SIZE: usize = FFT_SIZE / 2;

/// Number of RMS bands.
pub const NUM_RMS_BANDS: usize = 6;

/// RMS band boundaries (Hz): sub, bass, low-mid, mid, high-mid, presence.
const RMS_BAND_EDGES: [f32; NUM_RMS_BANDS + 1] =
    [20.0, 60.0, 250.0, 500.0, 2000.0, 6000.0, 20000.0];

/// Per-band RMS energies, each 0-1.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BandRms {
    pub sub: f32,
    pub bass: f32,
    pub low: f32,
    pub mid: f32,
    pub high: f32,
    pub presence: f32,
}

impl BandRms {
    /// Mean of the bass/mid/high bands, the detector's energy reference.
    pub fn core_energy(&self) -> f32 {
        (self.bass + self.mid + self.high) / 3.0
    }
}

/// One frame of spectral analysis.
#[derive(Clone, Debug)]
pub struct SpectralFrame {
    /// Log-magnitude spectrum, 0-1 over the analysis dynamic range,
    /// `SPECTRUM_SIZE` bins.
    pub spectrum: Vec<f32>,
    /// Multi-band RMS energies.
    pub rms: BandRms,
    /// Short-time energy (mean square of the sample frame).
    pub ste: f32,
    /// Zero-crossing count over the sample frame.
    pub zcr: f32,
    /// Spectral centroid in Hz.
    pub centroid: f32,
    /// Aggregated bass/mid/treble/level features for the filter bank.
    pub features: BandFrame,
}

impl SpectralFrame {
    /// Neutral frame: what silence (or missing input) analyzes to.
    pub fn silent() -> Self {
        Self {
            spectrum: vec![0.0; SPECTRUM_SIZE],
            rms: BandRms::default(),
            ste: 0.0,
            zcr: 0.0,
            centroid: 0.0,
            features: BandFrame::default(),
        }
    }
}

/// Centralized spectral analyzer - performs the FFT once per frame and
/// extracts every needed metric.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    fft_buffer: Vec<Complex<f32>>,
    fft_window: Vec<f32>,
    sample_rate: f32,
    band_bins: [(usize, usize); NUM_RMS_BANDS],
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        Self::with_sample_rate(44100.0)
    }

    pub fn with_sample_rate(sample_rate: f32) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        // Pre-compute Hann window.
        let fft_window: Vec<f32> = (0..FFT_SIZE)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / FFT_SIZE as f32).cos()))
            .collect();

        let bin_width = sample_rate / FFT_SIZE as f32;
        let mut band_bins = [(0usize, 0usize); NUM_RMS_BANDS];
        for i in 0..NUM_RMS_BANDS {
            let low_bin = (RMS_BAND_EDGES[i] / bin_width).floor() as usize;
            let high_bin = (RMS_BAND_EDGES[i + 1] / bin_width).ceil() as usize;
            band_bins[i] = (low_bin.max(1), high_bin.min(SPECTRUM_SIZE));
        }

        Self {
            fft,
            fft_buffer: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            fft_window,
            sample_rate,
            band_bins,
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Analyze one frame of time-domain samples. Call once per tick.
    pub fn analyze(&mut self, samples: &[f32]) -> SpectralFrame {
        let sample_count = samples.len().min(FFT_SIZE);
        if sample_count == 0 {
            return SpectralFrame::silent();
        }

        // Time-domain features before windowing.
        let mut energy_sum = 0.0f32;
        let mut crossings = 0u32;
        let mut prev = 0.0f32;
        for (i, &raw) in samples[..sample_count].iter().enumerate() {
            let s = if raw.is_finite() { raw } else { 0.0 };
            energy_sum += s * s;
            if i > 0 && (s > 0.0) != (prev > 0.0) && (s != 0.0 || prev != 0.0) {
                crossings += 1;
            }
            prev = s;
        }
        let ste = energy_sum / sample_count as f32;
        let zcr = crossings as f32;

        // Window and transform (zero-padding short frames).
        for i in 0..FFT_SIZE {
            let s = if i < sample_count {
                let v = samples[i];
                if v.is_finite() { v } else { 0.0 }
            } else {
                0.0
            };
            self.fft_buffer[i] = Complex::new(s * self.fft_window[i], 0.0);
        }
        self.fft.process(&mut self.fft_buffer);

        // Log-magnitude spectrum, 0-1 over a -100 dB..-30 dB span. Detector
        // thresholds are tuned for this scale; linear magnitudes would bury
        // everything but the loudest partial. The centroid stays on linear
        // magnitudes so leakage skirts do not drag it upward.
        let norm = 2.0 / FFT_SIZE as f32;
        let mut spectrum = vec![0.0f32; SPECTRUM_SIZE];
        let mut weighted_freq = 0.0f32;
        let mut total_mag = 0.0f32;
        let bin_width = self.sample_rate / FFT_SIZE as f32;
        for (i, slot) in spectrum.iter_mut().enumerate() {
            let mag = (self.fft_buffer[i].norm() * norm).min(1.0);
            *slot = db_normalize(mag);
            weighted_freq += i as f32 * bin_width * mag;
            total_mag += mag;
        }
        let centroid = if total_mag > 1e-6 { weighted_freq / total_mag } else { 0.0 };

        // Multi-band RMS.
        let mut band_vals = [0.0f32; NUM_RMS_BANDS];
        for (b, &(low, high)) in self.band_bins.iter().enumerate() {
            if high > low {
                let sum: f32 = spectrum[low..high].iter().map(|m| m * m).sum();
                band_vals[b] = (sum / (high - low) as f32).sqrt().min(1.0);
            }
        }
        let rms = BandRms {
            sub: band_vals[0],
            bass: band_vals[1],
            low: band_vals[2],
            mid: band_vals[3],
            high: band_vals[4],
            presence: band_vals[5],
        };

        let level = ste.sqrt().min(1.0);
        let features = BandFrame {
            bass: ((rms.sub + rms.bass) / 2.0).min(1.0),
            mid: ((rms.low + rms.mid) / 2.0).min(1.0),
            treble: ((rms.high + rms.presence) / 2.0).min(1.0),
            level,
        };

        SpectralFrame { spectrum, rms, ste, zcr, centroid, features }
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Dynamic range mapped onto 0-1, matching what capture front-ends expose
/// as byte frequency data.
const DB_FLOOR: f32 = -100.0;
const DB_CEIL: f32 = -30.0;

fn db_normalize(mag: f32) -> f32 {
    if mag <= 0.0 {
        return 0.0;
    }
    let db = 20.0 * mag.log10();
    ((db - DB_FLOOR) / (DB_CEIL - DB_FLOOR)).clamp(0.0, 1.0)
}

/// Normalized spectral entropy, 0 (pure tone) to 1 (flat noise).
pub fn spectral_entropy(spectrum: &[f32]) -> f32 {
    let total: f32 = spectrum.iter().filter(|m| m.is_finite()).sum();
    if total <= 1e-9 || spectrum.len() < 2 {
        return 0.0;
    }
    let mut entropy = 0.0f32;
    for &m in spectrum {
        if m.is_finite() && m > 0.0 {
            let p = m / total;
            entropy -= p * p.ln();
        }
    }
    entropy / (spectrum.len() as f32).ln()
}
