//! Musical structure detection: onsets, tempo, buildups, drops.
//!
//! `DropPredictor` owns the whole chain and runs it once per spectral
//! frame. Output folds into a single stability score: 1.0 when the track
//! is cruising, falling toward 0.0 as a buildup matures or a drop lands.

mod buildup;
mod drop;
mod onset;
mod tempo;

pub use buildup::{BuildupConfig, BuildupDetector, BuildupFrame};
pub use drop::{DropConfig, DropFrame, DropIndicators, DropTrigger, DropWarning};
pub use onset::{OnsetConfig, OnsetDetector, OnsetEvent, OnsetFrame};
pub use tempo::{BeatFrame, TempoConfig, TempoTracker};

use crate::spectral::SpectralFrame;
use crate::utils::History;

/// Band RMS history depth (3 seconds at 60 fps).
const RMS_HISTORY: usize = 180;

#[derive(Clone, Copy, Debug)]
pub struct DetectorConfig {
    pub onset: OnsetConfig,
    pub tempo: TempoConfig,
    pub buildup: BuildupConfig,
    pub drop: DropConfig,
    /// Broadband level below which the frame counts as silence.
    pub silence_threshold: f32,
}

impl DetectorConfig {
    /// Full configuration: all three ODFs, strict 3-of-4 drop quorum.
    pub fn full_spectrum() -> Self {
        Self {
            onset: OnsetConfig::default(),
            tempo: TempoConfig::default(),
            buildup: BuildupConfig::default(),
            drop: DropConfig::default(),
            silence_threshold: 0.02,
        }
    }

    /// Reduced configuration: flux-only onsets and a looser 2-of-4 quorum.
    /// Cheaper and more eager; suits previews and low-power targets.
    pub fn simple() -> Self {
        Self {
            onset: OnsetConfig { use_hfc: false, use_phase: false, ..Default::default() },
            drop: DropConfig { quorum: 2, ..Default::default() },
            ..Self::full_spectrum()
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::full_spectrum()
    }
}

/// Everything the detector concluded about one frame.
#[derive(Clone, Copy, Debug)]
pub struct DetectorFrame {
    pub onset: OnsetFrame,
    pub beat: BeatFrame,
    pub bpm: f32,
    pub tempo_confidence: f32,
    pub buildup: BuildupFrame,
    pub drop: DropFrame,
    pub warning: Option<DropWarning>,
    pub silent: bool,
    /// Regime stability, 1.0 calm to 0.0 at a confirmed drop.
    pub stability: f32,
}

/// Detector HUD snapshot.
#[derive(Clone, Copy, Debug)]
pub struct DetectorHud {
    pub bpm: f32,
    pub tempo_confidence: f32,
    pub onsets_detected: u64,
    pub drops_detected: u64,
    pub buildup_active: bool,
    pub buildup_intensity: f32,
    pub stability: f32,
}

/// The full detection chain behind one `process` call per frame.
pub struct DropPredictor {
    onset: OnsetDetector,
    tempo: TempoTracker,
    buildup: BuildupDetector,
    drop: DropTrigger,
    bass_hist: History,
    mid_hist: History,
    high_hist: History,
    silence_threshold: f32,
    stability: f32,
}

impl DropPredictor {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            onset: OnsetDetector::new(config.onset),
            tempo: TempoTracker::new(config.tempo),
            buildup: BuildupDetector::new(config.buildup),
            drop: DropTrigger::new(config.drop),
            bass_hist: History::new(RMS_HISTORY),
            mid_hist: History::new(RMS_HISTORY),
            high_hist: History::new(RMS_HISTORY),
            stability: 1.0,
            silence_threshold: config.silence_threshold,
        }
    }

    /// Run the whole chain on one spectral frame.
    pub fn process(&mut self, frame: &SpectralFrame, now_ms: f64) -> DetectorFrame {
        let silent = frame.features.level < self.silence_threshold;

        let onset_frame = self.onset.process(&frame.spectrum, now_ms);
        if onset_frame.onset.is_some() {
            self.tempo.update_estimate(self.onset.odf_history());
        }
        let beat = self.tempo.tick(onset_frame.onset.is_some(), silent, now_ms);

        self.bass_hist.push(frame.rms.bass);
        self.mid_hist.push(frame.rms.mid);
        self.high_hist.push(frame.rms.high);
        let avg_energy = frame.rms.core_energy();

        let buildup = self.buildup.process(
            &self.bass_hist,
            &self.mid_hist,
            &self.high_hist,
            avg_energy,
            now_ms,
        );

        let onset_strength = onset_frame.onset.map(|e| e.strength).unwrap_or(0.0);
        let drop = self.drop.process(
            &self.bass_hist,
            &self.high_hist,
            onset_strength,
            avg_energy,
            silent,
            now_ms,
        );

        let warning = self.drop.predict(&buildup, self.tempo.ms_to_next_bar(now_ms));

        // Stability: whichever of buildup progress or drop confidence says
        // the regime is least calm wins.
        self.stability = (1.0 - buildup.intensity.max(drop.confidence)).clamp(0.0, 1.0);

        DetectorFrame {
            onset: onset_frame,
            beat,
            bpm: self.tempo.bpm(),
            tempo_confidence: self.tempo.confidence(),
            buildup,
            drop,
            warning,
            silent,
            stability: self.stability,
        }
    }

    /// Register a manual tempo tap.
    pub fn tap(&mut self, now_ms: f64) {
        self.tempo.tap(now_ms);
    }

    pub fn stability(&self) -> f32 {
        self.stability
    }

    pub fn tempo(&self) -> &TempoTracker {
        &self.tempo
    }

    pub fn hud_data(&self) -> DetectorHud {
        DetectorHud {
            bpm: self.tempo.bpm(),
            tempo_confidence: self.tempo.confidence(),
            onsets_detected: self.onset.onsets_detected(),
            drops_detected: self.drop.drops_detected(),
            buildup_active: self.buildup.active(),
            buildup_intensity: self.buildup.intensity(),
            stability: self.stability,
        }
    }

    pub fn reset(&mut self) {
        self.onset.reset();
        self.tempo.reset();
        self.buildup.reset();
        self.drop.reset();
        self.bass_hist.clear();
        self.mid_hist.clear();
        self.high_hist.clear();
        self.stability = 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectral::{BandRms, SpectralFrame};

    const FRAME_MS: f64 = 1000.0 / 60.0;

    fn frame_with(rms: BandRms, level: f32) -> SpectralFrame {
        let mut frame = SpectralFrame::silent();
        frame.rms = rms;
        frame.features.level = level;
        frame.ste = level * level;
        frame
    }

    #[test]
    fn test_silence_is_fully_stable() {
        let mut det = DropPredictor::new(DetectorConfig::full_spectrum());
        for i in 0..120 {
            let out = det.process(&SpectralFrame::silent(), i as f64 * FRAME_MS);
            assert!(out.silent);
            assert!(!out.beat.beat);
            assert!(out.drop.confidence == 0.0);
            assert!((out.stability - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_buildup_lowers_stability() {
        let mut det = DropPredictor::new(DetectorConfig::full_spectrum());
        let mut lowest = 1.0f32;
        for i in 0..120 {
            // Steep climb across all bands, 0.3 to 0.9 in two seconds.
            let v = 0.3 + 0.6 * (i as f32 / 120.0);
            let rms = BandRms { bass: v, mid: v, high: v, ..Default::default() };
            let out = det.process(&frame_with(rms, v), i as f64 * FRAME_MS);
            lowest = lowest.min(out.stability);
        }
        assert!(lowest < 0.7, "stability never dropped below {lowest}");
    }

    #[test]
    fn test_simple_config_uses_looser_quorum() {
        let full = DetectorConfig::full_spectrum();
        let simple = DetectorConfig::simple();
        assert_eq!(full.drop.quorum, 3);
        assert_eq!(simple.drop.quorum, 2);
        assert!(!simple.onset.use_hfc && !simple.onset.use_phase);
    }

    #[test]
    fn test_reset_restores_calm_state() {
        let mut det = DropPredictor::new(DetectorConfig::full_spectrum());
        for i in 0..120 {
            let v = 0.3 + 0.5 * (i as f32 / 120.0);
            let rms = BandRms { bass: v, mid: v, high: v, ..Default::default() };
            det.process(&frame_with(rms, v), i as f64 * FRAME_MS);
        }
        det.reset();
        assert!((det.stability() - 1.0).abs() < 1e-6);
        let hud = det.hud_data();
        assert_eq!(hud.onsets_detected, 0);
        assert_eq!(hud.drops_detected, 0);
        assert!(!hud.buildup_active);
    }
}
