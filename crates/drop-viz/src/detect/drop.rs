//! Drop detection: the moment a track slams back in after a buildup.
//!
//! No single signal is reliable on its own, so four independent indicators
//! vote and a quorum triggers. A short refractory window keeps one drop
//! from firing twice, and a predictive warning estimates the next drop
//! from buildup progress and the bar clock before it lands.

use super::buildup::BuildupFrame;
use crate::utils::History;

#[derive(Clone, Copy, Debug)]
pub struct DropConfig {
    /// High band must have been above this before a collapse counts.
    pub collapse_from: f32,
    /// ...and below this now.
    pub collapse_to: f32,
    /// Frames back the pre-collapse level is read from.
    pub collapse_lookback: usize,
    /// Bass must exceed its recent baseline by this much.
    pub bass_margin: f32,
    /// Absolute bass floor for the spike indicator.
    pub bass_floor: f32,
    /// Baseline window for the bass spike, in frames.
    pub bass_baseline_window: usize,
    /// Onset strength (odf / threshold) counted as a slam.
    pub onset_strength_min: f32,
    /// Broadband energy floor; a drop is loud by definition.
    pub energy_floor: f32,
    /// Indicators that must agree.
    pub quorum: u32,
    /// Refractory window after a trigger.
    pub clear_ms: f64,
    /// Buildup age before a predictive warning is issued.
    pub warn_min_buildup_s: f64,
    /// Buildup intensity before a predictive warning is issued.
    pub warn_min_intensity: f32,
}

impl Default for DropConfig {
    fn default() -> Self {
        Self {
            collapse_from: 0.30,
            collapse_to: 0.15,
            collapse_lookback: 8,
            bass_margin: 0.30,
            bass_floor: 0.45,
            bass_baseline_window: 60,
            onset_strength_min: 3.0,
            energy_floor: 0.25,
            quorum: 3,
            clear_ms: 600.0,
            warn_min_buildup_s: 1.5,
            warn_min_intensity: 0.60,
        }
    }
}

/// The four drop indicators, kept separate for the HUD.
#[derive(Clone, Copy, Debug, Default)]
pub struct DropIndicators {
    /// High band was present and vanished (the pre-drop cut).
    pub high_collapse: bool,
    /// Bass well above its recent baseline (the slam).
    pub bass_spike: bool,
    /// An onset several times over threshold this frame.
    pub strong_onset: bool,
    /// Broadband energy above the loudness floor.
    pub energetic: bool,
}

impl DropIndicators {
    pub fn score(&self) -> u32 {
        self.high_collapse as u32
            + self.bass_spike as u32
            + self.strong_onset as u32
            + self.energetic as u32
    }
}

/// Advance notice that a drop is coming, with an ETA on the bar clock.
#[derive(Clone, Copy, Debug)]
pub struct DropWarning {
    /// Milliseconds until the next bar boundary, the likely landing point.
    pub eta_ms: f64,
    pub confidence: f32,
}

/// Per-frame drop evaluation output.
#[derive(Clone, Copy, Debug, Default)]
pub struct DropFrame {
    /// True only on the frame the drop fires.
    pub triggered: bool,
    /// True while inside the refractory window.
    pub active: bool,
    /// Vote strength of the current or just-fired drop, 0-1.
    pub confidence: f32,
    pub indicators: DropIndicators,
}

pub struct DropTrigger {
    config: DropConfig,
    active: bool,
    triggered_ms: f64,
    confidence: f32,
    drops_detected: u64,
}

impl DropTrigger {
    pub fn new(config: DropConfig) -> Self {
        Self {
            config,
            active: false,
            triggered_ms: f64::MIN,
            confidence: 0.0,
            drops_detected: 0,
        }
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn confidence(&self) -> f32 {
        if self.active {
            self.confidence
        } else {
            0.0
        }
    }

    pub fn drops_detected(&self) -> u64 {
        self.drops_detected
    }

    /// Evaluate one frame. Histories already include the current frame as
    /// their latest entry.
    pub fn process(
        &mut self,
        bass: &History,
        high: &History,
        onset_strength: f32,
        avg_energy: f32,
        silent: bool,
        now_ms: f64,
    ) -> DropFrame {
        if self.active && now_ms - self.triggered_ms > self.config.clear_ms {
            self.active = false;
            self.confidence = 0.0;
        }

        let cur_high = high.latest().unwrap_or(0.0);
        let was_high = high.nth_back(self.config.collapse_lookback).unwrap_or(0.0);
        let cur_bass = bass.latest().unwrap_or(0.0);
        let bass_baseline = bass.recent_mean(self.config.bass_baseline_window);

        let indicators = DropIndicators {
            high_collapse: was_high > self.config.collapse_from
                && cur_high < self.config.collapse_to,
            bass_spike: cur_bass > bass_baseline + self.config.bass_margin
                && cur_bass > self.config.bass_floor,
            strong_onset: onset_strength >= self.config.onset_strength_min,
            energetic: avg_energy > self.config.energy_floor,
        };
        let score = indicators.score();

        // The energy indicator is mandatory: a quorum of the other three
        // must not fire a drop in a quiet passage.
        let mut triggered = false;
        if !self.active && !silent && indicators.energetic && score >= self.config.quorum {
            triggered = true;
            self.active = true;
            self.triggered_ms = now_ms;
            self.confidence = score as f32 / 4.0;
            self.drops_detected += 1;
        }

        DropFrame {
            triggered,
            active: self.active,
            confidence: self.confidence(),
            indicators,
        }
    }

    /// Predictive warning from buildup progress. The landing estimate is the
    /// next bar boundary; the caller supplies it from the beat clock.
    pub fn predict(&self, buildup: &BuildupFrame, ms_to_next_bar: f64) -> Option<DropWarning> {
        if !buildup.active
            || buildup.duration_s < self.config.warn_min_buildup_s
            || buildup.intensity < self.config.warn_min_intensity
        {
            return None;
        }
        let confidence = (buildup.intensity * 0.8
            + (buildup.duration_s - self.config.warn_min_buildup_s) as f32 * 0.05)
            .min(0.9);
        Some(DropWarning { eta_ms: ms_to_next_bar, confidence })
    }

    pub fn reset(&mut self) {
        self.active = false;
        self.triggered_ms = f64::MIN;
        self.confidence = 0.0;
        self.drops_detected = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bass and high histories shaped like a cut-then-slam: highs present
    /// then gone, bass quiet then spiking.
    fn cut_and_slam() -> (History, History) {
        let mut bass = History::new(180);
        let mut high = History::new(180);
        for _ in 0..60 {
            bass.push(0.1);
            high.push(0.5);
        }
        // 7 cut frames plus the slam frame: 8 frames back still reads 0.5.
        for _ in 0..7 {
            bass.push(0.1);
            high.push(0.05);
        }
        bass.push(0.9); // the slam
        high.push(0.05);
        (bass, high)
    }

    #[test]
    fn test_full_quorum_triggers() {
        let mut trig = DropTrigger::new(DropConfig::default());
        let (bass, high) = cut_and_slam();
        let frame = trig.process(&bass, &high, 4.0, 0.6, false, 1000.0);
        assert!(frame.triggered);
        assert_eq!(frame.indicators.score(), 4);
        assert!((frame.confidence - 1.0).abs() < 1e-6);
        assert_eq!(trig.drops_detected(), 1);
    }

    #[test]
    fn test_below_quorum_does_not_trigger() {
        let mut trig = DropTrigger::new(DropConfig::default());
        let (bass, high) = cut_and_slam();
        // Weak onset and quiet broadband: only 2 of 4 indicators agree.
        let frame = trig.process(&bass, &high, 1.0, 0.1, false, 1000.0);
        assert_eq!(frame.indicators.score(), 2);
        assert!(!frame.triggered);
        assert!(!frame.active);
    }

    #[test]
    fn test_quorum_without_energy_does_not_trigger() {
        let mut trig = DropTrigger::new(DropConfig::default());
        let (bass, high) = cut_and_slam();
        // Collapse, bass spike, and strong onset all vote, but broadband
        // energy sits under the loudness floor. Three votes are not enough
        // when the energy indicator is not one of them.
        let frame = trig.process(&bass, &high, 4.0, 0.20, false, 1000.0);
        assert!(!frame.indicators.energetic);
        assert_eq!(frame.indicators.score(), 3);
        assert!(!frame.triggered);
        assert!(!frame.active);

        // The same three votes plus real loudness do fire.
        let frame = trig.process(&bass, &high, 4.0, 0.6, false, 1100.0);
        assert_eq!(frame.indicators.score(), 4);
        assert!(frame.triggered);
    }

    #[test]
    fn test_silence_vetoes_trigger() {
        let mut trig = DropTrigger::new(DropConfig::default());
        let (bass, high) = cut_and_slam();
        let frame = trig.process(&bass, &high, 4.0, 0.6, true, 1000.0);
        assert!(!frame.triggered);
    }

    #[test]
    fn test_refractory_window_blocks_refire() {
        let mut trig = DropTrigger::new(DropConfig::default());
        let (bass, high) = cut_and_slam();
        assert!(trig.process(&bass, &high, 4.0, 0.6, false, 1000.0).triggered);
        // Same conditions 300 ms later: still inside the 600 ms window.
        let again = trig.process(&bass, &high, 4.0, 0.6, false, 1300.0);
        assert!(!again.triggered);
        assert!(again.active);
        // Past the window it may fire again.
        let later = trig.process(&bass, &high, 4.0, 0.6, false, 1700.0);
        assert!(later.triggered);
        assert_eq!(trig.drops_detected(), 2);
    }

    #[test]
    fn test_warning_requires_mature_buildup() {
        let trig = DropTrigger::new(DropConfig::default());
        let young = BuildupFrame { active: true, intensity: 0.9, duration_s: 0.5 };
        assert!(trig.predict(&young, 800.0).is_none());

        let mature = BuildupFrame { active: true, intensity: 0.8, duration_s: 3.5 };
        let warn = trig.predict(&mature, 800.0).expect("mature buildup should warn");
        assert!((warn.eta_ms - 800.0).abs() < 1e-9);
        // 0.8 * 0.8 + 2.0 * 0.05 = 0.74
        assert!((warn.confidence - 0.74).abs() < 1e-3);
        assert!(warn.confidence <= 0.9);
    }
}
