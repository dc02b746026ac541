//! Four-channel filter bank for the bass/mid/treble/level feature frame.
//!
//! All channels share a preset, with per-band perturbations: bass gets extra
//! process noise for punchy kicks, treble extra measurement noise to tame
//! harshness, and level (RMS) the most smoothing of all.

use serde::{Deserialize, Serialize};

use super::kalman::{ChannelConfig, ChannelDiagnostics, FilterPreset, KalmanChannel};

/// One audio analysis tick: per-band energies plus overall level, each 0-1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BandFrame {
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
    pub level: f32,
}

impl BandFrame {
    pub fn new(bass: f32, mid: f32, treble: f32, level: f32) -> Self {
        Self { bass, mid, treble, level }
    }

    /// NaN and infinite components become 0.
    pub fn sanitized(self) -> Self {
        let fix = |v: f32| if v.is_finite() { v } else { 0.0 };
        Self {
            bass: fix(self.bass),
            mid: fix(self.mid),
            treble: fix(self.treble),
            level: fix(self.level),
        }
    }
}

/// Snapshot of the whole bank for HUD display.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct BandDiagnostics {
    pub enabled: bool,
    pub preset: &'static str,
    pub bass: ChannelDiagnostics,
    pub mid: ChannelDiagnostics,
    pub treble: ChannelDiagnostics,
    pub level: ChannelDiagnostics,
}

/// Multi-band Kalman-LQR filter bank.
pub struct BandFilter {
    bass: KalmanChannel,
    mid: KalmanChannel,
    treble: KalmanChannel,
    level: KalmanChannel,
    enabled: bool,
    preset: FilterPreset,
}

impl BandFilter {
    pub fn new(preset: FilterPreset) -> Self {
        let [bass, mid, treble, level] = Self::band_configs(preset.channel_config());
        Self {
            bass: KalmanChannel::new(bass),
            mid: KalmanChannel::new(mid),
            treble: KalmanChannel::new(treble),
            level: KalmanChannel::new(level),
            enabled: true,
            preset,
        }
    }

    /// Per-band perturbations of the shared preset.
    fn band_configs(base: ChannelConfig) -> [ChannelConfig; 4] {
        // Bass slightly more responsive (punchy kicks).
        let bass = ChannelConfig { q: base.q * 1.2, ..base };
        let mid = base;
        // Treble smoother (reduce harshness).
        let treble = ChannelConfig { r: base.r * 1.5, ..base };
        // Level (RMS) should be very smooth.
        let level = ChannelConfig { q: base.q * 0.5, r: base.r * 2.0, ..base };
        [bass, mid, treble, level]
    }

    /// Filter all bands. With filtering disabled this is an exact
    /// pass-through, not an error.
    pub fn update(&mut self, raw: BandFrame) -> BandFrame {
        if !self.enabled {
            return raw;
        }
        let raw = raw.sanitized();
        BandFrame {
            bass: self.bass.update(raw.bass),
            mid: self.mid.update(raw.mid),
            treble: self.treble.update(raw.treble),
            level: self.level.update(raw.level),
        }
    }

    /// Current filtered values without updating.
    pub fn values(&self) -> BandFrame {
        BandFrame {
            bass: self.bass.value(),
            mid: self.mid.value(),
            treble: self.treble.value(),
            level: self.level.value(),
        }
    }

    /// Switch presets while preserving the current estimates, so the output
    /// stays continuous instead of snapping back to zero.
    pub fn set_preset(&mut self, preset: FilterPreset) {
        let states = [
            self.bass.raw_state(),
            self.mid.raw_state(),
            self.treble.raw_state(),
            self.level.raw_state(),
        ];
        let [bass, mid, treble, level] = Self::band_configs(preset.channel_config());
        self.bass = KalmanChannel::new(bass);
        self.mid = KalmanChannel::new(mid);
        self.treble = KalmanChannel::new(treble);
        self.level = KalmanChannel::new(level);
        self.bass.set_state(states[0]);
        self.mid.set_state(states[1]);
        self.treble.set_state(states[2]);
        self.level.set_state(states[3]);
        self.preset = preset;
        println!("BandFilter: switched to preset '{}'", preset.name());
    }

    /// Apply a governor-adapted base measurement noise, re-applying the
    /// per-band multipliers.
    pub fn set_measurement_noise(&mut self, r: f32) {
        if !r.is_finite() || r <= 0.0 {
            return;
        }
        self.bass.set_measurement_noise(r);
        self.mid.set_measurement_noise(r);
        self.treble.set_measurement_noise(r * 1.5);
        self.level.set_measurement_noise(r * 2.0);
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn preset(&self) -> FilterPreset {
        self.preset
    }

    /// Error covariance of the level channel, used as the forecast
    /// confidence source.
    pub fn level_covariance(&self) -> f32 {
        self.level.covariance()
    }

    pub fn reset(&mut self) {
        self.bass.reset();
        self.mid.reset();
        self.treble.reset();
        self.level.reset();
    }

    pub fn diagnostics(&self) -> BandDiagnostics {
        BandDiagnostics {
            enabled: self.enabled,
            preset: self.preset.name(),
            bass: self.bass.diagnostics(),
            mid: self.mid.diagnostics(),
            treble: self.treble.diagnostics(),
            level: self.level.diagnostics(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_when_disabled() {
        let mut bank = BandFilter::new(FilterPreset::Balanced);
        bank.set_enabled(false);
        let raw = BandFrame::new(0.12, 0.77, 0.05, 0.9);
        assert_eq!(bank.update(raw), raw);
    }

    #[test]
    fn test_outputs_bounded() {
        let mut bank = BandFilter::new(FilterPreset::Reactive);
        for i in 0..200 {
            let v = if i % 7 == 0 { f32::NAN } else { (i as f32 * 0.37).sin() * 2.0 };
            let out = bank.update(BandFrame::new(v, -v, v * 3.0, v));
            for band in [out.bass, out.mid, out.treble, out.level] {
                assert!((0.0..=1.0).contains(&band));
            }
        }
    }

    #[test]
    fn test_preset_switch_preserves_estimates() {
        let mut bank = BandFilter::new(FilterPreset::Reactive);
        for _ in 0..100 {
            bank.update(BandFrame::new(0.8, 0.6, 0.4, 0.5));
        }
        let before = bank.values();
        bank.set_preset(FilterPreset::Smooth);
        let after = bank.values();
        assert!((before.bass - after.bass).abs() < 1e-6);
        assert!((before.level - after.level).abs() < 1e-6);
        assert_eq!(bank.preset(), FilterPreset::Smooth);
    }

    #[test]
    fn test_level_smoother_than_bass() {
        let mut bank = BandFilter::new(FilterPreset::Balanced);
        for _ in 0..10 {
            bank.update(BandFrame::default());
        }
        // Same step on both bands: level must react more slowly.
        for _ in 0..5 {
            bank.update(BandFrame::new(1.0, 0.0, 0.0, 1.0));
        }
        let out = bank.values();
        assert!(out.bass > out.level);
    }
}
