//! End-to-end per-frame pipeline.
//!
//! Order per tick: FFT analysis, covariance adaptation, band filtering,
//! structure detection, stability scoring, forecasting and validation,
//! then transmission throttling. Every stage takes explicit time so the
//! whole pipeline replays deterministically.

use crate::detect::{DetectorConfig, DetectorFrame, DetectorHud, DropPredictor};
use crate::filter::{BandDiagnostics, BandFilter, BandFrame, FilterPreset};
use crate::forecast::{
    BacktestMetrics, ForecastConfig, ForecastingEngine, Regime, ValidationMetrics,
    ValidationOutcome,
};
use crate::governor::{Governor, GovernorConfig, GovernorHud};
use crate::spectral::{spectral_entropy, SpectrumAnalyzer};

/// State cost weight for the performance-gap telemetry.
const COST_Q: f32 = 1.0;

/// Control cost diagonal for the performance-gap telemetry.
const COST_R: [f32; 2] = [0.1, 0.1];

/// Flux value mapped to a full-scale forecast input.
const FLUX_FULL_SCALE: f32 = 100.0;

#[derive(Clone, Copy, Debug)]
pub struct PipelineConfig {
    pub preset: FilterPreset,
    pub filter_enabled: bool,
    pub sample_rate: f32,
    pub governor: GovernorConfig,
    pub detector: DetectorConfig,
    pub forecast: ForecastConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            preset: FilterPreset::Balanced,
            filter_enabled: true,
            sample_rate: 44100.0,
            governor: GovernorConfig::default(),
            detector: DetectorConfig::default(),
            forecast: ForecastConfig::default(),
        }
    }
}

/// Everything one tick produces.
#[derive(Clone, Debug)]
pub struct PipelineFrame {
    /// Band features straight off the FFT.
    pub raw: BandFrame,
    /// Band features after Kalman smoothing.
    pub filtered: BandFrame,
    pub detector: DetectorFrame,
    pub regime: Regime,
    /// Regime stability, 1.0 calm to 0.0 at a confirmed drop.
    pub stability: f32,
    pub crisis_probability: f32,
    /// Forecast ticks until the projected risk crosses the crisis line.
    pub lead_time: usize,
    pub forecast_confidence: f32,
    /// Validation verdict for any alert scored this tick.
    pub validation: Option<ValidationOutcome>,
    /// Current throttled transmission rate.
    pub data_rate_hz: f32,
    /// Whether this tick passes the transmission gate.
    pub emit: bool,
}

/// Combined HUD snapshot across all stages.
#[derive(Clone, Copy, Debug)]
pub struct PipelineHud {
    pub governor: GovernorHud,
    pub detector: DetectorHud,
    pub filter: BandDiagnostics,
    pub validation: ValidationMetrics,
    pub frames: u64,
}

pub struct Pipeline {
    analyzer: SpectrumAnalyzer,
    filter: BandFilter,
    governor: Governor,
    detector: DropPredictor,
    forecaster: ForecastingEngine,
    frames: u64,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let mut filter = BandFilter::new(config.preset);
        filter.set_enabled(config.filter_enabled);
        Self {
            analyzer: SpectrumAnalyzer::with_sample_rate(config.sample_rate),
            filter,
            governor: Governor::new(config.governor),
            detector: DropPredictor::new(config.detector),
            forecaster: ForecastingEngine::new(config.forecast),
            frames: 0,
        }
    }

    /// Run one frame of samples through every stage.
    pub fn process(&mut self, samples: &[f32], now_ms: f64) -> PipelineFrame {
        let spectral = self.analyzer.analyze(samples);

        let r = self.governor.adaptive_covariance(spectral.ste, spectral.zcr);
        self.filter.set_measurement_noise(r);
        let filtered = self.filter.update(spectral.features);

        let detector = self.detector.process(&spectral, now_ms);
        let stability = detector.stability;
        let regime = if detector.drop.active {
            Regime::Crisis
        } else if detector.buildup.active {
            Regime::Buildup
        } else {
            Regime::Calm
        };

        // Forecast inputs: onset activity and smoothed level, after
        // error-proportional cancellation.
        let error = 1.0 - stability;
        let raw_inputs = [
            (detector.onset.flux / FLUX_FULL_SCALE).clamp(0.0, 1.0),
            filtered.level,
        ];
        let inputs = self.governor.apply_cancellation(raw_inputs, error);
        self.governor.record_performance_gap(error, inputs, COST_Q, COST_R);

        self.forecaster
            .generate_forecast(stability, inputs, self.filter.level_covariance());
        let validation = self.forecaster.record_actual(regime, stability, inputs);
        let forecast = self.forecaster.forecast();
        let crisis_probability = forecast.crisis_probability;
        let lead_time = forecast.lead_time;
        let forecast_confidence = forecast.confidence;

        let entropy = spectral_entropy(&spectral.spectrum);
        let data_rate_hz = self.governor.status_data_rate(stability, entropy);
        let emit = self.governor.should_send(now_ms);

        self.frames += 1;

        PipelineFrame {
            raw: spectral.features,
            filtered,
            detector,
            regime,
            stability,
            crisis_probability,
            lead_time,
            forecast_confidence,
            validation,
            data_rate_hz,
            emit,
        }
    }

    /// Register a manual tempo tap.
    pub fn tap(&mut self, now_ms: f64) {
        self.detector.tap(now_ms);
    }

    /// Switch the filter response preset, keeping current estimates.
    pub fn set_preset(&mut self, preset: FilterPreset) {
        self.filter.set_preset(preset);
    }

    pub fn set_filter_enabled(&mut self, enabled: bool) {
        self.filter.set_enabled(enabled);
    }

    pub fn validation_metrics(&self) -> ValidationMetrics {
        self.forecaster.validation_metrics()
    }

    /// Deterministic offline backtest over the whole replay buffer.
    pub fn run_backtest(&self) -> Option<BacktestMetrics> {
        self.forecaster.run_backtest(0, self.forecaster.replay_len())
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }

    pub fn forecaster(&self) -> &ForecastingEngine {
        &self.forecaster
    }

    pub fn filter(&self) -> &BandFilter {
        &self.filter
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn hud_data(&self) -> PipelineHud {
        PipelineHud {
            governor: self.governor.hud_data(),
            detector: self.detector.hud_data(),
            filter: self.filter.diagnostics(),
            validation: self.forecaster.validation_metrics(),
            frames: self.frames,
        }
    }

    pub fn reset(&mut self) {
        self.filter.reset();
        self.governor.reset();
        self.detector.reset();
        self.forecaster.reset();
        self.frames = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_MS: f64 = 1000.0 / 60.0;

    #[test]
    fn test_silence_stays_calm() {
        let mut pipe = Pipeline::new(PipelineConfig::default());
        let silence = vec![0.0f32; 2048];
        for i in 0..100 {
            let frame = pipe.process(&silence, i as f64 * FRAME_MS);
            assert_eq!(frame.regime, Regime::Calm);
            assert!((frame.stability - 1.0).abs() < 1e-6);
            assert!(!frame.detector.beat.beat);
        }
        assert!(pipe.forecaster().alert().is_none());
    }

    #[test]
    fn test_nan_input_is_contained() {
        let mut pipe = Pipeline::new(PipelineConfig::default());
        let garbage = vec![f32::NAN; 2048];
        for i in 0..50 {
            let frame = pipe.process(&garbage, i as f64 * FRAME_MS);
            assert!(frame.stability.is_finite());
            assert!(frame.filtered.level.is_finite());
            assert!(frame.crisis_probability.is_finite());
        }
    }

    #[test]
    fn test_stable_signal_throttles_to_slow_rate() {
        let mut pipe = Pipeline::new(PipelineConfig::default());
        let silence = vec![0.0f32; 2048];
        let mut emits = 0;
        for i in 0..600 {
            if pipe.process(&silence, i as f64 * FRAME_MS).emit {
                emits += 1;
            }
        }
        // 10 seconds of calm at the 1 Hz stable tier.
        assert!(emits <= 11, "emitted {emits} frames in 10 s");
    }

    #[test]
    fn test_tap_reaches_tempo() {
        let mut pipe = Pipeline::new(PipelineConfig::default());
        for i in 0..4 {
            pipe.tap(i as f64 * 500.0);
        }
        let hud = pipe.hud_data();
        assert!((hud.detector.bpm - 120.0).abs() < 1.0);
    }

    #[test]
    fn test_reset_clears_all_stages() {
        let mut pipe = Pipeline::new(PipelineConfig::default());
        let silence = vec![0.0f32; 2048];
        for i in 0..60 {
            pipe.process(&silence, i as f64 * FRAME_MS);
        }
        pipe.reset();
        assert_eq!(pipe.frames(), 0);
        assert_eq!(pipe.forecaster().replay_len(), 0);
        assert_eq!(pipe.hud_data().governor.stats.packets_sent, 0);
    }
}
