//! Predictive regime forecasting on top of the filtered stability score.
//!
//! Projects the stability state forward tick by tick, converts the
//! trajectory into a crisis probability, raises hysteretic alerts, and
//! scores its own predictions against what actually happened. A bounded
//! replay buffer supports deterministic offline backtests.

use std::collections::VecDeque;

/// Replay buffer depth.
const REPLAY_CAP: usize = 1000;

/// Control-input decay time constant, in ticks.
const INPUT_DECAY_TICKS: f32 = 10.0;

/// Risk curve steepness: risk = 1 - tanh(RISK_K * stability).
const RISK_K: f32 = 3.0;

/// Coarse regime label attached to each tick for validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Regime {
    Calm,
    Buildup,
    /// A confirmed drop.
    Crisis,
}

#[derive(Clone, Copy, Debug)]
pub struct ForecastConfig {
    /// Projection depth, in ticks.
    pub horizon: usize,
    /// Crisis probability at which a crisis alert fires.
    pub crisis_threshold: f32,
    /// Crisis probability at which a warning fires.
    pub alert_threshold: f32,
    /// Validation history depth, in records.
    pub validation_window: usize,
    /// State transition coefficient.
    pub a: f32,
    /// Control input coefficients.
    pub b: [f32; 2],
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizon: 24,
            crisis_threshold: 0.70,
            alert_threshold: 0.65,
            validation_window: 100,
            a: 0.95,
            b: [-0.05, -0.15],
        }
    }
}

/// One multi-step forecast.
#[derive(Clone, Debug, Default)]
pub struct Forecast {
    /// Projected stability per future tick.
    pub stability: Vec<f32>,
    /// Projected crisis risk per future tick.
    pub risk: Vec<f32>,
    /// P(crisis within the horizon), conservatively biased toward the
    /// worst projected tick.
    pub crisis_probability: f32,
    /// Ticks until the projected risk first crosses the crisis threshold;
    /// the full horizon when it never does.
    pub lead_time: usize,
    /// 1 minus the filter covariance driving the projection.
    pub confidence: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertKind {
    Warning,
    Crisis,
}

/// An active prediction, held until validated or timed out.
#[derive(Clone, Copy, Debug)]
pub struct Alert {
    pub kind: AlertKind,
    pub issued_at_tick: u64,
    /// Forecast lead time at issue, in ticks.
    pub lead_time: usize,
    pub probability: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationOutcome {
    TruePositive,
    FalsePositive,
    TrueNegative,
    FalseNegative,
}

#[derive(Clone, Copy, Debug)]
pub struct ValidationRecord {
    pub outcome: ValidationOutcome,
    pub lead_time: Option<usize>,
    pub tick: u64,
}

/// Cumulative prediction quality.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ValidationMetrics {
    pub precision: f32,
    pub recall: f32,
    pub accuracy: f32,
    pub f1: f32,
    pub avg_lead_time: f32,
    pub lead_time_std: f32,
    pub true_positives: u64,
    pub false_positives: u64,
    pub true_negatives: u64,
    pub false_negatives: u64,
}

/// One tick captured for offline replay.
#[derive(Clone, Copy, Debug)]
pub struct ReplaySample {
    pub tick: u64,
    pub stability: f32,
    pub inputs: [f32; 2],
    pub regime: Regime,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BacktestMetrics {
    pub precision: f32,
    pub recall: f32,
    pub accuracy: f32,
    pub true_positives: u64,
    pub false_positives: u64,
    pub true_negatives: u64,
    pub false_negatives: u64,
    pub samples: usize,
}

pub struct ForecastingEngine {
    config: ForecastConfig,
    forecast: Forecast,
    alert: Option<Alert>,
    current_tick: u64,
    tp: u64,
    fp: u64,
    tn: u64,
    fn_: u64,
    lead_times: Vec<f32>,
    history: VecDeque<ValidationRecord>,
    replay: VecDeque<ReplaySample>,
}

impl ForecastingEngine {
    pub fn new(config: ForecastConfig) -> Self {
        Self {
            config,
            forecast: Forecast::default(),
            alert: None,
            current_tick: 0,
            tp: 0,
            fp: 0,
            tn: 0,
            fn_: 0,
            lead_times: Vec::new(),
            history: VecDeque::with_capacity(config.validation_window),
            replay: VecDeque::with_capacity(REPLAY_CAP),
        }
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    pub fn forecast(&self) -> &Forecast {
        &self.forecast
    }

    pub fn alert(&self) -> Option<&Alert> {
        self.alert.as_ref()
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    pub fn replay_len(&self) -> usize {
        self.replay.len()
    }

    /// Project the stability state over the horizon and refresh the crisis
    /// probability, lead time, and alert state.
    pub fn generate_forecast(
        &mut self,
        stability: f32,
        inputs: [f32; 2],
        covariance: f32,
    ) -> &Forecast {
        let (states, risks) = self.project(stability, inputs);

        let max_risk = risks.iter().fold(0.0f32, |m, &r| m.max(r));
        let mean_risk = if risks.is_empty() {
            0.0
        } else {
            risks.iter().sum::<f32>() / risks.len() as f32
        };
        // 70% worst case, 30% expected case.
        let crisis_probability = 0.7 * max_risk + 0.3 * mean_risk;

        let lead_time = risks
            .iter()
            .position(|&r| r > self.config.crisis_threshold)
            .map(|i| i + 1)
            .unwrap_or(self.config.horizon);

        self.forecast = Forecast {
            stability: states,
            risk: risks,
            crisis_probability,
            lead_time,
            confidence: (1.0 - covariance).clamp(0.0, 1.0),
        };

        self.evaluate_alerts();
        &self.forecast
    }

    /// Pure multi-step projection. Control inputs decay exponentially over
    /// the horizon; the state stays clamped to [0, 1].
    fn project(&self, stability: f32, inputs: [f32; 2]) -> (Vec<f32>, Vec<f32>) {
        let horizon = self.config.horizon;
        let mut states = Vec::with_capacity(horizon);
        let mut risks = Vec::with_capacity(horizon);

        let mut state = if stability.is_finite() {
            stability.clamp(0.0, 1.0)
        } else {
            1.0
        };
        let u0 = if inputs[0].is_finite() { inputs[0] } else { 0.0 };
        let u1 = if inputs[1].is_finite() { inputs[1] } else { 0.0 };

        for tau in 1..=horizon {
            let decay = (-(tau as f32) / INPUT_DECAY_TICKS).exp();
            let control = (self.config.b[0] * u0 + self.config.b[1] * u1) * decay;
            state = (self.config.a * state + control).clamp(0.0, 1.0);
            states.push(state);
            risks.push(1.0 - (RISK_K * state).tanh());
        }
        (states, risks)
    }

    /// Alert hysteresis: an alert clears only when the probability falls
    /// well below the raise threshold, so it cannot flap at the boundary.
    fn evaluate_alerts(&mut self) {
        let p = self.forecast.crisis_probability;

        if p < self.config.alert_threshold * 0.8 {
            if self.alert.is_some() {
                println!("forecast: alert cleared, risk subsided");
            }
            self.alert = None;
            return;
        }
        if self.alert.is_some() {
            return;
        }

        let kind = if p >= self.config.crisis_threshold {
            AlertKind::Crisis
        } else if p >= self.config.alert_threshold {
            AlertKind::Warning
        } else {
            return;
        };
        println!(
            "forecast: {:?} alert, p={:.2} lead={} ticks",
            kind, p, self.forecast.lead_time
        );
        self.alert = Some(Alert {
            kind,
            issued_at_tick: self.current_tick,
            lead_time: self.forecast.lead_time,
            probability: p,
        });
    }

    /// Record what actually happened this tick and score any outstanding
    /// alert against it. An alert that outlives the forecast horizon
    /// without a crisis counts as a false positive.
    pub fn record_actual(
        &mut self,
        regime: Regime,
        stability: f32,
        inputs: [f32; 2],
    ) -> Option<ValidationOutcome> {
        self.current_tick += 1;

        if self.replay.len() == REPLAY_CAP {
            self.replay.pop_front();
        }
        self.replay.push_back(ReplaySample {
            tick: self.current_tick,
            stability,
            inputs,
            regime,
        });

        let is_crisis = regime == Regime::Crisis;
        let outcome = match (self.alert, is_crisis) {
            (Some(alert), true) => {
                self.tp += 1;
                self.lead_times.push(alert.lead_time as f32);
                let lead = alert.lead_time;
                self.alert = None;
                self.push_record(ValidationOutcome::TruePositive, Some(lead));
                Some(ValidationOutcome::TruePositive)
            }
            (Some(alert), false) => {
                if self.current_tick - alert.issued_at_tick > self.config.horizon as u64 {
                    self.fp += 1;
                    self.alert = None;
                    self.push_record(ValidationOutcome::FalsePositive, None);
                    Some(ValidationOutcome::FalsePositive)
                } else {
                    // Still inside the forecast window, keep waiting.
                    None
                }
            }
            (None, true) => {
                self.fn_ += 1;
                self.push_record(ValidationOutcome::FalseNegative, None);
                Some(ValidationOutcome::FalseNegative)
            }
            (None, false) => {
                self.tn += 1;
                Some(ValidationOutcome::TrueNegative)
            }
        };
        outcome
    }

    fn push_record(&mut self, outcome: ValidationOutcome, lead_time: Option<usize>) {
        if self.history.len() == self.config.validation_window {
            self.history.pop_front();
        }
        self.history.push_back(ValidationRecord {
            outcome,
            lead_time,
            tick: self.current_tick,
        });
    }

    pub fn validation_history(&self) -> impl Iterator<Item = &ValidationRecord> {
        self.history.iter()
    }

    pub fn validation_metrics(&self) -> ValidationMetrics {
        let (tp, fp, tn, fn_) = (self.tp, self.fp, self.tn, self.fn_);
        let total = tp + fp + tn + fn_;
        if total == 0 {
            return ValidationMetrics::default();
        }

        let precision = if tp + fp > 0 { tp as f32 / (tp + fp) as f32 } else { 0.0 };
        let recall = if tp + fn_ > 0 { tp as f32 / (tp + fn_) as f32 } else { 0.0 };
        let accuracy = (tp + tn) as f32 / total as f32;
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        let avg_lead_time = if self.lead_times.is_empty() {
            0.0
        } else {
            self.lead_times.iter().sum::<f32>() / self.lead_times.len() as f32
        };
        let lead_time_std = if self.lead_times.len() > 1 {
            let var = self
                .lead_times
                .iter()
                .map(|t| (t - avg_lead_time) * (t - avg_lead_time))
                .sum::<f32>()
                / self.lead_times.len() as f32;
            var.sqrt()
        } else {
            0.0
        };

        ValidationMetrics {
            precision,
            recall,
            accuracy,
            f1,
            avg_lead_time,
            lead_time_std,
            true_positives: tp,
            false_positives: fp,
            true_negatives: tn,
            false_negatives: fn_,
        }
    }

    /// Replay a slice of the buffer offline: forecast from every tick in
    /// `start..end` and score it against the regimes that actually followed
    /// inside the slice. `end` is clamped to the buffer length. Pure with
    /// respect to live state, so repeated runs over the same slice are
    /// identical.
    pub fn run_backtest(&self, start: usize, end: usize) -> Option<BacktestMetrics> {
        let end = end.min(self.replay.len());
        if start >= end {
            return None;
        }
        let samples: Vec<&ReplaySample> = self.replay.iter().collect();
        let n = end - start;

        let (mut tp, mut fp, mut tn, mut fn_) = (0u64, 0u64, 0u64, 0u64);
        for i in start..end {
            let (_, risks) = self.project(samples[i].stability, samples[i].inputs);
            let max_risk = risks.iter().fold(0.0f32, |m, &r| m.max(r));
            let mean_risk = risks.iter().sum::<f32>() / risks.len().max(1) as f32;
            let predicted = 0.7 * max_risk + 0.3 * mean_risk > self.config.crisis_threshold;

            let lookahead = (i + 1)..end.min(i + 1 + self.config.horizon);
            let actual = samples[lookahead].iter().any(|s| s.regime == Regime::Crisis);

            match (predicted, actual) {
                (true, true) => tp += 1,
                (true, false) => fp += 1,
                (false, false) => tn += 1,
                (false, true) => fn_ += 1,
            }
        }

        let precision = if tp + fp > 0 { tp as f32 / (tp + fp) as f32 } else { 0.0 };
        let recall = if tp + fn_ > 0 { tp as f32 / (tp + fn_) as f32 } else { 0.0 };
        let accuracy = (tp + tn) as f32 / n as f32;

        Some(BacktestMetrics {
            precision,
            recall,
            accuracy,
            true_positives: tp,
            false_positives: fp,
            true_negatives: tn,
            false_negatives: fn_,
            samples: n,
        })
    }

    pub fn reset_validation(&mut self) {
        self.tp = 0;
        self.fp = 0;
        self.tn = 0;
        self.fn_ = 0;
        self.lead_times.clear();
        self.history.clear();
    }

    pub fn reset(&mut self) {
        self.forecast = Forecast::default();
        self.alert = None;
        self.current_tick = 0;
        self.replay.clear();
        self.reset_validation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_state_forecasts_low_risk() {
        let mut eng = ForecastingEngine::new(ForecastConfig::default());
        let fc = eng.generate_forecast(1.0, [0.0, 0.0], 0.1);
        assert!(fc.crisis_probability < 0.5, "p = {}", fc.crisis_probability);
        assert_eq!(fc.lead_time, 24);
        assert!((fc.confidence - 0.9).abs() < 1e-6);
        assert!(eng.alert().is_none());
    }

    #[test]
    fn test_collapsed_state_raises_crisis_alert() {
        let mut eng = ForecastingEngine::new(ForecastConfig::default());
        let fc = eng.generate_forecast(0.05, [0.5, 0.5], 0.1);
        assert!(fc.crisis_probability > 0.70);
        assert!(fc.lead_time < 24);
        let alert = eng.alert().expect("collapse should raise an alert");
        assert_eq!(alert.kind, AlertKind::Crisis);
    }

    #[test]
    fn test_alert_hysteresis_holds_in_the_gap() {
        let mut eng = ForecastingEngine::new(ForecastConfig::default());
        eng.generate_forecast(0.05, [0.0, 0.0], 0.1);
        assert!(eng.alert().is_some());

        // Probability recovers into the hysteresis band: the alert holds.
        let fc = eng.generate_forecast(0.4, [0.0, 0.0], 0.1);
        let p = fc.crisis_probability;
        assert!(p < 0.65 && p > 0.65 * 0.8, "p = {p} left the band");
        assert!(eng.alert().is_some(), "alert flapped inside the band");

        // Full recovery clears it.
        eng.generate_forecast(1.0, [0.0, 0.0], 0.1);
        assert!(eng.alert().is_none());
    }

    #[test]
    fn test_true_positive_validation() {
        let mut eng = ForecastingEngine::new(ForecastConfig::default());
        eng.generate_forecast(0.05, [0.0, 0.0], 0.1);
        let outcome = eng.record_actual(Regime::Crisis, 0.05, [0.0, 0.0]);
        assert_eq!(outcome, Some(ValidationOutcome::TruePositive));
        let m = eng.validation_metrics();
        assert_eq!(m.true_positives, 1);
        assert!((m.precision - 1.0).abs() < 1e-6);
        assert!((m.recall - 1.0).abs() < 1e-6);
        // Validation consumed the alert.
        assert!(eng.alert().is_none());
    }

    #[test]
    fn test_false_positive_after_horizon_ticks() {
        let mut eng = ForecastingEngine::new(ForecastConfig::default());
        eng.generate_forecast(0.05, [0.0, 0.0], 0.1);
        assert!(eng.alert().is_some());

        let mut fp_seen = false;
        for _ in 0..26 {
            if eng.record_actual(Regime::Calm, 1.0, [0.0, 0.0])
                == Some(ValidationOutcome::FalsePositive)
            {
                fp_seen = true;
                break;
            }
        }
        assert!(fp_seen, "alert never timed out into a false positive");
        assert_eq!(eng.validation_metrics().false_positives, 1);
        assert!(eng.alert().is_none());
    }

    #[test]
    fn test_missed_crisis_is_false_negative() {
        let mut eng = ForecastingEngine::new(ForecastConfig::default());
        let outcome = eng.record_actual(Regime::Crisis, 0.9, [0.0, 0.0]);
        assert_eq!(outcome, Some(ValidationOutcome::FalseNegative));
        assert_eq!(eng.validation_metrics().false_negatives, 1);
    }

    #[test]
    fn test_backtest_is_deterministic_and_pure() {
        let mut eng = ForecastingEngine::new(ForecastConfig::default());
        // 60 calm ticks, a 10-tick collapse into crisis, then recovery.
        for _ in 0..60 {
            eng.record_actual(Regime::Calm, 0.9, [0.1, 0.1]);
        }
        for i in 0..10 {
            let s = 0.9 - 0.08 * i as f32;
            let regime = if i >= 8 { Regime::Crisis } else { Regime::Buildup };
            eng.record_actual(regime, s, [0.5, 0.5]);
        }
        for _ in 0..30 {
            eng.record_actual(Regime::Calm, 0.9, [0.1, 0.1]);
        }

        let first = eng.run_backtest(0, eng.replay_len()).expect("buffer is non-empty");
        let second = eng.run_backtest(0, eng.replay_len()).expect("buffer is non-empty");
        assert_eq!(first, second);
        assert_eq!(first.samples, 100);
        assert_eq!(
            first.true_positives
                + first.false_positives
                + first.true_negatives
                + first.false_negatives,
            100
        );
    }

    #[test]
    fn test_backtest_sub_range_is_self_contained() {
        let mut eng = ForecastingEngine::new(ForecastConfig::default());
        for _ in 0..60 {
            eng.record_actual(Regime::Calm, 0.9, [0.1, 0.1]);
        }
        for i in 0..10 {
            let s = 0.9 - 0.08 * i as f32;
            let regime = if i >= 8 { Regime::Crisis } else { Regime::Buildup };
            eng.record_actual(regime, s, [0.5, 0.5]);
        }
        for _ in 0..30 {
            eng.record_actual(Regime::Calm, 0.9, [0.1, 0.1]);
        }

        // The calm prefix never sees the crisis: its lookahead stops at the
        // range end, so every sample scores as a true negative.
        let prefix = eng.run_backtest(0, 60).expect("range is non-empty");
        assert_eq!(prefix.samples, 60);
        assert_eq!(prefix.true_negatives, 60);
        assert_eq!(prefix.false_negatives, 0);

        // Over the full buffer the same calm ticks sit within the horizon of
        // the crisis and some become misses.
        let full = eng.run_backtest(0, eng.replay_len()).unwrap();
        assert!(full.false_negatives > 0);

        // End clamps to the buffer; an empty range yields nothing.
        assert_eq!(eng.run_backtest(0, usize::MAX).unwrap().samples, 100);
        assert!(eng.run_backtest(50, 50).is_none());
        assert!(eng.run_backtest(200, 300).is_none());
    }

    #[test]
    fn test_replay_buffer_is_bounded() {
        let mut eng = ForecastingEngine::new(ForecastConfig::default());
        for _ in 0..1500 {
            eng.record_actual(Regime::Calm, 0.9, [0.0, 0.0]);
        }
        assert_eq!(eng.replay_len(), 1000);
    }
}
