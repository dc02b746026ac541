//! Scalar Kalman filter with an LQR-style predictive velocity term.
//!
//! Filters one audio band per instance. Compared to plain exponential
//! smoothing this gives optimal noise rejection plus a predictive lead:
//! the velocity estimate lets the filter anticipate trends instead of
//! always lagging behind them.

use crate::utils::History;
use serde::{Deserialize, Serialize};

/// Diagnostic history capacity per channel.
const HISTORY_CAPACITY: usize = 100;

/// Named tuning presets, ordered from most stable to most raw.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterPreset {
    /// Maximum stability, slow transients.
    Smooth,
    /// Good stability with reasonable response.
    Balanced,
    /// Fast transients, less smoothing.
    Responsive,
    /// Maximum responsiveness (closest to raw).
    Reactive,
}

impl FilterPreset {
    /// Parse a preset name; unknown names fall back to `Balanced`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "smooth" => Self::Smooth,
            "responsive" => Self::Responsive,
            "reactive" => Self::Reactive,
            _ => Self::Balanced,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Smooth => "smooth",
            Self::Balanced => "balanced",
            Self::Responsive => "responsive",
            Self::Reactive => "reactive",
        }
    }

    /// Tuning table. Moving down the list trades smoothing for lead:
    /// K_lqr rises while velocity smoothing (historical damping) falls.
    pub fn channel_config(self) -> ChannelConfig {
        let (q, r, k_lqr, velocity_smoothing) = match self {
            Self::Smooth => (0.0005, 0.02, 0.0, 0.9),
            Self::Balanced => (0.001, 0.01, 0.05, 0.7),
            Self::Responsive => (0.005, 0.005, 0.1, 0.5),
            Self::Reactive => (0.01, 0.002, 0.15, 0.3),
        };
        ChannelConfig {
            q,
            r,
            k_lqr,
            velocity_smoothing,
            ..ChannelConfig::default()
        }
    }
}

/// Per-channel tuning. Values are clamped to safe ranges at construction.
#[derive(Clone, Copy, Debug)]
pub struct ChannelConfig {
    /// Process noise covariance. Higher = more responsive, less smooth.
    pub q: f32,
    /// Measurement noise covariance. Higher = more smoothing, slower response.
    pub r: f32,
    /// State transition coefficient (1.0 = value expected to persist).
    pub a: f32,
    /// LQR control gain for the predictive velocity term.
    pub k_lqr: f32,
    /// Exponential smoothing applied to the velocity estimate (0-1).
    pub velocity_smoothing: f32,
    /// Starting error covariance.
    pub initial_covariance: f32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            q: 0.001,
            r: 0.01,
            a: 1.0,
            k_lqr: 0.05,
            velocity_smoothing: 0.7,
            initial_covariance: 0.1,
        }
    }
}

impl ChannelConfig {
    /// Q and R must stay strictly positive, covariance non-negative.
    fn sanitized(mut self) -> Self {
        self.q = if self.q.is_finite() { self.q.max(1e-9) } else { 1e-9 };
        self.r = if self.r.is_finite() { self.r.max(1e-9) } else { 1e-9 };
        self.a = if self.a.is_finite() { self.a } else { 1.0 };
        self.k_lqr = if self.k_lqr.is_finite() { self.k_lqr } else { 0.0 };
        self.velocity_smoothing = if self.velocity_smoothing.is_finite() {
            self.velocity_smoothing.clamp(0.0, 1.0)
        } else {
            0.7
        };
        self.initial_covariance = if self.initial_covariance.is_finite() {
            self.initial_covariance.max(0.0)
        } else {
            0.1
        };
        self
    }
}

/// Snapshot of channel internals for HUD display.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct ChannelDiagnostics {
    pub state: f32,
    pub covariance: f32,
    pub velocity: f32,
    pub last_gain: f32,
}

/// Single-channel Kalman-LQR filter for one scalar signal.
pub struct KalmanChannel {
    config: ChannelConfig,
    /// Current state estimate.
    x: f32,
    /// Error covariance (always >= 0).
    p: f32,
    /// Smoothed velocity estimate for the predictive term.
    velocity: f32,
    raw_history: History,
    filtered_history: History,
    gain_history: History,
}

impl KalmanChannel {
    pub fn new(config: ChannelConfig) -> Self {
        let config = config.sanitized();
        Self {
            config,
            x: 0.0,
            p: config.initial_covariance,
            velocity: 0.0,
            raw_history: History::new(HISTORY_CAPACITY),
            filtered_history: History::new(HISTORY_CAPACITY),
            gain_history: History::new(HISTORY_CAPACITY),
        }
    }

    pub fn with_preset(preset: FilterPreset) -> Self {
        Self::new(preset.channel_config())
    }

    /// Update the filter with a new measurement, returning the filtered value.
    ///
    /// NaN measurements are treated as 0; the result is always in [0, 1].
    pub fn update(&mut self, z: f32) -> f32 {
        let z = if z.is_finite() { z.clamp(0.0, 1.0) } else { 0.0 };

        // Predict: velocity adds an LQR-style lead over plain persistence.
        let x_pred = self.config.a * self.x + self.config.k_lqr * self.velocity;
        let p_pred = self.config.a * self.config.a * self.p + self.config.q;

        // Correct.
        let innovation = z - x_pred;
        let s = p_pred + self.config.r;
        let gain = p_pred / s;
        let x_new = x_pred + gain * innovation;
        let p_new = (1.0 - gain) * p_pred;

        // Velocity EMA for the next prediction.
        let raw_velocity = x_new - self.x;
        self.velocity = self.config.velocity_smoothing * self.velocity
            + (1.0 - self.config.velocity_smoothing) * raw_velocity;

        self.x = x_new;
        self.p = p_new.max(0.0);

        self.raw_history.push(z);
        self.filtered_history.push(x_new);
        self.gain_history.push(gain);

        self.value()
    }

    /// Current filtered value without updating, clamped to [0, 1].
    pub fn value(&self) -> f32 {
        self.x.clamp(0.0, 1.0)
    }

    /// Unclamped internal state, used when transplanting state across presets.
    pub fn raw_state(&self) -> f32 {
        self.x
    }

    pub fn set_state(&mut self, x: f32) {
        self.x = if x.is_finite() { x } else { 0.0 };
    }

    pub fn covariance(&self) -> f32 {
        self.p
    }

    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    pub fn measurement_noise(&self) -> f32 {
        self.config.r
    }

    /// Retune measurement noise at runtime (governor-adapted R).
    pub fn set_measurement_noise(&mut self, r: f32) {
        self.config.r = if r.is_finite() { r.max(1e-9) } else { self.config.r };
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Reset state, keeping the configuration.
    pub fn reset(&mut self) {
        self.x = 0.0;
        self.p = self.config.initial_covariance;
        self.velocity = 0.0;
        self.raw_history.clear();
        self.filtered_history.clear();
        self.gain_history.clear();
    }

    pub fn diagnostics(&self) -> ChannelDiagnostics {
        ChannelDiagnostics {
            state: self.x,
            covariance: self.p,
            velocity: self.velocity,
            last_gain: self.gain_history.latest().unwrap_or(0.0),
        }
    }

    pub fn history_len(&self) -> usize {
        self.filtered_history.len()
    }

    pub fn filtered_history(&self) -> &History {
        &self.filtered_history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_fallback() {
        assert_eq!(FilterPreset::from_name("smooth"), FilterPreset::Smooth);
        assert_eq!(FilterPreset::from_name("nonsense"), FilterPreset::Balanced);
    }

    #[test]
    fn test_convergence_to_constant() {
        // Smooth has K_lqr = 0, i.e. a pure Kalman update: convergence to a
        // constant input is monotone in error.
        let mut ch = KalmanChannel::with_preset(FilterPreset::Smooth);
        let target = 0.8;
        let mut prev_err = f32::MAX;
        for i in 0..200 {
            ch.update(target);
            let err = (ch.value() - target).abs();
            // Error must be non-increasing after the initial transient.
            if i > 5 {
                assert!(err <= prev_err + 1e-6, "error grew at step {}", i);
            }
            prev_err = err;
        }
        assert!(prev_err < 0.01, "did not converge: err={}", prev_err);
    }

    #[test]
    fn test_bounded_output_under_nan() {
        let mut ch = KalmanChannel::with_preset(FilterPreset::Reactive);
        for i in 0..300 {
            let z = match i % 4 {
                0 => f32::NAN,
                1 => 5.0,
                2 => -3.0,
                _ => 0.5,
            };
            let out = ch.update(z);
            assert!((0.0..=1.0).contains(&out));
            assert!(ch.covariance() >= 0.0);
        }
    }

    #[test]
    fn test_history_bound() {
        let mut ch = KalmanChannel::with_preset(FilterPreset::Balanced);
        for _ in 0..250 {
            ch.update(0.3);
        }
        assert_eq!(ch.history_len(), 100);
    }

    #[test]
    fn test_reset_preserves_config() {
        let mut ch = KalmanChannel::with_preset(FilterPreset::Smooth);
        for _ in 0..50 {
            ch.update(0.9);
        }
        ch.reset();
        assert_eq!(ch.value(), 0.0);
        assert_eq!(ch.history_len(), 0);
        assert!((ch.config().r - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_smooth_lags_reactive() {
        let mut smooth = KalmanChannel::with_preset(FilterPreset::Smooth);
        let mut reactive = KalmanChannel::with_preset(FilterPreset::Reactive);
        // Step input: the reactive preset should track it faster.
        for _ in 0..10 {
            smooth.update(0.0);
            reactive.update(0.0);
        }
        for _ in 0..5 {
            smooth.update(1.0);
            reactive.update(1.0);
        }
        assert!(reactive.value() > smooth.value());
    }
}
