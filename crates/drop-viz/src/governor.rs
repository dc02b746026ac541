//! Adaptive noise and latency governor.
//!
//! Three independent responsibilities, all fed by per-tick audio features:
//!
//! 1. Adapt the Kalman measurement covariance R to signal quality, computed
//!    from short-time energy (loud = trust) and zero-crossing rate (noisy =
//!    distrust).
//! 2. Apply soft, error-proportional cancellation to a control signal.
//! 3. Throttle expensive downstream transmission by a stability-tiered rate,
//!    and track the gap between achieved and idealized control cost.

use serde::Serialize;

use crate::utils::History;

/// Ring capacity for the cost telemetry series (5 seconds at 60 fps).
const GAP_HISTORY: usize = 300;

#[derive(Clone, Copy, Debug)]
pub struct GovernorConfig {
    /// Base measurement noise, used as the starting R.
    pub r_base: f32,
    /// Minimum R (high trust in a clean signal).
    pub r_min: f32,
    /// Maximum R (low trust in a noisy signal).
    pub r_max: f32,
    /// Below this short-time energy the signal is too quiet to trust.
    pub ste_low: f32,
    /// Above this short-time energy the signal earns full trust.
    pub ste_high: f32,
    /// Below this zero-crossing rate the signal is tonal (trust).
    pub zcr_low: f32,
    /// Above this zero-crossing rate the signal is noisy (distrust).
    pub zcr_high: f32,
    /// Cancellation applies only when |error| is at or above this.
    pub cancellation_threshold: f32,
    /// Maximum fraction of the control signal subtracted.
    pub cancellation_gain: f32,
    pub throttle_enabled: bool,
    /// Stability at or above this is "stable" (slowest sends).
    pub sigma_stable: f32,
    /// Stability at or above this is merely "unstable".
    pub sigma_unstable: f32,
    pub rate_stable_hz: f32,
    pub rate_unstable_hz: f32,
    pub rate_chaotic_hz: f32,
    pub track_performance_gap: bool,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            r_base: 0.005,
            r_min: 0.001,
            r_max: 0.05,
            ste_low: 0.01,
            ste_high: 0.5,
            zcr_low: 10.0,
            zcr_high: 100.0,
            cancellation_threshold: 0.0,
            cancellation_gain: 0.5,
            throttle_enabled: true,
            sigma_stable: 0.80,
            sigma_unstable: 0.60,
            rate_stable_hz: 1.0,
            rate_unstable_hz: 10.0,
            rate_chaotic_hz: 30.0,
            track_performance_gap: true,
        }
    }
}

/// Running counters exposed for diagnostics.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct GovernorStats {
    pub r_adaptations: u64,
    pub cancellations_applied: u64,
    pub packets_sent: u64,
    pub packets_throttled: u64,
    pub avg_signal_quality: f32,
    pub avg_performance_gap: f32,
}

impl Default for GovernorStats {
    fn default() -> Self {
        Self {
            r_adaptations: 0,
            cancellations_applied: 0,
            packets_sent: 0,
            packets_throttled: 0,
            avg_signal_quality: 0.5,
            avg_performance_gap: 1.0,
        }
    }
}

/// One cost-telemetry sample: achieved stage cost vs. idealized bound.
///
/// `gap` near 1 means near-optimal control; a gap much greater than 1
/// signals model mismatch or actuator saturation. It is a diagnostic,
/// never an error.
#[derive(Clone, Copy, Debug, Default)]
pub struct PerformanceGap {
    pub j_optimal: f32,
    pub j_bound: f32,
    pub gap: f32,
}

/// HUD snapshot.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct GovernorHud {
    pub signal_quality: f32,
    pub adaptive_r: f32,
    pub throttle_rate_hz: f32,
    pub performance_gap: f32,
    pub stats: GovernorStats,
}

pub struct Governor {
    config: GovernorConfig,
    current_r: f32,
    current_rate_hz: f32,
    last_send_ms: f64,
    signal_quality: f32,
    j_optimal_history: History,
    j_bound_history: History,
    stats: GovernorStats,
}

impl Governor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            current_r: config.r_base,
            current_rate_hz: config.rate_stable_hz,
            last_send_ms: 0.0,
            signal_quality: 0.5,
            j_optimal_history: History::new(GAP_HISTORY),
            j_bound_history: History::new(GAP_HISTORY),
            stats: GovernorStats::default(),
            config,
        }
    }

    /// Map short-time energy and zero-crossing rate to an adapted
    /// measurement covariance.
    ///
    /// Clean, tonal signals (high STE, low ZCR) earn a low R; noisy chaotic
    /// ones a high R. The output is EMA-smoothed so the downstream Kalman
    /// channels never see an abrupt covariance jump.
    pub fn adaptive_covariance(&mut self, ste: f32, zcr: f32) -> f32 {
        let ste = if ste.is_finite() { ste } else { 0.0 };
        let zcr = if zcr.is_finite() { zcr } else { 0.0 };

        let ste_quality = if ste < self.config.ste_low {
            0.0
        } else if ste >= self.config.ste_high {
            1.0
        } else {
            (ste - self.config.ste_low) / (self.config.ste_high - self.config.ste_low)
        };

        // ZCR quality is inverted: more crossings means less trust.
        let zcr_quality = if zcr <= self.config.zcr_low {
            1.0
        } else if zcr >= self.config.zcr_high {
            0.0
        } else {
            1.0 - (zcr - self.config.zcr_low) / (self.config.zcr_high - self.config.zcr_low)
        };

        self.signal_quality = 0.6 * ste_quality + 0.4 * zcr_quality;

        let r_new = self.config.r_max - self.signal_quality * (self.config.r_max - self.config.r_min);

        const ALPHA: f32 = 0.1;
        self.current_r = ALPHA * r_new + (1.0 - ALPHA) * self.current_r;

        self.stats.r_adaptations += 1;
        self.stats.avg_signal_quality =
            self.stats.avg_signal_quality * 0.95 + self.signal_quality * 0.05;

        self.current_r
    }

    pub fn current_r(&self) -> f32 {
        self.current_r
    }

    pub fn signal_quality(&self) -> f32 {
        self.signal_quality
    }

    /// Soft, error-proportional subtractive cancellation of a control pair.
    ///
    /// Below the threshold the signal passes through untouched; above it the
    /// control is scaled down continuously (full strength at |error| = 0.2),
    /// so there is never a discontinuity at the boundary.
    pub fn apply_cancellation(&mut self, u: [f32; 2], error: f32) -> [f32; 2] {
        let error = if error.is_finite() { error } else { 0.0 };
        if error.abs() < self.config.cancellation_threshold {
            return u;
        }
        let strength = (error.abs() / 0.2).min(1.0);
        let scale = 1.0 - self.config.cancellation_gain * strength;
        self.stats.cancellations_applied += 1;
        [u[0] * scale, u[1] * scale]
    }

    /// Three-tier transmission rate selection by stability, halved further
    /// when the signal entropy is high.
    pub fn status_data_rate(&mut self, sigma_star: f32, entropy: f32) -> f32 {
        if !self.config.throttle_enabled {
            self.current_rate_hz = 60.0;
            return self.current_rate_hz;
        }
        let sigma = if sigma_star.is_finite() { sigma_star } else { 0.0 };
        let mut rate = if sigma >= self.config.sigma_stable {
            self.config.rate_stable_hz
        } else if sigma >= self.config.sigma_unstable {
            self.config.rate_unstable_hz
        } else {
            self.config.rate_chaotic_hz
        };
        if entropy.is_finite() && entropy > 0.7 {
            rate *= 0.5;
        }
        self.current_rate_hz = rate;
        rate
    }

    /// Interval gate against the last send time. This is a fixed minimum
    /// inter-send interval, not a token bucket: bursts are never permitted.
    pub fn should_send(&mut self, now_ms: f64) -> bool {
        if !self.config.throttle_enabled {
            self.stats.packets_sent += 1;
            return true;
        }
        let interval_ms = 1000.0 / self.current_rate_hz.max(1e-3) as f64;
        if now_ms - self.last_send_ms >= interval_ms {
            self.last_send_ms = now_ms;
            self.stats.packets_sent += 1;
            true
        } else {
            self.stats.packets_throttled += 1;
            false
        }
    }

    pub fn current_rate_hz(&self) -> f32 {
        self.current_rate_hz
    }

    /// Record instantaneous quadratic cost against an idealized bound and
    /// return the rolling-average ratio.
    ///
    /// The bound assumes the error can be driven down to 1% - a fixed
    /// heuristic, not a solved Riccati bound.
    pub fn record_performance_gap(
        &mut self,
        error: f32,
        u: [f32; 2],
        q: f32,
        r_diag: [f32; 2],
    ) -> PerformanceGap {
        if !self.config.track_performance_gap {
            return PerformanceGap { j_optimal: 0.0, j_bound: 0.0, gap: 1.0 };
        }
        let error = if error.is_finite() { error } else { 0.0 };

        let state_cost = q * error * error;
        let control_cost = r_diag[0] * u[0] * u[0] + r_diag[1] * u[1] * u[1];
        let j_optimal = state_cost + control_cost;
        let j_bound = q * 0.01 * 0.01;

        self.j_optimal_history.push(j_optimal);
        self.j_bound_history.push(j_bound);

        let avg_optimal = self.j_optimal_history.mean();
        let avg_bound = self.j_bound_history.mean();
        let gap = if avg_bound > 0.0 { avg_optimal / avg_bound } else { 1.0 };
        self.stats.avg_performance_gap = gap;

        PerformanceGap { j_optimal, j_bound, gap }
    }

    pub fn performance_gap(&self) -> f32 {
        self.stats.avg_performance_gap
    }

    pub fn stats(&self) -> &GovernorStats {
        &self.stats
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn hud_data(&self) -> GovernorHud {
        GovernorHud {
            signal_quality: self.signal_quality,
            adaptive_r: self.current_r,
            throttle_rate_hz: self.current_rate_hz,
            performance_gap: self.stats.avg_performance_gap,
            stats: self.stats,
        }
    }

    pub fn reset(&mut self) {
        self.current_r = self.config.r_base;
        self.current_rate_hz = self.config.rate_stable_hz;
        self.last_send_ms = 0.0;
        self.signal_quality = 0.5;
        self.j_optimal_history.clear();
        self.j_bound_history.clear();
        self.stats = GovernorStats::default();
    }
}
