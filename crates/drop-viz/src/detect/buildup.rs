//! Buildup detection from multi-band energy trends.
//!
//! A buildup is a sustained simultaneous rise across bass, mid, and high
//! energy. Per-band slopes come from least-squares fits over the recent
//! RMS history; a hysteresis counter separates a real riser from a single
//! loud bar.

use crate::utils::History;

#[derive(Clone, Copy, Debug)]
pub struct BuildupConfig {
    /// Combined trend intensity required to start accumulating evidence.
    pub threshold: f32,
    /// Intensity below which an active buildup ends.
    pub exit_threshold: f32,
    /// Minimum broadband energy; trends in near-silence do not count.
    pub energy_floor: f32,
    /// Consecutive-ish frames of exceedance before a buildup confirms.
    pub required_frames: u32,
    /// An active buildup older than this is abandoned.
    pub max_duration_s: f64,
    /// Slope magnitude that maps to intensity 1.0.
    pub slope_norm: f32,
    /// Least-squares fit window, in frames.
    pub trend_window: usize,
    /// Bass / mid / high slope weights.
    pub weights: [f32; 3],
}

impl Default for BuildupConfig {
    fn default() -> Self {
        Self {
            threshold: 0.40,
            exit_threshold: 0.30,
            energy_floor: 0.20,
            required_frames: 15,
            max_duration_s: 12.0,
            slope_norm: 0.008,
            trend_window: 30,
            weights: [0.3, 0.4, 0.3],
        }
    }
}

/// Per-frame buildup state.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuildupFrame {
    pub active: bool,
    /// Combined normalized trend intensity, 0-1.
    pub intensity: f32,
    /// Seconds since the buildup confirmed; 0 when inactive.
    pub duration_s: f64,
}

pub struct BuildupDetector {
    config: BuildupConfig,
    active: bool,
    started_ms: f64,
    /// Hysteresis evidence counter. Rises by 1 above threshold, falls by 2
    /// below, so one spiky frame cannot carry a confirmation.
    counter: i32,
    intensity: f32,
}

impl BuildupDetector {
    pub fn new(config: BuildupConfig) -> Self {
        Self {
            config,
            active: false,
            started_ms: 0.0,
            counter: 0,
            intensity: 0.0,
        }
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    /// Seconds the current buildup has been active, 0 when none is.
    pub fn duration_s(&self, now_ms: f64) -> f64 {
        if self.active {
            (now_ms - self.started_ms) / 1000.0
        } else {
            0.0
        }
    }

    /// Evaluate one frame against the band RMS histories.
    pub fn process(
        &mut self,
        bass: &History,
        mid: &History,
        high: &History,
        avg_energy: f32,
        now_ms: f64,
    ) -> BuildupFrame {
        let w = self.config.trend_window;
        let [wb, wm, wh] = self.config.weights;
        let combined = wb * bass.slope(w) + wm * mid.slope(w) + wh * high.slope(w);
        self.intensity = (combined / self.config.slope_norm).clamp(0.0, 1.0);

        let rising =
            self.intensity > self.config.threshold && avg_energy > self.config.energy_floor;

        if self.active {
            let expired = self.duration_s(now_ms) > self.config.max_duration_s;
            if self.intensity < self.config.exit_threshold || expired || self.counter <= 0 {
                self.active = false;
                self.counter = 0;
            } else if !rising {
                self.counter -= 2;
            }
        } else if rising {
            self.counter += 1;
            if self.counter >= self.config.required_frames as i32 {
                self.active = true;
                self.started_ms = now_ms;
            }
        } else {
            self.counter = (self.counter - 2).max(0);
        }

        BuildupFrame {
            active: self.active,
            intensity: self.intensity,
            duration_s: self.duration_s(now_ms),
        }
    }

    pub fn reset(&mut self) {
        self.active = false;
        self.started_ms = 0.0;
        self.counter = 0;
        self.intensity = 0.0;
    }
}
