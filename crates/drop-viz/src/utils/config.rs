//! Configuration file management.
//!
//! Handles loading and saving user preferences to `~/.drop-viz.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::detect::DetectorConfig;
use crate::filter::FilterPreset;
use crate::pipeline::PipelineConfig;

const CONFIG_TEMPLATE: &str = r#"# drop-viz configuration file

# Kalman response preset: smooth | balanced | responsive | reactive
# preset = "balanced"

# Disable to pass raw band features through unfiltered
# filter_enabled = true

# sample_rate = 44100.0

# =============================================================================
# Detection
# =============================================================================

# Reduced detector: flux-only onsets, looser 2-of-4 drop quorum
# simple_detector = false

# onset_base_threshold = 10.0     # Floor for the adaptive onset threshold
# onset_cooldown_ms = 150.0       # Min ms between onsets
# min_bpm = 60.0
# max_bpm = 180.0
# buildup_threshold = 0.40        # Trend intensity to start a buildup
# drop_quorum = 3                 # Drop indicators that must agree (of 4)

# =============================================================================
# Governor
# =============================================================================

# throttle_enabled = true
# r_min = 0.001                   # Covariance floor (clean signal)
# r_max = 0.05                    # Covariance ceiling (noisy signal)
# cancellation_gain = 0.5         # Max fraction of control subtracted

# =============================================================================
# Forecasting
# =============================================================================

# forecast_horizon = 24           # Projection depth in ticks
# crisis_threshold = 0.70
# alert_threshold = 0.65
"#;

#[derive(Serialize, Deserialize, Default)]
pub struct Config {
    pub preset: Option<String>,
    pub filter_enabled: Option<bool>,
    pub sample_rate: Option<f32>,

    // Detection (flattened for simpler TOML)
    pub simple_detector: Option<bool>,
    pub onset_base_threshold: Option<f32>,
    pub onset_cooldown_ms: Option<f64>,
    pub min_bpm: Option<f32>,
    pub max_bpm: Option<f32>,
    pub buildup_threshold: Option<f32>,
    pub drop_quorum: Option<u32>,

    // Governor
    pub throttle_enabled: Option<bool>,
    pub r_min: Option<f32>,
    pub r_max: Option<f32>,
    pub cancellation_gain: Option<f32>,

    // Forecasting
    pub forecast_horizon: Option<usize>,
    pub crisis_threshold: Option<f32>,
    pub alert_threshold: Option<f32>,
}

impl Config {
    fn path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".drop-viz.toml"))
    }

    pub fn load() -> Self {
        let path = match Self::path() {
            Some(p) => p,
            None => return Self::default(),
        };

        // Create template file if it doesn't exist
        if !path.exists() {
            let _ = fs::write(&path, CONFIG_TEMPLATE);
            println!("Created config template at {:?}", path);
        }

        fs::read_to_string(&path)
            .ok()
            .and_then(|s| toml::from_str(&s).ok())
            .unwrap_or_default()
    }

    pub fn save(&self) {
        if let Some(path) = Self::path() {
            if let Ok(content) = toml::to_string(self) {
                let _ = fs::write(&path, &content);
                println!("Config saved to {:?}", path);
            }
        }
    }

    pub fn preset(&self) -> FilterPreset {
        self.preset
            .as_deref()
            .map(FilterPreset::from_name)
            .unwrap_or(FilterPreset::Balanced)
    }

    pub fn filter_enabled(&self) -> bool {
        self.filter_enabled.unwrap_or(true)
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate.unwrap_or(44100.0)
    }

    /// Detector configuration with file overrides applied.
    pub fn detector(&self) -> DetectorConfig {
        let mut config = if self.simple_detector.unwrap_or(false) {
            DetectorConfig::simple()
        } else {
            DetectorConfig::full_spectrum()
        };
        if let Some(v) = self.onset_base_threshold {
            config.onset.base_threshold = v;
        }
        if let Some(v) = self.onset_cooldown_ms {
            config.onset.cooldown_ms = v;
        }
        if let Some(v) = self.min_bpm {
            config.tempo.min_bpm = v;
        }
        if let Some(v) = self.max_bpm {
            config.tempo.max_bpm = v;
        }
        if let Some(v) = self.buildup_threshold {
            config.buildup.threshold = v;
        }
        if let Some(v) = self.drop_quorum {
            config.drop.quorum = v;
        }
        config
    }

    /// Full pipeline configuration with file overrides applied.
    pub fn pipeline(&self) -> PipelineConfig {
        let mut config = PipelineConfig {
            preset: self.preset(),
            filter_enabled: self.filter_enabled(),
            sample_rate: self.sample_rate(),
            detector: self.detector(),
            ..Default::default()
        };
        if let Some(v) = self.throttle_enabled {
            config.governor.throttle_enabled = v;
        }
        if let Some(v) = self.r_min {
            config.governor.r_min = v;
        }
        if let Some(v) = self.r_max {
            config.governor.r_max = v;
        }
        if let Some(v) = self.cancellation_gain {
            config.governor.cancellation_gain = v;
        }
        if let Some(v) = self.forecast_horizon {
            config.forecast.horizon = v;
        }
        if let Some(v) = self.crisis_threshold {
            config.forecast.crisis_threshold = v;
        }
        if let Some(v) = self.alert_threshold {
            config.forecast.alert_threshold = v;
        }
        config
    }
}
