//! Real-time audio regime analysis: adaptive Kalman filtering of band
//! features, onset/tempo/buildup/drop detection, and predictive crisis
//! forecasting with self-validation.
//!
//! The whole crate is clocked externally: every stateful operation takes
//! the current time in milliseconds, so a session replays tick for tick.
//!
//! ```no_run
//! use drop_viz::{Pipeline, PipelineConfig};
//!
//! let mut pipeline = Pipeline::new(PipelineConfig::default());
//! let samples = vec![0.0f32; 2048];
//! let frame = pipeline.process(&samples, 16.7);
//! println!("stability {:.2}, bpm {:.0}", frame.stability, frame.detector.bpm);
//! ```

pub mod detect;
pub mod filter;
pub mod forecast;
pub mod governor;
pub mod pipeline;
pub mod spectral;
pub mod utils;

pub use detect::{DetectorConfig, DetectorFrame, DropPredictor};
pub use filter::{BandFilter, BandFrame, FilterPreset};
pub use forecast::{ForecastConfig, ForecastingEngine, Regime};
pub use governor::{Governor, GovernorConfig};
pub use pipeline::{Pipeline, PipelineConfig, PipelineFrame};
pub use spectral::{SpectralFrame, SpectrumAnalyzer};
pub use utils::Config;
