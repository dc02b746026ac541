mod band;
mod kalman;

pub use band::{BandDiagnostics, BandFilter, BandFrame};
pub use kalman::{ChannelConfig, ChannelDiagnostics, FilterPreset, KalmanChannel};
