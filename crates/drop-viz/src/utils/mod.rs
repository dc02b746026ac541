pub mod config;
mod history;

pub use config::Config;
pub use history::History;
