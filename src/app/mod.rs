pub mod config;

pub use config::{CaptureConfig, Config, HttpConfig, RevisionConfig};
