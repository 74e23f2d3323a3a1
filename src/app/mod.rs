//! Application configuration

mod config;

pub use config::{AntiCsrfConfig, Config, FuzzerSettings, GeneralConfig, TransportConfig};
