//! Configuration Module
//!
//! Validator configuration loaded from environment variables.

mod settings;

pub use settings::{ConfigError, ReconnectSettings, ValidatorConfig};
