//! # Timelapse Configuration
//!
//! A single TOML file configures the stabilization run. Every section and
//! field is optional and falls back to its default.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [stabilization]
//! type = "smart_layer"
//! x = 117.5
//! y = 117.5
//! height_increment = 0.0
//! notification_period_seconds = 0.5
//! output_path = "benchy_plans.json"
//!
//! [smart_layer]
//! trigger_type = "normal_quality"
//! speed_threshold = 1200.0
//! snap_to_fastest = true
//!
//! [position]
//! firmware_retraction_length = 0.8
//! ```

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gcode::PositionConfig;
use crate::stabilization::StabilizationConfig;
use crate::stabilization::smart_layer::SmartLayerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for a stabilization run.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub stabilization: StabilizationConfig,
    #[serde(default)]
    pub smart_layer: SmartLayerConfig,
    #[serde(default)]
    pub position: PositionConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stabilization.validate().map_err(ConfigError::Invalid)?;
        self.smart_layer.validate().map_err(ConfigError::Invalid)?;
        self.position.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }
}

/// Load and validate a TOML config file.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    if let Err(e) = config.validate() {
        tracing::error!("Config file '{}' rejected: {}", path, e);
        return Err(e);
    }
    Ok(config)
}
