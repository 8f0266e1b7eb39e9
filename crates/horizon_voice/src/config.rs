//! Configuration management for the voice routing engine.
//!
//! Group definitions and logging settings are loaded from a TOML file. A
//! missing file is replaced by the default configuration.

use crate::error::VoiceError;
use crate::types::{GroupId, MemberId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

fn default_max_voices() -> u8 {
    4
}

fn default_audible_radius() -> f64 {
    30.0
}

fn default_hysteresis_margin() -> f64 {
    2.0
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Top-level voice configuration loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Groups created at startup
    #[serde(default)]
    pub groups: Vec<VoiceGroupSettings>,
}

/// Logging system configuration.
///
/// Controls log output format and level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

/// Settings for one voice group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceGroupSettings {
    /// Fixed group id; a random one is assigned when absent
    #[serde(default)]
    pub group_id: Option<GroupId>,
    /// Incoming channel slots per listener
    #[serde(default = "default_max_voices")]
    pub max_voices: u8,
    /// Priority given to members added without an explicit one
    #[serde(default)]
    pub default_priority: i32,
    /// If present, only these members may join
    #[serde(default)]
    pub allowed_members: Option<Vec<MemberId>>,
    /// Whether new members hear their own voice (debugging aid)
    #[serde(default)]
    pub listen_to_yourself: bool,
    /// Present for positional groups
    #[serde(default)]
    pub proximity: Option<ProximitySettings>,
}

impl Default for VoiceGroupSettings {
    fn default() -> Self {
        Self {
            group_id: None,
            max_voices: default_max_voices(),
            default_priority: 0,
            allowed_members: None,
            listen_to_yourself: false,
            proximity: None,
        }
    }
}

impl VoiceGroupSettings {
    /// Broadcast group with `max_voices` slots per listener.
    pub fn broadcast(max_voices: u8) -> Self {
        Self {
            max_voices,
            ..Default::default()
        }
    }

    /// Proximity group with the given range and hysteresis margin.
    pub fn positional(max_voices: u8, audible_radius: f64, hysteresis_margin: f64) -> Self {
        Self {
            max_voices,
            proximity: Some(ProximitySettings {
                audible_radius,
                hysteresis_margin,
            }),
            ..Default::default()
        }
    }

    pub fn is_positional(&self) -> bool {
        self.proximity.is_some()
    }

    pub fn validate(&self) -> Result<(), VoiceError> {
        if self.max_voices == 0 {
            return Err(VoiceError::Config("max_voices must be greater than 0".to_string()));
        }
        if let Some(proximity) = &self.proximity {
            proximity.validate()?;
        }
        Ok(())
    }
}

/// Audible range of a proximity group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProximitySettings {
    /// Distance within which speakers are heard
    #[serde(default = "default_audible_radius")]
    pub audible_radius: f64,
    /// Dead zone around the radius preventing channel flapping
    #[serde(default = "default_hysteresis_margin")]
    pub hysteresis_margin: f64,
}

impl Default for ProximitySettings {
    fn default() -> Self {
        Self {
            audible_radius: default_audible_radius(),
            hysteresis_margin: default_hysteresis_margin(),
        }
    }
}

impl ProximitySettings {
    pub fn validate(&self) -> Result<(), VoiceError> {
        if !self.audible_radius.is_finite() || self.audible_radius <= 0.0 {
            return Err(VoiceError::Config(format!(
                "audible_radius must be a positive number, got {}",
                self.audible_radius
            )));
        }
        if !self.hysteresis_margin.is_finite()
            || self.hysteresis_margin < 0.0
            || self.hysteresis_margin >= self.audible_radius
        {
            return Err(VoiceError::Config(format!(
                "hysteresis_margin must be in [0, {}), got {}",
                self.audible_radius, self.hysteresis_margin
            )));
        }
        Ok(())
    }
}

impl VoiceConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration.
    pub async fn load_from_file(path: &Path) -> Result<Self, VoiceError> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: VoiceConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = VoiceConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default voice configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Validates the configuration for correctness.
    pub fn validate(&self) -> Result<(), VoiceError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(VoiceError::Config(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            )));
        }

        let mut seen = HashSet::new();
        for group in &self.groups {
            group.validate()?;
            if let Some(group_id) = group.group_id {
                if !seen.insert(group_id) {
                    return Err(VoiceError::Config(format!("Duplicate group id: {group_id}")));
                }
            }
        }
        Ok(())
    }
}
