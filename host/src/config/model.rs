// src/config/model.rs

use serde::Deserialize;
use std::{path::PathBuf, time::Duration};
use thiserror::Error;

use shared::constants::HOOK_DLL;

/// Top-level runtime config
#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    pub logging:   LoggingConfig,
    pub injection: InjectionConfig,
}

/// Mirror of the `[logging]` table
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]                   pub enable: bool,
    #[serde(default)]                   pub file:   Option<String>,
    #[serde(default = "default_level")] pub level:  String,
}
fn default_level() -> String { "INFO".into() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { enable: false, file: None, level: default_level() }
    }
}

/// Raw `[injection]` table as written in TOML
#[derive(Debug, Default, Deserialize)]
pub struct InjectionStub {
    #[serde(default)] pub library: Option<String>,
    #[serde(default)] pub timeout: Option<String>,
}

/// Fully-typed injection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionConfig {
    /// Instrumentation library, resolved by the OS loader search order.
    pub library: PathBuf,
    /// How long to wait for the remote loader thread.
    pub timeout: Duration,
}

pub const DEFAULT_INJECT_TIMEOUT: Duration = Duration::from_secs(2);

impl Default for InjectionConfig {
    fn default() -> Self {
        Self { library: PathBuf::from(HOOK_DLL), timeout: DEFAULT_INJECT_TIMEOUT }
    }
}

/// The file as deserialised, before durations are parsed
#[derive(Debug, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default)] pub logging:   LoggingConfig,
    #[serde(default)] pub injection: InjectionStub,
}

/// All the ways config loading can go wrong
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid duration '{0}': {1}")]
    InvalidDuration(String, #[source] humantime::DurationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl TryFrom<InjectionStub> for InjectionConfig {
    type Error = ConfigError;

    fn try_from(stub: InjectionStub) -> Result<Self, Self::Error> {
        let defaults = InjectionConfig::default();
        let timeout = match stub.timeout {
            Some(txt) => humantime::parse_duration(&txt)
                .map_err(|e| ConfigError::InvalidDuration(txt, e))?,
            None => defaults.timeout,
        };
        Ok(Self {
            library: stub.library.map(PathBuf::from).unwrap_or(defaults.library),
            timeout,
        })
    }
}
