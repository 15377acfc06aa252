// src/config/loader.rs

//! # Configuration Loader
//!
//! Reads `texthost.toml` and turns the raw tables into a `HostConfig`.

use log::Level;
use std::{fs, path::Path};

use super::model::{ConfigError, HostConfig, InjectionConfig, RawConfig};

/// Load and parse the configuration from `path`.
pub fn load(path: &Path) -> Result<HostConfig, ConfigError> {
    texthost_log!(Level::Debug, "config", "Reading config from {:?}", path);
    let txt = fs::read_to_string(path)?;
    let cfg = parse(&txt)?;
    texthost_log!(Level::Info, "config", "Loaded config from {:?}", path);
    Ok(cfg)
}

/// Like `load`, but a missing file yields the defaults.
pub fn load_or_default(path: &Path) -> Result<HostConfig, ConfigError> {
    if !path.exists() {
        texthost_log!(Level::Debug, "config", "{:?} not found, using defaults", path);
        return Ok(HostConfig::default());
    }
    load(path)
}

/// Parse a TOML document. Absent tables fall back to defaults.
pub fn parse(txt: &str) -> Result<HostConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(txt)?;
    Ok(HostConfig {
        logging:   raw.logging,
        injection: InjectionConfig::try_from(raw.injection)?,
    })
}
