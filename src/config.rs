//! Application configuration.
//!
//! Every field has a default, so a config file only needs the keys it
//! changes. Loaded from the JSON file named on the command line or in
//! `SAT_GLOBE_CONFIG`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tle::{HttpSource, TlePreset};

pub const CONFIG_ENV: &str = "SAT_GLOBE_CONFIG";

const MIN_INTERVAL_SECS: f64 = 0.05;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// CelesTrak group name (`stations`, `gps-ops`, ...) or a full URL.
    pub source: String,
    pub use_worker: bool,
    pub update_interval_secs: f64,
    pub blend_duration_secs: f64,
    pub synthetic_count: usize,
    pub synthetic_seed: u64,
    pub point_size: f32,
    pub show_satellites: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: TlePreset::ActiveSats.group().to_string(),
            use_worker: true,
            update_interval_secs: 1.0,
            blend_duration_secs: 1.0,
            synthetic_count: 300,
            synthetic_seed: 0x5a7e_111e,
            point_size: 3.0,
            show_satellites: true,
        }
    }
}

impl AppConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config.validated())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Never fails: problems are logged and defaults used.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match Self::load(path) {
            Ok(config) => {
                log::info!("loaded config from {}", path.display());
                config
            }
            Err(e) => {
                log::warn!("{} ({}), using defaults", e, path.display());
                Self::default()
            }
        }
    }

    /// First CLI argument, then `SAT_GLOBE_CONFIG`.
    pub fn path_from_env() -> Option<PathBuf> {
        std::env::args_os()
            .nth(1)
            .or_else(|| std::env::var_os(CONFIG_ENV))
            .map(PathBuf::from)
    }

    fn validated(mut self) -> Self {
        if !(self.update_interval_secs >= MIN_INTERVAL_SECS) {
            self.update_interval_secs = MIN_INTERVAL_SECS;
        }
        if !(self.blend_duration_secs >= 0.0) {
            self.blend_duration_secs = 0.0;
        }
        self.point_size = self.point_size.clamp(1.0, 32.0);
        self
    }

    pub fn preset(&self) -> Option<TlePreset> {
        TlePreset::from_group(&self.source)
    }

    pub fn element_source(&self) -> HttpSource {
        if self.source.starts_with("http://") || self.source.starts_with("https://") {
            return HttpSource::new(self.source.clone());
        }
        match self.preset() {
            Some(preset) => HttpSource::preset(preset),
            None => {
                log::warn!("unknown TLE group '{}', using stations", self.source);
                HttpSource::preset(TlePreset::Stations)
            }
        }
    }
}
