use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const DATA_ENV_VAR: &str = "MEDIBUDDY_DATA";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub data_file: PathBuf,
    /// Seconds between reminder ticks.
    pub tick_interval_secs: u64,
    /// How long after a missed dose it is still fine to take it.
    pub missed_dose_threshold_secs: u64,
    /// 0 keeps notifications on screen until dismissed.
    pub notification_timeout_ms: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_file: app_dir().join("medibuddy.json"),
            tick_interval_secs: 1,
            missed_dose_threshold_secs: 3600,
            notification_timeout_ms: 0,
        }
    }
}

/// `~/.medibuddy`, or `./.medibuddy` when no home directory is found.
pub fn app_dir() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".medibuddy")
}

impl Config {
    /// Reads `~/.medibuddy/config.json` if present, then applies the
    /// `MEDIBUDDY_DATA` override.
    pub fn load() -> Result<Self> {
        let mut config = Self::from_file(&app_dir().join("config.json"))?;
        if let Some(data) = env::var_os(DATA_ENV_VAR) {
            config.data_file = PathBuf::from(data);
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn missed_dose_threshold(&self) -> TimeDelta {
        TimeDelta::seconds(self.missed_dose_threshold_secs.min(i64::MAX as u64 / 1000) as i64)
    }
}
