//! Settings loading.
//!
//! Resolution order for the settings file:
//! 1. `--config <file>` (must exist)
//! 2. `./roll-caller.toml`
//! 3. `<config_dir>/roll-caller/config.toml`
//! 4. compiled defaults
//!
//! The database path can additionally be overridden by `--db` / `ROLL_CALLER_DB`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;

const LOCAL_CONFIG_FILE: &str = "roll-caller.toml";
const APP_DIR: &str = "roll-caller";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Locale {
    #[default]
    #[serde(rename = "en")]
    En,
    #[serde(rename = "zh-CN")]
    ZhCn,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: PathBuf,
    /// Length of the reveal animation between picking and showing a student.
    pub draw_delay_ms: u64,
    /// How many records the recent-records view shows.
    pub recent_limit: usize,
    pub locale: Locale,
    /// Candidate files for the bundled default roster, tried in order.
    pub roster_sources: Vec<PathBuf>,
    pub export_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            draw_delay_ms: 2000,
            recent_limit: 50,
            locale: Locale::En,
            roster_sources: vec![
                PathBuf::from("students.csv"),
                PathBuf::from("data/students.csv"),
                PathBuf::from("roster.csv"),
            ],
            export_dir: PathBuf::from("."),
        }
    }
}

impl Settings {
    pub fn draw_delay(&self) -> Duration {
        Duration::from_millis(self.draw_delay_ms)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load settings, then apply the database override if one was given.
    pub fn load(
        config_file: Option<&Path>,
        database_override: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let mut settings = match config_file {
            Some(path) => Self::read_file(path)?,
            None => match discover_config_file() {
                Some(path) => Self::read_file(&path)?,
                None => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        if let Some(path) = database_override {
            settings.database_path = path;
        }

        Ok(settings)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded config from {}", path.display());
        Self::from_toml(&content)
    }
}

fn discover_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }

    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join("config.toml"))
        .filter(|path| path.exists())
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_DIR).join("roll-caller.db"))
        .unwrap_or_else(|| PathBuf::from("roll-caller.db"))
}
