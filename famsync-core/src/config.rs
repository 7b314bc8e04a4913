//! Settings at ~/.config/famsync/config.toml, overridable with `FAMSYNC_*`
//! environment variables.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{SyncError, SyncResult};

static DEFAULT_STORE_DIR: &str = "~/calendar";
static DEFAULT_SKEW: &str = "2s";
static DEFAULT_REFRESH: &str = "5m";

fn default_store_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_DIR)
}

fn default_skew() -> String {
    DEFAULT_SKEW.to_string()
}

fn default_refresh() -> String {
    DEFAULT_REFRESH.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root of the on-disk calendar store
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// SQLite link registry. Defaults to the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// How much newer a copy may be than our last write before it counts
    /// as edited elsewhere
    #[serde(default = "default_skew")]
    pub skew_tolerance: String,

    #[serde(default = "default_refresh")]
    pub refresh_interval: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_calendar: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            store_dir: default_store_dir(),
            database_path: None,
            skew_tolerance: default_skew(),
            refresh_interval: default_refresh(),
            default_calendar: None,
        }
    }
}

impl Settings {
    pub fn config_path() -> SyncResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| SyncError::Config("Could not determine config directory".into()))?
            .join("famsync");

        Ok(config_dir.join("config.toml"))
    }

    /// Load from the default location, writing a commented default file
    /// on first use.
    pub fn load() -> SyncResult<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            Self::create_default_config(&path)?;
            info!(path = %path.display(), "wrote default configuration");
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> SyncResult<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .add_source(Environment::with_prefix("FAMSYNC"))
            .build()
            .map_err(|e| SyncError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| SyncError::Config(e.to_string()))?;

        // Fail at load time rather than on first use.
        settings.skew_tolerance()?;
        settings.refresh_interval()?;
        Ok(settings)
    }

    /// Create a default config file with all options commented out.
    pub fn create_default_config(path: &Path) -> SyncResult<()> {
        let contents = format!(
            "\
# famsync configuration

# Where calendar directories live:
# store_dir = \"{DEFAULT_STORE_DIR}\"

# Link registry database:
# database_path = \"~/.local/share/famsync/links.db\"

# Edits newer than our last write by more than this are reported as
# made elsewhere:
# skew_tolerance = \"{DEFAULT_SKEW}\"

# How often `famsync watch` reloads:
# refresh_interval = \"{DEFAULT_REFRESH}\"

# Calendar used when `famsync new` gets no --calendar:
# default_calendar = \"family\"
"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SyncError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| SyncError::Config(format!("Could not write config file: {e}")))
    }

    pub fn store_path(&self) -> PathBuf {
        expand(&self.store_dir)
    }

    pub fn database_path(&self) -> SyncResult<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(expand(path)),
            None => dirs::data_dir()
                .map(|dir| dir.join("famsync").join("links.db"))
                .ok_or_else(|| SyncError::Config("Could not determine data directory".into())),
        }
    }

    pub fn skew_tolerance(&self) -> SyncResult<chrono::Duration> {
        let skew = parse_duration("skew_tolerance", &self.skew_tolerance)?;
        chrono::Duration::from_std(skew)
            .map_err(|e| SyncError::Config(format!("skew_tolerance: {e}")))
    }

    pub fn refresh_interval(&self) -> SyncResult<std::time::Duration> {
        let interval = parse_duration("refresh_interval", &self.refresh_interval)?;
        if interval.is_zero() {
            return Err(SyncError::Config("refresh_interval must be positive".into()));
        }
        Ok(interval)
    }
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}

fn parse_duration(field: &str, value: &str) -> SyncResult<std::time::Duration> {
    humantime::parse_duration(value.trim()).map_err(|e| SyncError::Config(format!("{field}: {e}")))
}
