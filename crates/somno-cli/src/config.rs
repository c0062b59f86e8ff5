//! Configuration loading and management.

use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the local session database.
    pub database_path: PathBuf,
    /// Reference zone for payload timestamps that carry no offset.
    pub timezone: Tz,
    /// Base URL of a remote record service. When set, imports go there
    /// instead of the local database.
    pub remote_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("somno.db"),
            timezone: chrono_tz::UTC,
            remote_url: None,
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    ///
    /// Later sources win: defaults, then the user config file, then the
    /// explicit `--config` file, then `SOMNO_*` environment variables.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (SOMNO_*)
        figment = figment.merge(Env::prefixed("SOMNO_"));

        figment.extract()
    }
}

/// Returns the platform-specific config directory for somno.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("somno"))
}

/// Returns the platform-specific data directory for somno.
///
/// On Linux: `~/.local/share/somno`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("somno"))
}
