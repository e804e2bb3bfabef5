//! Configuration management for the rtchat CLI.

use anyhow::{Context, Result};
use rtchat::UserProfile;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Config file name, inside the data directory.
pub const CONFIG_FILE: &str = "rtchat.toml";

/// CLI configuration.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Signed-in user.
    pub user: Option<UserConfig>,
}

/// Signed-in user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    /// User ID.
    pub id: String,
    /// Display name.
    pub name: String,
}

impl UserConfig {
    pub fn profile(&self) -> UserProfile {
        UserProfile::new(self.id.as_str(), self.name.as_str())
    }
}

/// Resolve the data directory: `--data-dir`/`RTCHAT_DATA_DIR`, else next to
/// the executable.
pub fn data_dir(override_dir: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = override_dir {
        return Ok(dir.to_path_buf());
    }
    let exe_path = env::current_exe().context("Could not determine executable path")?;
    let exe_dir = exe_path
        .parent()
        .context("Could not determine executable directory")?;

    Ok(exe_dir.join("rtchat-data"))
}

/// Get the configuration file path.
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

/// Load configuration from file.
pub fn load_config(data_dir: &Path) -> Result<Config> {
    let path = config_path(data_dir);

    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&path).context("Failed to read config file")?;

    toml::from_str(&content).context("Failed to parse config file")
}

/// Save configuration to file.
pub fn save_config(data_dir: &Path, config: &Config) -> Result<()> {
    fs::create_dir_all(data_dir).context("Failed to create data directory")?;
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;

    fs::write(config_path(data_dir), content).context("Failed to write config file")?;

    Ok(())
}
