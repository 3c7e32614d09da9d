//! Configuration: TOML file with defaults for every field, plus API key
//! lookup from the environment or the OS keychain.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::synthesis::gemini::{DEFAULT_API_BASE, DEFAULT_MODEL};
use crate::synthesis::image_prep::MAX_UPLOAD_DIMENSION;

/// Environment variable checked before the keychain.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
/// Keychain service name for the API key.
pub const KEYCHAIN_SERVICE: &str = "gemini";
/// Keychain user name for the API key.
pub const KEYCHAIN_USER: &str = "fitcheck";

const APP_DIR: &str = "fitcheck";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TryOnConfig {
    pub api_base: String,
    pub model: String,
    pub render_timeout_secs: u64,
    pub max_upload_dimension: u32,
    /// Where the saved-outfit database and catalog assets live.
    pub data_dir: Option<PathBuf>,
    /// Custom catalog; the built-in one is used when unset.
    pub catalog_path: Option<PathBuf>,
}

impl Default for TryOnConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            render_timeout_secs: 120,
            max_upload_dimension: MAX_UPLOAD_DIMENSION,
            data_dir: None,
            catalog_path: None,
        }
    }
}

impl TryOnConfig {
    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }

    /// Configured data dir, else the platform data dir + `fitcheck`.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        match dirs::data_dir() {
            Some(dir) => Ok(dir.join(APP_DIR)),
            None => bail!("No data directory available on this platform; set data_dir"),
        }
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("saved_outfits.db"))
    }

    pub fn asset_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("assets"))
    }

    fn validate(&self) -> Result<()> {
        if self.render_timeout_secs == 0 {
            bail!("render_timeout_secs must be greater than zero");
        }
        if self.max_upload_dimension == 0 {
            bail!("max_upload_dimension must be greater than zero");
        }
        if self.model.trim().is_empty() {
            bail!("model must not be empty");
        }
        Ok(())
    }
}

/// Load config from a TOML file. Missing fields take their defaults.
pub fn load_config(path: &Path) -> Result<TryOnConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: TryOnConfig =
        toml::from_str(&content).with_context(|| format!("Invalid config {:?}", path))?;
    config.validate()?;
    info!("Loaded config from {:?}", path);
    Ok(config)
}

/// Load `<config dir>/fitcheck/config.toml`, or defaults when it does not exist.
pub fn load_default_config() -> Result<TryOnConfig> {
    let Some(path) = dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml")) else {
        info!("No config directory on this platform, using defaults");
        return Ok(TryOnConfig::default());
    };
    if path.exists() {
        load_config(&path)
    } else {
        info!("No config at {:?}, using defaults", path);
        Ok(TryOnConfig::default())
    }
}

/// Find the image API key: `GEMINI_API_KEY`, then the OS keychain.
pub fn resolve_api_key() -> Result<String> {
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        if !key.trim().is_empty() {
            return Ok(key);
        }
    }

    let entry = Entry::new(KEYCHAIN_SERVICE, KEYCHAIN_USER).map_err(|e| {
        warn!("Failed to create keyring entry for {}: {}", KEYCHAIN_SERVICE, e);
        anyhow::anyhow!("Failed to access keychain: {}", e)
    })?;
    match entry.get_password() {
        Ok(key) => Ok(key),
        Err(keyring::Error::NoEntry) => bail!(
            "No API key found. Set {} or store one in the keychain under service '{}'.",
            API_KEY_ENV,
            KEYCHAIN_SERVICE
        ),
        Err(e) => {
            warn!("Failed to read API key for {}: {}", KEYCHAIN_SERVICE, e);
            bail!("Failed to read API key from keychain: {}", e)
        }
    }
}

/// Store the image API key in the OS keychain.
pub fn store_api_key(key: &str) -> Result<()> {
    let entry = Entry::new(KEYCHAIN_SERVICE, KEYCHAIN_USER)?;
    entry.set_password(key)?;
    info!("Stored API key in keychain");
    Ok(())
}
