use std::{
    collections::BTreeMap,
    fs,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
};

use color_eyre::Result;
use dirs::config_dir;
use quill_ratelimit::RedisSettings;
use serde::{Deserialize, Serialize};

/// Service configuration loaded from `~/.config/quill/config.toml` (platform-specific).
/// Environment variables take precedence; see `storage.rs`.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Address to bind; `QUILL_LISTEN_ADDR` overrides.
    pub listen_addr: Option<SocketAddr>,
    /// Base64 field key; `QUILL_ENCRYPTION_KEY` overrides.
    pub encryption_key: Option<String>,
    /// Reverse proxies allowed to name the client via `X-Forwarded-For` or
    /// `X-Real-IP`. Empty means the socket peer is the client.
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
    /// Shared rate limit counters. Absent means in-process only.
    pub redis: Option<RedisSettings>,
    pub openai: Option<OpenAiConfig>,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
}

/// Static bearer tokens, token -> user id.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,
}

/// Load config from `path`, or the default location when `None`.
pub fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load_from_path(path),
        None => load_from_path(default_path()?),
    }
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("quill").join("config.toml"))
}

/// Write `config` to `path` unless a file is already there, creating parent
/// directories as needed. Existing files are left untouched.
pub fn write_default_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}
