//! Configuration resolution for keyweave.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/keyweave/settings.json)
//! 3. Project config (.keyweave/settings.json)
//! 4. Environment variables (`KEYWEAVE_*`)
//!
//! Files are merged key by key, so a project file that only sets
//! `handshake.curve` keeps every other value from the layers below it.

use std::path::{Path, PathBuf};

use keyweave_crypto::{
    AeadTransport, DerivedKey, HandshakeConfig, HandshakeCoordinator, Role, TransportConfig,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Complete keyweave configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub handshake: HandshakeConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Check the handshake parameters and that their keys fit the AEAD.
    pub fn validate(&self) -> Result<()> {
        self.handshake.validate()?;
        self.transport.validate(&self.handshake)?;
        Ok(())
    }

    /// A fresh coordinator for one handshake under this configuration.
    pub fn coordinator(&self, role: Role) -> Result<HandshakeCoordinator> {
        Ok(HandshakeCoordinator::new(self.handshake.clone(), role)?)
    }

    /// Key the configured AEAD with a handshake-derived key.
    pub fn transport(&self, key: &DerivedKey) -> Result<AeadTransport> {
        Ok(AeadTransport::new(key, self.transport.aead)?)
    }
}

/// Configuration source priority (lowest to highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigSource {
    Default = 0,
    Global = 1,
    Project = 2,
    Environment = 3,
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let project_path = project_dir.map(project_config_path);
    load_config_from(
        global_config_path().as_deref(),
        project_path.as_deref(),
        |key| std::env::var(key).ok(),
    )
}

/// Load configuration from explicit file paths and an environment lookup.
///
/// Missing files are skipped; unreadable or unparsable ones are errors.
pub fn load_config_from<F>(global: Option<&Path>, project: Option<&Path>, env: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut merged = serde_json::to_value(Config::default())?;

    for (source, path) in [
        (ConfigSource::Global, global),
        (ConfigSource::Project, project),
    ] {
        let Some(path) = path else { continue };
        if path.exists() {
            let overlay = load_config_file(path)?;
            tracing::debug!(?source, path = %path.display(), "merging config file");
            merge_values(&mut merged, overlay);
        }
    }

    let mut config: Config = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))?;
    apply_env_overrides(&mut config, env)?;
    config.validate()?;
    Ok(config)
}

/// Path of the project-level settings file inside `dir`.
pub fn project_config_path(dir: &Path) -> PathBuf {
    dir.join(".keyweave").join("settings.json")
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".keyweave").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/keyweave/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
            .map(|p| p.join("keyweave").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_config_file(path: &Path) -> Result<Value> {
    let shown = path.display();
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {shown}: {e}"))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {shown}: {e}"))
    })
}

/// Recursively overlay `overlay` onto `base`. Objects merge per key; any
/// other value replaces what was there.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_values(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn apply_env_overrides<F>(config: &mut Config, env: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = env("KEYWEAVE_CURVE") {
        config.handshake.curve = parse_enum("KEYWEAVE_CURVE", &val)?;
    }
    if let Some(val) = env("KEYWEAVE_HASH") {
        config.handshake.hash = parse_enum("KEYWEAVE_HASH", &val)?;
    }
    if let Some(val) = env("KEYWEAVE_KEY_LENGTH") {
        config.handshake.key_length = val
            .parse()
            .map_err(|e| Error::Config(format!("KEYWEAVE_KEY_LENGTH={val}: {e}")))?;
    }
    if let Some(val) = env("KEYWEAVE_SALT") {
        config.handshake.salt = Some(val);
    }
    if let Some(val) = env("KEYWEAVE_AEAD") {
        config.transport.aead = parse_enum("KEYWEAVE_AEAD", &val)?;
    }
    if let Some(val) = env("KEYWEAVE_LOG_LEVEL") {
        config.log.level = val;
    }
    if let Some(val) = env("KEYWEAVE_LOG_JSON") {
        config.log.json = parse_flag("KEYWEAVE_LOG_JSON", &val)?;
    }
    Ok(())
}

/// Parse an env value with the same names the JSON files use.
fn parse_enum<T: DeserializeOwned>(var: &str, val: &str) -> Result<T> {
    serde_json::from_value(Value::String(val.to_lowercase()))
        .map_err(|e| Error::Config(format!("{var}={val}: {e}")))
}

fn parse_flag(var: &str, val: &str) -> Result<bool> {
    match val.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(Error::Config(format!("{var}={val}: expected a boolean"))),
    }
}
