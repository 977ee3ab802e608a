//! Shared configuration for ember embedders.
//!
//! TOML profiles, credential resolution for the device cloud-sync blob
//! (keyring + env + plaintext), and translation into
//! `ember_api::TransportConfig` / `ember_core::SessionDefaults`. The
//! session cache (connected-set + manual-disconnect flag) lives in
//! [`session_file::FileSessionStore`].

pub mod session_file;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ember_api::{CloudConfig, DataToggles, TransportConfig};
use ember_core::SessionDefaults;

pub use session_file::FileSessionStore;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no cloud credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named deployment profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// Device HTTP port (real firmware serves on 80).
    #[serde(default = "default_port")]
    pub device_port: u16,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Answer the reserved dummy address from the in-process simulator.
    #[serde(default)]
    pub simulator: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            device_port: default_port(),
            timeout_secs: default_timeout(),
            simulator: false,
        }
    }
}

fn default_port() -> u16 {
    80
}
fn default_timeout() -> u64 {
    4
}

/// A named deployment profile. Every field is optional — unset values
/// fall back to [`Defaults`] or the built-in widget defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Override the device HTTP port.
    pub device_port: Option<u16>,

    /// Override the request timeout.
    pub timeout_secs: Option<u64>,

    /// Override the simulator toggle.
    pub simulator: Option<bool>,

    // ── Widget cadence overrides ─────────────────────────────────────
    pub moisture_refresh_secs: Option<u64>,
    pub climate_refresh_secs: Option<u64>,
    pub light_refresh_secs: Option<u64>,
    pub check_interval_mins: Option<u64>,
    pub pump_duration_secs: Option<u64>,

    // ── Device cloud sync ────────────────────────────────────────────
    /// Endpoint devices push readings to directly.
    pub cloud_url: Option<String>,

    /// API key (plaintext — prefer keyring or env).
    pub cloud_api_key: Option<String>,

    /// Environment variable name containing the API key.
    pub cloud_api_key_env: Option<String>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "mvoss", "ember").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("ember");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from file + environment (`EMBER_`-prefixed).
pub fn load_config() -> Result<Config, ConfigError> {
    let path = config_path();

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("EMBER_").split("_"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(&path, toml_str)?;
    Ok(())
}

// ── Profile resolution ──────────────────────────────────────────────

/// Look up the active profile: an explicit name, the configured
/// default, or an empty profile when neither exists.
pub fn active_profile<'a>(config: &'a Config, name: Option<&'a str>) -> (&'a str, Profile) {
    let name = name
        .or(config.default_profile.as_deref())
        .unwrap_or("default");
    let profile = config.profiles.get(name).cloned().unwrap_or_default();
    (name, profile)
}

/// Resolve the cloud-sync API key from the credential chain.
pub fn resolve_cloud_key(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Profile's cloud_api_key_env → env var lookup
    if let Some(ref env_name) = profile.cloud_api_key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new("ember", &format!("{profile_name}/cloud-api-key")) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref key) = profile.cloud_api_key {
        return Ok(SecretString::from(key.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Build the cloud-sync blob pushed to a device with
/// `set-supabase-config`.
pub fn cloud_config_for_device(
    profile: &Profile,
    profile_name: &str,
) -> Result<CloudConfig, ConfigError> {
    let url = profile
        .cloud_url
        .clone()
        .ok_or_else(|| ConfigError::Validation {
            field: "cloud_url".into(),
            reason: "not set".into(),
        })?;
    let key = resolve_cloud_key(profile, profile_name)?;

    Ok(CloudConfig {
        supabase_url: url,
        supabase_api_key: key.expose_secret().to_owned(),
        data_config: DataToggles::default(),
    })
}

/// Build an `ember_api::TransportConfig` from a profile + defaults.
pub fn transport_config(profile: &Profile, defaults: &Defaults) -> TransportConfig {
    TransportConfig {
        timeout: Duration::from_secs(profile.timeout_secs.unwrap_or(defaults.timeout_secs).max(1)),
        port: profile.device_port.unwrap_or(defaults.device_port),
        ..TransportConfig::default()
    }
}

/// Build `ember_core::SessionDefaults` from a profile's overrides.
pub fn session_defaults(profile: &Profile) -> SessionDefaults {
    let base = SessionDefaults::default();
    SessionDefaults {
        moisture_refresh_secs: profile.moisture_refresh_secs.unwrap_or(base.moisture_refresh_secs),
        climate_refresh_secs: profile.climate_refresh_secs.unwrap_or(base.climate_refresh_secs),
        light_refresh_secs: profile.light_refresh_secs.unwrap_or(base.light_refresh_secs),
        check_interval_mins: profile.check_interval_mins.unwrap_or(base.check_interval_mins),
        pump_duration_secs: profile.pump_duration_secs.unwrap_or(base.pump_duration_secs),
        ..base
    }
}

/// Whether the simulator should answer the reserved dummy address.
pub fn simulator_enabled(profile: &Profile, defaults: &Defaults) -> bool {
    profile.simulator.unwrap_or(defaults.simulator)
}
