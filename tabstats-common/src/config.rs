//! Configuration loading and credential resolution
//!
//! Configuration comes from a single TOML file. A missing file is not an
//! error: the built-in defaults apply and a warning is logged. API keys are
//! resolved with environment variables taking priority over the TOML file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::{Error, Result};

/// Environment variable overriding the profile service key
pub const PROFILE_KEY_ENV: &str = "TABSTATS_PROFILE_API_KEY";
/// Environment variable overriding the report service key
pub const REPORT_KEY_ENV: &str = "TABSTATS_REPORT_API_KEY";

/// Top-level TOML configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Profile service API key (optional, ENV wins)
    #[serde(default)]
    pub profile_api_key: Option<String>,

    /// Report service API key (optional, ENV wins)
    #[serde(default)]
    pub report_api_key: Option<String>,

    /// Master switch for enrichment
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub enrichment: EnrichmentSettings,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            profile_api_key: None,
            report_api_key: None,
            enabled: default_enabled(),
            logging: LoggingConfig::default(),
            enrichment: EnrichmentSettings::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Tuning knobs for the enrichment pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentSettings {
    /// Size of the fetch worker pool
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Cache size above which the eviction sweep runs
    #[serde(default = "default_cache_ceiling")]
    pub cache_ceiling: usize,

    /// Ticks an identity must be observed before it counts as durable
    #[serde(default = "default_durable_after_ticks")]
    pub durable_after_ticks: u32,

    /// Retry budget per fetch chain
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_profile_base_url")]
    pub profile_base_url: String,

    #[serde(default = "default_report_base_url")]
    pub report_base_url: String,

    /// Connect and request timeout for remote calls
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Optional client-side cap on profile requests per second
    #[serde(default)]
    pub requests_per_second: Option<u32>,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            cache_ceiling: default_cache_ceiling(),
            durable_after_ticks: default_durable_after_ticks(),
            max_attempts: default_max_attempts(),
            profile_base_url: default_profile_base_url(),
            report_base_url: default_report_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
            requests_per_second: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_worker_threads() -> usize {
    16
}

fn default_cache_ceiling() -> usize {
    500
}

fn default_durable_after_ticks() -> u32 {
    100
}

fn default_max_attempts() -> u32 {
    8
}

fn default_profile_base_url() -> String {
    "https://api.hypixel.net/v2".to_string()
}

fn default_report_base_url() -> String {
    "https://urchin.ws".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

/// Default config file location: `<config dir>/tabstats/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tabstats").join("config.toml"))
}

/// Load TOML configuration.
///
/// A missing file yields defaults; an unreadable or malformed file is an error.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "Config file not found, using built-in defaults"
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))?;

    info!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Resolve an API key: environment first, then TOML.
///
/// Returns an empty string when neither source holds a usable key; the
/// clients treat that as "no credential" rather than failing startup.
pub fn resolve_api_key(env_var: &str, toml_value: Option<&str>) -> String {
    let env_key = std::env::var(env_var).ok().filter(|k| is_valid_key(k));
    let toml_key = toml_value.filter(|k| is_valid_key(k));

    if env_key.is_some() && toml_key.is_some() {
        warn!(
            env_var,
            "API key found in both environment and TOML config. Using environment (highest priority)."
        );
    }

    if let Some(key) = env_key {
        info!(env_var, "API key loaded from environment variable");
        return key.trim().to_string();
    }

    if let Some(key) = toml_key {
        info!(env_var, "API key loaded from TOML config");
        return key.trim().to_string();
    }

    warn!(env_var, "API key not configured");
    String::new()
}

/// A single mutable credential, read fresh on every remote call.
///
/// Clones share the same underlying value, so rotating the key through one
/// handle is visible to every client holding another.
#[derive(Debug, Clone, Default)]
pub struct SharedCredential {
    inner: Arc<RwLock<String>>,
}

impl SharedCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(value.into())),
        }
    }

    /// Current value, trimmed
    pub fn get(&self) -> String {
        match self.inner.read() {
            Ok(guard) => guard.trim().to_string(),
            Err(poisoned) => poisoned.into_inner().trim().to_string(),
        }
    }

    /// Replace the value; returns true when it actually changed
    pub fn set(&self, value: impl Into<String>) -> bool {
        let value = value.into();
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.trim() == value.trim() {
            return false;
        }
        *guard = value;
        true
    }

    pub fn is_configured(&self) -> bool {
        is_valid_key(&self.get())
    }
}
