//! Service configuration.
//!
//! Loaded from `$LOCATOR_CONFIG` or `<config_dir>/delivery-locator/config.json`.
//! Every field has a default, so a partial file (or none at all) is valid.

use crate::location::device::DEFAULT_GPSD_ADDR;
use crate::location::geocode::DEFAULT_GEOCODER_URL;
use crate::location::providers::{
    FREEGEOIP_URL, IPAPI_LOOKUP_BASE, IPAPI_URL, IPIFY_URL, IPINFO_URL,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_ENV: &str = "LOCATOR_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("cannot build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub providers: ProviderConfig,
    pub geocoder: GeocoderConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub device: DeviceConfig,
    /// Sent with every request; Nominatim rejects anonymous clients.
    pub user_agent: String,
}

/// Endpoints and watchdogs for the IP geolocation chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub ipapi_url: String,
    pub ipify_url: String,
    pub ipapi_lookup_base: String,
    pub freegeoip_url: String,
    pub ipinfo_url: String,
    /// Watchdog for the first provider.
    pub primary_timeout_secs: u64,
    /// Watchdog for every other provider.
    pub provider_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    pub url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub enabled: bool,
    pub gpsd_addr: String,
    pub timeout_secs: u64,
    pub maximum_age_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            providers: ProviderConfig::default(),
            geocoder: GeocoderConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            device: DeviceConfig::default(),
            user_agent: format!("delivery-locator/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            ipapi_url: IPAPI_URL.into(),
            ipify_url: IPIFY_URL.into(),
            ipapi_lookup_base: IPAPI_LOOKUP_BASE.into(),
            freegeoip_url: FREEGEOIP_URL.into(),
            ipinfo_url: IPINFO_URL.into(),
            primary_timeout_secs: 5,
            provider_timeout_secs: 8,
        }
    }
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_GEOCODER_URL.into(),
            timeout_secs: 8,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            gpsd_addr: DEFAULT_GPSD_ADDR.into(),
            timeout_secs: 10,
            maximum_age_secs: 300,
        }
    }
}

impl ServiceConfig {
    /// Load from `explicit`, else `$LOCATOR_CONFIG`, else the default path.
    ///
    /// Only the default path may be absent; a named file must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let named = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        match named {
            Some(path) => Self::load_from(&path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ServiceConfig =
            serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("delivery-locator").join("config.json"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=10).contains(&self.retry.max_attempts) {
            return Err(ConfigError::Invalid(format!(
                "retry.max_attempts must be between 1 and 10, got {}",
                self.retry.max_attempts
            )));
        }

        for (name, secs) in [
            ("providers.primary_timeout_secs", self.providers.primary_timeout_secs),
            ("providers.provider_timeout_secs", self.providers.provider_timeout_secs),
            ("geocoder.timeout_secs", self.geocoder.timeout_secs),
            ("cache.ttl_secs", self.cache.ttl_secs),
            ("device.timeout_secs", self.device.timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }

        for (name, url) in [
            ("providers.ipapi_url", &self.providers.ipapi_url),
            ("providers.ipify_url", &self.providers.ipify_url),
            ("providers.ipapi_lookup_base", &self.providers.ipapi_lookup_base),
            ("providers.freegeoip_url", &self.providers.freegeoip_url),
            ("providers.ipinfo_url", &self.providers.ipinfo_url),
            ("geocoder.url", &self.geocoder.url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!("{name} is not an http(s) URL: {url:?}")));
            }
        }

        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid("user_agent must not be empty".into()));
        }

        Ok(())
    }

    pub fn primary_timeout(&self) -> Duration {
        Duration::from_secs(self.providers.primary_timeout_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.providers.provider_timeout_secs)
    }

    pub fn geocoder_timeout(&self) -> Duration {
        Duration::from_secs(self.geocoder.timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry.base_delay_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }
}
