//! Core types for the location subsystem.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Stamped into `source_ip` and `isp` when the fix came from device positioning.
pub const DEVICE_SOURCE: &str = "Browser GPS";

/// Placeholder for country/region/city (and some IPs) a provider omitted.
pub const UNKNOWN: &str = "Unknown";

pub const DEFAULT_TIMEZONE: &str = "UTC";

/// A fully resolved location: coordinates, display address and network provenance.
///
/// Never mutated after construction; a newer resolution supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedLocation {
    pub latitude: f64,
    pub longitude: f64,
    /// Normalized address, or `"lat, lon"` at 4 decimals when nothing better was found.
    pub address: String,
    /// IP the location was derived from, or [`DEVICE_SOURCE`].
    pub source_ip: String,
    pub country: String,
    pub region: String,
    pub city: String,
    /// IANA timezone name.
    pub timezone: String,
    #[serde(default)]
    pub isp: Option<String>,
}

impl ResolvedLocation {
    /// A copy moved to new coordinates with a freshly resolved address.
    pub fn relocated(&self, latitude: f64, longitude: f64, address: String) -> Self {
        Self {
            latitude,
            longitude,
            address,
            ..self.clone()
        }
    }

    pub fn display_line(&self) -> String {
        format!(
            "\u{1F4CD} {}\n  \u{1F310} {} ({})\n  \u{1F552} {}\n  \u{1F4D0} {}",
            self.address,
            self.source_ip,
            self.isp.as_deref().unwrap_or(UNKNOWN),
            self.timezone,
            coordinate_label(self.latitude, self.longitude),
        )
    }
}

/// The fixed 4-decimal coordinate string used whenever no address is available.
pub fn coordinate_label(latitude: f64, longitude: f64) -> String {
    format!("{:.4}, {:.4}", latitude, longitude)
}

// ─── Errors ──────────────────────────────────────────────────────

/// A single provider failed; the chain recovers by moving to the next one.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider}: HTTP status {status}")]
    Status { provider: &'static str, status: u16 },

    #[error("{provider}: request failed: {source}")]
    Http {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider}: no response within {after:?}")]
    Timeout {
        provider: &'static str,
        after: Duration,
    },

    #[error("{provider}: invalid response: {message}")]
    Parse {
        provider: &'static str,
        message: String,
    },
}

impl ProviderError {
    pub fn provider(&self) -> &'static str {
        match self {
            Self::Status { provider, .. }
            | Self::Http { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::Parse { provider, .. } => provider,
        }
    }
}

/// Every provider in one pass failed or produced nothing usable.
#[derive(Debug, Clone, Error)]
#[error("all providers failed: {}", .failures.join("; "))]
pub struct ChainExhaustedError {
    /// One line per provider, in chain order.
    pub failures: Vec<String>,
}

/// Every retry attempt at the provider chain failed.
#[derive(Debug, Clone, Error)]
#[error("location unavailable after {attempts} attempt(s): {last_error}")]
pub struct RetryExhaustedError {
    pub attempts: u32,
    pub last_error: String,
}

/// Device positioning failed. Terminal: no hardcoded location is substituted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceLocationError {
    #[error("device positioning not supported: {0}")]
    Unsupported(String),

    #[error("device positioning permission denied")]
    PermissionDenied,

    #[error("device positioning timed out after {0:?}")]
    Timeout(Duration),

    #[error("device position unavailable: {0}")]
    Unavailable(String),

    #[error("device positioning cancelled")]
    Cancelled,
}

/// Errors surfaced by [`super::LocationService`].
#[derive(Debug, Error)]
pub enum LocationError {
    #[error(transparent)]
    ChainExhausted(#[from] ChainExhaustedError),

    #[error(transparent)]
    RetryExhausted(#[from] RetryExhaustedError),

    #[error(transparent)]
    Device(#[from] DeviceLocationError),

    /// Network resolution and the device fallback both failed.
    #[error("{retry}; device fallback: {device}")]
    Unresolved {
        retry: RetryExhaustedError,
        #[source]
        device: DeviceLocationError,
    },

    #[error("invalid coordinates: {0}, {1}")]
    InvalidCoordinates(f64, f64),

    #[error("location resolution cancelled")]
    Cancelled,
}

impl LocationError {
    /// Whether a caller should offer the user a retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidCoordinates(..) | Self::Device(DeviceLocationError::PermissionDenied)
        )
    }
}

/// Where a resolution came from, for logs and the CLI banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationSource {
    Cache,
    Network,
    Device,
}

impl fmt::Display for LocationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cache => write!(f, "Cache"),
            Self::Network => write!(f, "IP"),
            Self::Device => write!(f, "Device"),
        }
    }
}
