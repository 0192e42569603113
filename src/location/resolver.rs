//! Location service: orchestrates cache, provider chain, retries and device fallback.
//!
//! Current flow:  Cache → provider chain (single pass) → error
//! Retry flow:    Cache → provider chain × N with back-off → device fix → error
//!
//! Nothing here substitutes a fixed location on failure; callers render the error.

use super::cache::LocationCache;
use super::chain::{ProviderChain, ProviderSlot};
use super::device::{DeviceLocator, GpsdSource, NoPositionSource, PositionOptions, PositionSource};
use super::geocode::ReverseGeocoder;
use super::providers::Provider;
use super::retry::{RetryController, DEFAULT_MAX_ATTEMPTS};
use super::types::{
    DeviceLocationError, LocationError, LocationSource, ResolvedLocation, DEFAULT_TIMEZONE, UNKNOWN,
};
use super::validate;
use crate::config::{ConfigError, ServiceConfig};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum offset per axis applied by [`LocationService::get_user_location`] (about 250 m).
pub const JITTER_DEGREES: f64 = 0.0025;

pub struct LocationService {
    chain: ProviderChain,
    geocoder: ReverseGeocoder,
    retry: RetryController,
    device: Option<DeviceLocator>,
    cache: LocationCache,
    max_attempts: u32,
}

impl LocationService {
    pub fn new(
        chain: ProviderChain,
        geocoder: ReverseGeocoder,
        retry: RetryController,
        device: Option<DeviceLocator>,
        cache: LocationCache,
    ) -> Self {
        Self {
            chain,
            geocoder,
            retry,
            device,
            cache,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Wire up the public providers, geocoder and gpsd from configuration.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()?;
        let geocoder = ReverseGeocoder::new(
            client.clone(),
            config.geocoder.url.clone(),
            config.geocoder_timeout(),
        );

        let p = &config.providers;
        let slots = vec![
            ProviderSlot::new(
                Provider::IpApiCo { url: p.ipapi_url.clone() },
                config.primary_timeout(),
            ),
            ProviderSlot::new(
                Provider::Ipify {
                    ip_url: p.ipify_url.clone(),
                    lookup_base: p.ipapi_lookup_base.clone(),
                },
                config.provider_timeout(),
            ),
            ProviderSlot::new(
                Provider::FreeGeoIp { url: p.freegeoip_url.clone() },
                config.provider_timeout(),
            ),
            ProviderSlot::new(
                Provider::IpInfo { url: p.ipinfo_url.clone() },
                config.provider_timeout(),
            ),
        ];
        let chain = ProviderChain::new(client, slots, geocoder.clone());

        let device = config.device.enabled.then(|| {
            let source: Arc<dyn PositionSource> = if config.device.gpsd_addr.trim().is_empty() {
                Arc::new(NoPositionSource)
            } else {
                Arc::new(GpsdSource::new(config.device.gpsd_addr.clone()))
            };
            let options = PositionOptions {
                timeout: Duration::from_secs(config.device.timeout_secs),
                enable_high_accuracy: false,
                maximum_age: Duration::from_secs(config.device.maximum_age_secs),
            };
            DeviceLocator::new(source, options, geocoder.clone())
        });

        let service = Self::new(
            chain,
            geocoder,
            RetryController::new(config.retry_base_delay()),
            device,
            LocationCache::new(config.cache_ttl()),
        );
        Ok(service.with_max_attempts(config.retry.max_attempts))
    }

    /// Default attempt count for [`Self::get_location_with_retry`] callers.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn device_fallback_enabled(&self) -> bool {
        self.device.is_some()
    }

    /// Single pass over the provider chain, no retries and no device fallback.
    pub async fn get_current_location(&self) -> Result<ResolvedLocation, LocationError> {
        if let Some(loc) = self.cached() {
            return Ok(loc);
        }

        let loc = self.chain.resolve().await?;
        self.cache.put(&loc);
        Ok(loc)
    }

    /// The resilient entry point: retries the chain, then asks the device.
    pub async fn get_location_with_retry(
        &self,
        max_attempts: u32,
    ) -> Result<ResolvedLocation, LocationError> {
        self.locate(max_attempts).await.map(|(loc, _)| loc)
    }

    /// [`Self::get_location_with_retry`], also reporting where the answer came from.
    pub async fn locate(
        &self,
        max_attempts: u32,
    ) -> Result<(ResolvedLocation, LocationSource), LocationError> {
        self.locate_until(max_attempts, std::future::pending()).await
    }

    /// [`Self::locate`], abandoned with `Cancelled` as soon as `cancel`
    /// completes. In-flight provider, geocoder and device requests are dropped.
    pub async fn locate_until<C>(
        &self,
        max_attempts: u32,
        cancel: C,
    ) -> Result<(ResolvedLocation, LocationSource), LocationError>
    where
        C: Future<Output = ()>,
    {
        if let Some(loc) = self.cached() {
            return Ok((loc, LocationSource::Cache));
        }

        tokio::pin!(cancel);
        let network = tokio::select! {
            biased;
            _ = &mut cancel => {
                debug!("Location resolution cancelled");
                return Err(LocationError::Cancelled);
            }
            result = self.retry.resolve_with_retry(&self.chain, max_attempts) => result,
        };

        let retry_err = match network {
            Ok(loc) => {
                self.cache.put(&loc);
                return Ok((loc, LocationSource::Network));
            }
            Err(e) => e,
        };

        let Some(device) = &self.device else {
            return Err(retry_err.into());
        };

        info!(attempts = retry_err.attempts, "Network resolution exhausted, trying device positioning");
        match device.resolve_via_device_until(cancel).await {
            Ok(loc) => {
                self.cache.put(&loc);
                Ok((loc, LocationSource::Device))
            }
            Err(DeviceLocationError::Cancelled) => Err(LocationError::Cancelled),
            Err(device_err) => Err(LocationError::Unresolved {
                retry: retry_err,
                device: device_err,
            }),
        }
    }

    /// Demo stand-in for a customer address: the current location nudged by up
    /// to [`JITTER_DEGREES`] per axis, with a fresh address for the new point.
    ///
    /// Not cached. Use [`Self::user_location_at`] when a real coordinate is known.
    pub async fn get_user_location(&self) -> Result<ResolvedLocation, LocationError> {
        let base = self.get_current_location().await?;

        let (lat, lon) = {
            let mut rng = rand::thread_rng();
            (
                jitter(base.latitude, rng.gen_range(-JITTER_DEGREES..=JITTER_DEGREES), 90.0),
                jitter(base.longitude, rng.gen_range(-JITTER_DEGREES..=JITTER_DEGREES), 180.0),
            )
        };
        debug!(lat, lon, "Simulated user location");

        let address = self.geocoder.reverse_geocode(lat, lon).await;
        Ok(base.relocated(lat, lon, address))
    }

    /// A location for a user-supplied coordinate. Provenance fields come from
    /// the cached network location when one is fresh, else they are unknown.
    pub async fn user_location_at(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<ResolvedLocation, LocationError> {
        if !validate::is_valid_coordinates(latitude, longitude) {
            warn!(lat = latitude, lon = longitude, "Rejected user coordinates");
            return Err(LocationError::InvalidCoordinates(latitude, longitude));
        }

        let address = self.geocoder.reverse_geocode(latitude, longitude).await;
        Ok(match self.cache.get() {
            Some(base) => base.relocated(latitude, longitude, address),
            None => ResolvedLocation {
                latitude,
                longitude,
                address,
                source_ip: UNKNOWN.into(),
                country: UNKNOWN.into(),
                region: UNKNOWN.into(),
                city: UNKNOWN.into(),
                timezone: DEFAULT_TIMEZONE.into(),
                isp: None,
            },
        })
    }

    /// Formatted address for any coordinate. Never fails.
    pub async fn get_detailed_address(&self, latitude: f64, longitude: f64) -> String {
        self.geocoder.reverse_geocode(latitude, longitude).await
    }

    pub fn get_cached_location(&self) -> Option<ResolvedLocation> {
        self.cache.get()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        debug!("Location cache cleared");
    }

    fn cached(&self) -> Option<ResolvedLocation> {
        let hit = self.cache.get();
        debug!(hit = hit.is_some(), "Location cache lookup");
        hit
    }
}

fn jitter(value: f64, offset: f64, limit: f64) -> f64 {
    (value + offset).clamp(-limit, limit)
}
