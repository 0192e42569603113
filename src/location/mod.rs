//! Network location resolution for the delivery dashboard.
//!
//! IP geolocation through an ordered provider chain, reverse geocoding,
//! bounded retries, a device-positioning fallback and a short-lived cache.

pub mod cache;
pub mod chain;
pub mod device;
pub mod geocode;
pub mod providers;
pub mod resolver;
pub mod retry;
pub mod types;
pub mod validate;

pub use cache::LocationCache;
pub use chain::{ProviderChain, ProviderSlot};
pub use device::{DeviceLocator, GpsdSource, NoPositionSource, PositionOptions, PositionSource};
pub use geocode::{format_address, ReverseGeocoder};
pub use providers::Provider;
pub use resolver::LocationService;
pub use retry::RetryController;
pub use types::{
    DeviceLocationError, LocationError, LocationSource, ProviderError, ResolvedLocation,
};
