//! Delivery Locator: resolves a network location through a chain of IP
//! geolocation providers, with reverse geocoding, retries, a device fallback
//! and a short-lived cache.

pub mod config;
pub mod location;
pub mod server;
