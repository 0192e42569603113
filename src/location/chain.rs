//! Ordered provider fallback: first validated candidate wins and gets geocoded.

use super::geocode::ReverseGeocoder;
use super::providers::Provider;
use super::types::{ChainExhaustedError, ProviderError, ResolvedLocation};
use super::validate;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A provider together with its watchdog timeout.
#[derive(Debug, Clone)]
pub struct ProviderSlot {
    pub provider: Provider,
    pub timeout: Duration,
}

impl ProviderSlot {
    pub fn new(provider: Provider, timeout: Duration) -> Self {
        Self { provider, timeout }
    }
}

pub struct ProviderChain {
    client: reqwest::Client,
    slots: Vec<ProviderSlot>,
    geocoder: ReverseGeocoder,
}

impl ProviderChain {
    pub fn new(client: reqwest::Client, slots: Vec<ProviderSlot>, geocoder: ReverseGeocoder) -> Self {
        Self {
            client,
            slots,
            geocoder,
        }
    }

    pub fn providers(&self) -> impl Iterator<Item = &Provider> {
        self.slots.iter().map(|s| &s.provider)
    }

    /// One pass over the providers, strictly in order.
    ///
    /// A provider that errors, times out, answers without coordinates, or
    /// answers with coordinates that fail validation is skipped.
    pub async fn resolve(&self) -> Result<ResolvedLocation, ChainExhaustedError> {
        let mut failures = Vec::with_capacity(self.slots.len());

        for slot in &self.slots {
            let provider = slot.provider.name();
            debug!(provider, timeout = ?slot.timeout, "Trying provider");

            let outcome = tokio::time::timeout(slot.timeout, slot.provider.attempt(&self.client))
                .await
                .unwrap_or_else(|_| {
                    Err(ProviderError::Timeout {
                        provider,
                        after: slot.timeout,
                    })
                });

            match outcome {
                Ok(Some(candidate)) if validate::is_valid(&candidate) => {
                    let address = self
                        .geocoder
                        .reverse_geocode(candidate.latitude, candidate.longitude)
                        .await;
                    info!(
                        provider,
                        lat = candidate.latitude,
                        lon = candidate.longitude,
                        %address,
                        "Location resolved"
                    );
                    return Ok(ResolvedLocation { address, ..candidate });
                }
                Ok(Some(candidate)) => {
                    warn!(
                        provider,
                        lat = candidate.latitude,
                        lon = candidate.longitude,
                        "Provider returned invalid coordinates"
                    );
                    failures.push(format!(
                        "{provider}: invalid coordinates {}, {}",
                        candidate.latitude, candidate.longitude
                    ));
                }
                Ok(None) => {
                    warn!(provider, "Provider returned no coordinates");
                    failures.push(format!("{provider}: no coordinates"));
                }
                Err(e) => {
                    warn!(provider, error = %e, "Provider failed");
                    failures.push(e.to_string());
                }
            }
        }

        if failures.is_empty() {
            failures.push("no providers configured".into());
        }
        warn!(attempted = self.slots.len(), "All providers failed");
        Err(ChainExhaustedError { failures })
    }
}
