//! Bounded retries around the provider chain with linearly growing back-off.

use super::chain::ProviderChain;
use super::types::{ResolvedLocation, RetryExhaustedError};
use super::validate;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct RetryController {
    base_delay: Duration,
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY)
    }
}

impl RetryController {
    pub fn new(base_delay: Duration) -> Self {
        Self { base_delay }
    }

    /// Sleep before the attempt following `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    pub async fn resolve_with_retry(
        &self,
        chain: &ProviderChain,
        max_attempts: u32,
    ) -> Result<ResolvedLocation, RetryExhaustedError> {
        self.run(max_attempts, |_| chain.resolve()).await
    }

    /// Run `op` up to `max_attempts` times (at least once). A result that fails
    /// validation counts as a failed attempt, the same as an error.
    pub async fn run<F, Fut, E>(
        &self,
        max_attempts: u32,
        mut op: F,
    ) -> Result<ResolvedLocation, RetryExhaustedError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<ResolvedLocation, E>>,
        E: Display,
    {
        let max_attempts = max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match op(attempt).await {
                Ok(loc) if validate::is_valid(&loc) => {
                    if attempt > 1 {
                        info!(attempt, "Location resolved after retry");
                    }
                    return Ok(loc);
                }
                Ok(loc) => {
                    warn!(attempt, lat = loc.latitude, lon = loc.longitude, "Invalid location data");
                    last_error = format!("invalid coordinates {}, {}", loc.latitude, loc.longitude);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Resolution attempt failed");
                    last_error = e.to_string();
                }
            }

            if attempt < max_attempts {
                let delay = self.delay_after(attempt);
                info!(attempt, delay_ms = delay.as_millis() as u64, "Retrying location resolution");
                tokio::time::sleep(delay).await;
            }
        }

        warn!(attempts = max_attempts, "All retry attempts failed");
        Err(RetryExhaustedError {
            attempts: max_attempts,
            last_error,
        })
    }
}
