//! Single-slot, in-memory cache of the last resolved location.
//!
//! TTL: 5 minutes by default. Expiry is checked lazily on read; an expired
//! entry is treated as absent but not evicted until the next `put` or `clear`.

use super::types::ResolvedLocation;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct CacheEntry {
    location: ResolvedLocation,
    resolved_at: DateTime<Utc>,
}

/// The location cache. One entry; each `put` replaces it.
#[derive(Debug)]
pub struct LocationCache {
    ttl: chrono::Duration,
    slot: Mutex<Option<CacheEntry>>,
}

impl Default for LocationCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl LocationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            slot: Mutex::new(None),
        }
    }

    // A panic while holding the lock cannot leave the Option half-written.
    fn slot(&self) -> MutexGuard<'_, Option<CacheEntry>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The cached location if it is younger than the TTL.
    pub fn get(&self) -> Option<ResolvedLocation> {
        self.get_at(Utc::now())
    }

    /// Lookup against an explicit clock.
    pub fn get_at(&self, now: DateTime<Utc>) -> Option<ResolvedLocation> {
        let slot = self.slot();
        let entry = slot.as_ref()?;
        if now - entry.resolved_at < self.ttl {
            Some(entry.location.clone())
        } else {
            None // expired
        }
    }

    /// Age of the stored entry, fresh or not.
    #[cfg(test)]
    fn age_at(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.slot().as_ref().map(|e| now - e.resolved_at)
    }

    pub fn put(&self, location: &ResolvedLocation) {
        self.put_at(location, Utc::now());
    }

    pub fn put_at(&self, location: &ResolvedLocation, resolved_at: DateTime<Utc>) {
        *self.slot() = Some(CacheEntry {
            location: location.clone(),
            resolved_at,
        });
    }

    pub fn clear(&self) {
        *self.slot() = None;
    }

    /// Whether any entry is stored, including an expired one.
    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.slot().is_none()
    }
}
