//! Structural validation of candidate locations.
//!
//! Address quality is not a criterion: a candidate with only coordinates passes.

use super::types::ResolvedLocation;

pub fn is_valid(loc: &ResolvedLocation) -> bool {
    is_valid_coordinates(loc.latitude, loc.longitude)
}

/// Rejects non-finite values, out-of-range values, and the (0, 0) "not found" sentinel.
pub fn is_valid_coordinates(latitude: f64, longitude: f64) -> bool {
    if !latitude.is_finite() || !longitude.is_finite() {
        return false;
    }
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return false;
    }
    !(latitude == 0.0 && longitude == 0.0)
}
