//! # Geographic Utilities
//!
//! Coordinate validation and great-circle distance for GPS track processing.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`validate_coordinate`] | Range check for a latitude/longitude pair |
//! | [`haversine_distance`] | Great-circle distance between two GPS points |
//!
//! ## Example
//!
//! ```rust
//! use track_merge::{GpsPoint, geo_utils};
//!
//! let a = GpsPoint::new(37.7000, -122.1000);
//! let b = GpsPoint::new(37.7001, -122.1002);
//!
//! let meters = geo_utils::haversine_distance(&a, &b);
//! assert!(meters > 10.0 && meters < 30.0);
//!
//! assert!(geo_utils::validate_coordinate(10.0, 100.0));
//! assert!(!geo_utils::validate_coordinate(10.0, 200.0));
//! ```
//!
//! ## Haversine Formula
//!
//! Distances are computed on a sphere of radius 6,371,000 m. The same
//! implementation serves kilometer-scale pause detection and meter-scale
//! point thinning.

use log::warn;

use crate::GpsPoint;

/// Mean Earth radius used by [`haversine_distance`].
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

pub const MIN_LATITUDE: f64 = -90.0;
pub const MAX_LATITUDE: f64 = 90.0;
pub const MIN_LONGITUDE: f64 = -180.0;
pub const MAX_LONGITUDE: f64 = 180.0;

// =============================================================================
// Validation
// =============================================================================

/// Check that a latitude/longitude pair is usable.
///
/// Returns `false` and logs a warning when either value is non-finite or
/// outside `[-90, 90]` / `[-180, 180]`.
pub fn validate_coordinate(latitude: f64, longitude: f64) -> bool {
    if GpsPoint::new(latitude, longitude).is_valid() {
        return true;
    }

    warn!("Invalid coordinate found: [{}, {}]", latitude, longitude);
    false
}

// =============================================================================
// Distance Functions
// =============================================================================

/// Calculate the great-circle distance between two GPS points using the Haversine formula.
///
/// Returns the distance in meters. Symmetric, and zero for identical points.
///
/// # Example
///
/// ```rust
/// use track_merge::{GpsPoint, geo_utils};
///
/// let london = GpsPoint::new(51.5074, -0.1278);
/// let paris = GpsPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 1000.0);
/// ```
#[inline]
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let delta_lat = (p2.latitude - p1.latitude).to_radians();
    let delta_lng = (p2.longitude - p1.longitude).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();
    let a = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    // Clamp guards against a > 1 from rounding on near-antipodal points
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_METERS * c
}

// =============================================================================
// Unit Tests
// =============================================================================
