//! # Track Simplification
//!
//! Point-density reduction for map rendering. Two passes, both order
//! preserving:
//!
//! 1. **Distance thinning** keeps the first point, drops every interior point
//!    closer than `min_distance_m` to the last kept point, and always keeps
//!    the final point.
//! 2. **Hard cap** samples every Nth point when the thinned track still has
//!    more than `max_points`, re-appending the true last point if sampling
//!    skipped it.
//!
//! Retained points are tracked by index, so a closed loop whose end equals
//! its start still keeps both endpoints.

use crate::geo_utils::haversine_distance;
use crate::GpsPoint;

/// Tracks shorter than this are returned untouched.
pub const MIN_POINTS_FOR_REDUCTION: usize = 3;

/// Reduce the number of points in a track.
///
/// No-op when the track has fewer than [`MIN_POINTS_FOR_REDUCTION`] points, or
/// when both passes are disabled (`min_distance_m <= 0` and `max_points == 0`).
/// A `max_points` of 1 is treated as 2 so both endpoints survive.
///
/// # Example
///
/// ```rust
/// use track_merge::{GpsPoint, simplify::reduce_points};
///
/// let track: Vec<GpsPoint> = (0..100)
///     .map(|i| GpsPoint::new(45.0 + i as f64 * 0.00001, 7.0))
///     .collect();
///
/// let reduced = reduce_points(&track, 10.0, 0);
/// assert!(reduced.len() < track.len());
/// assert_eq!(reduced.first(), track.first());
/// assert_eq!(reduced.last(), track.last());
/// ```
pub fn reduce_points(points: &[GpsPoint], min_distance_m: f64, max_points: usize) -> Vec<GpsPoint> {
    if min_distance_m <= 0.0 && max_points == 0 {
        return points.to_vec();
    }

    if points.len() < MIN_POINTS_FOR_REDUCTION {
        return points.to_vec();
    }

    let thinned = thin_by_distance(points, min_distance_m);

    if max_points == 0 || thinned.len() <= max_points {
        return thinned;
    }

    cap_points(&thinned, max_points.max(2))
}

fn thin_by_distance(points: &[GpsPoint], min_distance_m: f64) -> Vec<GpsPoint> {
    let last_index = points.len() - 1;
    let mut kept = vec![points[0]];

    for point in &points[1..last_index] {
        let anchor = kept[kept.len() - 1];
        if haversine_distance(&anchor, point) < min_distance_m {
            continue;
        }
        kept.push(*point);
    }

    kept.push(points[last_index]);
    kept
}

fn cap_points(points: &[GpsPoint], max_points: usize) -> Vec<GpsPoint> {
    let last_index = points.len() - 1;
    let stride = last_index.div_ceil(max_points - 1);

    let mut capped: Vec<GpsPoint> = points.iter().step_by(stride).copied().collect();
    if last_index % stride != 0 {
        capped.push(points[last_index]);
    }

    capped.truncate(max_points);
    capped
}
