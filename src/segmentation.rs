//! # Pause Segmentation
//!
//! Splits a recorded track wherever two consecutive points are farther apart
//! than a pause threshold. A gap that large means the device stopped
//! recording (auto-pause, lost fix) and the straight line across it would be
//! fiction on a map.
//!
//! Segments of a single point are emitted; the cleaning stage drops them.

use log::debug;

use crate::dataset::TrackFeature;
use crate::geo_utils::haversine_distance;
use crate::GpsPoint;

/// Default pause threshold in kilometers.
pub const DEFAULT_PAUSE_THRESHOLD_KM: f64 = 0.5;

/// Split a point sequence into gap-free runs.
///
/// A new run starts whenever the distance between consecutive points exceeds
/// `threshold_km`. Output order matches input order. Inputs with fewer than
/// two points yield no runs at all.
///
/// # Example
///
/// ```rust
/// use track_merge::{GpsPoint, segmentation::split_at_pauses};
///
/// let points = vec![
///     GpsPoint::new(37.7, -122.1),
///     GpsPoint::new(37.7001, -122.1002),
///     GpsPoint::new(38.0, -122.5),
/// ];
///
/// let runs = split_at_pauses(&points, 0.5);
/// assert_eq!(runs.len(), 2);
/// assert_eq!(runs[0].len(), 2);
/// assert_eq!(runs[1].len(), 1);
/// ```
pub fn split_at_pauses(points: &[GpsPoint], threshold_km: f64) -> Vec<Vec<GpsPoint>> {
    if points.len() < 2 {
        return Vec::new();
    }

    let threshold_m = threshold_km * 1000.0;
    let mut runs = Vec::new();
    let mut current = vec![points[0]];

    for pair in points.windows(2) {
        if haversine_distance(&pair[0], &pair[1]) > threshold_m {
            runs.push(std::mem::replace(&mut current, vec![pair[1]]));
            continue;
        }
        current.push(pair[1]);
    }

    runs.push(current);
    runs
}

/// Segment every feature of a collection at recording pauses.
///
/// Each output feature inherits its source feature's properties unchanged.
pub fn segment_features(features: &[TrackFeature], threshold_km: f64) -> Vec<TrackFeature> {
    let mut segmented = Vec::with_capacity(features.len());

    for feature in features {
        let runs = split_at_pauses(&feature.points, threshold_km);
        if runs.len() > 1 {
            debug!(
                "Split '{}' into {} segments at {} km pauses",
                feature.properties.name.as_deref().unwrap_or("<unnamed>"),
                runs.len(),
                threshold_km
            );
        }

        segmented.extend(runs.into_iter().map(|points| TrackFeature {
            points,
            properties: feature.properties.clone(),
        }));
    }

    segmented
}
