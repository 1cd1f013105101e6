//! # Track Dataset
//!
//! In-memory form of the GeoJSON document the pipeline persists:
//!
//! ```json
//! {"type": "FeatureCollection", "features": [
//!   {"type": "Feature",
//!    "geometry": {"type": "LineString", "coordinates": [[lon, lat], ...]},
//!    "properties": {"activity_id": 1, "name": "...", "date": "...", "distance": 0.0, "type": "Ride"}}
//! ]}
//! ```
//!
//! Points are held as [`GpsPoint`] (latitude first); the wire format is
//! GeoJSON order (longitude first). Coordinates that are not a numeric pair
//! are dropped while reading, so an old or hand-edited dataset still loads.

use std::fmt;

use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::config::PipelineConfig;
use crate::normalize::{normalize_category, normalize_date};
use crate::simplify::reduce_points;
use crate::GpsPoint;

/// Features with fewer points than this are not line tracks and are discarded.
pub const MIN_POINTS_PER_FEATURE: usize = 2;

// ============================================================================
// Properties
// ============================================================================

/// Source-assigned activity identifier.
///
/// Strava issues numeric ids; older datasets may carry them as strings.
/// Any other number (negative, fractional) is kept as written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActivityId {
    Numeric(u64),
    Text(String),
    Other(Number),
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityId::Numeric(id) => write!(f, "{}", id),
            ActivityId::Text(id) => f.write_str(id),
            ActivityId::Other(id) => write!(f, "{}", id),
        }
    }
}

impl From<u64> for ActivityId {
    fn from(id: u64) -> Self {
        ActivityId::Numeric(id)
    }
}

impl From<&str> for ActivityId {
    fn from(id: &str) -> Self {
        ActivityId::Text(id.to_string())
    }
}

/// Attributes of a track feature.
///
/// Unknown keys are carried through untouched in `extra`. Reading never
/// fails: a known key whose value has the wrong type is left unset and its
/// raw value kept in `extra`, so it is written back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct TrackProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<ActivityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Total activity distance in meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<Value> for TrackProperties {
    fn from(value: Value) -> Self {
        let Value::Object(mut extra) = value else {
            return Self::default();
        };

        Self {
            activity_id: take_typed(&mut extra, "activity_id"),
            name: take_typed(&mut extra, "name"),
            date: take_typed(&mut extra, "date"),
            distance: take_typed(&mut extra, "distance"),
            category: take_typed(&mut extra, "type"),
            extra,
        }
    }
}

/// Remove `key` from `map` if it parses as `T`; otherwise leave it in place.
fn take_typed<T: DeserializeOwned>(map: &mut Map<String, Value>, key: &str) -> Option<T> {
    let parsed = serde_json::from_value(map.get(key)?.clone());
    match parsed {
        Ok(typed) => {
            map.remove(key);
            Some(typed)
        }
        Err(e) => {
            debug!("Keeping property {:?} as raw value: {}", key, e);
            None
        }
    }
}

// ============================================================================
// Features
// ============================================================================

/// One line track plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "FeatureDocument", into = "FeatureDocument")]
pub struct TrackFeature {
    pub points: Vec<GpsPoint>,
    pub properties: TrackProperties,
}

/// GeoJSON position as found on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum Position {
    LonLat([f64; 2]),
    Malformed(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeometryDocument {
    #[serde(rename = "type", default = "line_string_type")]
    kind: String,
    #[serde(default)]
    coordinates: Option<Vec<Position>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FeatureDocument {
    #[serde(rename = "type", default = "feature_type")]
    kind: String,
    #[serde(default)]
    geometry: Option<GeometryDocument>,
    #[serde(default)]
    properties: TrackProperties,
}

fn line_string_type() -> String {
    "LineString".to_string()
}

fn feature_type() -> String {
    "Feature".to_string()
}

fn feature_collection_type() -> String {
    "FeatureCollection".to_string()
}

impl From<FeatureDocument> for TrackFeature {
    fn from(doc: FeatureDocument) -> Self {
        let positions = doc.geometry.and_then(|g| g.coordinates).unwrap_or_default();
        let total = positions.len();

        let points: Vec<GpsPoint> = positions
            .into_iter()
            .filter_map(|position| match position {
                Position::LonLat([lon, lat]) => Some(GpsPoint::new(lat, lon)),
                Position::Malformed(_) => None,
            })
            .collect();

        if points.len() < total {
            debug!(
                "Dropped {} malformed coordinates from '{}'",
                total - points.len(),
                doc.properties.name.as_deref().unwrap_or("<unnamed>")
            );
        }

        TrackFeature {
            points,
            properties: doc.properties,
        }
    }
}

impl From<TrackFeature> for FeatureDocument {
    fn from(feature: TrackFeature) -> Self {
        let coordinates = feature
            .points
            .iter()
            .map(|p| Position::LonLat([p.longitude, p.latitude]))
            .collect();

        FeatureDocument {
            kind: feature_type(),
            geometry: Some(GeometryDocument {
                kind: line_string_type(),
                coordinates: Some(coordinates),
            }),
            properties: feature.properties,
        }
    }
}

// ============================================================================
// Collection
// ============================================================================

/// The whole dataset: an unordered set of track features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type", default = "feature_collection_type")]
    kind: String,
    #[serde(default)]
    pub features: Vec<TrackFeature>,
}

impl Default for FeatureCollection {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl FeatureCollection {
    pub fn new(features: Vec<TrackFeature>) -> Self {
        Self {
            kind: feature_collection_type(),
            features,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

// ============================================================================
// Cleaning
// ============================================================================

/// Validate, thin and normalize one feature.
///
/// Returns `None` when fewer than [`MIN_POINTS_PER_FEATURE`] valid points remain.
pub fn clean_feature(feature: &TrackFeature, config: &PipelineConfig) -> Option<TrackFeature> {
    let valid: Vec<GpsPoint> = feature
        .points
        .iter()
        .copied()
        .filter(GpsPoint::is_valid)
        .collect();

    let points = reduce_points(
        &valid,
        config.min_point_distance_m,
        config.max_points_per_feature,
    );
    if points.len() < MIN_POINTS_PER_FEATURE {
        return None;
    }

    let mut properties = feature.properties.clone();
    properties.category = normalize_category(properties.category.as_deref());
    properties.date = normalize_date(properties.date.as_deref());

    Some(TrackFeature { points, properties })
}

/// Clean every feature, dropping the ones left without a usable line.
pub fn clean_features(features: &[TrackFeature], config: &PipelineConfig) -> FeatureCollection {
    let cleaned: Vec<TrackFeature> = features
        .iter()
        .filter_map(|f| clean_feature(f, config))
        .collect();

    if cleaned.len() < features.len() {
        debug!(
            "Cleaning discarded {} of {} features",
            features.len() - cleaned.len(),
            features.len()
        );
    }

    FeatureCollection::new(cleaned)
}
