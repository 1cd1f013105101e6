//! Activities as delivered by a source, and their conversion into track features.
//!
//! A [`RawActivity`] is whatever the source handed over, every field
//! optional. [`Activity::validate`] turns it into a trusted record or a
//! [`RejectReason`]; [`convert_batch`] does that for a whole batch and
//! tallies the outcome instead of logging its way through failures.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use thiserror::Error;

use crate::dataset::{ActivityId, TrackFeature, TrackProperties};
use crate::geo_utils::validate_coordinate;
use crate::normalize::{normalize_category, normalize_date, parse_timestamp};
use crate::GpsPoint;

/// Activity record straight from the source, not yet trusted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawActivity {
    pub id: Option<ActivityId>,
    pub name: Option<String>,
    pub category: Option<String>,
    /// ISO-8601 start timestamp as reported by the source
    pub start_date: Option<String>,
    /// Total distance in meters
    pub distance: Option<f64>,
    /// Coordinate stream as `[latitude, longitude]` pairs
    pub latlng: Vec<[f64; 2]>,
}

impl RawActivity {
    /// Start instant, if the reported timestamp parses.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.start_date.as_deref().and_then(parse_timestamp)
    }

    /// Short label for log lines.
    pub fn label(&self) -> String {
        match (&self.id, &self.name) {
            (Some(id), Some(name)) => format!("{} ({})", id, name),
            (Some(id), None) => id.to_string(),
            (None, Some(name)) => name.clone(),
            (None, None) => "<anonymous>".to_string(),
        }
    }
}

/// Why an activity could not become a track feature.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("no coordinate stream")]
    NoCoordinates,
    #[error("all {dropped} coordinates out of range")]
    NoValidCoordinates { dropped: usize },
}

/// A validated activity: every point in range, metadata normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub id: Option<ActivityId>,
    pub name: Option<String>,
    pub category: Option<String>,
    pub start_date: Option<String>,
    pub distance: Option<f64>,
    pub points: Vec<GpsPoint>,
}

impl Activity {
    /// Validate a raw record, dropping out-of-range points.
    ///
    /// Rejected when the record has no points, or none survive validation.
    pub fn validate(raw: RawActivity) -> Result<Self, RejectReason> {
        if raw.latlng.is_empty() {
            return Err(RejectReason::NoCoordinates);
        }

        let total = raw.latlng.len();
        let points: Vec<GpsPoint> = raw
            .latlng
            .iter()
            .filter(|[lat, lng]| validate_coordinate(*lat, *lng))
            .map(|[lat, lng]| GpsPoint::new(*lat, *lng))
            .collect();

        if points.is_empty() {
            return Err(RejectReason::NoValidCoordinates { dropped: total });
        }
        if points.len() < total {
            debug!(
                "Dropped {} invalid coordinates from {}",
                total - points.len(),
                raw.label()
            );
        }

        Ok(Self {
            id: raw.id,
            name: raw.name,
            category: normalize_category(raw.category.as_deref()),
            start_date: normalize_date(raw.start_date.as_deref()),
            distance: raw.distance,
            points,
        })
    }

    /// Candidate track feature for this activity.
    pub fn into_feature(self) -> TrackFeature {
        TrackFeature {
            points: self.points,
            properties: TrackProperties {
                activity_id: self.id,
                name: self.name,
                date: self.start_date,
                distance: self.distance,
                category: self.category,
                extra: Default::default(),
            },
        }
    }
}

/// Outcome of converting one batch of raw activities.
#[derive(Debug, Default)]
pub struct ConversionReport {
    pub features: Vec<TrackFeature>,
    pub rejected: Vec<(String, RejectReason)>,
}

impl ConversionReport {
    pub fn converted_count(&self) -> usize {
        self.features.len()
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }
}

/// Validate and convert a batch, keeping input order.
pub fn convert_batch(activities: Vec<RawActivity>) -> ConversionReport {
    let mut report = ConversionReport::default();

    for raw in activities {
        let label = raw.label();
        match Activity::validate(raw) {
            Ok(activity) => report.features.push(activity.into_feature()),
            Err(reason) => report.rejected.push((label, reason)),
        }
    }

    if !report.rejected.is_empty() {
        let details: Vec<String> = report
            .rejected
            .iter()
            .map(|(label, reason)| format!("{}: {}", label, reason))
            .collect();
        warn!(
            "Converted {} activities, rejected {} [{}]",
            report.converted_count(),
            report.rejected_count(),
            details.join("; ")
        );
    }

    report
}
