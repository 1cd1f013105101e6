//! Derived activity export: one flat row per track feature, sorted by date,
//! for analytics front ends that do not want to parse GeoJSON.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::dataset::FeatureCollection;

pub const METERS_PER_MILE: f64 = 1609.344;

/// One exported row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRow {
    pub activity_id: Option<String>,
    pub name: Option<String>,
    pub date: String,
    pub distance_m: f64,
    pub distance_mi: f64,
    #[serde(rename = "type")]
    pub category: Option<String>,
}

/// The export document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityExport {
    pub generated_at: String,
    pub activity_count: usize,
    pub activities: Vec<ActivityRow>,
}

impl ActivityExport {
    /// Project a dataset into export rows, stamped with `generated_at`.
    ///
    /// Features without a date or a distance are left out.
    pub fn build(collection: &FeatureCollection, generated_at: DateTime<Utc>) -> Self {
        let mut activities: Vec<ActivityRow> = collection
            .features
            .iter()
            .filter_map(|feature| {
                let props = &feature.properties;
                let date = props.date.clone()?;
                let distance_m = props.distance?;

                Some(ActivityRow {
                    activity_id: props.activity_id.as_ref().map(|id| id.to_string()),
                    name: props.name.clone(),
                    date,
                    distance_m,
                    distance_mi: distance_m / METERS_PER_MILE,
                    category: props.category.clone(),
                })
            })
            .collect();

        activities.sort_by(|a, b| a.date.cmp(&b.date));

        Self {
            generated_at: generated_at.to_rfc3339_opts(SecondsFormat::Secs, false),
            activity_count: activities.len(),
            activities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{ActivityId, TrackFeature, TrackProperties};
    use crate::GpsPoint;
    use chrono::TimeZone;

    fn feature(id: u64, date: Option<&str>, distance: Option<f64>) -> TrackFeature {
        TrackFeature {
            points: vec![GpsPoint::new(1.0, 1.0), GpsPoint::new(1.1, 1.1)],
            properties: TrackProperties {
                activity_id: Some(ActivityId::Numeric(id)),
                name: Some(format!("Ride {}", id)),
                date: date.map(String::from),
                distance,
                category: Some("Ride".to_string()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_rows_sorted_and_filtered() {
        let collection = FeatureCollection::new(vec![
            feature(3, Some("2024-03-01T00:00:00+00:00"), Some(3218.688)),
            feature(1, Some("2024-01-01T00:00:00+00:00"), Some(1000.0)),
            feature(4, None, Some(10.0)),
            feature(5, Some("2024-02-01T00:00:00+00:00"), None),
        ]);
        let generated = Utc.with_ymd_and_hms(2024, 4, 1, 12, 30, 0).unwrap();
        let export = ActivityExport::build(&collection, generated);

        assert_eq!(export.generated_at, "2024-04-01T12:30:00+00:00");
        assert_eq!(export.activity_count, 2);
        assert_eq!(export.activities[0].activity_id.as_deref(), Some("1"));
        assert_eq!(export.activities[1].activity_id.as_deref(), Some("3"));
        assert!((export.activities[1].distance_mi - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_row_wire_names() {
        let collection = FeatureCollection::new(vec![feature(
            9,
            Some("2024-01-01T00:00:00+00:00"),
            Some(1609.344),
        )]);
        let export = ActivityExport::build(&collection, Utc::now());
        let value = serde_json::to_value(&export).unwrap();

        let row = &value["activities"][0];
        assert_eq!(row["activity_id"], "9");
        assert_eq!(row["type"], "Ride");
        assert_eq!(row["distance_m"], 1609.344);
        assert_eq!(row["distance_mi"], 1.0);
        assert_eq!(value["activity_count"], 1);
    }

    #[test]
    fn test_empty_collection() {
        let export = ActivityExport::build(&FeatureCollection::default(), Utc::now());
        assert_eq!(export.activity_count, 0);
        assert!(export.activities.is_empty());
    }
}
