//! Identity keys and de-duplication of incoming track features.
//!
//! The key is `id:<activity id>` when the source assigned one, otherwise
//! `meta:<name>|<date>|<distance>` for legacy or anonymous entries. All
//! segments of one activity share its key.

use std::collections::HashSet;

use crate::dataset::{TrackFeature, TrackProperties};

/// Stable identity key for a feature's properties.
///
/// ```rust
/// use track_merge::dataset::{ActivityId, TrackProperties};
/// use track_merge::dedup::activity_key;
///
/// let props = TrackProperties {
///     activity_id: Some(ActivityId::Numeric(99)),
///     ..Default::default()
/// };
/// assert_eq!(activity_key(&props), "id:99");
/// ```
pub fn activity_key(properties: &TrackProperties) -> String {
    if let Some(id) = &properties.activity_id {
        return format!("id:{}", id);
    }

    format!(
        "meta:{}|{}|{}",
        properties.name.as_deref().unwrap_or(""),
        properties.date.as_deref().unwrap_or(""),
        properties
            .distance
            .map(|d| d.to_string())
            .unwrap_or_default()
    )
}

/// Keys of every feature already in the dataset.
pub fn collect_keys(features: &[TrackFeature]) -> HashSet<String> {
    features
        .iter()
        .map(|f| activity_key(&f.properties))
        .collect()
}

/// Keep only features whose key has not been seen, recording every key.
///
/// Duplicates within `features` itself are dropped too; the first
/// occurrence wins and input order is preserved.
pub fn filter_new(features: Vec<TrackFeature>, known_keys: &mut HashSet<String>) -> Vec<TrackFeature> {
    features
        .into_iter()
        .filter(|feature| known_keys.insert(activity_key(&feature.properties)))
        .collect()
}
