//! Metadata normalization for activity properties.
//!
//! Category labels arrive either as plain strings (`"Ride"`) or as the
//! debug rendering of a wrapped enum (`"root='Ride'"`); both collapse to the
//! bare label. Timestamps are re-emitted as ISO-8601 with second precision,
//! keeping the offset when the input had one.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static WRAPPED_CATEGORY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)root='([^']+)'").expect("category pattern is a valid regex")
});

const ZONED_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M%:z"];
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const ZONED_OUTPUT: &str = "%Y-%m-%dT%H:%M:%S%:z";
const NAIVE_OUTPUT: &str = "%Y-%m-%dT%H:%M:%S";

/// An ISO-8601 timestamp, with or without a UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsoTimestamp {
    Zoned(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
}

impl IsoTimestamp {
    /// Parse the ISO-8601 forms a fitness service or an older dataset may carry.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();

        if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
            return Some(IsoTimestamp::Zoned(parsed));
        }
        for format in ZONED_FORMATS {
            if let Ok(parsed) = DateTime::parse_from_str(value, format) {
                return Some(IsoTimestamp::Zoned(parsed));
            }
        }
        for format in NAIVE_FORMATS {
            if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
                return Some(IsoTimestamp::Naive(parsed));
            }
        }

        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(IsoTimestamp::Naive)
    }

    /// Canonical second-precision rendering.
    pub fn to_canonical(&self) -> String {
        match self {
            IsoTimestamp::Zoned(dt) => dt.format(ZONED_OUTPUT).to_string(),
            IsoTimestamp::Naive(dt) => dt.format(NAIVE_OUTPUT).to_string(),
        }
    }

    /// The instant in UTC. Offset-less timestamps are taken to be UTC.
    pub fn to_utc(&self) -> DateTime<Utc> {
        match self {
            IsoTimestamp::Zoned(dt) => dt.with_timezone(&Utc),
            IsoTimestamp::Naive(dt) => dt.and_utc(),
        }
    }
}

/// Normalize a free-form category label.
///
/// Returns `None` for absent or blank input.
///
/// ```rust
/// use track_merge::normalize::normalize_category;
///
/// assert_eq!(normalize_category(Some("root='Run'")), Some("Run".to_string()));
/// assert_eq!(normalize_category(Some("  Ride  ")), Some("Ride".to_string()));
/// assert_eq!(normalize_category(None), None);
/// ```
pub fn normalize_category(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        return None;
    }

    let label = match WRAPPED_CATEGORY.captures(trimmed) {
        Some(captures) => captures.get(1).map_or("", |m| m.as_str()).trim(),
        None => trimmed,
    };

    if label.is_empty() {
        None
    } else {
        Some(label.to_string())
    }
}

/// Normalize a timestamp string to canonical ISO-8601.
///
/// Unparsable input is passed through trimmed; absent or blank input yields `None`.
pub fn normalize_date(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        return None;
    }

    match IsoTimestamp::parse(trimmed) {
        Some(timestamp) => Some(timestamp.to_canonical()),
        None => Some(trimmed.to_string()),
    }
}

/// Parse a stored timestamp into a UTC instant, if it is parseable at all.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    IsoTimestamp::parse(value).map(|t| t.to_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_category_wrapped() {
        assert_eq!(normalize_category(Some("root='Run'")), Some("Run".to_string()));
        assert_eq!(
            normalize_category(Some("ActivityType(ROOT='VirtualRide')")),
            Some("VirtualRide".to_string())
        );
    }

    #[test]
    fn test_category_plain_and_blank() {
        assert_eq!(normalize_category(Some("  Ride  ")), Some("Ride".to_string()));
        assert_eq!(normalize_category(Some("   ")), None);
        assert_eq!(normalize_category(Some("")), None);
        assert_eq!(normalize_category(None), None);
    }

    #[test]
    fn test_date_zulu_to_offset() {
        assert_eq!(
            normalize_date(Some("2024-03-05T07:08:09.123456Z")),
            Some("2024-03-05T07:08:09+00:00".to_string())
        );
    }

    #[test]
    fn test_date_keeps_offset() {
        assert_eq!(
            normalize_date(Some(" 2024-03-05 07:08:09-07:00 ")),
            Some("2024-03-05T07:08:09-07:00".to_string())
        );
    }

    #[test]
    fn test_date_naive_stays_naive() {
        assert_eq!(
            normalize_date(Some("2024-03-05T07:08:09.5")),
            Some("2024-03-05T07:08:09".to_string())
        );
        assert_eq!(
            normalize_date(Some("2024-03-05")),
            Some("2024-03-05T00:00:00".to_string())
        );
    }

    #[test]
    fn test_date_unparsable_passthrough() {
        assert_eq!(
            normalize_date(Some("last tuesday ")),
            Some("last tuesday".to_string())
        );
        assert_eq!(normalize_date(Some("  ")), None);
        assert_eq!(normalize_date(None), None);
    }

    #[test]
    fn test_date_normalization_is_stable() {
        let once = normalize_date(Some("2024-03-05T07:08:09.999+02:00"));
        let twice = normalize_date(once.as_deref());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_parse_timestamp_utc() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 5, 5, 8, 9).unwrap();
        assert_eq!(parse_timestamp("2024-03-05T07:08:09+02:00"), Some(expected));

        let naive = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(parse_timestamp("2024-03-05T07:08:09"), Some(naive));

        assert_eq!(parse_timestamp("not a date"), None);
    }
}
