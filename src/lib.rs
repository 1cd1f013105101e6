//! # Track Merge
//!
//! Incremental merging of GPS activity tracks into a cleaned, de-duplicated
//! GeoJSON dataset.
//!
//! This library provides:
//! - Coordinate validation and haversine distance
//! - Pause-based track segmentation and point-density reduction
//! - Metadata normalization and identity-key de-duplication
//! - A resumable, batch-persisting merge pipeline over any [`ActivitySource`]
//! - Atomic GeoJSON storage plus a flat activity export
//!
//! ## Features
//!
//! - **`http`** (default) - Strava activity source and OAuth callback listener
//! - **`cli`** (default) - the `track-merge` binary (clap, env_logger); implies `http`
//!
//! ## Quick Start
//!
//! ```rust
//! use track_merge::{GpsPoint, PipelineConfig, TrackFeature};
//! use track_merge::dataset::{clean_features, TrackProperties};
//! use track_merge::segmentation::segment_features;
//!
//! // A walk with a 1 km jump in the middle
//! let mut points: Vec<GpsPoint> = (0..20)
//!     .map(|i| GpsPoint::new(51.5 + i as f64 * 0.0002, -0.12))
//!     .collect();
//! points.extend((0..20).map(|i| GpsPoint::new(51.52 + i as f64 * 0.0002, -0.12)));
//!
//! let feature = TrackFeature {
//!     points,
//!     properties: TrackProperties::default(),
//! };
//!
//! let config = PipelineConfig::default();
//! let segments = segment_features(&[feature], config.pause_threshold_km);
//! let cleaned = clean_features(&segments, &config);
//! assert_eq!(cleaned.len(), 2);
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TrackMergeError};

// Pipeline tunables, credentials, file/env configuration
pub mod config;
pub use config::{AppConfig, Credentials, FetchMode, PipelineConfig};

// Coordinate validation and distance
pub mod geo_utils;

// Pause-based splitting
pub mod segmentation;

// Distance thinning + hard point cap
pub mod simplify;

// Category and timestamp canonicalization
pub mod normalize;

// Identity keys
pub mod dedup;

// Raw source records -> validated activities -> track features
pub mod activity;
pub use activity::{Activity, ConversionReport, RawActivity, RejectReason};

// GeoJSON document model and feature cleaning
pub mod dataset;
pub use dataset::{ActivityId, FeatureCollection, TrackFeature, TrackProperties};

// Flat per-activity export
pub mod export;
pub use export::{ActivityExport, ActivityRow};

// Dataset + export files
pub mod store;
pub use store::DatasetStore;

// Incremental merge state machine
pub mod pipeline;
pub use pipeline::{ActivitySource, MergePipeline, MergeSummary, ResumePoint};

// Strava client for activity fetching
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{StravaClient, StravaSource};

// OAuth redirect listener
#[cfg(feature = "http")]
pub mod oauth;

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use track_merge::GpsPoint;
/// let point = GpsPoint::new(51.5074, -0.1278); // London
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}
