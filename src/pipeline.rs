//! # Merge Pipeline
//!
//! Incrementally pulls activities from an [`ActivitySource`] and merges them
//! into the stored dataset.
//!
//! ```text
//! Idle -> Resolving start point -> Fetching batch -> Converting -> Deduping
//!      -> Segmenting -> Cleaning -> Persisting -> (Fetching batch | Done)
//! ```
//!
//! The pipeline keeps an in-memory working copy (stored features plus every
//! newly accepted feature). Each batch that contributes new features
//! re-segments and re-cleans the *whole* working copy and persists the result,
//! so older and newer tracks are always processed the same way. A run that
//! adds nothing still persists once at the end, keeping the export in sync
//! with the dataset file.
//!
//! ## Fetch modes
//!
//! | Mode | Fetch | Rate limit |
//! |------|-------|------------|
//! | [`FetchMode::Batched`] | repeated `fetch_batch(after, n)` | back off, retry the same fetch |
//! | [`FetchMode::Streaming`] | one lazy iterator, chunked | back off, abandon that item |

use std::collections::HashSet;
use std::thread;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};

use crate::activity::{convert_batch, RawActivity};
use crate::config::{FetchMode, PipelineConfig};
use crate::dataset::{clean_features, FeatureCollection, TrackFeature};
use crate::dedup::{collect_keys, filter_new};
use crate::error::{Result, TrackMergeError};
use crate::normalize::parse_timestamp;
use crate::segmentation::segment_features;
use crate::store::DatasetStore;

// ============================================================================
// Activity Source
// ============================================================================

/// Where activities come from.
///
/// Both methods only return activities starting strictly after `after`,
/// oldest first, each carrying its coordinate stream. A rate-limited request
/// is reported as [`TrackMergeError::RateLimited`].
pub trait ActivitySource {
    /// Fetch up to `limit` activities.
    fn fetch_batch(&mut self, after: DateTime<Utc>, limit: usize) -> Result<Vec<RawActivity>>;

    /// Lazily iterate every activity.
    ///
    /// A rate-limited item is yielded as an error; the iterator may keep
    /// going afterwards or end, depending on where the limit hit.
    fn activities_after<'a>(
        &'a mut self,
        after: DateTime<Utc>,
    ) -> Result<Box<dyn Iterator<Item = Result<RawActivity>> + 'a>>;
}

// ============================================================================
// Resume Point
// ============================================================================

/// Where a run resumes fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    /// Newest stored activity date, or `now - default_lookback` when unknown
    pub most_recent: DateTime<Utc>,
    /// Exclusive lower bound for activity start times
    pub fetch_after: DateTime<Utc>,
}

/// Work out where to resume from the stored features.
///
/// Unparsable dates are ignored; offset-less dates count as UTC. The overlap
/// window only applies when the dataset is non-empty.
pub fn resolve_start_point(
    features: &[TrackFeature],
    config: &PipelineConfig,
    now: DateTime<Utc>,
) -> ResumePoint {
    let newest_stored = features
        .iter()
        .filter_map(|f| f.properties.date.as_deref())
        .filter_map(parse_timestamp)
        .max();

    let most_recent = newest_stored
        .unwrap_or_else(|| now - Duration::days(i64::from(config.default_lookback_days)));

    let mut fetch_after = most_recent;
    if !features.is_empty() && config.recent_lookback_days > 0 {
        fetch_after -= Duration::days(i64::from(config.recent_lookback_days));
    }
    fetch_after += Duration::seconds(config.start_epsilon_secs);

    ResumePoint {
        most_recent,
        fetch_after,
    }
}

// ============================================================================
// Run Summary
// ============================================================================

/// What a single run did.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeSummary {
    pub resume: ResumePoint,
    /// Activities accepted from the source (after the boundary filter)
    pub fetched: usize,
    /// New features merged into the dataset
    pub added: usize,
    /// Activities dropped for lack of usable coordinates
    pub rejected: usize,
    /// Converted features whose identity key was already known
    pub duplicates: usize,
    /// Features in the persisted dataset at the end of the run
    pub feature_count: usize,
    pub earliest_fetched: Option<DateTime<Utc>>,
    pub latest_fetched: Option<DateTime<Utc>>,
}

impl MergeSummary {
    fn new(resume: ResumePoint) -> Self {
        Self {
            resume,
            fetched: 0,
            added: 0,
            rejected: 0,
            duplicates: 0,
            feature_count: 0,
            earliest_fetched: None,
            latest_fetched: None,
        }
    }

    fn record_fetched(&mut self, started_at: DateTime<Utc>) {
        self.fetched += 1;
        self.earliest_fetched = Some(self.earliest_fetched.map_or(started_at, |t| t.min(started_at)));
        self.latest_fetched = Some(self.latest_fetched.map_or(started_at, |t| t.max(started_at)));
    }

    /// Log the run outcome.
    pub fn log_outcome(&self) {
        if self.fetched == 0 {
            info!("No new activities found after {}", self.resume.fetch_after);
        } else {
            if self.added == 0 {
                info!("Fetched activities but no new features were added");
            }
            info!("Fetched {} activities from the source", self.fetched);
            if let (Some(earliest), Some(latest)) = (self.earliest_fetched, self.latest_fetched) {
                info!("Fetched activity date range: {} to {}", earliest, latest);
            }
        }
        info!(
            "Run complete: {} added, {} duplicates, {} rejected, {} features stored",
            self.added, self.duplicates, self.rejected, self.feature_count
        );
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Mutable state of one run.
struct MergeRun {
    working: Vec<TrackFeature>,
    known_keys: HashSet<String>,
    summary: MergeSummary,
}

/// Drives fetching, merging and persisting for one dataset.
pub struct MergePipeline {
    store: DatasetStore,
    config: PipelineConfig,
}

impl MergePipeline {
    pub fn new(store: DatasetStore, config: PipelineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline against `source`, resuming from the stored dataset.
    pub fn run(&self, source: &mut dyn ActivitySource) -> Result<MergeSummary> {
        self.run_at(source, Utc::now())
    }

    /// [`run`](Self::run) with an explicit clock for the empty-dataset lookback.
    pub fn run_at(&self, source: &mut dyn ActivitySource, now: DateTime<Utc>) -> Result<MergeSummary> {
        let existing = self.store.load();
        let resume = resolve_start_point(&existing.features, &self.config, now);

        info!("Most recent stored activity date: {}", resume.most_recent);
        info!(
            "Using lookback window: {} days",
            self.config.recent_lookback_days
        );
        info!("Fetching activities after {}", resume.fetch_after);

        let mut run = MergeRun {
            known_keys: collect_keys(&existing.features),
            working: existing.features,
            summary: MergeSummary::new(resume),
        };

        match self.config.fetch_mode {
            FetchMode::Batched => self.fetch_batched(source, &mut run)?,
            FetchMode::Streaming => self.fetch_streaming(source, &mut run)?,
        }

        if run.summary.added == 0 {
            let cleaned = self.project(&run.working);
            self.store.persist(&cleaned)?;
            run.summary.feature_count = cleaned.len();
        }

        run.summary.log_outcome();
        Ok(run.summary)
    }

    fn fetch_batched(&self, source: &mut dyn ActivitySource, run: &mut MergeRun) -> Result<()> {
        let limit = self.config.batch_size.max(1);
        let mut cursor = run.summary.resume.fetch_after;
        let mut rate_limited = 0u32;

        loop {
            info!("Fetching up to {} activities starting from {}", limit, cursor);
            let fetched = match source.fetch_batch(cursor, limit) {
                Ok(fetched) => {
                    rate_limited = 0;
                    fetched
                }
                Err(e) if e.is_rate_limit() => {
                    rate_limited += 1;
                    if rate_limited > self.config.max_rate_limit_retries {
                        warn!(
                            "Giving up after {} consecutive rate-limited fetches",
                            rate_limited
                        );
                        return Err(e);
                    }
                    self.back_off(&e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            if fetched.is_empty() {
                break;
            }

            let next_cursor = fetched.iter().filter_map(RawActivity::started_at).max();
            let batch: Vec<RawActivity> = fetched
                .into_iter()
                .filter_map(|raw| admit(&mut run.summary, raw, cursor))
                .collect();
            self.process_batch(run, batch)?;

            match next_cursor {
                Some(next) if next > cursor => cursor = next,
                _ => {
                    warn!("Source returned no activity newer than {}; stopping", cursor);
                    break;
                }
            }
        }

        Ok(())
    }

    fn fetch_streaming(&self, source: &mut dyn ActivitySource, run: &mut MergeRun) -> Result<()> {
        let limit = self.config.batch_size.max(1);
        let boundary = run.summary.resume.fetch_after;

        let activities = match source.activities_after(boundary) {
            Ok(activities) => activities,
            Err(e) if e.is_rate_limit() => {
                self.back_off(&e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut batch = Vec::with_capacity(limit);
        for item in activities {
            let raw = match item {
                Ok(raw) => raw,
                Err(e) if e.is_rate_limit() => {
                    self.back_off(&e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Some(raw) = admit(&mut run.summary, raw, boundary) {
                batch.push(raw);
            }
            if batch.len() >= limit {
                self.process_batch(run, std::mem::take(&mut batch))?;
            }
        }

        if !batch.is_empty() {
            self.process_batch(run, batch)?;
        }

        Ok(())
    }

    /// Convert, dedupe and merge one batch, persisting if anything was new.
    fn process_batch(&self, run: &mut MergeRun, batch: Vec<RawActivity>) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let report = convert_batch(batch);
        run.summary.rejected += report.rejected_count();

        let converted = report.converted_count();
        let new_features = filter_new(report.features, &mut run.known_keys);
        run.summary.duplicates += converted - new_features.len();

        if new_features.is_empty() {
            debug!("Batch contributed no new features");
            return Ok(0);
        }

        let added = new_features.len();
        run.working.extend(new_features);

        let cleaned = self.project(&run.working);
        self.store.persist(&cleaned)?;

        run.summary.added += added;
        run.summary.feature_count = cleaned.len();
        info!("Saved {} new activities to the dataset", added);
        Ok(added)
    }

    /// Segmented and cleaned view of the working copy, as persisted.
    fn project(&self, working: &[TrackFeature]) -> FeatureCollection {
        let segmented = segment_features(working, self.config.pause_threshold_km);
        clean_features(&segmented, &self.config)
    }

    fn back_off(&self, error: &TrackMergeError) {
        warn!(
            "Activity source rate limit exceeded. Waiting {} seconds. Details: {}",
            self.config.rate_limit_backoff.as_secs(),
            error
        );
        if !self.config.rate_limit_backoff.is_zero() {
            thread::sleep(self.config.rate_limit_backoff);
        }
    }
}

/// Boundary filter: keep only activities that start strictly after `boundary`.
fn admit(summary: &mut MergeSummary, raw: RawActivity, boundary: DateTime<Utc>) -> Option<RawActivity> {
    match raw.started_at() {
        Some(started_at) if started_at > boundary => {
            summary.record_fetched(started_at);
            Some(raw)
        }
        Some(started_at) => {
            debug!(
                "Skipping {} started at {} (not after {})",
                raw.label(),
                started_at,
                boundary
            );
            None
        }
        None => {
            debug!("Skipping {} without a start date", raw.label());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{ActivityId, TrackProperties};
    use crate::GpsPoint;
    use chrono::TimeZone;

    fn stored(date: Option<&str>) -> TrackFeature {
        TrackFeature {
            points: vec![GpsPoint::new(1.0, 1.0), GpsPoint::new(1.001, 1.0)],
            properties: TrackProperties {
                activity_id: Some(ActivityId::Numeric(1)),
                date: date.map(String::from),
                ..Default::default()
            },
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_start_point_empty_dataset() {
        let config = PipelineConfig::default();
        let resume = resolve_start_point(&[], &config, now());

        assert_eq!(resume.most_recent, now() - Duration::days(365));
        assert_eq!(resume.fetch_after, resume.most_recent + Duration::seconds(1));
    }

    #[test]
    fn test_start_point_with_overlap() {
        let config = PipelineConfig::default();
        let features = vec![
            stored(Some("2024-06-01T10:00:00+00:00")),
            stored(Some("2024-06-10T10:00:00+02:00")),
            stored(Some("garbage")),
        ];
        let resume = resolve_start_point(&features, &config, now());

        let newest = Utc.with_ymd_and_hms(2024, 6, 10, 8, 0, 0).unwrap();
        assert_eq!(resume.most_recent, newest);
        assert_eq!(
            resume.fetch_after,
            newest - Duration::days(7) + Duration::seconds(1)
        );
    }

    #[test]
    fn test_start_point_without_overlap() {
        let config = PipelineConfig {
            recent_lookback_days: 0,
            ..Default::default()
        };
        let features = vec![stored(Some("2024-06-01T10:00:00"))];
        let resume = resolve_start_point(&features, &config, now());

        assert_eq!(
            resume.fetch_after,
            Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 1).unwrap()
        );
    }

    #[test]
    fn test_start_point_undated_dataset_uses_default_then_overlap() {
        let config = PipelineConfig::default();
        let resume = resolve_start_point(&[stored(None)], &config, now());

        assert_eq!(resume.most_recent, now() - Duration::days(365));
        assert_eq!(
            resume.fetch_after,
            now() - Duration::days(372) + Duration::seconds(1)
        );
    }

    #[test]
    fn test_admit_boundary_is_exclusive() {
        let boundary = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut summary = MergeSummary::new(ResumePoint {
            most_recent: boundary,
            fetch_after: boundary,
        });

        let at = RawActivity {
            start_date: Some("2024-01-01T00:00:00Z".to_string()),
            ..Default::default()
        };
        let after = RawActivity {
            start_date: Some("2024-01-01T00:00:01Z".to_string()),
            ..Default::default()
        };

        assert!(admit(&mut summary, at, boundary).is_none());
        assert!(admit(&mut summary, RawActivity::default(), boundary).is_none());
        assert!(admit(&mut summary, after, boundary).is_some());
        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.earliest_fetched, summary.latest_fetched);
    }
}
