//! Configuration for the merge pipeline and the updater binary.
//!
//! [`PipelineConfig`] holds the processing tunables and is all the library
//! pipeline needs. [`AppConfig`] adds credentials and file locations, and is
//! assembled from an optional TOML file overlaid with process environment.
//!
//! Environment variables:
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `CLIENT_ID` | Strava API client id (required) |
//! | `CLIENT_SECRET` | Strava API client secret (required) |
//! | `LOOKBACK_DAYS` | Overlap window re-fetched before the newest stored activity |

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};
use serde::Deserialize;

use crate::error::{OptionExt, Result, TrackMergeError};
use crate::segmentation::DEFAULT_PAUSE_THRESHOLD_KM;

pub const CLIENT_ID_ENV_VAR: &str = "CLIENT_ID";
pub const CLIENT_SECRET_ENV_VAR: &str = "CLIENT_SECRET";
pub const LOOKBACK_DAYS_ENV_VAR: &str = "LOOKBACK_DAYS";

/// Config file looked for in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "track-merge.toml";

/// Environment file read before the process environment is consulted.
pub const DOTENV_FILE: &str = ".env";

pub const DEFAULT_OAUTH_PORT: u16 = 8080;
pub const DEFAULT_DATASET_FILE: &str = "cleaned_output.geojson";
pub const DEFAULT_EXPORT_FILE: &str = "activity_dataset.json";

const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(15 * 60);

/// How the pipeline pulls activities from its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Repeated bounded fetches; a rate-limited fetch is retried after backoff.
    #[default]
    Batched,
    /// One lazy iteration chunked into batches; a rate-limited item is abandoned.
    Streaming,
}

/// Tunables for fetching, segmentation and cleaning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Activities fetched (and persisted) per batch.
    /// Default: 5
    pub batch_size: usize,

    /// Gap between consecutive points that splits a track.
    /// Default: 0.5 km
    pub pause_threshold_km: f64,

    /// Minimum spacing between retained points; 0 disables thinning.
    /// Default: 10.0 meters
    pub min_point_distance_m: f64,

    /// Hard cap on points per feature; 0 disables the cap.
    /// Default: 1000
    pub max_points_per_feature: usize,

    /// How far back to fetch when the dataset is empty.
    /// Default: 365 days
    pub default_lookback_days: u32,

    /// Overlap window subtracted from the newest stored activity so late
    /// uploads near the boundary are not missed. 0 resumes strictly after it.
    /// Default: 7 days
    pub recent_lookback_days: u32,

    /// Added to the resolved start point so the newest stored activity is
    /// not fetched again.
    /// Default: 1 second
    pub start_epsilon_secs: i64,

    /// Sleep after the source reports rate limiting.
    /// Default: 15 minutes
    pub rate_limit_backoff: Duration,

    /// Consecutive rate-limited fetches tolerated in batched mode before the
    /// run gives up.
    /// Default: 8
    pub max_rate_limit_retries: u32,

    pub fetch_mode: FetchMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            pause_threshold_km: DEFAULT_PAUSE_THRESHOLD_KM,
            min_point_distance_m: 10.0,
            max_points_per_feature: 1000,
            default_lookback_days: 365,
            recent_lookback_days: 7,
            start_epsilon_secs: 1,
            rate_limit_backoff: RATE_LIMIT_BACKOFF,
            max_rate_limit_retries: 8,
            fetch_mode: FetchMode::Batched,
        }
    }
}

/// OAuth client credentials.
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Optional settings read from `track-merge.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub oauth_port: Option<u16>,
    pub dataset_path: Option<PathBuf>,
    pub export_path: Option<PathBuf>,
    pub lookback_days: Option<u32>,
    pub batch_size: Option<usize>,
    pub pause_threshold_km: Option<f64>,
    pub min_point_distance_m: Option<f64>,
    pub max_points_per_feature: Option<usize>,
    pub streaming: Option<bool>,
}

impl FileConfig {
    /// Read a config file. A missing file is only an error when `required`.
    pub fn read(path: &Path, required: bool) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(TrackMergeError::Config {
                    message: format!("cannot read {}: {}", path.display(), e),
                })
            }
        };

        info!("Loaded configuration from {}", path.display());
        toml::from_str(&text).map_err(|e| TrackMergeError::Config {
            message: format!("invalid {}: {}", path.display(), e),
        })
    }
}

/// Everything the updater binary needs before it touches the network.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub credentials: Credentials,
    pub oauth_port: u16,
    pub scopes: Vec<String>,
    pub stream_resolution: String,
    pub dataset_path: PathBuf,
    pub export_path: PathBuf,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Load from the given (or default) config file plus process environment.
    ///
    /// A `.env` file in the working directory (or next to the config file)
    /// is loaded first. Variables already set in the process win over it.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or failed to load: {}", e);
        }
        if let Some(dir) = config_path.and_then(Path::parent) {
            if !dir.as_os_str().is_empty() {
                load_env_file(&dir.join(DOTENV_FILE));
            }
        }

        let file = match config_path {
            Some(path) => FileConfig::read(path, true)?,
            None => FileConfig::read(Path::new(DEFAULT_CONFIG_FILE), false)?,
        };
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Overlay environment values on file values. Environment wins.
    pub fn from_sources<F>(file: FileConfig, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        let client_id = non_empty(env(CLIENT_ID_ENV_VAR))
            .or_else(|| non_empty(file.client_id))
            .ok_or_config("CLIENT_ID and CLIENT_SECRET must be set in the environment or config file")?;
        let client_secret = non_empty(env(CLIENT_SECRET_ENV_VAR))
            .or_else(|| non_empty(file.client_secret))
            .ok_or_config("CLIENT_ID and CLIENT_SECRET must be set in the environment or config file")?;

        let mut pipeline = PipelineConfig::default();
        let lookback_default = file.lookback_days.unwrap_or(pipeline.recent_lookback_days);
        pipeline.recent_lookback_days =
            parse_lookback_days(env(LOOKBACK_DAYS_ENV_VAR).as_deref(), lookback_default);
        if let Some(batch_size) = file.batch_size {
            pipeline.batch_size = batch_size.max(1);
        }
        if let Some(threshold) = file.pause_threshold_km {
            pipeline.pause_threshold_km = threshold;
        }
        if let Some(distance) = file.min_point_distance_m {
            pipeline.min_point_distance_m = distance;
        }
        if let Some(max_points) = file.max_points_per_feature {
            pipeline.max_points_per_feature = max_points;
        }
        if file.streaming == Some(true) {
            pipeline.fetch_mode = FetchMode::Streaming;
        }

        Ok(Self {
            credentials: Credentials {
                client_id,
                client_secret,
            },
            oauth_port: file.oauth_port.unwrap_or(DEFAULT_OAUTH_PORT),
            scopes: vec!["read_all".to_string(), "activity:read_all".to_string()],
            stream_resolution: "medium".to_string(),
            dataset_path: file
                .dataset_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATASET_FILE)),
            export_path: file
                .export_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EXPORT_FILE)),
            pipeline,
        })
    }

    /// Redirect URI registered with the OAuth provider.
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}", self.oauth_port)
    }
}

/// Load `KEY=value` lines from `path` into the process environment without
/// overriding variables that are already set. Returns whether it was read.
pub fn load_env_file(path: &Path) -> bool {
    match dotenvy::from_path(path) {
        Ok(()) => {
            info!("Loaded environment from {}", path.display());
            true
        }
        Err(e) if e.not_found() => false,
        Err(e) => {
            warn!("Failed to load {}: {}", path.display(), e);
            false
        }
    }
}

/// Interpret a lookback override, falling back to `default_days` on bad input.
pub fn parse_lookback_days(raw: Option<&str>, default_days: u32) -> u32 {
    let Some(raw) = raw else {
        return default_days;
    };

    match raw.trim().parse::<i64>() {
        Ok(value) if value < 0 => {
            warn!("{} cannot be negative: {}", LOOKBACK_DAYS_ENV_VAR, raw);
            default_days
        }
        Ok(value) => u32::try_from(value).unwrap_or(u32::MAX),
        Err(_) => {
            warn!("Invalid {} value: {}", LOOKBACK_DAYS_ENV_VAR, raw);
            default_days
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_lookback_days() {
        assert_eq!(parse_lookback_days(None, 7), 7);
        assert_eq!(parse_lookback_days(Some("3"), 7), 3);
        assert_eq!(parse_lookback_days(Some(" 0 "), 7), 0);
        assert_eq!(parse_lookback_days(Some("-2"), 7), 7);
        assert_eq!(parse_lookback_days(Some("soon"), 7), 7);
    }

    #[test]
    fn test_missing_credentials_is_config_error() {
        let result = AppConfig::from_sources(FileConfig::default(), env_from(&[("CLIENT_ID", "1")]));
        assert!(matches!(result, Err(TrackMergeError::Config { .. })));

        let result = AppConfig::from_sources(
            FileConfig::default(),
            env_from(&[("CLIENT_ID", "1"), ("CLIENT_SECRET", "  ")]),
        );
        assert!(matches!(result, Err(TrackMergeError::Config { .. })));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = FileConfig {
            client_id: Some("file-id".to_string()),
            client_secret: Some("file-secret".to_string()),
            lookback_days: Some(2),
            ..Default::default()
        };
        let config =
            AppConfig::from_sources(file, env_from(&[("CLIENT_ID", "env-id"), ("LOOKBACK_DAYS", "5")]))
                .unwrap();

        assert_eq!(config.credentials.client_id, "env-id");
        assert_eq!(config.credentials.client_secret, "file-secret");
        assert_eq!(config.pipeline.recent_lookback_days, 5);
        assert_eq!(config.redirect_uri(), "http://localhost:8080");
    }

    #[test]
    fn test_file_values_applied() {
        let file: FileConfig = toml::from_str(
            r#"
            client_id = "abc"
            client_secret = "shh"
            oauth_port = 9090
            dataset_path = "data/tracks.geojson"
            lookback_days = 1
            batch_size = 10
            max_points_per_feature = 0
            streaming = true
            "#,
        )
        .unwrap();
        let config = AppConfig::from_sources(file, env_from(&[])).unwrap();

        assert_eq!(config.oauth_port, 9090);
        assert_eq!(config.dataset_path, PathBuf::from("data/tracks.geojson"));
        assert_eq!(config.export_path, PathBuf::from(DEFAULT_EXPORT_FILE));
        assert_eq!(config.pipeline.recent_lookback_days, 1);
        assert_eq!(config.pipeline.batch_size, 10);
        assert_eq!(config.pipeline.max_points_per_feature, 0);
        assert_eq!(config.pipeline.fetch_mode, FetchMode::Streaming);
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        let parsed: std::result::Result<FileConfig, _> = toml::from_str("colour = \"blue\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = Credentials {
            client_id: "123".to_string(),
            client_secret: "hunter2".to_string(),
        };
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("123"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_env_file_fills_unset_variables() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(DOTENV_FILE);
        std::fs::write(
            &path,
            "TRACK_MERGE_TEST_DOTENV_FRESH=from-file\nTRACK_MERGE_TEST_DOTENV_SET=from-file\n",
        )
        .unwrap();
        std::env::set_var("TRACK_MERGE_TEST_DOTENV_SET", "from-process");

        assert!(load_env_file(&path));
        assert_eq!(
            std::env::var("TRACK_MERGE_TEST_DOTENV_FRESH").as_deref(),
            Ok("from-file")
        );
        assert_eq!(
            std::env::var("TRACK_MERGE_TEST_DOTENV_SET").as_deref(),
            Ok("from-process")
        );
        assert!(!load_env_file(&dir.path().join("missing.env")));
    }

    #[test]
    fn test_required_config_file_missing() {
        let result = FileConfig::read(Path::new("/nonexistent/track-merge.toml"), true);
        assert!(matches!(result, Err(TrackMergeError::Config { .. })));

        let result = FileConfig::read(Path::new("/nonexistent/track-merge.toml"), false);
        assert!(result.is_ok());
    }
}
