//! # Dataset Store
//!
//! Owns the two files the pipeline produces:
//!
//! 1. the GeoJSON dataset, read leniently and replaced atomically as a whole;
//! 2. the derived activity export, rebuilt in full on every save.
//!
//! Reading never fails: a missing or unparsable dataset is an empty
//! collection, and individual features that do not deserialize are skipped.
//! Writing failures are returned to the caller.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{info, warn};
use serde::Serialize;
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::dataset::{FeatureCollection, TrackFeature};
use crate::error::{Result, TrackMergeError};
use crate::export::ActivityExport;

const JSON_INDENT: &[u8] = b"    ";

/// File-backed storage for the dataset and its export.
#[derive(Debug, Clone)]
pub struct DatasetStore {
    dataset_path: PathBuf,
    export_path: PathBuf,
}

impl DatasetStore {
    pub fn new(dataset_path: impl Into<PathBuf>, export_path: impl Into<PathBuf>) -> Self {
        Self {
            dataset_path: dataset_path.into(),
            export_path: export_path.into(),
        }
    }

    pub fn dataset_path(&self) -> &Path {
        &self.dataset_path
    }

    pub fn export_path(&self) -> &Path {
        &self.export_path
    }

    /// Load the dataset, or an empty collection if there is none.
    pub fn load(&self) -> FeatureCollection {
        let text = match fs::read_to_string(&self.dataset_path) {
            Ok(text) => text,
            Err(e) => {
                if e.kind() == std::io::ErrorKind::NotFound {
                    info!("No existing dataset found at {}", self.dataset_path.display());
                } else {
                    warn!("Cannot read {}: {}", self.dataset_path.display(), e);
                }
                return FeatureCollection::default();
            }
        };

        let document: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    "Dataset {} is not valid JSON ({}); starting empty",
                    self.dataset_path.display(),
                    e
                );
                return FeatureCollection::default();
            }
        };

        let raw_features = match document.get("features") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };

        let mut features = Vec::with_capacity(raw_features.len());
        for (index, raw) in raw_features.into_iter().enumerate() {
            match serde_json::from_value::<TrackFeature>(raw) {
                Ok(feature) => features.push(feature),
                Err(e) => warn!("Skipping unreadable feature #{}: {}", index, e),
            }
        }

        info!("Loaded existing dataset with {} features", features.len());
        FeatureCollection::new(features)
    }

    /// Replace the dataset file with `collection`.
    pub fn save(&self, collection: &FeatureCollection) -> Result<()> {
        write_json_atomic(&self.dataset_path, collection)?;
        info!(
            "Saved {} features to {}",
            collection.len(),
            self.dataset_path.display()
        );
        Ok(())
    }

    /// Rebuild the derived export from `collection`.
    pub fn save_export(&self, collection: &FeatureCollection) -> Result<ActivityExport> {
        let export = ActivityExport::build(collection, Utc::now());
        write_json_atomic(&self.export_path, &export)?;
        info!(
            "Saved activity export with {} entries to {}",
            export.activity_count,
            self.export_path.display()
        );
        Ok(export)
    }

    /// Save the dataset and rebuild the export.
    pub fn persist(&self, collection: &FeatureCollection) -> Result<ActivityExport> {
        self.save(collection)?;
        self.save_export(collection)
    }
}

/// Serialize `value` with four-space indentation and swap it into place.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(JSON_INDENT);
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    value.serialize(&mut serializer)?;
    buffer.push(b'\n');

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(&buffer)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| TrackMergeError::Persistence {
        message: format!("cannot replace {}: {}", path.display(), e.error),
    })?;

    Ok(())
}
