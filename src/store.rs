//! Append-only per-dataset schema version history.
//!
//! Appends are optimistic: the caller states the version number it expects
//! to create and the store refuses with a [`ConflictError`] unless that
//! number is exactly one past the stored latest. Readers never observe a
//! partially written version.

use std::{
    collections::HashMap,
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::{LazyLock, PoisonError, RwLock},
};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::{
    drift::DriftSummary,
    error::{ConflictError, StoreError},
    target::TargetSchema,
    types::CanonicalSchema,
};

static DATASET_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]*$").expect("dataset id pattern"));
static VERSION_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v(\d{6,})\.json$").expect("version file pattern"));

/// Who approved a version that needed a manual decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRecord {
    pub decided_by: String,
    pub decided_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaVersion {
    pub dataset_id: String,
    pub version_number: u32,
    pub canonical_schema: CanonicalSchema,
    pub target_schema: TargetSchema,
    pub accepted_at: DateTime<Utc>,
    /// Absent for version 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_summary: Option<DriftSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalRecord>,
}

impl SchemaVersion {
    pub fn schema_hash(&self) -> &str {
        self.canonical_schema.schema_hash()
    }
}

pub trait VersionStorage: Send + Sync {
    fn latest(&self, dataset_id: &str) -> Result<Option<SchemaVersion>, StoreError>;

    /// Fails with [`StoreError::Conflict`] unless `version.version_number`
    /// is the stored latest plus one (or 1 for a new dataset).
    fn append(&self, dataset_id: &str, version: SchemaVersion) -> Result<(), StoreError>;

    /// All versions in ascending order.
    fn history(&self, dataset_id: &str) -> Result<Vec<SchemaVersion>, StoreError>;

    fn get(&self, dataset_id: &str, version_number: u32) -> Result<Option<SchemaVersion>, StoreError> {
        Ok(self
            .history(dataset_id)?
            .into_iter()
            .find(|version| version.version_number == version_number))
    }
}

fn ensure_dataset(dataset_id: &str, version: &SchemaVersion) -> Result<(), StoreError> {
    if version.dataset_id != dataset_id {
        return Err(StoreError::DatasetMismatch {
            expected: dataset_id.to_string(),
            found: version.dataset_id.clone(),
        });
    }
    Ok(())
}

fn ensure_next(dataset_id: &str, attempted: u32, latest: Option<u32>) -> Result<(), StoreError> {
    let expected = latest.map_or(1, |number| number + 1);
    if attempted != expected {
        return Err(ConflictError {
            dataset_id: dataset_id.to_string(),
            attempted,
            latest,
        }
        .into());
    }
    Ok(())
}

/// Process-local store. Check and push happen under one write lock.
#[derive(Debug, Default)]
pub struct InMemoryVersionStore {
    datasets: RwLock<HashMap<String, Vec<SchemaVersion>>>,
}

impl InMemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VersionStorage for InMemoryVersionStore {
    fn latest(&self, dataset_id: &str) -> Result<Option<SchemaVersion>, StoreError> {
        let datasets = self.datasets.read().unwrap_or_else(PoisonError::into_inner);
        Ok(datasets
            .get(dataset_id)
            .and_then(|versions| versions.last())
            .cloned())
    }

    fn append(&self, dataset_id: &str, version: SchemaVersion) -> Result<(), StoreError> {
        ensure_dataset(dataset_id, &version)?;
        let mut datasets = self.datasets.write().unwrap_or_else(PoisonError::into_inner);
        let versions = datasets.entry(dataset_id.to_string()).or_default();
        let latest = versions.last().map(|stored| stored.version_number);
        ensure_next(dataset_id, version.version_number, latest)?;
        debug!(
            "Appended version {} of '{}' in memory",
            version.version_number, dataset_id
        );
        versions.push(version);
        Ok(())
    }

    fn history(&self, dataset_id: &str) -> Result<Vec<SchemaVersion>, StoreError> {
        let datasets = self.datasets.read().unwrap_or_else(PoisonError::into_inner);
        Ok(datasets.get(dataset_id).cloned().unwrap_or_default())
    }
}

/// One directory per dataset under `root`, one `vNNNNNN.json` file per
/// version. A version file is written to a temporary file in the same
/// directory and published with a no-clobber rename, so it appears whole or
/// not at all and two writers cannot both create the same number.
#[derive(Debug, Clone)]
pub struct FileVersionStore {
    root: PathBuf,
}

impl FileVersionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn version_file_name(version_number: u32) -> String {
        format!("v{version_number:06}.json")
    }

    fn dataset_dir(&self, dataset_id: &str) -> Result<PathBuf, StoreError> {
        if !DATASET_ID_RE.is_match(dataset_id) {
            return Err(StoreError::InvalidDatasetId(dataset_id.to_string()));
        }
        Ok(self.root.join(dataset_id))
    }

    /// Stored version numbers in ascending order.
    fn version_numbers(&self, dir: &Path) -> Result<Vec<u32>, StoreError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: dir.to_path_buf(),
                    source,
                });
            }
        };
        let mut numbers = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if let Some(number) = VERSION_FILE_RE
                .captures(name)
                .and_then(|captures| captures[1].parse::<u32>().ok())
            {
                numbers.push(number);
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }

    fn read_version(&self, dataset_id: &str, path: &Path) -> Result<SchemaVersion, StoreError> {
        let file = File::open(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let version: SchemaVersion =
            serde_json::from_reader(BufReader::new(file)).map_err(|err| StoreError::Corrupt {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        ensure_dataset(dataset_id, &version)?;
        Ok(version)
    }
}

impl VersionStorage for FileVersionStore {
    fn latest(&self, dataset_id: &str) -> Result<Option<SchemaVersion>, StoreError> {
        let dir = self.dataset_dir(dataset_id)?;
        match self.version_numbers(&dir)?.last() {
            Some(number) => {
                let path = dir.join(Self::version_file_name(*number));
                self.read_version(dataset_id, &path).map(Some)
            }
            None => Ok(None),
        }
    }

    fn append(&self, dataset_id: &str, version: SchemaVersion) -> Result<(), StoreError> {
        ensure_dataset(dataset_id, &version)?;
        let dir = self.dataset_dir(dataset_id)?;
        let latest = self.version_numbers(&dir)?.last().copied();
        ensure_next(dataset_id, version.version_number, latest)?;

        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        let io_error = |source: io::Error| StoreError::Io {
            path: dir.clone(),
            source,
        };
        let staging = NamedTempFile::new_in(&dir).map_err(io_error)?;
        {
            let mut writer = BufWriter::new(staging.as_file());
            serde_json::to_writer_pretty(&mut writer, &version).map_err(|err| {
                StoreError::Io {
                    path: staging.path().to_path_buf(),
                    source: err.into(),
                }
            })?;
            writer.flush().map_err(io_error)?;
        }
        staging.as_file().sync_all().map_err(io_error)?;

        let target = dir.join(Self::version_file_name(version.version_number));
        match staging.persist_noclobber(&target) {
            Ok(_) => {
                info!(
                    "Stored version {} of '{}' at {:?}",
                    version.version_number, dataset_id, target
                );
                Ok(())
            }
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                warn!(
                    "Version {} of '{}' was written concurrently",
                    version.version_number, dataset_id
                );
                Err(ConflictError {
                    dataset_id: dataset_id.to_string(),
                    attempted: version.version_number,
                    latest: Some(version.version_number),
                }
                .into())
            }
            Err(err) => Err(StoreError::Io {
                path: target,
                source: err.error,
            }),
        }
    }

    fn history(&self, dataset_id: &str) -> Result<Vec<SchemaVersion>, StoreError> {
        let dir = self.dataset_dir(dataset_id)?;
        self.version_numbers(&dir)?
            .into_iter()
            .map(|number| self.read_version(dataset_id, &dir.join(Self::version_file_name(number))))
            .collect()
    }

    fn get(&self, dataset_id: &str, version_number: u32) -> Result<Option<SchemaVersion>, StoreError> {
        let path = self
            .dataset_dir(dataset_id)?
            .join(Self::version_file_name(version_number));
        if !path.exists() {
            return Ok(None);
        }
        self.read_version(dataset_id, &path).map(Some)
    }
}
