use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::Dataset;
use crate::error::{Error, ResultCode};
use crate::model::{FileHandle, FileRecord, VolumeId, VolumeRecord};

/// Persisted form of a [`Dataset`]. Volume membership is not stored; it is
/// rebuilt from the files' relationships by [`Dataset::populate_volumes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSnapshot {
    pub format_version: u32,
    pub all_files: BTreeMap<String, FileRecord>,
    pub all_volumes: Vec<VolumeSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshot {
    pub capacity: u64,
    pub cluster_size: u64,
    pub identifier: VolumeId,
    pub name: String,
    #[serde(default)]
    pub burn_history: Vec<DateTime<Utc>>,
}

impl From<&VolumeRecord> for VolumeSnapshot {
    fn from(volume: &VolumeRecord) -> Self {
        Self {
            capacity: volume.capacity(),
            cluster_size: volume.cluster_size(),
            identifier: volume.id(),
            name: volume.name.clone(),
            burn_history: volume.burn_history().to_vec(),
        }
    }
}

impl From<VolumeSnapshot> for VolumeRecord {
    fn from(snapshot: VolumeSnapshot) -> Self {
        VolumeRecord::restore(
            snapshot.capacity,
            snapshot.cluster_size,
            snapshot.identifier,
            snapshot.name,
            snapshot.burn_history,
        )
    }
}

impl Dataset {
    pub fn to_snapshot(&self) -> DatasetSnapshot {
        let all_files = {
            let files = self.files.guard();
            files
                .iter()
                .map(|(path, file)| (path.clone(), file.snapshot()))
                .collect()
        };
        let all_volumes = self
            .volumes
            .handles()
            .iter()
            .map(|v| VolumeSnapshot::from(&*v.lock()))
            .collect();
        DatasetSnapshot {
            format_version: self.format_version,
            all_files,
            all_volumes,
        }
    }

    /// Builds an unreconciled dataset. Volumes come back empty.
    pub fn from_snapshot(snapshot: DatasetSnapshot) -> Self {
        let dataset = Dataset::with_version(snapshot.format_version);
        for (key, mut record) in snapshot.all_files {
            if record.original_path.as_deref() != Some(key.as_str()) {
                warn!("Snapshot key {} disagrees with record path, keeping key", key);
                record.original_path = Some(key);
            }
            dataset.files.add(FileHandle::new(record));
        }
        for volume in snapshot.all_volumes {
            dataset.volumes.push(volume.into());
        }
        dataset
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(&self.to_snapshot())?)
    }

    /// Decodes a snapshot without reconciling volume membership.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let snapshot: DatasetSnapshot = serde_json::from_str(json)?;
        debug!(
            "Decoded snapshot v{} with {} files and {} volumes",
            snapshot.format_version,
            snapshot.all_files.len(),
            snapshot.all_volumes.len()
        );
        Ok(Self::from_snapshot(snapshot))
    }

    /// Decodes a snapshot and reconciles volume membership.
    pub fn load_json(json: &str) -> Result<Self, Error> {
        let dataset = Self::from_json(json)?;
        dataset.populate_volumes()?;
        Ok(dataset)
    }

    /// [`Dataset::load_json`] reduced to a result code, for callers that only
    /// branch on success.
    pub fn try_load_json(json: &str) -> (ResultCode, Option<Self>) {
        match Self::load_json(json) {
            Ok(dataset) => (ResultCode::Successful, Some(dataset)),
            Err(err) => {
                warn!("Snapshot rejected: {}", err);
                (err.result_code(), None)
            }
        }
    }
}
