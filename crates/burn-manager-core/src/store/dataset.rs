use std::collections::HashMap;
use std::fmt;
use tracing::{debug, error, info};

use super::{CollectionObserver, FileCollection, FileSink, VolumeList};
use crate::error::{Error, ResultCode};
use crate::model::{FileHandle, VolumeHandle, VolumeId, VolumeRecord};
use crate::sorter::{self, Distribution};

pub const FORMAT_VERSION: u32 = 1;

/// All files and volumes of one library.
///
/// Guard order across the dataset: file collection, volume list, volume, file.
pub struct Dataset {
    pub(crate) format_version: u32,
    pub(crate) files: FileCollection,
    pub(crate) volumes: VolumeList,
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("format_version", &self.format_version)
            .field("files", &self.files.len())
            .field("volumes", &self.volumes.len())
            .finish()
    }
}

impl Default for Dataset {
    fn default() -> Self {
        Self::new()
    }
}

impl Dataset {
    pub fn new() -> Self {
        Self::with_version(FORMAT_VERSION)
    }

    pub(crate) fn with_version(format_version: u32) -> Self {
        Self {
            format_version,
            files: FileCollection::new(),
            volumes: VolumeList::new(),
        }
    }

    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    pub fn files(&self) -> &FileCollection {
        &self.files
    }

    pub fn volumes(&self) -> &VolumeList {
        &self.volumes
    }

    pub fn subscribe(&self, observer: CollectionObserver) {
        self.files.subscribe(observer);
    }

    pub fn add_file(&self, file: FileHandle) -> ResultCode {
        self.files.add(file)
    }

    /// Removes `file` from the collection and from every volume it belongs to.
    pub fn remove_file(&self, file: &FileHandle) -> Result<ResultCode, Error> {
        self.files.cascade_remove(file, &self.volumes)
    }

    pub fn add_volume(&self, volume: VolumeRecord) -> VolumeHandle {
        self.volumes.push(volume)
    }

    /// Cascade-clears the first volume carrying `id` and drops it from the list.
    pub fn remove_volume(&self, id: VolumeId) -> Result<bool, Error> {
        let _files = self.files.guard();
        let mut volumes = self.volumes.lock();
        let Some(index) = volumes.iter().position(|v| v.id() == id) else {
            return Ok(false);
        };
        volumes[index].lock().cascade_clear()?;
        volumes.remove(index);
        Ok(true)
    }

    /// Rebuilds every volume's member set from the relationships stored on the
    /// files. Must run after loading a snapshot and before any other operation.
    ///
    /// Returns the number of memberships restored. A relationship to an absent
    /// volume, or an id shared by two volumes, is fatal.
    pub fn populate_volumes(&self) -> Result<usize, Error> {
        let files = self.files.guard();
        let volumes = self.volumes.lock();

        let mut by_id: HashMap<VolumeId, Vec<VolumeHandle>> = HashMap::new();
        for volume in volumes.iter() {
            by_id.entry(volume.id()).or_default().push(volume.clone());
        }

        let mut restored = 0;
        for (path, file) in files.iter() {
            let volume_ids = file.lock().related_volumes.volume_ids();
            for volume_id in volume_ids {
                let volume = match by_id.get(&volume_id).map(Vec::as_slice) {
                    Some([volume]) => volume,
                    Some([]) | None => {
                        error!("{} references missing volume {}", path, volume_id);
                        return Err(Error::MissingVolume {
                            volume_id,
                            path: path.clone(),
                        });
                    }
                    Some(_) => {
                        error!("Volume id {} is not unique", volume_id);
                        return Err(Error::DuplicateVolumeId(volume_id));
                    }
                };
                if volume.lock().add_reconciled(file) {
                    restored += 1;
                }
            }
        }

        debug!("Reconciled {} volume memberships", restored);
        Ok(restored)
    }

    /// Replaces every volume with a fresh distribution of all files.
    ///
    /// Existing volumes are cascade-cleared first, so burn history and burned
    /// flags are discarded. Returns the files that could not be placed.
    pub fn redistribute(
        &self,
        cluster_size: u64,
        capacity: u64,
        respect_grouping: bool,
    ) -> Result<Vec<FileHandle>, Error> {
        let files = self.files.guard();
        let mut volumes = self.volumes.lock();

        for volume in volumes.iter() {
            volume.lock().cascade_clear()?;
        }
        volumes.clear();

        let all: Vec<FileHandle> = files.handles();
        let Distribution {
            volumes: sorted,
            unplaceable,
        } = sorter::sort_for_distribution(&all, cluster_size, capacity, respect_grouping)?;
        volumes.extend(sorted.into_iter().map(VolumeHandle::new));

        info!("Redistributed library onto {} volumes", volumes.len());
        Ok(unplaceable)
    }

    /// Drops every volume and file.
    pub fn clear(&self) {
        self.volumes.lock().clear();
        self.files.clear();
    }

    /// Equal files by value and equal volumes by persisted fields and member paths.
    pub fn structurally_equal(&self, other: &Dataset) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        self.to_snapshot() == other.to_snapshot() && self.membership() == other.membership()
    }

    fn membership(&self) -> Vec<(VolumeId, Vec<String>)> {
        let mut membership: Vec<_> = self
            .volumes
            .handles()
            .iter()
            .map(|v| {
                let volume = v.lock();
                (volume.id(), volume.member_paths())
            })
            .collect();
        membership.sort();
        membership
    }
}

impl FileSink for Dataset {
    fn add_file(&self, file: FileHandle) -> ResultCode {
        Dataset::add_file(self, file)
    }
}
