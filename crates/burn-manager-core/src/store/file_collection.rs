use parking_lot::{Mutex, MutexGuard, RwLock};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error};

use super::{FileSink, VolumeList};
use crate::error::{Error, ResultCode};
use crate::model::{FileHandle, FilePattern, FileStatus, VolumeHandle};

/// Change notification fired after the collection guard has been released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionEvent {
    Added { path: String, size: Option<u64> },
    Removed { path: String, size: Option<u64> },
    Cleared,
}

pub type CollectionObserver = Arc<dyn Fn(&CollectionEvent) + Send + Sync>;

/// A member together with the size it contributed to the running total.
struct Entry {
    file: FileHandle,
    size: Option<u64>,
}

pub(crate) struct CollectionInner {
    files: BTreeMap<String, Entry>,
    total_size: u64,
}

impl CollectionInner {
    /// Members in path order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&String, &FileHandle)> {
        self.files.iter().map(|(path, entry)| (path, &entry.file))
    }

    pub(crate) fn handles(&self) -> Vec<FileHandle> {
        self.files.values().map(|entry| entry.file.clone()).collect()
    }

    fn detach(&mut self, path: &str) -> Option<(FileHandle, Option<u64>)> {
        let Entry { file, size } = self.files.remove(path)?;
        if let Some(size) = size {
            self.total_size -= size;
        }
        Some((file, size))
    }
}

/// Keyed store of file records with a running total size.
///
/// Guard order: collection, then volume list, then volume, then file. Every
/// method here follows it; a file guard is never held while taking another guard.
pub struct FileCollection {
    inner: Mutex<CollectionInner>,
    observers: RwLock<Vec<CollectionObserver>>,
}

impl Default for FileCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl FileCollection {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CollectionInner {
                files: BTreeMap::new(),
                total_size: 0,
            }),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn guard(&self) -> MutexGuard<'_, CollectionInner> {
        self.inner.lock()
    }

    pub fn subscribe(&self, observer: CollectionObserver) {
        self.observers.write().push(observer);
    }

    fn notify(&self, event: CollectionEvent) {
        for observer in self.observers.read().iter() {
            observer(&event);
        }
    }

    /// Inserts `file` keyed by its path.
    ///
    /// A record without a path is marked `BadData` (`NullValue`). A record whose
    /// path is already present is marked `Duplicate` and discarded
    /// (`Unsuccessful`).
    pub fn add(&self, file: FileHandle) -> ResultCode {
        let (path, size) = {
            let mut inner = self.inner.lock();
            let mut record = file.lock();
            let Some(path) = record.original_path.clone() else {
                record.status = Some(FileStatus::BadData);
                return ResultCode::NullValue;
            };
            if inner.files.contains_key(&path) {
                debug!("Duplicate rejected: {}", path);
                record.status = Some(FileStatus::Duplicate);
                return ResultCode::Unsuccessful;
            }
            let size = record.size_in_bytes;
            drop(record);

            inner.total_size += size.unwrap_or(0);
            inner.files.insert(path.clone(), Entry { file, size });
            (path, size)
        };
        self.notify(CollectionEvent::Added { path, size });
        ResultCode::Successful
    }

    /// Removes `file` by path. Relationships are left untouched.
    pub fn remove(&self, file: &FileHandle) -> bool {
        let Some(path) = file.path() else {
            return false;
        };
        let detached = self.inner.lock().detach(&path);
        match detached {
            Some((_, size)) => {
                self.notify(CollectionEvent::Removed { path, size });
                true
            }
            None => false,
        }
    }

    /// Removes `file` and strips it from every volume in `related_volumes` that
    /// it holds a relationship to; the file's relationships are cleared.
    ///
    /// `NullValue` if the file has no path, `Unsuccessful` if it is not present.
    /// A relationship pointing at a volume absent from `related_volumes` is an
    /// integrity failure and leaves both containers unchanged.
    pub fn cascade_remove(
        &self,
        file: &FileHandle,
        related_volumes: &VolumeList,
    ) -> Result<ResultCode, Error> {
        let Some(path) = file.path() else {
            return Ok(ResultCode::NullValue);
        };

        let size = {
            let mut inner = self.inner.lock();
            let Some(stored) = inner.files.get(&path).map(|entry| entry.file.clone()) else {
                return Ok(ResultCode::Unsuccessful);
            };

            let volumes = related_volumes.lock();
            let volume_ids = stored.lock().related_volumes.volume_ids();
            let mut targets: Vec<VolumeHandle> = Vec::with_capacity(volume_ids.len());
            for volume_id in &volume_ids {
                match VolumeList::find_in(&volumes, *volume_id).into_iter().next() {
                    Some(volume) => targets.push(volume),
                    None => {
                        error!("{} references missing volume {}", path, volume_id);
                        return Err(Error::MissingVolume {
                            volume_id: *volume_id,
                            path,
                        });
                    }
                }
            }

            let (_, size) = inner
                .detach(&path)
                .ok_or_else(|| Error::Other(format!("{path} vanished during removal")))?;
            for volume in &targets {
                volume.lock().remove_path(&path);
            }
            let mut record = stored.lock();
            for volume_id in volume_ids {
                record.related_volumes.remove_volume(volume_id);
            }
            size
        };

        debug!("Cascade-removed {}", path);
        self.notify(CollectionEvent::Removed { path, size });
        Ok(ResultCode::Successful)
    }

    /// True if a record with the same path and equal contents is present.
    pub fn contains(&self, file: &FileHandle) -> bool {
        let Some(path) = file.path() else {
            return false;
        };
        let Some(stored) = self.get(&path) else {
            return false;
        };
        if stored.same_record(file) {
            return true;
        }
        let wanted = file.snapshot();
        let equal = *stored.lock() == wanted;
        equal
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.inner.lock().files.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<FileHandle> {
        self.inner.lock().files.get(path).map(|entry| entry.file.clone())
    }

    /// All records matching every field set on `pattern`. The scan runs in
    /// parallel over a snapshot of the collection.
    pub fn get_by_partial_match(&self, pattern: &FilePattern) -> Vec<FileHandle> {
        self.files()
            .into_par_iter()
            .filter(|file| file.lock().matches(pattern))
            .collect()
    }

    /// Files with at least one unburned relationship.
    pub fn pending_files(&self) -> Vec<FileHandle> {
        self.files()
            .into_iter()
            .filter(|file| !file.lock().pending_burns().is_empty())
            .collect()
    }

    /// Snapshot of the current members in path order.
    pub fn files(&self) -> Vec<FileHandle> {
        self.inner.lock().handles()
    }

    pub fn paths(&self) -> Vec<String> {
        self.inner.lock().files.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().files.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.inner.lock().total_size
    }

    /// Recomputes the running total from the members' current sizes.
    pub fn recalculate_total_size(&self) -> u64 {
        let mut inner = self.inner.lock();
        let mut total = 0;
        for entry in inner.files.values_mut() {
            entry.size = entry.file.size();
            total += entry.size.unwrap_or(0);
        }
        inner.total_size = total;
        total
    }

    pub fn clear(&self) {
        {
            let mut inner = self.inner.lock();
            inner.files.clear();
            inner.total_size = 0;
        }
        self.notify(CollectionEvent::Cleared);
    }
}

impl FileSink for FileCollection {
    fn add_file(&self, file: FileHandle) -> ResultCode {
        self.add(file)
    }
}
