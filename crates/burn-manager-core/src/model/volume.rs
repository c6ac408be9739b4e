use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::{error, trace};

use super::{FileHandle, FileStatus, Relationship, VolumeId, UNASSIGNED_VOLUME_ID};
use crate::error::Error;

/// Strategy that hands out volume identifiers for [`VolumeRecord::set_identifier`].
pub trait IdAllocator: Send + Sync {
    fn allocate(&self) -> VolumeId;
}

impl<F> IdAllocator for F
where
    F: Fn() -> VolumeId + Send + Sync,
{
    fn allocate(&self) -> VolumeId {
        self()
    }
}

/// Monotonic counter allocator.
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicI32,
}

impl SequentialIds {
    pub fn starting_at(first: VolumeId) -> Self {
        Self {
            next: AtomicI32::new(first),
        }
    }
}

impl IdAllocator for SequentialIds {
    fn allocate(&self) -> VolumeId {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

struct Member {
    file: FileHandle,
    size: u64,
}

/// One destination volume (disc, drive) and the files assigned to it.
///
/// Guard order: a volume may lock its member files, never the reverse.
pub struct VolumeRecord {
    capacity: u64,
    cluster_size: u64,
    id: VolumeId,
    pub name: String,
    burn_history: Vec<DateTime<Utc>>,
    members: BTreeMap<String, Member>,
    allocator: Option<Arc<dyn IdAllocator>>,
}

impl VolumeRecord {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            cluster_size: 1,
            id: UNASSIGNED_VOLUME_ID,
            name: String::new(),
            burn_history: Vec::new(),
            members: BTreeMap::new(),
            allocator: None,
        }
    }

    /// Rebuilds a volume from its persisted fields. Members are not persisted and
    /// must be restored by reconciliation.
    pub fn restore(
        capacity: u64,
        cluster_size: u64,
        id: VolumeId,
        name: String,
        burn_history: Vec<DateTime<Utc>>,
    ) -> Self {
        Self {
            cluster_size,
            id,
            name,
            burn_history,
            ..Self::new(capacity)
        }
    }

    pub fn with_cluster_size(mut self, cluster_size: u64) -> Self {
        self.cluster_size = cluster_size;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn id(&self) -> VolumeId {
        self.id
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn cluster_size(&self) -> u64 {
        self.cluster_size
    }

    /// On-volume footprint of a file of `size` bytes.
    ///
    /// This is `size + size % cluster_size`, which is not a round-up to the next
    /// cluster boundary. Persisted snapshots were sized with this rule.
    pub fn cluster_adjust(&self, size: u64) -> u64 {
        let cluster = self.cluster_size.max(1);
        size.saturating_add(size % cluster)
    }

    pub fn space_used(&self) -> u64 {
        self.members
            .values()
            .map(|m| self.cluster_adjust(m.size))
            .sum()
    }

    /// Sum of member sizes without cluster adjustment.
    pub fn space_used_by_files(&self) -> u64 {
        self.members.values().map(|m| m.size).sum()
    }

    pub fn space_remaining(&self) -> u64 {
        self.capacity.saturating_sub(self.space_used())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> Vec<FileHandle> {
        self.members.values().map(|m| m.file.clone()).collect()
    }

    pub fn member_paths(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.members.contains_key(path)
    }

    /// Adds `file` and records an unburned relationship to this volume on it.
    /// Returns false if the file was already a member or has no path.
    pub fn add(&mut self, file: &FileHandle) -> bool {
        self.insert(file, true)
    }

    /// Adds `file` without creating a relationship. Used by reconciliation, where
    /// the relationship already exists on the file.
    pub fn add_reconciled(&mut self, file: &FileHandle) -> bool {
        self.insert(file, false)
    }

    fn insert(&mut self, file: &FileHandle, create_relationship: bool) -> bool {
        let mut record = file.lock();
        let Some(path) = record.original_path.clone() else {
            record.status = Some(FileStatus::BadData);
            return false;
        };
        if self.members.contains_key(&path) {
            return false;
        }
        if create_relationship {
            record.related_volumes.push(Relationship::unburned(self.id));
        }
        let size = record.size_in_bytes.unwrap_or(0);
        drop(record);

        trace!("Volume {} <- {} ({} bytes)", self.id, path, size);
        self.members.insert(
            path,
            Member {
                file: file.clone(),
                size,
            },
        );
        true
    }

    /// Strips membership only; the file keeps its relationship to this volume.
    pub fn remove(&mut self, file: &FileHandle) -> bool {
        match file.path() {
            Some(path) => self.remove_path(&path).is_some(),
            None => false,
        }
    }

    pub(crate) fn remove_path(&mut self, path: &str) -> Option<FileHandle> {
        self.members.remove(path).map(|m| m.file)
    }

    /// Strips membership and deletes the file's relationship to this volume.
    ///
    /// Returns `Ok(false)` if the file is not a member. A member without a
    /// reciprocal relationship is an integrity failure.
    pub fn cascade_remove(&mut self, file: &FileHandle) -> Result<bool, Error> {
        let mut record = file.lock();
        let Some(path) = record.original_path.clone() else {
            return Ok(false);
        };
        if !self.members.contains_key(&path) {
            return Ok(false);
        }
        if record.related_volumes.remove_volume(self.id).is_none() {
            error!("{} is on volume {} without a relationship", path, self.id);
            return Err(Error::MissingRelationship {
                volume_id: self.id,
                path,
            });
        }
        drop(record);
        self.members.remove(&path);
        Ok(true)
    }

    /// Cascade-removes every member.
    pub fn cascade_clear(&mut self) -> Result<(), Error> {
        for file in self.members() {
            self.cascade_remove(&file)?;
        }
        Ok(())
    }

    /// Value comparison against members, not identity.
    pub fn contains(&self, file: &FileHandle) -> bool {
        if self.members.values().any(|m| m.file.same_record(file)) {
            return true;
        }
        let wanted = file.snapshot();
        self.members.values().any(|m| *m.file.lock() == wanted)
    }

    pub fn assign_allocator(&mut self, allocator: Arc<dyn IdAllocator>) {
        self.allocator = Some(allocator);
    }

    pub fn has_allocator(&self) -> bool {
        self.allocator.is_some()
    }

    /// Takes an identifier from the assigned allocator.
    pub fn set_identifier(&mut self) -> Result<VolumeId, Error> {
        let allocator = self.allocator.as_ref().ok_or(Error::MissingIdAllocator)?;
        self.id = allocator.allocate();
        Ok(self.id)
    }

    pub fn set_identifier_to(&mut self, id: VolumeId) {
        self.id = id;
    }

    /// Picks an identifier one past the highest in use. When an existing volume
    /// already holds `VolumeId::MAX`, falls back to a linear scan for the lowest
    /// unused value.
    pub fn get_new_id<I>(existing: I) -> Result<VolumeId, Error>
    where
        I: IntoIterator<Item = VolumeId>,
    {
        let used: HashSet<VolumeId> = existing.into_iter().collect();
        if !used.contains(&VolumeId::MAX) {
            let next = used.iter().copied().max().map_or(0, |max| (max + 1).max(0));
            return Ok(next);
        }

        (0..VolumeId::MAX)
            .find(|candidate| !used.contains(candidate))
            .ok_or(Error::IdSpaceExhausted)
    }

    pub fn burn_history(&self) -> &[DateTime<Utc>] {
        &self.burn_history
    }

    pub fn times_burned(&self) -> usize {
        self.burn_history.len()
    }

    /// Records a burn at `at` and marks every member's relationship as burned.
    pub fn mark_burned(&mut self, at: DateTime<Utc>) {
        self.burn_history.push(at);
        for member in self.members.values() {
            member.file.lock().related_volumes.set_burned(self.id, true);
        }
    }

    pub fn remove_burn(&mut self, at: DateTime<Utc>) -> bool {
        match self.burn_history.iter().position(|t| *t == at) {
            Some(index) => {
                self.burn_history.remove(index);
                true
            }
            None => false,
        }
    }

    /// Name, id and (path, checksum) of each member, for the log written next to a
    /// burn. Members without a path are marked `BadData`, members without a
    /// checksum `ChecksumError`.
    pub fn manifest(&self) -> VolumeManifest {
        let data = self
            .members
            .iter()
            .map(|(path, member)| {
                let mut record = member.file.lock();
                if record.original_path.is_none() {
                    record.status = Some(FileStatus::BadData);
                }
                if record.checksum.is_none() {
                    record.status = Some(FileStatus::ChecksumError);
                }
                (path.clone(), record.checksum.clone())
            })
            .collect();
        VolumeManifest {
            name: self.name.clone(),
            volume_id: self.id,
            data,
        }
    }

    pub fn manifest_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(&self.manifest())?)
    }
}

impl fmt::Debug for VolumeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolumeRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("cluster_size", &self.cluster_size)
            .field("members", &self.members.len())
            .field("times_burned", &self.burn_history.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeManifest {
    pub name: String,
    pub volume_id: VolumeId,
    pub data: Vec<(String, Option<Vec<u8>>)>,
}

/// Shared, individually guarded volume.
#[derive(Debug, Clone)]
pub struct VolumeHandle(Arc<Mutex<VolumeRecord>>);

impl VolumeHandle {
    pub fn new(volume: VolumeRecord) -> Self {
        Self(Arc::new(Mutex::new(volume)))
    }

    pub fn lock(&self) -> MutexGuard<'_, VolumeRecord> {
        self.0.lock()
    }

    pub fn id(&self) -> VolumeId {
        self.0.lock().id()
    }

    pub fn same_volume(&self, other: &VolumeHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<VolumeRecord> for VolumeHandle {
    fn from(volume: VolumeRecord) -> Self {
        Self::new(volume)
    }
}
