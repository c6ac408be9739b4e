use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use super::VolumeId;

/// Algorithm used to produce a record's checksum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HashType {
    #[default]
    None,
    Blake3,
    XxHash64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileStatus {
    Good,
    ChecksumError,
    FileMissing,
    Duplicate,
    BadData,
    AccessError,
}

/// Marks files that should ideally be kept on the same volume. An id of 0 means
/// the file belongs to no collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonolithicCollection {
    pub name: String,
    pub id: i32,
}

/// "This file is (or may be) written to this volume, burned or not."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub volume_id: VolumeId,
    pub burned: bool,
}

impl Relationship {
    pub fn unburned(volume_id: VolumeId) -> Self {
        Self {
            volume_id,
            burned: false,
        }
    }
}

/// Relationships in insertion order. Equality ignores order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelatedVolumes(Vec<Relationship>);

impl RelatedVolumes {
    pub fn new(relationships: Vec<Relationship>) -> Self {
        Self(relationships)
    }

    pub fn push(&mut self, relationship: Relationship) {
        self.0.push(relationship);
    }

    pub fn find(&self, volume_id: VolumeId) -> Option<&Relationship> {
        self.0.iter().find(|r| r.volume_id == volume_id)
    }

    /// Removes the first relationship pointing at `volume_id`.
    pub fn remove_volume(&mut self, volume_id: VolumeId) -> Option<Relationship> {
        let index = self.0.iter().position(|r| r.volume_id == volume_id)?;
        Some(self.0.remove(index))
    }

    pub fn set_burned(&mut self, volume_id: VolumeId, burned: bool) -> bool {
        match self.0.iter_mut().find(|r| r.volume_id == volume_id) {
            Some(relationship) => {
                relationship.burned = burned;
                true
            }
            None => false,
        }
    }

    pub fn volume_ids(&self) -> Vec<VolumeId> {
        self.0.iter().map(|r| r.volume_id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    fn sorted(&self) -> Vec<Relationship> {
        let mut sorted = self.0.clone();
        sorted.sort();
        sorted
    }
}

impl PartialEq for RelatedVolumes {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.sorted() == other.sorted()
    }
}

impl Eq for RelatedVolumes {}

/// A single tracked file. Identity within a collection is `original_path`.
///
/// Most fields are optional so that a record can be built from partial
/// information (a file whose metadata could not be read, a record loaded from
/// an older snapshot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub file_name: Option<String>,
    pub original_path: Option<String>,
    pub size_in_bytes: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub time_added: DateTime<Utc>,
    pub checksum: Option<Vec<u8>>,
    #[serde(default)]
    pub hash_type: HashType,
    pub status: Option<FileStatus>,
    #[serde(default)]
    pub monolithic: MonolithicCollection,
    #[serde(default)]
    pub related_volumes: RelatedVolumes,
}

impl FileRecord {
    pub fn new(original_path: impl Into<String>) -> Self {
        let original_path = original_path.into();
        let file_name = Path::new(&original_path)
            .file_name()
            .map(|f| f.to_string_lossy().into_owned());
        Self {
            file_name,
            original_path: Some(original_path),
            ..Self::empty()
        }
    }

    /// A record with no path. Collections reject these as `BadData`.
    pub fn empty() -> Self {
        Self {
            file_name: None,
            original_path: None,
            size_in_bytes: None,
            last_modified: None,
            time_added: Utc::now(),
            checksum: None,
            hash_type: HashType::None,
            status: None,
            monolithic: MonolithicCollection::default(),
            related_volumes: RelatedVolumes::default(),
        }
    }

    pub fn with_size(mut self, size_in_bytes: u64) -> Self {
        self.size_in_bytes = Some(size_in_bytes);
        self
    }

    /// Builds a record from a file on disk, reading its size and modification time.
    /// Builds a record from file system metadata. A path that is not valid
    /// UTF-8 cannot be stored and is rejected with `InvalidData`.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let utf8 = path.to_str().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("path is not valid UTF-8: {}", path.display()),
            )
        })?;
        let metadata = fs::metadata(path)?;
        let mut record = Self::new(utf8);
        record.size_in_bytes = Some(metadata.len());
        record.last_modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        Ok(record)
    }

    pub fn has_checksum(&self) -> bool {
        self.checksum.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Relationships that have not been burned yet.
    pub fn pending_burns(&self) -> Vec<Relationship> {
        self.related_volumes
            .iter()
            .filter(|r| !r.burned)
            .copied()
            .collect()
    }

    /// True when every field set on `pattern` equals the same field on this record.
    pub fn matches(&self, pattern: &FilePattern) -> bool {
        fn field<T: PartialEq>(want: &Option<T>, have: &T) -> bool {
            want.as_ref().map_or(true, |w| w == have)
        }

        field(&pattern.file_name, &self.file_name)
            && field(&pattern.original_path, &self.original_path)
            && field(&pattern.size_in_bytes, &self.size_in_bytes)
            && field(&pattern.last_modified, &self.last_modified)
            && field(&pattern.checksum, &self.checksum)
            && field(&pattern.hash_type, &self.hash_type)
            && field(&pattern.status, &self.status)
            && field(&pattern.monolithic, &self.monolithic)
            && field(&pattern.related_volumes, &self.related_volumes)
    }
}

/// Partial record used for lookups. Only fields that are set take part in the
/// comparison; a value of `Some(None)` matches records where that field is unset.
#[derive(Debug, Clone, Default)]
pub struct FilePattern {
    pub file_name: Option<Option<String>>,
    pub original_path: Option<Option<String>>,
    pub size_in_bytes: Option<Option<u64>>,
    pub last_modified: Option<Option<DateTime<Utc>>>,
    pub checksum: Option<Option<Vec<u8>>>,
    pub hash_type: Option<HashType>,
    pub status: Option<Option<FileStatus>>,
    pub monolithic: Option<MonolithicCollection>,
    pub related_volumes: Option<RelatedVolumes>,
}

impl FilePattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(Some(name.into()));
        self
    }

    pub fn original_path(mut self, path: impl Into<String>) -> Self {
        self.original_path = Some(Some(path.into()));
        self
    }

    pub fn size_in_bytes(mut self, size: u64) -> Self {
        self.size_in_bytes = Some(Some(size));
        self
    }

    pub fn checksum(mut self, checksum: Vec<u8>) -> Self {
        self.checksum = Some(Some(checksum));
        self
    }

    pub fn hash_type(mut self, hash_type: HashType) -> Self {
        self.hash_type = Some(hash_type);
        self
    }

    pub fn status(mut self, status: FileStatus) -> Self {
        self.status = Some(Some(status));
        self
    }

    pub fn monolithic(mut self, collection: MonolithicCollection) -> Self {
        self.monolithic = Some(collection);
        self
    }
}

/// Shared, individually guarded file record. Collections and volumes hold
/// clones of the same handle.
#[derive(Debug, Clone)]
pub struct FileHandle(Arc<Mutex<FileRecord>>);

impl FileHandle {
    pub fn new(record: FileRecord) -> Self {
        Self(Arc::new(Mutex::new(record)))
    }

    pub fn lock(&self) -> MutexGuard<'_, FileRecord> {
        self.0.lock()
    }

    pub fn snapshot(&self) -> FileRecord {
        self.0.lock().clone()
    }

    pub fn path(&self) -> Option<String> {
        self.0.lock().original_path.clone()
    }

    pub fn size(&self) -> Option<u64> {
        self.0.lock().size_in_bytes
    }

    pub fn status(&self) -> Option<FileStatus> {
        self.0.lock().status
    }

    pub fn set_status(&self, status: FileStatus) {
        self.0.lock().status = Some(status);
    }

    pub fn same_record(&self, other: &FileHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<FileRecord> for FileHandle {
    fn from(record: FileRecord) -> Self {
        Self::new(record)
    }
}
