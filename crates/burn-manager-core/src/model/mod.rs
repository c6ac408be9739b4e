mod file_record;
mod volume;

pub use file_record::{
    FileHandle, FilePattern, FileRecord, FileStatus, HashType, MonolithicCollection,
    RelatedVolumes, Relationship,
};
pub use volume::{IdAllocator, SequentialIds, VolumeHandle, VolumeManifest, VolumeRecord};

/// Volume identifier. Negative values mean "not yet assigned".
pub type VolumeId = i32;

pub const UNASSIGNED_VOLUME_ID: VolumeId = -1;
