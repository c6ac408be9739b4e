mod dataset;
mod file_collection;
mod snapshot;
mod volume_list;

pub use dataset::{Dataset, FORMAT_VERSION};
pub use file_collection::{CollectionEvent, CollectionObserver, FileCollection};
pub use snapshot::{DatasetSnapshot, VolumeSnapshot};
pub use volume_list::VolumeList;

use crate::error::ResultCode;
use crate::model::FileHandle;

/// Destination for records discovered during ingestion.
pub trait FileSink: Send + Sync {
    fn add_file(&self, file: FileHandle) -> ResultCode;
}
