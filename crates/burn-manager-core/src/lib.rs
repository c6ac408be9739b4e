pub mod checksum_pipeline;
pub mod config;
pub mod error;
pub mod hasher;
pub mod ingest;
pub mod model;
pub mod procedure;
pub mod progress;
pub mod sorter;
pub mod staging;
pub mod store;

pub use checksum_pipeline::ChecksumPipeline;
pub use config::AppConfig;
pub use error::{Error, ResultCode};
pub use ingest::FolderIngestPipeline;
pub use model::{FileHandle, FileRecord, FileStatus, HashType, VolumeHandle, VolumeId, VolumeRecord};
pub use procedure::{LongRunningProcedure, ProcedureHandle, ProcedureOutcome, ProcedureReport};
pub use progress::{ProgressReporter, SilentReporter};
pub use store::{Dataset, FileCollection, FileSink, VolumeList};
