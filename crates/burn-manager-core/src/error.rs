use std::fmt;
use thiserror::Error;

use crate::model::VolumeId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid snapshot document: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("No volume with id {volume_id} (referenced by {path})")]
    MissingVolume { volume_id: VolumeId, path: String },

    #[error("Multiple volumes share the id {0}")]
    DuplicateVolumeId(VolumeId),

    #[error("{path} is a member of volume {volume_id} but holds no relationship to it")]
    MissingRelationship { volume_id: VolumeId, path: String },

    #[error("Volume has no identifier allocator assigned")]
    MissingIdAllocator,

    #[error("No free volume identifier remains")]
    IdSpaceExhausted,

    #[error("Worker thread for '{0}' panicked")]
    WorkerPanicked(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Coarse classification for callers that only branch on outcome.
    pub fn result_code(&self) -> ResultCode {
        match self {
            Error::InvalidJson(_) => ResultCode::InvalidJson,
            Error::MissingIdAllocator => ResultCode::NullValue,
            Error::Io(err) if err.kind() == std::io::ErrorKind::NotFound => ResultCode::InvalidPath,
            _ => ResultCode::Unsuccessful,
        }
    }
}

/// Operation-level outcome. Distinguishes "nothing to do" from "partial success"
/// from "hard failure" without resorting to booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Successful,
    Unsuccessful,
    NullValue,
    InvalidJson,
    InvalidPath,
    LogAlreadyExists,
    FinishedWithErrors,
}

impl ResultCode {
    pub fn is_success(self) -> bool {
        self == ResultCode::Successful
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResultCode::Successful => "successful",
            ResultCode::Unsuccessful => "unsuccessful",
            ResultCode::NullValue => "null value",
            ResultCode::InvalidJson => "invalid json",
            ResultCode::InvalidPath => "invalid path",
            ResultCode::LogAlreadyExists => "log already exists",
            ResultCode::FinishedWithErrors => "finished with errors",
        };
        f.write_str(s)
    }
}
