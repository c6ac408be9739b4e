use dashmap::DashMap;
use rayon::prelude::*;
use std::fs::File;
use std::io;
use tracing::{debug, warn};

use super::{checksummer_for, Checksummer};
use crate::model::{FileHandle, FileStatus};

/// A file (or directory) that could not be processed, with the status recorded
/// on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: Option<String>,
    pub status: FileStatus,
    pub reason: String,
}

impl FileFailure {
    pub fn new(path: Option<String>, status: FileStatus, reason: impl Into<String>) -> Self {
        Self {
            path,
            status,
            reason: reason.into(),
        }
    }
}

pub(crate) fn status_for_io_error(err: &io::Error) -> FileStatus {
    match err.kind() {
        io::ErrorKind::NotFound => FileStatus::FileMissing,
        io::ErrorKind::InvalidData => FileStatus::BadData,
        _ => FileStatus::AccessError,
    }
}

/// Checksums every file in `files` in parallel.
///
/// Files that already carry a checksum are skipped unless `overwrite_existing`.
/// On success the record gets the digest, the algorithm and `Good`; on failure
/// the matching status is set and the failure returned, in input order.
pub fn generate_checksums(
    files: &[FileHandle],
    overwrite_existing: bool,
    checksummer: &dyn Checksummer,
) -> Vec<FileFailure> {
    let failures: DashMap<usize, FileFailure> = DashMap::new();

    files.par_iter().enumerate().for_each(|(index, file)| {
        if let Err(failure) = checksum_one(file, overwrite_existing, checksummer) {
            failures.insert(index, failure);
        }
    });

    let mut failures: Vec<_> = failures.into_iter().collect();
    failures.sort_by_key(|(index, _)| *index);
    failures.into_iter().map(|(_, failure)| failure).collect()
}

fn checksum_one(
    file: &FileHandle,
    overwrite_existing: bool,
    checksummer: &dyn Checksummer,
) -> Result<(), FileFailure> {
    let mut record = file.lock();
    if record.has_checksum() && !overwrite_existing {
        return Ok(());
    }
    let Some(path) = record.original_path.clone() else {
        record.status = Some(FileStatus::BadData);
        return Err(FileFailure::new(None, FileStatus::BadData, "record has no path"));
    };

    match File::open(&path).and_then(|mut f| checksummer.checksum(&mut f)) {
        Ok(digest) => {
            record.checksum = Some(digest);
            record.hash_type = checksummer.hash_type();
            record.status = Some(FileStatus::Good);
            Ok(())
        }
        Err(err) => {
            let status = status_for_io_error(&err);
            warn!("Checksum failed for {}: {}", path, err);
            record.status = Some(status);
            Err(FileFailure::new(Some(path), status, err.to_string()))
        }
    }
}

/// Re-reads each checksummed file and compares against the stored digest,
/// using the algorithm recorded on the file. Files without a checksum are
/// skipped. Runs sequentially.
pub fn verify_checksums(files: &[FileHandle]) -> Vec<FileFailure> {
    let mut failures = Vec::new();
    for file in files {
        let mut record = file.lock();
        let Some(expected) = record.checksum.clone().filter(|c| !c.is_empty()) else {
            continue;
        };
        let path = record.original_path.clone();
        let Some(path_str) = path.clone() else {
            record.status = Some(FileStatus::BadData);
            failures.push(FileFailure::new(None, FileStatus::BadData, "record has no path"));
            continue;
        };
        let Some(checksummer) = checksummer_for(record.hash_type) else {
            record.status = Some(FileStatus::ChecksumError);
            failures.push(FileFailure::new(
                path,
                FileStatus::ChecksumError,
                "checksum present without a hash type",
            ));
            continue;
        };

        match File::open(&path_str).and_then(|mut f| checksummer.checksum(&mut f)) {
            Ok(actual) if actual == expected => {
                debug!("Verified {}", path_str);
                record.status = Some(FileStatus::Good);
            }
            Ok(_) => {
                warn!("Checksum mismatch for {}", path_str);
                record.status = Some(FileStatus::ChecksumError);
                failures.push(FileFailure::new(path, FileStatus::ChecksumError, "checksum mismatch"));
            }
            Err(err) => {
                let status = status_for_io_error(&err);
                record.status = Some(status);
                failures.push(FileFailure::new(path, status, err.to_string()));
            }
        }
    }
    failures
}
