use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{Error, ResultCode};
use crate::hasher::status_for_io_error;
use crate::model::{FileStatus, VolumeRecord};

/// File name of the manifest written next to a staged volume.
pub fn log_file_name(volume: &VolumeRecord) -> String {
    format!("{}Log.txt", volume.name)
}

/// Copies `source` to `dest`, refusing to replace a file that already exists.
fn copy_new(source: &Path, dest: &Path) -> io::Result<u64> {
    let mut reader = File::open(source)?;
    let mut writer = OpenOptions::new().write(true).create_new(true).open(dest)?;
    io::copy(&mut reader, &mut writer)
}

/// Copies every member of `volume` into `dest_dir` and, unless `skip_log`,
/// writes the volume's manifest as `<name>Log.txt`.
///
/// Returns `InvalidPath` if `dest_dir` is not a directory and
/// `LogAlreadyExists` if a manifest is already there; nothing is copied in
/// either case. Members that are missing or unreadable are marked on their
/// record and yield `FinishedWithErrors`, as do members whose file name is
/// already taken in `dest_dir`; an existing file is never overwritten.
pub fn stage_volume(volume: &VolumeRecord, dest_dir: &Path, skip_log: bool) -> Result<ResultCode, Error> {
    if !dest_dir.is_dir() {
        return Ok(ResultCode::InvalidPath);
    }
    let log_path = dest_dir.join(log_file_name(volume));
    if !skip_log && log_path.exists() {
        return Ok(ResultCode::LogAlreadyExists);
    }

    let mut errors = 0usize;
    for member in volume.members() {
        let mut record = member.lock();
        let Some(source) = record.original_path.clone() else {
            record.status = Some(FileStatus::BadData);
            errors += 1;
            continue;
        };
        let source = Path::new(&source);
        let Some(name) = source.file_name() else {
            record.status = Some(FileStatus::BadData);
            errors += 1;
            continue;
        };
        if !source.is_file() {
            warn!("Staging skipped missing file {}", source.display());
            record.status = Some(FileStatus::FileMissing);
            errors += 1;
            continue;
        }
        if let Err(err) = copy_new(source, &dest_dir.join(name)) {
            warn!("Staging failed for {}: {}", source.display(), err);
            record.status = Some(status_for_io_error(&err));
            errors += 1;
        }
    }

    if !skip_log {
        fs::write(&log_path, volume.manifest_json()?)?;
    }

    info!(
        "Staged volume {} into {} ({} errors)",
        volume.id(),
        dest_dir.display(),
        errors
    );
    Ok(if errors == 0 {
        ResultCode::Successful
    } else {
        ResultCode::FinishedWithErrors
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileHandle, FileRecord};
    use tempfile::tempdir;

    fn staged_volume(source_dir: &Path) -> (VolumeRecord, FileHandle) {
        let path = source_dir.join("song.flac");
        fs::write(&path, b"audio").unwrap();
        let file = FileHandle::new(FileRecord::from_path(&path).unwrap());
        file.lock().checksum = Some(vec![0xab]);

        let mut volume = VolumeRecord::new(1_000).with_name("Disc");
        volume.set_identifier_to(3);
        volume.add(&file);
        (volume, file)
    }

    #[test]
    fn test_stage_copies_files_and_writes_log() {
        let source = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let (volume, _) = staged_volume(source.path());

        assert_eq!(stage_volume(&volume, dest.path(), false).unwrap(), ResultCode::Successful);
        assert_eq!(fs::read(dest.path().join("song.flac")).unwrap(), b"audio");

        let log = fs::read_to_string(dest.path().join("DiscLog.txt")).unwrap();
        let manifest: serde_json::Value = serde_json::from_str(&log).unwrap();
        assert_eq!(manifest["volumeId"], 3);
        assert_eq!(manifest["name"], "Disc");
    }

    #[test]
    fn test_existing_log_blocks_staging() {
        let source = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let (volume, _) = staged_volume(source.path());
        fs::write(dest.path().join("DiscLog.txt"), b"old").unwrap();

        assert_eq!(
            stage_volume(&volume, dest.path(), false).unwrap(),
            ResultCode::LogAlreadyExists
        );
        assert!(!dest.path().join("song.flac").exists());
        assert_eq!(stage_volume(&volume, dest.path(), true).unwrap(), ResultCode::Successful);
    }

    #[test]
    fn test_same_file_name_is_not_overwritten() {
        let source = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let mut volume = VolumeRecord::new(1_000).with_name("Disc");
        volume.set_identifier_to(1);
        let mut files = Vec::new();
        for (dir, contents) in [("a", b"first"), ("b", b"other")] {
            let path = source.path().join(dir).join("track.flac");
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, contents).unwrap();
            let file = FileHandle::new(FileRecord::from_path(&path).unwrap());
            volume.add(&file);
            files.push(file);
        }

        assert_eq!(
            stage_volume(&volume, dest.path(), false).unwrap(),
            ResultCode::FinishedWithErrors
        );
        assert_eq!(fs::read(dest.path().join("track.flac")).unwrap(), b"first");
        assert_eq!(files[0].status(), None);
        assert_eq!(files[1].status(), Some(FileStatus::AccessError));
    }

    #[test]
    fn test_invalid_destination() {
        let source = tempdir().unwrap();
        let (volume, _) = staged_volume(source.path());
        let missing = source.path().join("nowhere");
        assert_eq!(stage_volume(&volume, &missing, false).unwrap(), ResultCode::InvalidPath);
    }

    #[test]
    fn test_missing_member_finishes_with_errors() {
        let source = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let (volume, file) = staged_volume(source.path());
        fs::remove_file(source.path().join("song.flac")).unwrap();

        assert_eq!(
            stage_volume(&volume, dest.path(), false).unwrap(),
            ResultCode::FinishedWithErrors
        );
        assert_eq!(file.status(), Some(FileStatus::FileMissing));
        assert!(dest.path().join("DiscLog.txt").exists());
    }
}
