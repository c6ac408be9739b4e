//! Breadth-first folder ingestion feeding a checksum pipeline.
//!
//! A walker thread lists queued directories, hands each discovered file to a
//! [`FileSink`] and buffers the accepted ones. A handoff thread forwards the
//! buffer to the owned [`ChecksumPipeline`] in batches, flushes the remainder
//! once the walk ends, then drains the checksum pipeline. The ingest
//! procedure is complete only when both have stopped.

use glob::Pattern;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::checksum_pipeline::ChecksumPipeline;
use crate::error::{Error, ResultCode};
use crate::hasher::{status_for_io_error, Checksummer, FileFailure};
use crate::model::{FileHandle, FileRecord, FileStatus};
use crate::procedure::{
    spawn_worker, CompletionCallback, LongRunningProcedure, ProcedureControl, ProcedureHandle,
    ProcedureOutcome, ProcedureReport, ProcedureState,
};
use crate::progress::{ProgressReporter, SilentReporter};
use crate::store::FileSink;

pub const DEFAULT_BATCH_SIZE: usize = 50;

struct BufferState {
    files: Vec<FileHandle>,
    walking: bool,
}

/// Accepted files waiting to be checksummed.
struct IngestBuffer {
    state: Mutex<BufferState>,
    changed: Condvar,
}

impl IngestBuffer {
    fn new() -> Self {
        Self {
            state: Mutex::new(BufferState {
                files: Vec::new(),
                walking: false,
            }),
            changed: Condvar::new(),
        }
    }

    fn push(&self, file: FileHandle) {
        self.state.lock().files.push(file);
        self.changed.notify_all();
    }

    fn set_walking(&self, walking: bool) {
        self.state.lock().walking = walking;
        self.changed.notify_all();
    }

    fn take(&self, size_limit: usize) -> Option<Vec<FileHandle>> {
        let mut state = self.state.lock();
        if state.walking && size_limit > 0 && state.files.len() < size_limit {
            return None;
        }
        Some(std::mem::take(&mut state.files))
    }

    /// Blocks until `size_limit` files are buffered or the walk has ended, then
    /// takes the buffer. The flag reports whether the walk was still going.
    fn wait_for_batch(&self, size_limit: usize) -> (Vec<FileHandle>, bool) {
        let mut state = self.state.lock();
        while state.walking && state.files.len() < size_limit.max(1) {
            self.changed.wait(&mut state);
        }
        (std::mem::take(&mut state.files), state.walking)
    }
}

struct WalkOutcome {
    added: usize,
    rejected: usize,
    failures: Vec<FileFailure>,
}

/// Recursively adds folders to a [`FileSink`] and checksums what was added.
pub struct FolderIngestPipeline {
    control: Arc<ProcedureControl<VecDeque<PathBuf>>>,
    buffer: Arc<IngestBuffer>,
    sink: Arc<dyn FileSink>,
    checksums: ChecksumPipeline,
    ignore_patterns: Arc<Vec<Pattern>>,
    batch_size: usize,
    reporter: Arc<dyn ProgressReporter>,
}

impl FolderIngestPipeline {
    pub fn new(sink: Arc<dyn FileSink>, checksummer: Arc<dyn Checksummer>) -> Self {
        Self {
            control: Arc::new(ProcedureControl::new("ingest", VecDeque::new())),
            buffer: Arc::new(IngestBuffer::new()),
            sink,
            checksums: ChecksumPipeline::new(checksummer),
            ignore_patterns: Arc::new(Vec::new()),
            batch_size: DEFAULT_BATCH_SIZE,
            reporter: Arc::new(SilentReporter),
        }
    }

    /// Files and directories matching any of `globs` are skipped. Invalid
    /// patterns are logged and dropped.
    pub fn with_ignore_patterns<S: AsRef<str>>(mut self, globs: &[S]) -> Self {
        let patterns = globs
            .iter()
            .filter_map(|glob| match Pattern::new(glob.as_ref()) {
                Ok(p) => Some(p),
                Err(e) => {
                    error!("Invalid glob pattern '{}': {}", glob.as_ref(), e);
                    None
                }
            })
            .collect();
        self.ignore_patterns = Arc::new(patterns);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.checksums = self.checksums.with_reporter(Arc::clone(&reporter));
        self.reporter = reporter;
        self
    }

    /// Appends `folder` to the traversal queue.
    pub fn add_folder_to_queue(&self, folder: impl Into<PathBuf>) {
        let folder = folder.into();
        debug!("Queued folder {}", folder.display());
        self.control.push_with(|queue| queue.push_back(folder));
    }

    /// Takes the buffered files. While the walk is running this returns `None`
    /// unless at least `size_limit` files are buffered; afterwards it returns
    /// whatever remains. The pipeline's own handoff thread drains the same
    /// buffer.
    pub fn get_buffer_contents_and_clear(&self, size_limit: usize) -> Option<Vec<FileHandle>> {
        self.buffer.take(size_limit)
    }

    pub fn checksums(&self) -> &ChecksumPipeline {
        &self.checksums
    }

    fn is_ignored(patterns: &[Pattern], path: &Path) -> bool {
        patterns.iter().any(|pattern| pattern.matches_path(path))
    }

    fn walk(
        control: &ProcedureControl<VecDeque<PathBuf>>,
        sink: &dyn FileSink,
        buffer: &IngestBuffer,
        ignore_patterns: &[Pattern],
        batch_size: usize,
        reporter: &dyn ProgressReporter,
    ) -> WalkOutcome {
        let mut outcome = WalkOutcome {
            added: 0,
            rejected: 0,
            failures: Vec::new(),
        };

        while let Some(dir) = control.next_work() {
            if Self::is_ignored(ignore_patterns, &dir) {
                continue;
            }
            reporter.on_ingest_progress(outcome.added, &dir.to_string_lossy());

            let mut subdirs = Vec::new();
            let entries = WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(1)
                .follow_links(false)
                .sort_by_file_name();
            for entry in entries {
                if control.is_halted() {
                    break;
                }
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        let status = err
                            .io_error()
                            .map_or(FileStatus::AccessError, status_for_io_error);
                        let path = err.path().unwrap_or(&dir).to_string_lossy().into_owned();
                        warn!("Cannot read {}: {}", path, err);
                        outcome
                            .failures
                            .push(FileFailure::new(Some(path), status, err.to_string()));
                        continue;
                    }
                };

                let path = entry.path();
                if Self::is_ignored(ignore_patterns, path) {
                    continue;
                }
                let file_type = entry.file_type();
                if file_type.is_dir() {
                    subdirs.push(path.to_path_buf());
                } else if file_type.is_file() {
                    match FileRecord::from_path(path) {
                        Ok(record) => {
                            let file = FileHandle::new(record);
                            if sink.add_file(file.clone()) == ResultCode::Successful {
                                outcome.added += 1;
                                buffer.push(file);
                                if outcome.added % batch_size == 0 {
                                    debug!("Ingested {} files", outcome.added);
                                }
                            } else {
                                outcome.rejected += 1;
                            }
                        }
                        Err(err) => {
                            warn!("Cannot ingest {}: {}", path.display(), err);
                            outcome.failures.push(FileFailure::new(
                                Some(path.to_string_lossy().into_owned()),
                                status_for_io_error(&err),
                                err.to_string(),
                            ));
                        }
                    }
                }
            }

            for subdir in subdirs {
                if control.is_halted() {
                    break;
                }
                control.push_with(|queue| queue.push_back(subdir));
            }
        }

        info!(
            "Walk finished: {} files added, {} rejected, {} failures",
            outcome.added,
            outcome.rejected,
            outcome.failures.len()
        );
        outcome
    }

    fn hand_off(
        control: &ProcedureControl<VecDeque<PathBuf>>,
        buffer: &IngestBuffer,
        checksums: &ChecksumPipeline,
        batch_size: usize,
        walker: std::thread::JoinHandle<WalkOutcome>,
        reporter: &dyn ProgressReporter,
    ) -> ProcedureReport {
        let checksum_handle = match checksums.start_operation() {
            Ok(handle) => Some(handle),
            Err(err) => {
                error!("Cannot start checksum pipeline: {}", err);
                None
            }
        };

        loop {
            let (batch, walking) = buffer.wait_for_batch(batch_size);
            if checksum_handle.is_some() {
                checksums.add_batch(batch);
            }
            if !walking {
                break;
            }
        }

        let mut report = ProcedureReport::new(ProcedureOutcome::Drained);
        match walker.join() {
            Ok(walk) => {
                report.files_processed = walk.added;
                report.files_skipped = walk.rejected;
                report.failures = walk.failures;
            }
            Err(_) => {
                error!("ingest walker panicked");
                report.failures.push(FileFailure::new(
                    None,
                    FileStatus::AccessError,
                    "folder walk aborted",
                ));
            }
        }

        if control.is_halted() {
            checksums.end_immediately();
        } else {
            checksums.end_when_complete();
        }
        if let Some(handle) = checksum_handle {
            match handle.wait() {
                Ok(checksummed) => report.failures.extend(checksummed.failures),
                Err(err) => report.failures.push(FileFailure::new(
                    None,
                    FileStatus::AccessError,
                    err.to_string(),
                )),
            }
        }

        report.outcome = control.outcome();
        reporter.on_operation_finish(control.name(), report.result_code());
        report
    }
}

impl LongRunningProcedure for FolderIngestPipeline {
    fn name(&self) -> &str {
        self.control.name()
    }

    fn start_operation(&self) -> Result<ProcedureHandle, Error> {
        if !self.control.begin() {
            return Ok(self.control.handle());
        }
        self.reporter.on_operation_start(self.control.name());
        self.buffer.set_walking(true);

        let walker = {
            let control = Arc::clone(&self.control);
            let sink = Arc::clone(&self.sink);
            let buffer = Arc::clone(&self.buffer);
            let patterns = Arc::clone(&self.ignore_patterns);
            let reporter = Arc::clone(&self.reporter);
            let batch_size = self.batch_size;
            std::thread::Builder::new()
                .name("burn-ingest-walk".to_string())
                .spawn(move || {
                    // Clear the flag even if the walk panics so the handoff can finish.
                    struct EndOfWalk<'a>(&'a IngestBuffer);
                    impl Drop for EndOfWalk<'_> {
                        fn drop(&mut self) {
                            self.0.set_walking(false);
                        }
                    }
                    let _end = EndOfWalk(&buffer);
                    Self::walk(&control, &*sink, &buffer, &patterns, batch_size, &*reporter)
                })
        };
        let walker = match walker {
            Ok(walker) => walker,
            Err(err) => {
                self.buffer.set_walking(false);
                self.control.finish(Some(ProcedureReport::new(ProcedureOutcome::Halted)));
                return Err(err.into());
            }
        };

        let buffer = Arc::clone(&self.buffer);
        let checksums = self.checksums.clone();
        let reporter = Arc::clone(&self.reporter);
        let batch_size = self.batch_size;
        spawn_worker(
            Arc::clone(&self.control),
            "burn-ingest-handoff".to_string(),
            move |control| {
                Self::hand_off(control, &buffer, &checksums, batch_size, walker, &*reporter)
            },
        )?;
        Ok(self.control.handle())
    }

    /// Finishes the queued folders, then drains the checksum pipeline.
    fn end_when_complete(&self) {
        self.control.request_drain();
    }

    fn end_immediately(&self) {
        self.control.request_halt();
        self.checksums.end_immediately();
    }

    fn state(&self) -> ProcedureState {
        self.control.state()
    }

    fn on_completion(&self, callback: CompletionCallback) {
        self.control.set_callback(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::Blake3Checksummer;
    use crate::store::FileCollection;
    use std::fs;
    use tempfile::tempdir;

    fn pipeline(sink: Arc<FileCollection>) -> FolderIngestPipeline {
        FolderIngestPipeline::new(sink, Arc::new(Blake3Checksummer)).with_batch_size(2)
    }

    #[test]
    fn test_buffer_withholds_partial_batch_while_walking() {
        let buffer = IngestBuffer::new();
        buffer.set_walking(true);
        buffer.push(FileHandle::new(FileRecord::new("/a")));
        assert!(buffer.take(2).is_none());
        assert_eq!(buffer.take(0).map(|b| b.len()), Some(1));

        buffer.push(FileHandle::new(FileRecord::new("/b")));
        buffer.set_walking(false);
        assert_eq!(buffer.take(10).map(|b| b.len()), Some(1));
        assert_eq!(buffer.take(10).map(|b| b.len()), Some(0));
    }

    #[test]
    fn test_ingest_walks_subfolders_and_checksums() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub/deeper")).unwrap();
        fs::write(dir.path().join("top.txt"), b"top").unwrap();
        fs::write(dir.path().join("sub/mid.txt"), b"mid").unwrap();
        fs::write(dir.path().join("sub/deeper/low.txt"), b"low").unwrap();

        let collection = Arc::new(FileCollection::new());
        let ingest = pipeline(Arc::clone(&collection));
        ingest.add_folder_to_queue(dir.path());
        let handle = ingest.start_operation().unwrap();
        ingest.end_when_complete();
        let report = handle.wait().unwrap();

        assert_eq!(report.outcome, ProcedureOutcome::Drained);
        assert_eq!(report.files_processed, 3);
        assert!(report.failures.is_empty());
        assert_eq!(collection.len(), 3);
        assert_eq!(collection.total_size(), 9);
        assert!(collection.files().iter().all(|f| f.lock().has_checksum()));
        assert!(ingest.is_complete());
        assert!(ingest.checksums().is_complete());
    }

    #[test]
    fn test_ignore_patterns_skip_files_and_folders() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("skipme")).unwrap();
        fs::write(dir.path().join("keep.txt"), b"k").unwrap();
        fs::write(dir.path().join("drop.tmp"), b"d").unwrap();
        fs::write(dir.path().join("skipme/inner.txt"), b"i").unwrap();

        let collection = Arc::new(FileCollection::new());
        let ingest = pipeline(Arc::clone(&collection)).with_ignore_patterns(&["*.tmp", "*skipme"]);
        ingest.add_folder_to_queue(dir.path());
        ingest.end_when_complete();
        ingest.start_operation().unwrap().wait().unwrap();

        assert_eq!(collection.paths().len(), 1);
        assert!(collection.paths()[0].ends_with("keep.txt"));
    }

    #[test]
    fn test_duplicates_are_not_checksummed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, b"a").unwrap();

        let collection = Arc::new(FileCollection::new());
        collection.add(FileHandle::new(FileRecord::new(path.to_string_lossy().into_owned())));
        let ingest = pipeline(Arc::clone(&collection));
        ingest.add_folder_to_queue(dir.path());
        ingest.end_when_complete();
        let report = ingest.start_operation().unwrap().wait().unwrap();

        assert_eq!(report.files_processed, 0);
        assert_eq!(report.files_skipped, 1);
        assert!(!collection.files()[0].lock().has_checksum());
    }

    #[test]
    fn test_missing_folder_is_reported_and_walk_continues() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("real.txt"), b"r").unwrap();

        let collection = Arc::new(FileCollection::new());
        let ingest = pipeline(Arc::clone(&collection));
        ingest.add_folder_to_queue(dir.path().join("does-not-exist"));
        ingest.add_folder_to_queue(dir.path());
        ingest.end_when_complete();
        let report = ingest.start_operation().unwrap().wait().unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].status, FileStatus::FileMissing);
        assert_eq!(collection.len(), 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_file_name_is_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempdir().unwrap();
        fs::write(dir.path().join(OsStr::from_bytes(b"caf\xe9.txt")), b"x").unwrap();
        fs::write(dir.path().join("plain.txt"), b"y").unwrap();

        let collection = Arc::new(FileCollection::new());
        let ingest = pipeline(Arc::clone(&collection));
        ingest.add_folder_to_queue(dir.path());
        ingest.end_when_complete();
        let report = ingest.start_operation().unwrap().wait().unwrap();

        assert_eq!(collection.len(), 1);
        assert!(collection.files()[0].path().unwrap().ends_with("plain.txt"));
        assert_eq!(report.files_processed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].status, FileStatus::BadData);
    }

    #[test]
    fn test_end_immediately_halts_both_stages() {
        let collection = Arc::new(FileCollection::new());
        let ingest = pipeline(Arc::clone(&collection));
        let handle = ingest.start_operation().unwrap();
        ingest.end_immediately();

        let report = handle.wait().unwrap();
        assert_eq!(report.outcome, ProcedureOutcome::Halted);
        assert!(ingest.checksums().is_complete());
    }
}
