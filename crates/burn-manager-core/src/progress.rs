use crate::error::ResultCode;

/// Progress callbacks for long-running operations.
///
/// The CLI renders these with indicatif; library callers that don't care use
/// [`SilentReporter`]. Every method defaults to a no-op.
pub trait ProgressReporter: Send + Sync {
    fn on_operation_start(&self, _name: &str) {}
    fn on_operation_finish(&self, _name: &str, _code: ResultCode) {}
    fn on_ingest_progress(&self, _files_found: usize, _current_dir: &str) {}
    fn on_checksum_progress(&self, _files_done: usize, _files_queued: usize) {}
}

pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
