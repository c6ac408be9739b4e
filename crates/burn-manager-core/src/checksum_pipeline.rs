use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Error;
use crate::hasher::{generate_checksums, Checksummer};
use crate::model::FileHandle;
use crate::procedure::{
    spawn_worker, CompletionCallback, LongRunningProcedure, ProcedureControl, ProcedureHandle,
    ProcedureReport, ProcedureState,
};
use crate::progress::{ProgressReporter, SilentReporter};

/// Background worker that checksums queued batches of files.
///
/// Batches are taken newest first; files within a batch are hashed in
/// parallel. Cloning yields another handle on the same pipeline.
#[derive(Clone)]
pub struct ChecksumPipeline {
    control: Arc<ProcedureControl<Vec<Vec<FileHandle>>>>,
    checksummer: Arc<dyn Checksummer>,
    overwrite_existing: bool,
    reporter: Arc<dyn ProgressReporter>,
}

impl ChecksumPipeline {
    pub fn new(checksummer: Arc<dyn Checksummer>) -> Self {
        Self {
            control: Arc::new(ProcedureControl::new("checksum", Vec::new())),
            checksummer,
            overwrite_existing: false,
            reporter: Arc::new(SilentReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Recompute checksums on files that already have one.
    pub fn overwrite_existing(mut self, overwrite: bool) -> Self {
        self.overwrite_existing = overwrite;
        self
    }

    pub fn add_batch(&self, batch: Vec<FileHandle>) {
        if batch.is_empty() {
            return;
        }
        debug!("Queued checksum batch of {} files", batch.len());
        self.control.push_with(|queue| queue.push(batch));
    }

    pub fn queued_batches(&self) -> usize {
        self.control.queued()
    }

    fn run(
        control: &ProcedureControl<Vec<Vec<FileHandle>>>,
        checksummer: &dyn Checksummer,
        overwrite_existing: bool,
        reporter: &dyn ProgressReporter,
    ) -> ProcedureReport {
        reporter.on_operation_start(control.name());
        let mut report = ProcedureReport::new(control.outcome());

        while let Some(batch) = control.next_work() {
            let failures = generate_checksums(&batch, overwrite_existing, checksummer);
            report.files_processed += batch.len() - failures.len();
            report.failures.extend(failures);

            let done = report.files_processed + report.failures.len();
            let queued: usize = control.inspect(|batches| batches.iter().map(Vec::len).sum());
            reporter.on_checksum_progress(done, done + queued);
        }

        report.outcome = control.outcome();
        info!(
            "Checksummed {} files ({} failed), {:?}",
            report.files_processed,
            report.failures.len(),
            report.outcome
        );
        reporter.on_operation_finish(control.name(), report.result_code());
        report
    }
}

impl LongRunningProcedure for ChecksumPipeline {
    fn name(&self) -> &str {
        self.control.name()
    }

    fn start_operation(&self) -> Result<ProcedureHandle, Error> {
        if !self.control.begin() {
            return Ok(self.control.handle());
        }
        let checksummer = Arc::clone(&self.checksummer);
        let reporter = Arc::clone(&self.reporter);
        let overwrite = self.overwrite_existing;
        spawn_worker(
            Arc::clone(&self.control),
            "burn-checksum".to_string(),
            move |control| Self::run(control, &*checksummer, overwrite, &*reporter),
        )?;
        Ok(self.control.handle())
    }

    fn end_when_complete(&self) {
        self.control.request_drain();
    }

    fn end_immediately(&self) {
        self.control.request_halt();
    }

    fn state(&self) -> ProcedureState {
        self.control.state()
    }

    fn on_completion(&self, callback: CompletionCallback) {
        self.control.set_callback(callback);
    }
}
