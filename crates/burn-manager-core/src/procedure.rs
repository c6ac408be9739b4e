//! Lifecycle shared by the background pipelines.
//!
//! A procedure moves `Idle -> Running`, then either `Draining` (finish queued
//! work, then stop) or `Halted` (stop at the next check, discarding queued
//! work), and finally `Stopped`. Completion is reported exactly once, through
//! the [`ProcedureHandle`] returned by `start_operation` and an optional
//! callback.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::error::{Error, ResultCode};
use crate::hasher::FileFailure;
use crate::model::FileStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureOutcome {
    /// All queued work was processed.
    Drained,
    /// Stopped early on request; remaining work was discarded.
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureState {
    Idle,
    Running,
    Draining,
    Halted,
    Stopped(ProcedureOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureReport {
    pub outcome: ProcedureOutcome,
    pub files_processed: usize,
    /// Files seen but not processed (duplicates, already checksummed).
    pub files_skipped: usize,
    pub failures: Vec<FileFailure>,
}

impl ProcedureReport {
    pub fn new(outcome: ProcedureOutcome) -> Self {
        Self {
            outcome,
            files_processed: 0,
            files_skipped: 0,
            failures: Vec::new(),
        }
    }

    pub fn result_code(&self) -> ResultCode {
        if self.failures.is_empty() {
            ResultCode::Successful
        } else {
            ResultCode::FinishedWithErrors
        }
    }
}

pub type CompletionCallback = Box<dyn FnOnce(&ProcedureReport) + Send>;

/// Long-running background operation with cooperative shutdown.
pub trait LongRunningProcedure {
    fn name(&self) -> &str;

    /// Spawns the worker. Calling it again returns a handle to the same run.
    fn start_operation(&self) -> Result<ProcedureHandle, Error>;

    /// Finish everything queued, then stop.
    fn end_when_complete(&self);

    /// Stop at the next check; queued work is discarded.
    fn end_immediately(&self);

    fn state(&self) -> ProcedureState;

    /// Registers a callback fired once when the procedure stops. Replaces any
    /// previous registration.
    fn on_completion(&self, callback: CompletionCallback);

    fn is_running(&self) -> bool {
        matches!(
            self.state(),
            ProcedureState::Running | ProcedureState::Draining | ProcedureState::Halted
        )
    }

    fn is_complete(&self) -> bool {
        matches!(self.state(), ProcedureState::Stopped(_))
    }
}

#[derive(Debug, Clone)]
enum Finished {
    Report(ProcedureReport),
    Panicked,
}

struct Completion {
    name: String,
    result: Mutex<Option<Finished>>,
    done: Condvar,
}

/// Waitable handle on a started procedure.
#[derive(Clone)]
pub struct ProcedureHandle {
    completion: Arc<Completion>,
}

impl ProcedureHandle {
    pub fn is_complete(&self) -> bool {
        self.completion.result.lock().is_some()
    }

    /// Blocks until the procedure stops.
    pub fn wait(&self) -> Result<ProcedureReport, Error> {
        let mut result = self.completion.result.lock();
        while result.is_none() {
            self.completion.done.wait(&mut result);
        }
        self.unpack(result.as_ref())
    }

    /// Like [`ProcedureHandle::wait`] but gives up after `timeout`, returning `None`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<ProcedureReport, Error>> {
        let mut result = self.completion.result.lock();
        if result.is_none() {
            self.completion.done.wait_for(&mut result, timeout);
        }
        result.as_ref().map(|finished| self.unpack(Some(finished)))
    }

    fn unpack(&self, finished: Option<&Finished>) -> Result<ProcedureReport, Error> {
        match finished {
            Some(Finished::Report(report)) => Ok(report.clone()),
            Some(Finished::Panicked) | None => {
                Err(Error::WorkerPanicked(self.completion.name.clone()))
            }
        }
    }
}

/// Work container drained by a procedure's worker.
pub(crate) trait WorkQueue: Send {
    type Item;

    fn pop_next(&mut self) -> Option<Self::Item>;
    fn len(&self) -> usize;
    fn clear(&mut self);
}

/// Batches are taken newest first.
impl<T: Send> WorkQueue for Vec<T> {
    type Item = T;

    fn pop_next(&mut self) -> Option<T> {
        self.pop()
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn clear(&mut self) {
        Vec::clear(self)
    }
}

impl<T: Send> WorkQueue for VecDeque<T> {
    type Item = T;

    fn pop_next(&mut self) -> Option<T> {
        self.pop_front()
    }

    fn len(&self) -> usize {
        VecDeque::len(self)
    }

    fn clear(&mut self) {
        VecDeque::clear(self)
    }
}

struct ControlState<Q> {
    queue: Q,
    state: ProcedureState,
    keep_running: bool,
    halted: bool,
    callback: Option<CompletionCallback>,
}

/// Queue plus lifecycle flags behind one mutex, so the worker can wait for
/// work or a stop request without missing a wakeup.
pub(crate) struct ProcedureControl<Q> {
    inner: Mutex<ControlState<Q>>,
    work_ready: Condvar,
    completion: Arc<Completion>,
}

impl<Q: WorkQueue> ProcedureControl<Q> {
    pub(crate) fn new(name: impl Into<String>, queue: Q) -> Self {
        Self {
            inner: Mutex::new(ControlState {
                queue,
                state: ProcedureState::Idle,
                keep_running: true,
                halted: false,
                callback: None,
            }),
            work_ready: Condvar::new(),
            completion: Arc::new(Completion {
                name: name.into(),
                result: Mutex::new(None),
                done: Condvar::new(),
            }),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.completion.name
    }

    pub(crate) fn handle(&self) -> ProcedureHandle {
        ProcedureHandle {
            completion: Arc::clone(&self.completion),
        }
    }

    pub(crate) fn push_with(&self, f: impl FnOnce(&mut Q)) {
        let mut inner = self.inner.lock();
        f(&mut inner.queue);
        self.work_ready.notify_all();
    }

    pub(crate) fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub(crate) fn inspect<R>(&self, f: impl FnOnce(&Q) -> R) -> R {
        f(&self.inner.lock().queue)
    }

    /// Moves out of `Idle`. Returns false if the procedure was already started.
    pub(crate) fn begin(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != ProcedureState::Idle {
            return false;
        }
        inner.state = if inner.halted {
            ProcedureState::Halted
        } else if !inner.keep_running {
            ProcedureState::Draining
        } else {
            ProcedureState::Running
        };
        true
    }

    pub(crate) fn request_drain(&self) {
        let mut inner = self.inner.lock();
        inner.keep_running = false;
        if inner.state == ProcedureState::Running {
            inner.state = ProcedureState::Draining;
        }
        self.work_ready.notify_all();
    }

    pub(crate) fn request_halt(&self) {
        let mut inner = self.inner.lock();
        inner.halted = true;
        if matches!(inner.state, ProcedureState::Running | ProcedureState::Draining) {
            inner.state = ProcedureState::Halted;
        }
        self.work_ready.notify_all();
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.inner.lock().halted
    }

    pub(crate) fn state(&self) -> ProcedureState {
        self.inner.lock().state
    }

    pub(crate) fn set_callback(&self, callback: CompletionCallback) {
        self.inner.lock().callback = Some(callback);
    }

    /// Blocks until an item is available or the loop should exit.
    ///
    /// The worker keeps going while `(keep_running || queue non-empty) && !halted`.
    pub(crate) fn next_work(&self) -> Option<Q::Item> {
        let mut inner = self.inner.lock();
        loop {
            if inner.halted {
                return None;
            }
            if let Some(item) = inner.queue.pop_next() {
                return Some(item);
            }
            if !inner.keep_running {
                return None;
            }
            self.work_ready.wait(&mut inner);
        }
    }

    /// Halted report handed to the callback when the worker panicked.
    fn panic_report(&self) -> ProcedureReport {
        let mut report = ProcedureReport::new(ProcedureOutcome::Halted);
        report.failures.push(FileFailure::new(
            None,
            FileStatus::AccessError,
            format!("{} worker panicked", self.name()),
        ));
        report
    }

    /// Marks the procedure stopped, fires the callback and wakes waiters.
    /// `None` records a worker panic; the callback then gets a halted report.
    pub(crate) fn finish(&self, report: Option<ProcedureReport>) {
        let callback = {
            let mut inner = self.inner.lock();
            let discarded = inner.queue.len();
            if discarded > 0 {
                debug!("{}: discarding {} queued items", self.name(), discarded);
                inner.queue.clear();
            }
            let outcome = match &report {
                Some(report) => report.outcome,
                None => ProcedureOutcome::Halted,
            };
            inner.state = ProcedureState::Stopped(outcome);
            inner.callback.take()
        };

        if let Some(callback) = callback {
            let delivered = match &report {
                Some(report) => report.clone(),
                None => self.panic_report(),
            };
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&delivered))).is_err() {
                error!("{}: completion callback panicked", self.name());
            }
        }

        let mut result = self.completion.result.lock();
        *result = Some(match report {
            Some(report) => Finished::Report(report),
            None => Finished::Panicked,
        });
        self.completion.done.notify_all();
    }

    pub(crate) fn outcome(&self) -> ProcedureOutcome {
        if self.is_halted() {
            ProcedureOutcome::Halted
        } else {
            ProcedureOutcome::Drained
        }
    }
}

/// Runs `body` on a named thread. A panic inside `body` is caught and recorded
/// as a failed run.
pub(crate) fn spawn_worker<Q, F>(
    control: Arc<ProcedureControl<Q>>,
    thread_name: String,
    body: F,
) -> Result<(), Error>
where
    Q: WorkQueue + 'static,
    F: FnOnce(&ProcedureControl<Q>) -> ProcedureReport + Send + 'static,
{
    std::thread::Builder::new().name(thread_name).spawn(move || {
        let report = panic::catch_unwind(AssertUnwindSafe(|| body(&control)));
        match report {
            Ok(report) => control.finish(Some(report)),
            Err(_) => {
                error!("{}: worker panicked", control.name());
                control.finish(None);
            }
        }
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn summing_worker(control: &ProcedureControl<Vec<usize>>) -> ProcedureReport {
        let mut report = ProcedureReport::new(ProcedureOutcome::Drained);
        while let Some(n) = control.next_work() {
            report.files_processed += n;
        }
        report.outcome = control.outcome();
        report
    }

    #[test]
    fn test_drain_processes_everything_queued() {
        let control = Arc::new(ProcedureControl::new("sum", Vec::new()));
        control.push_with(|q| q.extend([1, 2, 3]));
        assert!(control.begin());
        assert!(!control.begin());
        spawn_worker(Arc::clone(&control), "sum".into(), summing_worker).unwrap();

        control.request_drain();
        let report = control.handle().wait().unwrap();
        assert_eq!(report.files_processed, 6);
        assert_eq!(report.outcome, ProcedureOutcome::Drained);
        assert_eq!(control.state(), ProcedureState::Stopped(ProcedureOutcome::Drained));
    }

    #[test]
    fn test_halt_before_start_discards_queue() {
        let control = Arc::new(ProcedureControl::new("sum", Vec::new()));
        control.push_with(|q| q.extend([5, 5]));
        control.request_halt();
        control.begin();
        assert_eq!(control.state(), ProcedureState::Halted);
        spawn_worker(Arc::clone(&control), "sum".into(), summing_worker).unwrap();

        let report = control.handle().wait().unwrap();
        assert_eq!(report.files_processed, 0);
        assert_eq!(report.outcome, ProcedureOutcome::Halted);
        assert_eq!(control.queued(), 0);
    }

    #[test]
    fn test_callback_fires_once() {
        let control = Arc::new(ProcedureControl::new("sum", Vec::new()));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        control.set_callback(Box::new(move |report| {
            assert_eq!(report.files_processed, 4);
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        control.push_with(|q| q.push(4));
        control.request_drain();
        control.begin();
        spawn_worker(Arc::clone(&control), "sum".into(), summing_worker).unwrap();

        control.handle().wait().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_worker_panic_is_reported() {
        let control = Arc::new(ProcedureControl::new("boom", Vec::<usize>::new()));
        control.begin();
        spawn_worker(Arc::clone(&control), "boom".into(), |_| panic!("worker failure")).unwrap();

        let err = control.handle().wait().unwrap_err();
        assert!(matches!(err, Error::WorkerPanicked(name) if name == "boom"));
    }

    #[test]
    fn test_callback_fires_after_worker_panic() {
        let control = Arc::new(ProcedureControl::new("boom", Vec::<usize>::new()));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        control.set_callback(Box::new(move |report| {
            assert_eq!(report.outcome, ProcedureOutcome::Halted);
            assert_eq!(report.result_code(), ResultCode::FinishedWithErrors);
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        control.begin();
        spawn_worker(Arc::clone(&control), "boom".into(), |_| panic!("worker failure")).unwrap();

        assert!(control.handle().wait().is_err());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(control.state(), ProcedureState::Stopped(ProcedureOutcome::Halted));
    }

    #[test]
    fn test_wait_timeout_on_idle_procedure() {
        let control = ProcedureControl::new("idle", Vec::<usize>::new());
        assert!(control
            .handle()
            .wait_timeout(Duration::from_millis(10))
            .is_none());
    }
}
