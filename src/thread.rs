use crate::common::{current_thread_id, lock, TaskId};
use crate::error::{Error, ErrorKind, Result};
use crate::task::Task;
use slog::{crit, debug, error, o, warn, Logger};
use std::panic;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    NotRunning,
    Scheduled,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadResult {
    Normal,
    Cancelled,
    Error,
}

/// Unwind payload of a cancel issued from the running thread itself.
pub(crate) struct CancelSignal;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

struct Status {
    state: ThreadState,
    result: ThreadResult,
    // os thread currently executing us, 0 when idle
    system_id: u64,
    // cancel() arrived while not running
    cancel_pending: bool,
    // pool task being executed on this thread, 0 between tasks
    task: TaskId,
    error: Option<String>,
}

struct Shared {
    id: u64,
    name: String,
    creation_thread: u64,
    status: Mutex<Status>,
    handle: Mutex<Option<JoinHandle<()>>>,
    logger: Logger,
}

/// Owns one OS thread at a time and runs a single task per `start()`.
///
/// The same object is started again and again by a pool; every start
/// spawns a fresh named OS thread once the previous one has exited.
pub struct WorkerThread {
    shared: Arc<Shared>,
}

/// The running side of a `WorkerThread`, handed to every task callback.
#[derive(Clone)]
pub struct ThreadContext {
    shared: Arc<Shared>,
}

impl WorkerThread {
    pub fn new<S: Into<String>>(name: S, logger: &Logger) -> WorkerThread {
        let id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
        let name = name.into();
        let logger = logger.new(o!("thread" => name.clone(), "thread_id" => id));
        WorkerThread {
            shared: Arc::new(Shared {
                id,
                name,
                creation_thread: current_thread_id(),
                status: Mutex::new(Status {
                    state: ThreadState::NotRunning,
                    result: ThreadResult::Normal,
                    system_id: 0,
                    cancel_pending: false,
                    task: 0,
                    error: None,
                }),
                handle: Mutex::new(None),
                logger,
            }),
        }
    }

    /// Schedule `task` on a new OS thread and return immediately.
    pub fn start(&self, task: Task) -> Result<()> {
        {
            let mut status = lock(&self.shared.status);
            if status.state != ThreadState::NotRunning {
                return Err(Error::from(ErrorKind::AlreadyRunning(
                    self.shared.name.clone(),
                )));
            }
            status.state = ThreadState::Scheduled;
            status.result = if status.cancel_pending {
                ThreadResult::Cancelled
            } else {
                ThreadResult::Normal
            };
            status.error = None;
        }

        // the previous os thread has left the entry point, reap it
        self.join();

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(self.shared.name.clone())
            .spawn(move || entry_point(shared, task));

        match spawned {
            Ok(handle) => {
                *lock(&self.shared.handle) = Some(handle);
                debug!(self.shared.logger, "scheduled");
                Ok(())
            }
            Err(err) => {
                lock(&self.shared.status).state = ThreadState::NotRunning;
                error!(self.shared.logger, "unable to spawn thread"; "error" => %err);
                Err(Error::from(err))
            }
        }
    }

    /// Block until the current OS thread, if any, has exited.
    pub fn join(&self) {
        let handle = lock(&self.shared.handle).take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                // joining ourselves would never return
                *lock(&self.shared.handle) = Some(handle);
                return;
            }
            if handle.join().is_err() {
                warn!(self.shared.logger, "thread exited by panic");
            }
        }
    }

    pub fn context(&self) -> ThreadContext {
        ThreadContext {
            shared: self.shared.clone(),
        }
    }

    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Cancel only while the pool task `task` is the one executing here.
    /// Returns whether the cancel was applied.
    pub(crate) fn cancel_task(&self, task: TaskId) -> bool {
        let mut status = lock(&self.shared.status);
        if task == 0 || status.task != task {
            return false;
        }
        status.result = ThreadResult::Cancelled;
        true
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> ThreadState {
        lock(&self.shared.status).state
    }

    pub fn result(&self) -> ThreadResult {
        lock(&self.shared.status).result
    }

    pub fn system_id(&self) -> u64 {
        lock(&self.shared.status).system_id
    }

    pub fn creation_thread_id(&self) -> u64 {
        self.shared.creation_thread
    }

    pub fn error_message(&self) -> Option<String> {
        lock(&self.shared.status).error.clone()
    }

    pub fn is_idle(&self) -> bool {
        self.shared.is_idle()
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        if !self.shared.is_idle() {
            crit!(self.shared.logger, "destroying a running thread, waiting for it");
        }
        self.join();
    }
}

impl ThreadContext {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn system_id(&self) -> u64 {
        lock(&self.shared.status).system_id
    }

    pub fn state(&self) -> ThreadState {
        lock(&self.shared.status).state
    }

    pub fn result(&self) -> ThreadResult {
        lock(&self.shared.status).result
    }

    pub fn is_cancelled(&self) -> bool {
        self.result() == ThreadResult::Cancelled
    }

    /// Cancel the work on this thread. From the thread itself this unwinds
    /// straight to the cancel path and does not return.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// `Err(Cancelled)` once another thread has asked us to stop.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::cancelled())
        } else {
            Ok(())
        }
    }

    pub(crate) fn set_result(&self, result: ThreadResult) {
        lock(&self.shared.status).result = result;
    }

    /// A pool task starts on this thread with a clean result.
    pub(crate) fn begin_task(&self, task: TaskId) {
        let mut status = lock(&self.shared.status);
        status.task = task;
        status.result = ThreadResult::Normal;
    }

    pub(crate) fn end_task(&self) {
        lock(&self.shared.status).task = 0;
    }

    pub(crate) fn record_error(&self, err: &Error) {
        error!(self.shared.logger, "work failed"; "error" => %err);
        let mut status = lock(&self.shared.status);
        status.result = ThreadResult::Error;
        status.error = Some(err.to_string());
    }

    pub(crate) fn logger(&self) -> &Logger {
        &self.shared.logger
    }

    /// Checks the entry conditions and marks the thread running.
    /// Returns whether a cancel arrived before the run began.
    fn begin(&self) -> Result<bool> {
        let current = current_thread_id();
        let mut status = lock(&self.shared.status);
        if current == self.shared.creation_thread {
            return Err(Error::from(ErrorKind::WrongThread(
                self.shared.name.clone(),
            )));
        }
        if status.state != ThreadState::Scheduled {
            return Err(Error::from(ErrorKind::NotScheduled(
                self.shared.name.clone(),
            )));
        }
        status.system_id = current;
        status.state = ThreadState::Running;
        let pending = status.cancel_pending;
        status.cancel_pending = false;
        status.result = if pending {
            ThreadResult::Cancelled
        } else {
            ThreadResult::Normal
        };
        Ok(pending)
    }

    // a refused entry leaves the thread idle unless another run owns it
    fn abandon(&self) {
        let mut status = lock(&self.shared.status);
        if status.state != ThreadState::Running {
            status.state = ThreadState::NotRunning;
            status.system_id = 0;
        }
    }
}

impl Shared {
    fn cancel(&self) {
        let system_id = {
            let mut status = lock(&self.status);
            status.result = ThreadResult::Cancelled;
            if status.state != ThreadState::Running {
                status.cancel_pending = true;
            }
            status.system_id
        };
        if system_id != 0 && system_id == current_thread_id() {
            debug!(self.logger, "cancelled from its own thread");
            panic::resume_unwind(Box::new(CancelSignal));
        }
    }

    fn is_idle(&self) -> bool {
        let status = lock(&self.status);
        status.state == ThreadState::NotRunning && status.system_id == 0
    }
}

// marks the thread idle however the run ends
struct Idle<'a>(&'a ThreadContext);

impl Drop for Idle<'_> {
    fn drop(&mut self) {
        let mut status = lock(&self.0.shared.status);
        status.system_id = 0;
        status.state = ThreadState::NotRunning;
    }
}

fn entry_point(shared: Arc<Shared>, task: Task) {
    let context = ThreadContext { shared };
    match context.begin() {
        Err(err) => {
            crit!(context.logger(), "bad thread entry"; "error" => %err);
            context.abandon();
            task.fail(&context, &err);
        }
        Ok(cancel_pending) => {
            let _idle = Idle(&context);
            debug!(context.logger(), "running"; "task" => task.name());
            let result = if cancel_pending {
                task.skip(&context)
            } else {
                task.run(&context)
            };
            debug!(context.logger(), "finished"; "result" => ?result);
        }
    }
}
