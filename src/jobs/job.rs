use crate::common::{current_thread_id, lock, Priority, TaskId};
use crate::error::{Error, ErrorKind, Result};
use crate::task::Task;
use crate::thread::ThreadContext;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub type JobWork = Box<dyn FnOnce(&JobContext) -> Result<()> + Send + 'static>;
pub type JobCancel = Box<dyn FnOnce(&JobContext) + Send + 'static>;
pub type JobError = Box<dyn FnOnce(&JobContext, &Error) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    Finished,
    Cancelled,
    Failed,
}

/// What listeners learn about a job that finished normally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishedJob {
    pub id: TaskId,
    pub name: String,
    pub priority: Priority,
}

struct JobState {
    // 0 until the job is submitted
    id: AtomicU64,
    name: String,
    priority: AtomicI32,
    cancelled: AtomicBool,
    done: AtomicBool,
    outcome: Mutex<Option<JobOutcome>>,
    error: Mutex<Option<String>>,
    // set while a worker runs the job
    thread: Mutex<Option<ThreadContext>>,
}

/// Shared view of a job, usable before, during and after it runs.
#[derive(Clone)]
pub struct JobHandle {
    state: Arc<JobState>,
}

/// A unit of work for the `JobManager`.
///
/// # Example
///
/// ```
/// use jobpool::jobs::Job;
///
/// let job = Job::new("load terrain")
///     .priority(-1)
///     .on_start(|context| context.checkpoint())
///     .on_finish(|_| Ok(()));
/// let handle = job.handle();
/// assert_eq!(handle.priority(), -1);
/// assert_eq!(handle.id(), 0);
/// ```
pub struct Job {
    handle: JobHandle,
    started: Option<JobWork>,
    finished: Option<JobWork>,
    cancelled: Option<JobCancel>,
    error: Option<JobError>,
}

/// Passed to every job callback.
pub struct JobContext {
    job: JobHandle,
    thread: ThreadContext,
}

impl Job {
    pub fn new<S: Into<String>>(name: S) -> Job {
        Job {
            handle: JobHandle {
                state: Arc::new(JobState {
                    id: AtomicU64::new(0),
                    name: name.into(),
                    priority: AtomicI32::new(0),
                    cancelled: AtomicBool::new(false),
                    done: AtomicBool::new(false),
                    outcome: Mutex::new(None),
                    error: Mutex::new(None),
                    thread: Mutex::new(None),
                }),
            },
            started: None,
            finished: None,
            cancelled: None,
            error: None,
        }
    }

    pub fn priority(self, priority: Priority) -> Self {
        self.handle.state.priority.store(priority, Ordering::SeqCst);
        self
    }

    pub fn on_start<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&JobContext) -> Result<()> + Send + 'static,
    {
        self.started = Some(Box::new(f));
        self
    }

    pub fn on_finish<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&JobContext) -> Result<()> + Send + 'static,
    {
        self.finished = Some(Box::new(f));
        self
    }

    pub fn on_cancel<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&JobContext) + Send + 'static,
    {
        self.cancelled = Some(Box::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&JobContext, &Error) + Send + 'static,
    {
        self.error = Some(Box::new(f));
        self
    }

    pub fn handle(&self) -> JobHandle {
        self.handle.clone()
    }

    /// Wrap the job in a task carrying `id`. `finished` runs after the job's
    /// own finish callback succeeded.
    pub(crate) fn into_task<F>(self, id: TaskId, finished: F) -> Task
    where
        F: FnOnce(&JobHandle) + Send + 'static,
    {
        let Job {
            handle,
            started,
            finished: on_finish,
            cancelled,
            error,
        } = self;
        handle.state.id.store(id, Ordering::SeqCst);

        let start_handle = handle.clone();
        let finish_handle = handle.clone();
        let error_handle = handle.clone();
        let pending = Unfinished(handle.clone());

        Task::new(handle.name())
            .with_id(id)
            .on_start(move |thread| {
                *lock(&start_handle.state.thread) = Some(thread.clone());
                let context = JobContext::new(start_handle, thread);
                context.checkpoint()?;
                match started {
                    Some(started) => started(&context),
                    None => Ok(()),
                }
            })
            .on_finish(move |thread| {
                let context = JobContext::new(finish_handle.clone(), thread);
                context.checkpoint()?;
                if let Some(on_finish) = on_finish {
                    on_finish(&context)?;
                }
                finish_handle.settle(JobOutcome::Finished);
                finished(&finish_handle);
                Ok(())
            })
            .on_cancel(move |thread| {
                let context = JobContext::new(pending.0.clone(), thread);
                if let Some(cancelled) = cancelled {
                    cancelled(&context);
                }
                pending.0.settle(JobOutcome::Cancelled);
            })
            .on_error(move |thread, err| {
                let context = JobContext::new(error_handle.clone(), thread);
                *lock(&error_handle.state.error) = Some(err.to_string());
                if let Some(error) = error {
                    error(&context, err);
                }
                error_handle.settle(JobOutcome::Failed);
            })
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}

impl JobHandle {
    pub fn id(&self) -> TaskId {
        self.state.id.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn priority(&self) -> Priority {
        self.state.priority.load(Ordering::SeqCst)
    }

    /// Flag the job cancelled. When called from the thread running the job
    /// this unwinds immediately; otherwise the job sees it at its next
    /// checkpoint.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        let thread = lock(&self.state.thread).clone();
        if let Some(thread) = thread {
            // the worker thread outlives this job, only our own run may be touched
            if thread.system_id() == current_thread_id() {
                thread.cancel();
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::cancelled())
        } else {
            Ok(())
        }
    }

    pub fn is_done(&self) -> bool {
        self.state.done.load(Ordering::SeqCst)
    }

    pub fn outcome(&self) -> Option<JobOutcome> {
        *lock(&self.state.outcome)
    }

    pub fn error_message(&self) -> Option<String> {
        lock(&self.state.error).clone()
    }

    /// The worker running this job, if it is running.
    pub fn thread(&self) -> Option<ThreadContext> {
        lock(&self.state.thread).clone()
    }

    pub fn info(&self) -> FinishedJob {
        FinishedJob {
            id: self.id(),
            name: self.name().to_owned(),
            priority: self.priority(),
        }
    }

    /// Poll every `poll` until the job is done or `timeout` passes.
    /// Returns whether it is done. Waiting from the job's own thread fails.
    pub fn wait(&self, timeout: Duration, poll: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(thread) = self.thread() {
                if thread.system_id() == current_thread_id() {
                    return Err(Error::from(ErrorKind::WaitOnOwnThread(self.id())));
                }
            }
            if self.is_done() {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            thread::sleep(poll.min(deadline - now));
        }
    }

    fn settle(&self, outcome: JobOutcome) {
        *lock(&self.state.outcome) = Some(outcome);
        *lock(&self.state.thread) = None;
        self.state.done.store(true, Ordering::SeqCst);
    }
}

impl JobContext {
    fn new(job: JobHandle, thread: &ThreadContext) -> JobContext {
        JobContext {
            job,
            thread: thread.clone(),
        }
    }

    pub fn job(&self) -> &JobHandle {
        &self.job
    }

    pub fn thread(&self) -> &ThreadContext {
        &self.thread
    }

    /// `Err(Cancelled)` if either the job or its worker thread was cancelled.
    pub fn checkpoint(&self) -> Result<()> {
        self.job.checkpoint()?;
        self.thread.checkpoint()
    }

    pub fn cancel(&self) {
        self.job.cancel();
    }
}

// a job whose task is dropped without settling ends up cancelled,
// or failed when an error was already recorded
struct Unfinished(JobHandle);

impl Drop for Unfinished {
    fn drop(&mut self) {
        if self.0.is_done() {
            return;
        }
        let outcome = if self.0.error_message().is_some() {
            JobOutcome::Failed
        } else {
            JobOutcome::Cancelled
        };
        self.0.settle(outcome);
    }
}
