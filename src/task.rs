use crate::common::TaskId;
use crate::error::{Error, Result};
use crate::thread::{CancelSignal, ThreadContext, ThreadResult};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Start and finish callbacks. Returning a `Cancelled` error takes the cancel path.
pub type Work = Box<dyn FnOnce(&ThreadContext) -> Result<()> + Send + 'static>;
pub type OnCancel = Box<dyn FnOnce(&ThreadContext) + Send + 'static>;
pub type OnError = Box<dyn FnOnce(&ThreadContext, &Error) + Send + 'static>;

/// A unit of work with four lifecycle callbacks.
///
/// Per execution exactly one of `on_finish`, `on_cancel` and `on_error`
/// completes: `on_start` then `on_finish` run in order, a cancellation
/// raised by either one switches to `on_cancel`, and any other error or
/// panic switches to `on_error`.
///
/// # Example
///
/// ```
/// use jobpool::task::Task;
///
/// let task = Task::new("print")
///     .on_start(|thread| {
///         println!("started on {}", thread.name());
///         Ok(())
///     })
///     .on_finish(|thread| thread.checkpoint());
/// assert_eq!(task.name(), "print");
/// ```
pub struct Task {
    id: Option<TaskId>,
    name: String,
    started: Option<Work>,
    finished: Option<Work>,
    cancelled: Option<OnCancel>,
    error: Option<OnError>,
}

impl Task {
    pub fn new<S: Into<String>>(name: S) -> Task {
        Task {
            id: None,
            name: name.into(),
            started: None,
            finished: None,
            cancelled: None,
            error: None,
        }
    }

    /// Use an id obtained from `Pool::next_task_id` instead of letting the pool assign one.
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn on_start<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&ThreadContext) -> Result<()> + Send + 'static,
    {
        self.started = Some(Box::new(f));
        self
    }

    pub fn on_finish<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&ThreadContext) -> Result<()> + Send + 'static,
    {
        self.finished = Some(Box::new(f));
        self
    }

    pub fn on_cancel<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&ThreadContext) + Send + 'static,
    {
        self.cancelled = Some(Box::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&ThreadContext, &Error) + Send + 'static,
    {
        self.error = Some(Box::new(f));
        self
    }

    pub fn id(&self) -> Option<TaskId> {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn assign_id(&mut self, id: TaskId) {
        self.id = Some(id);
    }

    /// Runs start and finish, then settles the outcome on the context.
    /// Only the work callbacks are guarded; a panic inside `on_cancel` or
    /// `on_error` propagates to the caller.
    pub(crate) fn run(self, context: &ThreadContext) -> ThreadResult {
        let Task {
            started,
            finished,
            cancelled,
            error,
            ..
        } = self;

        let work = panic::catch_unwind(AssertUnwindSafe(move || -> Result<()> {
            if let Some(started) = started {
                started(context)?;
            }
            if let Some(finished) = finished {
                finished(context)?;
            }
            Ok(())
        }));

        let err = match work {
            Ok(Ok(())) => {
                context.set_result(ThreadResult::Normal);
                return ThreadResult::Normal;
            }
            Ok(Err(err)) => err,
            Err(payload) => {
                if payload.is::<CancelSignal>() {
                    Error::cancelled()
                } else {
                    Error::from_panic(payload)
                }
            }
        };

        if err.is_cancelled() {
            Task::notify_cancelled(context, cancelled)
        } else {
            Task::notify_error(context, &err, error)
        }
    }

    /// Cancelled before it began, start and finish are skipped.
    pub(crate) fn skip(self, context: &ThreadContext) -> ThreadResult {
        Task::notify_cancelled(context, self.cancelled)
    }

    pub(crate) fn fail(self, context: &ThreadContext, err: &Error) -> ThreadResult {
        Task::notify_error(context, err, self.error)
    }

    fn notify_cancelled(context: &ThreadContext, cancelled: Option<OnCancel>) -> ThreadResult {
        context.set_result(ThreadResult::Cancelled);
        if let Some(cancelled) = cancelled {
            cancelled(context);
        }
        ThreadResult::Cancelled
    }

    fn notify_error(context: &ThreadContext, err: &Error, error: Option<OnError>) -> ThreadResult {
        context.record_error(err);
        if let Some(error) = error {
            error(context, err);
        }
        ThreadResult::Error
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}
