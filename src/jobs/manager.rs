use super::job::{FinishedJob, Job, JobHandle};
use crate::common::{lock, Handle, Priority, TaskId};
use crate::config::PoolConfig;
use crate::error::Result;
use crate::log::{discard, LogSink};
use crate::pool::Pool;
use slog::{debug, error, info, o, Logger};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Notified after a job's finish callback completed.
pub trait JobFinishedListener: Send + Sync {
    fn on_job_finished(&self, job: &FinishedJob);
}

impl<F> JobFinishedListener for F
where
    F: Fn(&FinishedJob) + Send + Sync,
{
    fn on_job_finished(&self, job: &FinishedJob) {
        self(job)
    }
}

struct Listeners {
    list: Mutex<Vec<Arc<dyn JobFinishedListener>>>,
    logger: Logger,
}

impl Listeners {
    // notify a snapshot, never under the lock: listeners may add jobs
    fn job_finished(&self, job: &FinishedJob) {
        let listeners = lock(&self.list).clone();
        for listener in listeners {
            let notified =
                panic::catch_unwind(AssertUnwindSafe(|| listener.on_job_finished(job)));
            if notified.is_err() {
                error!(self.logger, "job finished listener panicked"; "job" => job.id, "name" => &job.name);
            }
        }
    }
}

fn same_listener(a: &Arc<dyn JobFinishedListener>, b: &Arc<dyn JobFinishedListener>) -> bool {
    Arc::as_ptr(a) as *const u8 == Arc::as_ptr(b) as *const u8
}

static INSTANCE: Mutex<Option<Arc<JobManager>>> = Mutex::new(None);

/// Runs jobs on one owned pool and tells listeners when they finish.
///
/// A process-wide instance is available through `init`, `instance` and
/// `destroy`; `JobManager::new` builds independent managers.
pub struct JobManager {
    pool: Pool,
    listeners: Arc<Listeners>,
    logger: Logger,
}

impl JobManager {
    pub fn new(config: PoolConfig) -> Result<JobManager> {
        JobManager::with_logger(config, &discard())
    }

    pub fn with_logger(config: PoolConfig, logger: &Logger) -> Result<JobManager> {
        let logger = logger.new(o!("manager" => config.name.clone()));
        let pool = Pool::with_logger(config, &logger)?;
        Ok(JobManager {
            pool,
            listeners: Arc::new(Listeners {
                list: Mutex::new(Vec::new()),
                logger: logger.clone(),
            }),
            logger,
        })
    }

    /// Replace the process-wide manager with a new one.
    pub fn init(name: &str, pool_size: usize, lazy_start: bool) -> Result<Arc<JobManager>> {
        let config = PoolConfig::new(name, pool_size).with_lazy_start(lazy_start);
        JobManager::init_with(config, &discard())
    }

    pub fn init_with(config: PoolConfig, logger: &Logger) -> Result<Arc<JobManager>> {
        let manager = Arc::new(JobManager::with_logger(config, logger)?);
        let previous = lock(&INSTANCE).replace(manager.clone());
        if let Some(previous) = previous {
            previous.shutdown()?;
        }
        Ok(manager)
    }

    /// The process-wide manager, created with the default config on first use.
    pub fn instance() -> Result<Arc<JobManager>> {
        let mut instance = lock(&INSTANCE);
        if let Some(manager) = &*instance {
            return Ok(manager.clone());
        }
        let config = PoolConfig::new(
            "jobpool::JobManager::instance()",
            PoolConfig::DEFAULT_NUM_THREADS,
        );
        let manager = Arc::new(JobManager::new(config)?);
        *instance = Some(manager.clone());
        Ok(manager)
    }

    /// Drain and stop the process-wide manager, blocking until its workers exit.
    pub fn destroy() -> Result<()> {
        let manager = lock(&INSTANCE).take();
        match manager {
            Some(manager) => manager.shutdown(),
            None => Ok(()),
        }
    }

    /// Stop the pool and forget all listeners.
    pub fn shutdown(&self) -> Result<()> {
        self.pool.shutdown()?;
        lock(&self.listeners.list).clear();
        info!(self.logger, "job manager shut down");
        Ok(())
    }

    pub fn add_job(&self, job: Job) -> Result<JobHandle> {
        let handle = job.handle();
        let id = self.next_job_id();
        let listeners = Arc::downgrade(&self.listeners);
        let task = job.into_task(id, move |finished| {
            if let Some(listeners) = listeners.upgrade() {
                listeners.job_finished(&finished.info());
            }
        });
        self.pool.add_task(handle.priority(), task)?;
        debug!(self.logger, "job added"; "id" => id, "name" => handle.name(), "priority" => handle.priority());
        Ok(handle)
    }

    /// Remove the job if still queued, then flag it cancelled.
    pub fn cancel(&self, job: &JobHandle) {
        if job.id() != 0 {
            self.remove_queued_job(job);
        }
        job.cancel();
    }

    /// No effect on a job that is already running.
    pub fn remove_queued_job(&self, job: &JobHandle) -> bool {
        let removed = self
            .pool
            .remove_queued(Handle::new(job.priority(), job.id()));
        if removed {
            debug!(self.logger, "queued job removed"; "id" => job.id());
        }
        removed
    }

    /// Drop every queued job and ask running ones to cancel.
    pub fn cancel_all(&self) {
        self.pool.cancel();
    }

    pub fn clear_queued_jobs(&self) {
        self.pool.cancel_all();
    }

    pub fn wait(&self) {
        self.pool.wait_for_all();
    }

    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.pool.wait_timeout(timeout)
    }

    pub fn next_job_id(&self) -> TaskId {
        self.pool.next_task_id()
    }

    pub fn pool_size(&self) -> usize {
        self.pool.num_threads()
    }

    pub fn resize_pool(&self, size: usize) -> Result<usize> {
        self.pool.resize(size)
    }

    pub fn num_jobs_queued(&self) -> usize {
        self.pool.queued_count()
    }

    pub fn num_jobs_executing(&self) -> usize {
        self.pool.executing_count()
    }

    pub fn num_jobs(&self) -> usize {
        self.pool.num_tasks()
    }

    pub fn executing_names(&self) -> Vec<String> {
        self.pool.executing_names()
    }

    pub fn is_higher_priority_waiting(&self, priority: Priority) -> bool {
        self.pool.is_higher_priority_waiting(priority)
    }

    pub fn set_log(&self, log: Option<Arc<dyn LogSink>>) {
        self.pool.set_log(log);
    }

    /// Adding a listener twice keeps one registration.
    pub fn add_job_finished_listener(&self, listener: Arc<dyn JobFinishedListener>) {
        let mut list = lock(&self.listeners.list);
        list.retain(|l| !same_listener(l, &listener));
        list.push(listener);
    }

    pub fn remove_job_finished_listener(&self, listener: &Arc<dyn JobFinishedListener>) {
        lock(&self.listeners.list).retain(|l| !same_listener(l, listener));
    }

    pub fn num_job_finished_listeners(&self) -> usize {
        lock(&self.listeners.list).len()
    }
}
