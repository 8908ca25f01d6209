use super::queue::Shared;
use super::supervisor::{Message, Supervisor};
use super::worker::Slot;
use crate::common::{current_thread_id, lock, Handle, Priority, TaskId};
use crate::config::PoolConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::log::{discard, LogSink};
use crate::task::Task;
use crate::thread::WorkerThread;
use crossbeam::channel::{unbounded, Sender};
use slog::{error, info, o, warn, Logger};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

enum Lifecycle {
    // threads exist but nothing has been started
    Idle,
    Running {
        notifier: Sender<Message>,
        supervisor: JoinHandle<()>,
    },
    ShutDown,
}

/// Fixed set of worker threads serving a priority queue of tasks.
///
/// Tasks with a smaller priority number run first, equal priorities run in
/// submission order. A task that is already executing is never preempted.
///
/// # Example
///
/// ```
/// use jobpool::config::PoolConfig;
/// use jobpool::pool::Pool;
/// use jobpool::task::Task;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let pool = Pool::new(PoolConfig::new("example", 2)).unwrap();
/// let counter = Arc::new(AtomicUsize::new(0));
/// for _ in 0..10 {
///     let counter = counter.clone();
///     let task = Task::new("count").on_finish(move |_| {
///         counter.fetch_add(1, Ordering::SeqCst);
///         Ok(())
///     });
///     pool.add_task(0, task).unwrap();
/// }
/// pool.wait_for_all();
/// assert_eq!(counter.load(Ordering::SeqCst), 10);
/// ```
pub struct Pool {
    shared: Arc<Shared>,
    slots: Arc<Mutex<Vec<Slot>>>,
    lifecycle: Mutex<Lifecycle>,
    next_slot: AtomicUsize,
    thread_name: String,
}

impl Pool {
    pub fn new(config: PoolConfig) -> Result<Pool> {
        Pool::with_logger(config, &discard())
    }

    pub fn with_logger(config: PoolConfig, logger: &Logger) -> Result<Pool> {
        config.validate()?;
        let thread_name = if config.name.is_empty() {
            "jobpool::Pool".to_owned()
        } else {
            config.name.clone()
        };
        let logger = logger.new(o!("pool" => thread_name.clone()));
        let shared = Arc::new(Shared::new(
            thread_name.clone(),
            config.size,
            config.sleep(),
            logger,
        ));
        let pool = Pool {
            shared,
            slots: Arc::new(Mutex::new(Vec::with_capacity(config.size))),
            lifecycle: Mutex::new(Lifecycle::Idle),
            next_slot: AtomicUsize::new(0),
            thread_name,
        };

        {
            let mut slots = lock(&pool.slots);
            for _ in 0..config.size {
                slots.push(pool.new_slot());
            }
        }

        if !config.lazy_start {
            pool.start_threads()?;
        }
        Ok(pool)
    }

    /// Queue a task and return immediately. Starts the workers on first use.
    pub fn add_task(&self, priority: Priority, task: Task) -> Result<Handle> {
        if !self.shared.keep_running() {
            return Err(Error::from(ErrorKind::ShutDown(self.thread_name.clone())));
        }
        let handle = self.shared.push(priority, task)?;
        if let Err(err) = self.start_threads() {
            self.shared.remove(handle);
            return Err(err);
        }
        Ok(handle)
    }

    /// Drop a task that no worker has picked up yet. Returns whether it was still queued.
    pub fn remove_queued(&self, handle: Handle) -> bool {
        self.shared.remove(handle)
    }

    pub fn has_queued_task(&self, handle: Handle) -> bool {
        self.shared.contains(handle)
    }

    /// Drain the queue. Executing tasks are not touched.
    pub fn cancel_all(&self) {
        let removed = self.shared.clear();
        if removed > 0 {
            self.shared.log_event(&format!("removed {} queued tasks", removed), None);
        }
    }

    /// Drain the queue and ask every running worker to cancel its task.
    pub fn cancel(&self) {
        self.cancel_all();
        self.cancel_threads();
    }

    /// Block until nothing is queued or executing, polling every `sleep_duration()`.
    pub fn wait_for_all(&self) {
        while self.num_tasks() > 0 {
            thread::sleep(self.sleep_duration());
        }
    }

    /// Like `wait_for_all` but gives up after `timeout`. Returns whether the pool drained.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.num_tasks() == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(self.sleep_duration().min(deadline - now));
        }
    }

    pub fn is_higher_priority_waiting(&self, priority: Priority) -> bool {
        self.shared.higher_priority_waiting(priority)
    }

    pub fn next_task_id(&self) -> TaskId {
        self.shared.next_task_id()
    }

    pub fn name(&self) -> &str {
        &self.thread_name
    }

    pub fn num_threads(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn num_threads_idle(&self) -> usize {
        lock(&self.slots)
            .iter()
            .filter(|slot| !slot.is_busy())
            .count()
    }

    pub fn queued_count(&self) -> usize {
        self.shared.queued()
    }

    pub fn executing_count(&self) -> usize {
        self.shared.executing()
    }

    /// Queued plus executing, read under one lock.
    pub fn num_tasks(&self) -> usize {
        self.shared.total()
    }

    pub fn executing_names(&self) -> Vec<String> {
        self.shared.executing_names()
    }

    pub fn sleep_duration(&self) -> Duration {
        self.shared.sleep()
    }

    pub fn set_sleep_duration(&self, sleep: Duration) {
        self.shared.set_sleep(sleep);
    }

    pub fn set_log(&self, log: Option<Arc<dyn LogSink>>) {
        self.shared.set_log(log);
    }

    pub fn log(&self) -> Option<Arc<dyn LogSink>> {
        self.shared.log()
    }

    /// Grow or shrink the pool. Only idle workers are retired, so the pool
    /// never shrinks below the number of busy workers. Returns the new size.
    pub fn resize(&self, size: usize) -> Result<usize> {
        if size == 0 {
            return Err(Error::from(ErrorKind::Config(
                "pool size must be at least 1".to_owned(),
            )));
        }
        let lifecycle = lock(&self.lifecycle);
        let notifier = match &*lifecycle {
            Lifecycle::ShutDown => {
                return Err(Error::from(ErrorKind::ShutDown(self.thread_name.clone())))
            }
            Lifecycle::Running { notifier, .. } => Some(notifier),
            Lifecycle::Idle => None,
        };

        let mut retired = Vec::new();
        let len = {
            let mut slots = lock(&self.slots);
            if size > slots.len() {
                for _ in slots.len()..size {
                    let slot = self.new_slot();
                    if let Some(notifier) = notifier {
                        slot.start(&self.shared, notifier)?;
                    }
                    slots.push(slot);
                }
            } else {
                let busy = slots.iter().filter(|slot| slot.is_busy()).count();
                let mut excess = slots.len() - size.max(busy);
                let mut i = slots.len();
                while excess > 0 && i > 0 {
                    i -= 1;
                    if !slots[i].is_busy() {
                        let slot = slots.remove(i);
                        slot.retire();
                        retired.push(slot);
                        excess -= 1;
                    }
                }
            }
            slots.len()
        };
        drop(lifecycle);

        info!(self.shared.logger(), "pool resized"; "size" => len, "retired" => retired.len());
        // dropping a retired slot joins its thread once the loop notices
        drop(retired);
        Ok(len)
    }

    /// Stop the workers: drain the queue, cancel running tasks, wait for
    /// every worker thread to exit. Idempotent.
    ///
    /// Fails with `WrongThread` from one of this pool's own workers, which
    /// would otherwise wait for itself.
    pub fn shutdown(&self) -> Result<()> {
        let current = current_thread_id();
        let on_worker = lock(&self.slots)
            .iter()
            .any(|slot| slot.thread().system_id() == current);
        if on_worker {
            return Err(Error::from(ErrorKind::WrongThread(self.thread_name.clone())));
        }
        self.stop();
        Ok(())
    }

    fn stop(&self) {
        self.shared.stop_running();
        self.cancel_all();
        self.cancel_threads();

        let previous = std::mem::replace(&mut *lock(&self.lifecycle), Lifecycle::ShutDown);
        if let Lifecycle::Running {
            notifier,
            supervisor,
        } = previous
        {
            let _ = notifier.send(Message::Terminate);
            if supervisor.join().is_err() {
                error!(self.shared.logger(), "supervisor panicked");
            }
        }

        let slots = std::mem::take(&mut *lock(&self.slots));
        for slot in &slots {
            self.shared.log_event("waiting for thread", Some(&slot.thread().context()));
            slot.thread().join();
        }
        drop(slots);

        // tasks submitted by the last running tasks while we drained
        self.cancel_all();
        if self.shared.executing() > 0 {
            warn!(self.shared.logger(), "tasks still executing after shutdown";
                "count" => self.shared.executing());
        }
    }

    // cancels the task each worker is executing now, never the one after it
    fn cancel_threads(&self) {
        for slot in lock(&self.slots).iter() {
            if slot.cancel_task() {
                self.shared
                    .log_event("cancelled running task", Some(&slot.thread().context()));
            }
        }
    }

    /// Start every worker exactly once.
    fn start_threads(&self) -> Result<()> {
        let mut lifecycle = lock(&self.lifecycle);
        if !matches!(*lifecycle, Lifecycle::Idle) {
            return Ok(());
        }

        let (notifier, receiver) = unbounded::<Message>();
        let mut supervisor = Supervisor::new(
            self.shared.clone(),
            self.slots.clone(),
            receiver,
            notifier.clone(),
        );
        let supervisor = thread::Builder::new()
            .name(format!("{} supervisor", self.thread_name))
            .spawn(move || {
                // supervise all
                supervisor.watch();
            })?;

        let started = {
            let slots = lock(&self.slots);
            slots
                .iter()
                .map(|slot| slot.start(&self.shared, &notifier))
                .collect::<Result<Vec<()>>>()
        };
        *lifecycle = Lifecycle::Running {
            notifier,
            supervisor,
        };
        drop(lifecycle);

        info!(self.shared.logger(), "pool started"; "threads" => self.num_threads());
        self.shared.log_event("threads started", None);
        started.map(|_| ())
    }

    fn new_slot(&self) -> Slot {
        let index = self.next_slot.fetch_add(1, Ordering::Relaxed);
        let thread = WorkerThread::new(
            format!("{} {}", self.thread_name, index),
            self.shared.logger(),
        );
        Slot::new(index, thread)
    }
}

// destroy threads when pool is dead
impl Drop for Pool {
    fn drop(&mut self) {
        self.stop();
    }
}
