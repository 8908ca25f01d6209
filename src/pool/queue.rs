use crate::common::{current_thread_id, lock, Handle, Priority, TaskId};
use crate::error::{Error, ErrorKind, Result};
use crate::log::LogSink;
use crate::task::Task;
use crate::thread::ThreadContext;
use crossbeam::channel::{bounded, Receiver, Sender};
use slog::{debug, Logger};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Queue {
    pending: BTreeMap<Handle, Task>,
    // ids of everything in pending
    ids: HashSet<TaskId>,
    // id -> name of every task a worker has popped and not yet finished
    executing: BTreeMap<TaskId, String>,
}

/// State shared by the pool, its supervisor and every worker loop.
pub struct Shared {
    name: String,
    logger: Logger,
    queue: Mutex<Queue>,
    next_task_id: AtomicU64,
    sleep_ms: AtomicU64,
    run_threads: AtomicBool,
    wake_sender: Sender<()>,
    wake_receiver: Receiver<()>,
    log: Mutex<Option<Arc<dyn LogSink>>>,
}

impl Shared {
    pub fn new(name: String, size: usize, sleep: Duration, logger: Logger) -> Shared {
        let (wake_sender, wake_receiver) = bounded(size.max(1));
        Shared {
            name,
            logger,
            queue: Mutex::new(Queue::default()),
            next_task_id: AtomicU64::new(1),
            sleep_ms: AtomicU64::new(sleep.as_millis() as u64),
            run_threads: AtomicBool::new(true),
            wake_sender,
            wake_receiver,
            log: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn next_task_id(&self) -> TaskId {
        self.next_task_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn keep_running(&self) -> bool {
        self.run_threads.load(Ordering::SeqCst)
    }

    pub fn stop_running(&self) {
        self.run_threads.store(false, Ordering::SeqCst);
    }

    pub fn sleep(&self) -> Duration {
        Duration::from_millis(self.sleep_ms.load(Ordering::Relaxed))
    }

    pub fn set_sleep(&self, sleep: Duration) {
        self.sleep_ms
            .store(sleep.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn push(&self, priority: Priority, mut task: Task) -> Result<Handle> {
        let id = match task.id() {
            Some(id) => id,
            None => {
                let id = self.next_task_id();
                task.assign_id(id);
                id
            }
        };
        let handle = Handle::new(priority, id);
        {
            let mut queue = lock(&self.queue);
            if queue.executing.contains_key(&id) || !queue.ids.insert(id) {
                return Err(Error::from(ErrorKind::DuplicateTask(id)));
            }
            queue.pending.insert(handle, task);
        }
        // any idle worker will do, a full channel already has wakeups pending
        let _ = self.wake_sender.try_send(());
        Ok(handle)
    }

    /// Move the most urgent queued task into the executing set.
    pub fn pop(&self) -> Option<(Handle, Task)> {
        let mut queue = lock(&self.queue);
        let handle = *queue.pending.keys().next()?;
        let task = queue.pending.remove(&handle)?;
        queue.ids.remove(&handle.id());
        queue.executing.insert(handle.id(), task.name().to_owned());
        Some((handle, task))
    }

    pub fn finish(&self, id: TaskId) {
        lock(&self.queue).executing.remove(&id);
    }

    pub fn remove(&self, handle: Handle) -> bool {
        let removed = {
            let mut queue = lock(&self.queue);
            let removed = queue.pending.remove(&handle);
            if removed.is_some() {
                queue.ids.remove(&handle.id());
            }
            removed
        };
        match removed {
            Some(task) => {
                debug!(self.logger, "removed queued task"; "handle" => %handle, "task" => task.name());
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, handle: Handle) -> bool {
        lock(&self.queue).pending.contains_key(&handle)
    }

    /// Empty the queue. The tasks are dropped after the lock is released.
    pub fn clear(&self) -> usize {
        let drained = {
            let mut queue = lock(&self.queue);
            queue.ids.clear();
            std::mem::take(&mut queue.pending)
        };
        drained.len()
    }

    pub fn queued(&self) -> usize {
        lock(&self.queue).pending.len()
    }

    pub fn executing(&self) -> usize {
        lock(&self.queue).executing.len()
    }

    pub fn total(&self) -> usize {
        let queue = lock(&self.queue);
        queue.pending.len() + queue.executing.len()
    }

    pub fn executing_names(&self) -> Vec<String> {
        lock(&self.queue).executing.values().cloned().collect()
    }

    pub fn higher_priority_waiting(&self, priority: Priority) -> bool {
        lock(&self.queue)
            .pending
            .keys()
            .next()
            .map_or(false, |handle| handle.priority() < priority)
    }

    /// Park an idle worker for one sleep interval or until new work arrives.
    pub fn idle(&self) {
        let _ = self.wake_receiver.recv_timeout(self.sleep());
    }

    pub fn set_log(&self, log: Option<Arc<dyn LogSink>>) {
        *lock(&self.log) = log;
    }

    pub fn log(&self) -> Option<Arc<dyn LogSink>> {
        lock(&self.log).clone()
    }

    pub fn log_event(&self, event: &str, thread: Option<&ThreadContext>) {
        if event.is_empty() {
            return;
        }
        let message = match thread {
            Some(thread) => format!(
                "system thread: {}, id: {}, thread system id: {}, pool: {}, event: {}",
                current_thread_id(),
                thread.id(),
                thread.system_id(),
                self.name,
                event
            ),
            None => format!(
                "system thread: {}, pool: {}, event: {}",
                current_thread_id(),
                self.name,
                event
            ),
        };
        debug!(self.logger, "{}", message);
        // sink is cloned out so writing never holds our lock
        if let Some(log) = self.log() {
            log.write(&message);
        }
    }
}
