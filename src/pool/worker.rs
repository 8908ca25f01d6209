use super::queue::Shared;
use super::supervisor::Message;
use crate::common::TaskId;
use crate::error::Result;
use crate::task::Task;
use crate::thread::{ThreadContext, WorkerThread};
use crossbeam::channel::Sender;
use slog::{debug, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct SlotState {
    // id of the task being executed, 0 when idle
    task: AtomicU64,
    retired: AtomicBool,
}

impl SlotState {
    pub fn task(&self) -> TaskId {
        self.task.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.task() != 0
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }
}

/// One worker thread of the pool and the flags its loop shares with us.
pub struct Slot {
    id: usize,
    thread: WorkerThread,
    state: Arc<SlotState>,
}

impl Slot {
    pub fn new(id: usize, thread: WorkerThread) -> Slot {
        Slot {
            id,
            thread,
            state: Arc::new(SlotState::default()),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn thread(&self) -> &WorkerThread {
        &self.thread
    }

    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    /// Ask the task running on this slot to cancel. Does nothing once that
    /// task has finished, so a later task is never hit.
    pub fn cancel_task(&self) -> bool {
        self.thread.cancel_task(self.state.task())
    }

    pub fn is_retired(&self) -> bool {
        self.state.is_retired()
    }

    /// The loop exits after its current task and is not revived.
    pub fn retire(&self) {
        self.state.retired.store(true, Ordering::SeqCst);
    }

    /// Start the worker loop on this slot's thread.
    pub fn start(&self, shared: &Arc<Shared>, notifier: &Sender<Message>) -> Result<()> {
        let task = worker_task(shared.clone(), self.state.clone(), self.id, notifier.clone());
        self.thread.start(task)
    }
}

// the loop runs as the start callback of a task on the slot's thread.
// ending through cancel or error asks the supervisor for a restart.
fn worker_task(
    shared: Arc<Shared>,
    state: Arc<SlotState>,
    id: usize,
    notifier: Sender<Message>,
) -> Task {
    let on_error = notifier.clone();
    Task::new(format!("{} worker loop", shared.name()))
        .on_start(move |thread| {
            worker_loop(&shared, &state, thread);
            Ok(())
        })
        .on_cancel(move |thread| {
            warn!(thread.logger(), "worker loop cancelled");
            let _ = notifier.send(Message::Dead(id));
        })
        .on_error(move |thread, err| {
            warn!(thread.logger(), "worker loop died"; "error" => %err);
            let _ = on_error.send(Message::Dead(id));
        })
}

fn worker_loop(shared: &Arc<Shared>, state: &SlotState, thread: &ThreadContext) {
    shared.log_event("worker loop started", Some(thread));
    while shared.keep_running() && !state.is_retired() {
        match shared.pop() {
            Some((handle, task)) => {
                let _executing = Executing::new(shared, state, thread, handle.id());
                debug!(thread.logger(), "task started"; "handle" => %handle, "task" => task.name());
                let result = task.run(thread);
                debug!(thread.logger(), "task done"; "handle" => %handle, "result" => ?result);
            }
            None => shared.idle(),
        }
    }
    shared.log_event("worker loop exiting", Some(thread));
}

// leaves the executing set however the task ends
struct Executing<'a> {
    shared: &'a Shared,
    state: &'a SlotState,
    thread: &'a ThreadContext,
    id: TaskId,
}

impl<'a> Executing<'a> {
    fn new(
        shared: &'a Shared,
        state: &'a SlotState,
        thread: &'a ThreadContext,
        id: TaskId,
    ) -> Self {
        thread.begin_task(id);
        state.task.store(id, Ordering::SeqCst);
        Executing {
            shared,
            state,
            thread,
            id,
        }
    }
}

impl Drop for Executing<'_> {
    fn drop(&mut self) {
        self.thread.end_task();
        self.state.task.store(0, Ordering::SeqCst);
        self.shared.finish(self.id);
    }
}
