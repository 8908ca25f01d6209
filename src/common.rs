use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Scheduling priority, lower value runs first
pub type Priority = i32;

pub type TaskId = u64;

/// Identifies a submitted task within one pool.
///
/// Handles order by priority first and id second, so a queue keyed by
/// handle pops the most urgent task and serves equal priorities in
/// submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Handle {
    priority: Priority,
    id: TaskId,
}

impl Handle {
    pub fn new(priority: Priority, id: TaskId) -> Handle {
        Handle { priority, id }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.priority, self.id)
    }
}

static NEXT_SYSTEM_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static SYSTEM_ID: Cell<u64> = Cell::new(0);
}

/// Process-unique id of the calling OS thread. Never 0, which marks "no thread".
pub fn current_thread_id() -> u64 {
    SYSTEM_ID.with(|id| {
        if id.get() == 0 {
            id.set(NEXT_SYSTEM_ID.fetch_add(1, Ordering::Relaxed));
        }
        id.get()
    })
}

// guarded state is never left half-updated, so a poisoned lock is still usable
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
