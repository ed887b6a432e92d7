use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::models::Timer;

/// Due reminders waiting for the announcement.
///
/// Each entry is returned by `pop_next()` only once even when multiple
/// callers drain the queue concurrently.
#[derive(Clone, Default)]
pub struct ReminderQueue {
    queue: Arc<Mutex<VecDeque<Arc<Timer>>>>,
}

impl ReminderQueue {
    pub fn new() -> Self {
        Default::default()
    }

    pub(crate) fn push(&self, timer: Arc<Timer>) {
        tracing::debug!(timer.key = %timer.key(), "Reminder queued");
        self.lock_queue().push_back(timer);
    }

    pub fn pop_next(&self) -> Option<Arc<Timer>> {
        self.lock_queue().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock_queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_queue().is_empty()
    }

    pub(crate) fn clear(&self) {
        self.lock_queue().clear();
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<Arc<Timer>>> {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// </coverage:exclude>
