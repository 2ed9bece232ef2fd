use std::collections::VecDeque;
use std::sync::Mutex;

use herd_core::{Event, KernelError};

/// Bounded publish queue. Events wait here in arrival order until the
/// supervisor loop drains them for fan-out.
///
/// This is one of the two structures touched from outside the loop task
/// (control transports may publish on behalf of embedded callers), so it
/// carries its own mutex. Publishing never suspends.
#[derive(Debug)]
pub struct EventBus {
    queue: Mutex<VecDeque<Event>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Copy the three fields into a fresh event and enqueue it.
    ///
    /// Rejects empty type or sender, truncates oversized data, and returns
    /// `QueueFull` without blocking when the queue is at capacity.
    pub fn publish(&self, event_type: &str, sender: &str, data: &str) -> Result<(), KernelError> {
        let event = Event::new(event_type, sender, data)?;
        self.publish_event(event)
    }

    /// Enqueue an already-validated event, e.g. one parsed off a child's
    /// stdout.
    pub fn publish_event(&self, event: Event) -> Result<(), KernelError> {
        let mut queue = self.lock_queue();
        if queue.len() >= self.capacity {
            return Err(KernelError::QueueFull("event bus".into()));
        }
        queue.push_back(event);
        Ok(())
    }

    /// Take every queued event, in arrival order.
    pub fn drain(&self) -> Vec<Event> {
        self.lock_queue().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock_queue().len()
    }

    /// Publishers never hold the lock across a panic point, so a poisoned
    /// mutex still guards a coherent queue.
    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Event>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
