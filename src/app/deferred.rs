//! Actions a command handler schedules for after it has returned.
//!
//! Handlers answer synchronously; anything that needs the server again
//! (publishing the new lock state) is queued here and run on the next
//! `update()` tick.

use log::warn;

pub const DEFERRED_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredAction {
    /// Broadcast the settled mechanism status.
    PublishLockStatus { locked: bool },
}

#[derive(Debug, Default)]
pub struct DeferredQueue {
    actions: heapless::Deque<DeferredAction, DEFERRED_CAPACITY>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `action`.  Returns `false` and drops it when the queue is full.
    pub fn push(&mut self, action: DeferredAction) -> bool {
        if self.actions.push_back(action).is_err() {
            warn!("Deferred: queue full, dropping {action:?}");
            return false;
        }
        true
    }

    pub fn publish_lock_status(&mut self, locked: bool) -> bool {
        self.push(DeferredAction::PublishLockStatus { locked })
    }

    pub fn pop(&mut self) -> Option<DeferredAction> {
        self.actions.pop_front()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
