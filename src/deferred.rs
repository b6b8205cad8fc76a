//! FIFO of per-thread event-notification-mode changes queued for threads
//! that have not yet started.

use std::collections::VecDeque;

use crate::error::ThreadControlResult;
use crate::runtime::{EventIndex, EventMode};

struct DeferredEntry<T> {
    thread: T,
    mode: EventMode,
    ei: EventIndex,
}

/// Entries do not time out; they are dropped only at `reset()`
/// (debugger disconnect).
pub struct DeferredEventModeQueue<T> {
    entries: VecDeque<DeferredEntry<T>>,
}

impl<T> Default for DeferredEventModeQueue<T> {
    fn default() -> Self {
        DeferredEventModeQueue { entries: VecDeque::new() }
    }
}

impl<T: Clone + PartialEq> DeferredEventModeQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a mode change for a thread that has not started yet. The
    /// only failure mode modeled here is allocation failure, which a
    /// constrained embedding may want to surface rather than abort on.
    pub fn push(&mut self, thread: T, mode: EventMode, ei: EventIndex) -> ThreadControlResult<()> {
        self.entries.push_back(DeferredEntry { thread, mode, ei });
        Ok(())
    }

    /// Drain, in arrival order, every entry queued for `thread`,
    /// invoking `apply` for each. Entries for other threads are left in
    /// place.
    pub fn drain_for(&mut self, thread: &T, mut apply: impl FnMut(EventMode, EventIndex)) {
        let mut remaining = VecDeque::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if &entry.thread == thread {
                apply(entry.mode, entry.ei);
            } else {
                remaining.push_back(entry);
            }
        }
        self.entries = remaining;
    }

    /// Drop every queued entry; called from `reset()`.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_for_applies_in_arrival_order_and_leaves_others() {
        let mut q: DeferredEventModeQueue<u64> = DeferredEventModeQueue::new();
        q.push(1, EventMode::Enable, EventIndex::Breakpoint).unwrap();
        q.push(2, EventMode::Enable, EventIndex::SingleStep).unwrap();
        q.push(1, EventMode::Disable, EventIndex::MethodEntry).unwrap();

        let mut applied = Vec::new();
        q.drain_for(&1, |mode, ei| applied.push((mode, ei)));

        assert_eq!(applied, vec![(EventMode::Enable, EventIndex::Breakpoint), (EventMode::Disable, EventIndex::MethodEntry)]);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn clear_drops_everything() {
        let mut q: DeferredEventModeQueue<u64> = DeferredEventModeQueue::new();
        q.push(1, EventMode::Enable, EventIndex::Breakpoint).unwrap();
        q.clear();
        assert!(q.is_empty());
    }
}
