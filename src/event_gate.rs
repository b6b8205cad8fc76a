//! Runs on every event-handler entry/exit: promotes unknown threads to
//! known, drains deferred event-mode settings at thread start, applies
//! pending interrupts/stops on exit, reports effective thread status,
//! filters co-located duplicates, and intercepts events that belong to
//! an in-flight pop-frame sequence before the external event handler
//! ever sees them.

use crate::controller::ThreadControlState;
use crate::node::ThreadListKind;
use crate::popframe::PopFrameCoordinator;
use crate::runtime::{EventIndex, EventMode, Runtime, SuspendFlags, ThreadState, ThreadStatus};
use crate::suspend::SuspendEngine;
use crate::sync::ReentrantLock;

/// What the external event handler should do with the event that just
/// triggered `on_entry`.
pub enum EntryOutcome<R: Runtime> {
    /// The event was swallowed by an in-flight pop-frame sequence; the
    /// external handler must not process it.
    Consumed,
    /// Normal processing: here is the node's event bag to accumulate
    /// into.
    Proceed(R::EventBag),
}

pub struct EventGate;

impl EventGate {
    /// Event-handler prologue.
    pub fn on_entry<R: Runtime>(
        lock: &ReentrantLock<ThreadControlState<R>>,
        runtime: &R,
        pop_frame: &PopFrameCoordinator,
        thread: &R::Thread,
        ei: EventIndex,
    ) -> EntryOutcome<R> {
        if let Some(outcome) = Self::pop_frame_pre_check(lock, pop_frame, thread, ei) {
            return outcome;
        }

        let mut deferred_suspend_needed = false;
        let bag = {
            let mut guard = lock.lock();

            SuspendEngine::ensure_node(&mut guard, runtime, thread);
            // A thread reaching the event gate at all is, by definition,
            // alive; any node still parked on `other` (freshly created,
            // or left there by a suspend command issued before it
            // started) belongs on `running`/`running_virtual` now.
            if guard.registry.get(thread).map(|n| n.list) == Some(ThreadListKind::Other) {
                let target = if runtime.is_virtual(thread) { ThreadListKind::RunningVirtual } else { ThreadListKind::Running };
                guard.registry.move_to(thread, target);
                runtime.set_tls(thread, true);
            }

            match ei {
                EventIndex::ThreadStart => {
                    let drained: Vec<(EventMode, EventIndex)> = {
                        let mut collected = Vec::new();
                        guard.deferred.drain_for(thread, |mode, ei| collected.push((mode, ei)));
                        collected
                    };
                    for (mode, event) in drained {
                        let _ = runtime.set_event_notification_mode(mode, event, thread);
                        if event == EventIndex::SingleStep {
                            if let Some(node) = guard.registry.get_mut(thread) {
                                node.instruction_step_mode = mode == EventMode::Enable;
                            }
                        }
                    }
                    if let Some(node) = guard.registry.get_mut(thread) {
                        node.is_started = true;
                    }
                }
                EventIndex::ThreadEnd => {
                    if let Some(node) = guard.registry.get_mut(thread) {
                        node.is_started = true;
                    }
                }
                _ => {}
            }

            let node = guard.registry.get_mut(thread).expect("ensured above");
            node.current_ei = Some(ei);
            if node.event_bag.is_none() {
                node.event_bag = Some(runtime.new_event_bag());
            }
            if node.suspend_on_start {
                deferred_suspend_needed = true;
            }
            node.event_bag.take().unwrap_or_else(|| runtime.new_event_bag())
        };

        if deferred_suspend_needed {
            let mut guard = lock.lock();
            let _ = SuspendEngine::suspend_thread(&mut guard, runtime, thread, true);
        }

        EntryOutcome::Proceed(bag)
    }

    /// Returns `Some` if the event was consumed by an in-flight
    /// pop-frame sequence and `on_entry` should return immediately.
    fn pop_frame_pre_check<R: Runtime>(
        lock: &ReentrantLock<ThreadControlState<R>>,
        pop_frame: &PopFrameCoordinator,
        thread: &R::Thread,
        ei: EventIndex,
    ) -> Option<EntryOutcome<R>> {
        let mut guard = lock.lock();
        let node = guard.registry.get_mut(thread)?;
        if !node.pop_frame_thread {
            return None;
        }
        match ei {
            EventIndex::ThreadEnd => {
                node.pop_frame_thread = false;
                drop(guard);
                pop_frame.signal_event();
                None
            }
            EventIndex::ThreadStart => {
                panic!("thread start observed while a pop-frame sequence is in progress");
            }
            _ => {
                drop(guard);
                pop_frame.signal_event();
                pop_frame.wait_for_proceed();
                Some(EntryOutcome::Consumed)
            }
        }
    }

    /// Event-handler epilogue.
    pub fn on_exit<R: Runtime>(
        lock: &ReentrantLock<ThreadControlState<R>>,
        runtime: &R,
        thread: &R::Thread,
        ei: EventIndex,
        event_bag: R::EventBag,
    ) {
        let mut guard = lock.lock();
        if ei == EventIndex::ThreadEnd {
            guard.registry.remove(thread);
            return;
        }

        let (pending_interrupt, pending_stop) = match guard.registry.get(thread) {
            Some(node) => (node.pending_interrupt, node.pending_stop.clone()),
            None => (false, None),
        };
        if pending_interrupt {
            let _ = runtime.interrupt_thread(thread);
            if let Some(node) = guard.registry.get_mut(thread) {
                node.pending_interrupt = false;
            }
        }
        if let Some(throwable) = pending_stop {
            let _ = runtime.stop_thread(thread, throwable);
            if let Some(node) = guard.registry.get_mut(thread) {
                node.pending_stop = None;
            }
        }
        if let Some(node) = guard.registry.get_mut(thread) {
            node.event_bag = Some(event_bag);
            node.current_ei = None;
        }
    }

    /// Effective thread status for the wire protocol: a node mid-event
    /// always reports `Running`, regardless of what the runtime's own
    /// state says it's waiting on.
    pub fn thread_status<R: Runtime>(
        lock: &ReentrantLock<ThreadControlState<R>>,
        runtime: &R,
        thread: &R::Thread,
    ) -> (ThreadStatus, SuspendFlags) {
        let guard = lock.lock();
        let suspended = guard.registry.get(thread).map(|n| n.suspend_count > 0).unwrap_or(false);
        let flags = if suspended { SuspendFlags::SUSPENDED } else { SuspendFlags::empty() };

        if let Some(node) = guard.registry.get(thread) {
            if node.handling_event() {
                return (ThreadStatus::Running, flags);
            }
        }
        drop(guard);

        let state = runtime.thread_state(thread);
        let status = if !state.contains(ThreadState::ALIVE) {
            ThreadStatus::NotStarted
        } else if state.contains(ThreadState::IN_NATIVE) {
            ThreadStatus::Running
        } else if state.contains(ThreadState::WAITING) {
            ThreadStatus::Wait
        } else {
            ThreadStatus::Running
        };
        (status, flags)
    }

    pub fn save_cle_info<R: Runtime>(
        lock: &ReentrantLock<ThreadControlState<R>>,
        thread: &R::Thread,
        ei: EventIndex,
        class: u64,
        method: u64,
        location: u64,
    ) {
        let mut guard = lock.lock();
        if let Some(node) = guard.registry.get_mut(thread) {
            node.save_cle_info(ei, class, method, location);
        }
    }

    pub fn cmp_cle_info<R: Runtime>(lock: &ReentrantLock<ThreadControlState<R>>, thread: &R::Thread, class: u64, method: u64, location: u64) -> bool {
        let guard = lock.lock();
        guard.registry.get(thread).map(|n| n.cmp_cle_info(class, method, location)).unwrap_or(false)
    }

    pub fn clear_cle_info<R: Runtime>(lock: &ReentrantLock<ThreadControlState<R>>, thread: &R::Thread) {
        let mut guard = lock.lock();
        if let Some(node) = guard.registry.get_mut(thread) {
            node.clear_cle_info();
        }
    }
}
