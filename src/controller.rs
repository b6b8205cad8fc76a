//! The crate's public facade: [`ThreadController`] wires together the
//! registry, suspend engine, event gate, pop-frame coordinator, lock
//! order manager and debug-thread set behind the single `thread_lock`
//! monitor, and exposes the operations the rest of a debug agent calls.

use std::sync::Arc;

use crate::debug_threads::DebugThreadSet;
use crate::deferred::DeferredEventModeQueue;
use crate::error::{ThreadControlError, ThreadControlResult};
use crate::event_gate::{EntryOutcome, EventGate};
use crate::lock_order::{ExternalLock, LockOrderManager};
use crate::node::ThreadListKind;
use crate::popframe::PopFrameCoordinator;
use crate::runtime::{EventIndex, EventMode, Runtime, SuspendFlags, ThreadStatus};
use crate::suspend::SuspendEngine;
use crate::sync::ReentrantLock;

/// The one behavioral knob this crate exposes at construction time: does
/// `reset()` keep virtual-thread nodes across a debugger disconnect, or
/// tear them down along with everything else. The original leaves this
/// to the implementer; this crate defaults to tearing down, matching the
/// original's observed behavior, and lets an embedding agent opt into
/// remembering them.
#[derive(Debug, Clone, Copy)]
pub struct ThreadControllerConfig {
    pub remember_virtual_threads: bool,
    /// Whether the embedding runtime supports virtual threads at all
    /// (gates every bulk virtual-thread primitive call).
    pub virtual_threads_supported: bool,
}

impl Default for ThreadControllerConfig {
    fn default() -> Self {
        ThreadControllerConfig { remember_virtual_threads: false, virtual_threads_supported: true }
    }
}

/// Everything `thread_lock` protects: the registry, the deferred
/// event-mode FIFO, the debug-thread set, and the VM-wide suspend
/// nesting level.
pub struct ThreadControlState<R: Runtime> {
    pub registry: crate::registry::ThreadRegistry<R>,
    pub deferred: DeferredEventModeQueue<R::Thread>,
    pub debug_threads: DebugThreadSet<R>,
    pub suspend_all_count: i32,
}

impl<R: Runtime> ThreadControlState<R> {
    pub fn new() -> Self {
        ThreadControlState {
            registry: crate::registry::ThreadRegistry::new(),
            deferred: DeferredEventModeQueue::new(),
            debug_threads: DebugThreadSet::new(),
            suspend_all_count: 0,
        }
    }
}

impl<R: Runtime> Default for ThreadControlState<R> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ThreadController<R: Runtime> {
    runtime: R,
    state: ReentrantLock<ThreadControlState<R>>,
    lock_order: LockOrderManager,
    pop_frame: PopFrameCoordinator,
    config: ThreadControllerConfig,
}

impl<R: Runtime> ThreadController<R> {
    pub fn new(
        runtime: R,
        config: ThreadControllerConfig,
        event_handler: Arc<dyn ExternalLock>,
        invoker: Arc<dyn ExternalLock>,
        event_helper: Arc<dyn ExternalLock>,
        step_control: Arc<dyn ExternalLock>,
        common_ref: Arc<dyn ExternalLock>,
    ) -> Self {
        log::debug!("thread controller initialized (remember_virtual_threads={})", config.remember_virtual_threads);
        ThreadController {
            runtime,
            state: ReentrantLock::new(ThreadControlState::new()),
            lock_order: LockOrderManager::new(event_handler, invoker, event_helper, step_control, common_ref),
            pop_frame: PopFrameCoordinator::new(),
            config,
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Capture threads that were already running before the agent
    /// attached (`on_hook`, called once at agent startup).
    pub fn on_hook(&self, preexisting: &[R::Thread]) {
        let mut guard = self.state.lock();
        for thread in preexisting {
            if guard.registry.contains(thread) {
                continue;
            }
            let is_virtual = self.runtime.is_virtual(thread);
            let kind = if is_virtual { ThreadListKind::RunningVirtual } else { ThreadListKind::Running };
            let mut node = crate::node::ThreadNode::new(thread.clone(), is_virtual, kind);
            node.is_started = true;
            guard.registry.insert(node);
        }
        log::debug!("on_hook captured {} pre-existing threads", preexisting.len());
    }

    pub fn on_connect(&self) {
        log::info!("debugger connected");
    }

    /// Debugger disconnect: drop the deferred-mode FIFO, resume every
    /// thread this agent suspended, and tear down virtual-thread nodes
    /// unless configured to remember them.
    pub fn on_disconnect(&self) {
        self.reset();
    }

    pub fn reset(&self) {
        log::info!("resetting thread-control state (debugger disconnect)");
        let mut guard = self.state.lock();
        guard.deferred.clear();

        // Bulk-suspended virtual threads that never got a tracked node
        // (suspend_all's untracked vthreads) are only reachable through
        // this call; the per-node loop below only ever sees threads the
        // registry already knows about.
        if self.config.virtual_threads_supported && guard.suspend_all_count > 0 {
            if self.runtime.resume_all_virtual_threads(&[]).is_err() {
                log::error!("failed to resume all virtual threads during reset");
                panic!("failed to resume all virtual threads during reset");
            }
        }

        let all: Vec<R::Thread> = guard.registry.all_threads().cloned().collect();
        for thread in &all {
            let suspend_count = guard.registry.get(thread).map(|n| n.suspend_count).unwrap_or(0);
            if suspend_count > 0 {
                // Fully unwind this node's suspend nesting. A primitive
                // failure here means a thread this agent suspended can
                // no longer be resumed, an invariant violation, not a
                // recoverable condition.
                for _ in 0..suspend_count {
                    if SuspendEngine::resume_thread(&mut guard, &self.runtime, thread).is_err() {
                        log::error!("failed to resume a tracked suspended thread during reset");
                        panic!("failed to resume a tracked suspended thread during reset");
                    }
                }
            }
        }

        if !self.config.remember_virtual_threads {
            let virt: Vec<R::Thread> = guard.registry.list(ThreadListKind::RunningVirtual).iter().cloned().collect();
            for thread in virt {
                guard.registry.remove(&thread);
            }
        }

        guard.suspend_all_count = 0;
        guard.notify_all();
    }

    pub fn suspend_thread(&self, thread: &R::Thread, deferred: bool) -> ThreadControlResult<()> {
        let _guard = self.lock_order.acquire();
        let mut state = self.state.lock();
        log::trace!("suspend_thread (deferred={deferred})");
        SuspendEngine::suspend_thread(&mut state, &self.runtime, thread, deferred)
    }

    pub fn resume_thread(&self, thread: &R::Thread, unblock_command_loop: bool) -> ThreadControlResult<()> {
        let _guard = self.lock_order.acquire();
        let mut state = self.state.lock();
        log::trace!("resume_thread (unblock_command_loop={unblock_command_loop})");
        let result = SuspendEngine::resume_thread(&mut state, &self.runtime, thread);
        if unblock_command_loop {
            state.notify_all();
        }
        result
    }

    pub fn suspend_all(&self) -> ThreadControlResult<()> {
        let _guard = self.lock_order.acquire();
        let mut state = self.state.lock();
        log::debug!("suspend_all");
        SuspendEngine::suspend_all(&mut state, &self.runtime, self.config.virtual_threads_supported)
    }

    pub fn resume_all(&self) -> ThreadControlResult<()> {
        let _guard = self.lock_order.acquire();
        let mut state = self.state.lock();
        log::debug!("resume_all");
        SuspendEngine::resume_all(&mut state, &self.runtime, self.config.virtual_threads_supported)
    }

    pub fn suspend_count(&self, thread: &R::Thread) -> i32 {
        let state = self.state.lock();
        SuspendEngine::suspend_count(&state, &self.runtime, thread)
    }

    /// Borrow the per-node step-request record, if any, for the duration
    /// of `f`.
    pub fn step_request<F, T>(&self, thread: &R::Thread, f: F) -> Option<T>
    where
        F: FnOnce(&R::StepRequest) -> T,
    {
        let state = self.state.lock();
        let request = state.registry.get(thread)?.current_step.as_ref()?;
        Some(f(request))
    }

    /// Install (or clear, with `None`) the opaque step-request record
    /// for `thread`.
    pub fn set_step_request(&self, thread: &R::Thread, request: Option<R::StepRequest>) -> ThreadControlResult<()> {
        let mut state = self.state.lock();
        let node = state.registry.get_mut(thread).ok_or(ThreadControlError::InvalidThread)?;
        node.current_step = request;
        Ok(())
    }

    pub fn set_invoke_request(&self, thread: &R::Thread, request: Option<R::InvokeRequest>) -> ThreadControlResult<()> {
        let mut state = self.state.lock();
        let node = state.registry.get_mut(thread).ok_or(ThreadControlError::InvalidThread)?;
        node.current_invoke = request;
        Ok(())
    }

    /// Borrow the per-node invoke-request record, if any, for the
    /// duration of `f`.
    pub fn invoke_request<F, T>(&self, thread: &R::Thread, f: F) -> Option<T>
    where
        F: FnOnce(&R::InvokeRequest) -> T,
    {
        let state = self.state.lock();
        let request = state.registry.get(thread)?.current_invoke.as_ref()?;
        Some(f(request))
    }

    /// Pop the stack of `thread` up to and including frame number `fnum`
    /// (0 is the current frame), one single-step rendezvous at a time.
    pub fn pop_frames(&self, thread: &R::Thread, fnum: i32) -> ThreadControlResult<()> {
        let pop_count = fnum + 1;
        if pop_count < 1 {
            return Err(ThreadControlError::NoMoreFrames);
        }

        let (was_stepping, was_invoking) = {
            let mut state = self.state.lock();
            let node = state.registry.get_mut(thread).ok_or(ThreadControlError::InvalidThread)?;
            let was_stepping = node.instruction_step_mode;
            let was_invoking = node.current_invoke.is_some();
            node.pop_frame_thread = true;
            (was_stepping, was_invoking)
        };

        self.runtime.set_event_notification_mode(EventMode::Enable, EventIndex::SingleStep, thread)?;

        for step in 0..pop_count {
            log::trace!("pop_frames: step {step}/{pop_count}");
            self.runtime.pop_frame(thread)?;
            self.runtime.resume_thread(thread)?;
            self.pop_frame.wait_for_event();
            self.runtime.suspend_thread(thread)?;
            self.pop_frame.signal_proceed();
        }

        {
            let mut state = self.state.lock();
            if let Some(node) = state.registry.get_mut(thread) {
                node.pop_frame_thread = false;
                node.frame_generation += 1;
            }
        }

        if !was_stepping {
            self.runtime.set_event_notification_mode(EventMode::Disable, EventIndex::SingleStep, thread)?;
        }
        let _ = was_invoking; // re-enabling invokes is the invoker's own concern; nothing to restore here.
        Ok(())
    }

    pub fn set_event_mode(&self, mode: EventMode, ei: EventIndex, thread: &R::Thread) -> ThreadControlResult<()> {
        let mut state = self.state.lock();
        let is_started = state.registry.get(thread).map(|n| n.is_started).unwrap_or(false);
        if !is_started {
            state.deferred.push(thread.clone(), mode, ei).map_err(|_| ThreadControlError::InvalidThread)?;
            return Ok(());
        }
        self.runtime.set_event_notification_mode(mode, ei, thread)?;
        if ei == EventIndex::SingleStep {
            if let Some(node) = state.registry.get_mut(thread) {
                node.instruction_step_mode = mode == EventMode::Enable;
            }
        }
        Ok(())
    }

    pub fn instruction_step_mode(&self, thread: &R::Thread) -> bool {
        self.state.lock().registry.get(thread).map(|n| n.instruction_step_mode).unwrap_or(false)
    }

    pub fn on_event_handler_entry(
        &self,
        thread: &R::Thread,
        ei: EventIndex,
        _session_id: u64,
        _current_exception: Option<R::Throwable>,
    ) -> EntryOutcomeBag<R> {
        match EventGate::on_entry(&self.state, &self.runtime, &self.pop_frame, thread, ei) {
            EntryOutcome::Consumed => EntryOutcomeBag::Consumed,
            EntryOutcome::Proceed(bag) => EntryOutcomeBag::Proceed(bag),
        }
    }

    pub fn on_event_handler_exit(&self, ei: EventIndex, thread: &R::Thread, event_bag: R::EventBag) {
        EventGate::on_exit(&self.state, &self.runtime, thread, ei, event_bag)
    }

    pub fn application_thread_status(&self, thread: &R::Thread) -> (ThreadStatus, SuspendFlags) {
        EventGate::thread_status(&self.state, &self.runtime, thread)
    }

    /// Interrupt `thread` immediately, unless it is currently mid-event,
    /// in which case the interrupt is held until the event is processed.
    pub fn interrupt(&self, thread: &R::Thread) -> ThreadControlResult<()> {
        let mut state = self.state.lock();
        let handling = state.registry.get(thread).map(|n| n.handling_event()).unwrap_or(false);
        if !handling {
            drop(state);
            self.runtime.interrupt_thread(thread)?;
            return Ok(());
        }
        state.registry.get_mut(thread).unwrap().pending_interrupt = true;
        Ok(())
    }

    /// Defer an interrupt to the next event-handler exit on `thread`
    /// (the thread is currently mid-event and holding agent locks).
    pub fn set_pending_interrupt(&self, thread: &R::Thread) -> ThreadControlResult<()> {
        let mut state = self.state.lock();
        let node = state.registry.get_mut(thread).ok_or(ThreadControlError::InvalidThread)?;
        node.pending_interrupt = true;
        Ok(())
    }

    /// Stop `thread` with `throwable` immediately, unless it is
    /// currently mid-event, in which case the stop is held until the
    /// event is processed.
    pub fn stop(&self, thread: &R::Thread, throwable: R::Throwable) -> ThreadControlResult<()> {
        let mut state = self.state.lock();
        let handling = state.registry.get(thread).map(|n| n.handling_event()).unwrap_or(false);
        if !handling {
            drop(state);
            self.runtime.stop_thread(thread, throwable)?;
            return Ok(());
        }
        state.registry.get_mut(thread).unwrap().pending_stop = Some(throwable);
        Ok(())
    }

    pub fn clear_cle_info(&self, thread: &R::Thread) {
        EventGate::clear_cle_info(&self.state, thread)
    }

    pub fn save_cle_info(&self, thread: &R::Thread, ei: EventIndex, class: u64, method: u64, location: u64) {
        EventGate::save_cle_info(&self.state, thread, ei, class, method, location)
    }

    pub fn cmp_cle_info(&self, thread: &R::Thread, class: u64, method: u64, location: u64) -> bool {
        EventGate::cmp_cle_info(&self.state, thread, class, method, location)
    }

    pub fn add_debug_thread(&self, thread: R::Thread) -> ThreadControlResult<()> {
        let mut state = self.state.lock();
        state.debug_threads.add(thread.clone(), &self.runtime)?;
        if let Some(node) = state.registry.get_mut(&thread) {
            node.is_debug_thread = true;
        }
        Ok(())
    }

    pub fn is_debug_thread(&self, thread: &R::Thread) -> bool {
        self.state.lock().debug_threads.contains(thread)
    }

    pub fn current_thread(&self) -> Option<R::Thread> {
        self.runtime.current_thread()
    }

    pub fn frame_generation(&self, thread: &R::Thread) -> i64 {
        self.state.lock().registry.get(thread).map(|n| n.frame_generation).unwrap_or(0)
    }

    pub fn all_virtual_threads(&self) -> Vec<R::Thread> {
        self.state.lock().registry.list(ThreadListKind::RunningVirtual).iter().cloned().collect()
    }

    /// Clear every node's pending invoke record, e.g. at shutdown.
    pub fn detach_invokes(&self) {
        let mut state = self.state.lock();
        let threads: Vec<R::Thread> = state.registry.all_threads().cloned().collect();
        for thread in threads {
            if let Some(node) = state.registry.get_mut(&thread) {
                node.current_invoke = None;
            }
        }
    }
}

/// `EntryOutcome` specialized for the public API so callers outside
/// this crate don't need to name `event_gate::EntryOutcome` directly.
pub enum EntryOutcomeBag<R: Runtime> {
    Consumed,
    Proceed(R::EventBag),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::MockRuntime;
    use crate::runtime::ThreadState;

    struct NoopLock;
    impl ExternalLock for NoopLock {
        fn acquire(&self) {}
        fn release(&self) {}
    }

    fn make_controller(config: ThreadControllerConfig) -> ThreadController<MockRuntime> {
        let noop = || Arc::new(NoopLock) as Arc<dyn ExternalLock>;
        ThreadController::new(MockRuntime::new(), config, noop(), noop(), noop(), noop(), noop())
    }

    #[test]
    fn deferred_suspend_end_to_end() {
        let controller = make_controller(ThreadControllerConfig::default());
        controller.runtime().add_thread(1, ThreadState::empty(), false);

        controller.suspend_thread(&1, false).unwrap();
        assert_eq!(controller.suspend_count(&1), 1);
        assert!(!controller.runtime().thread_state(&1).contains(ThreadState::SUSPENDED));

        controller.runtime().set_state(1, ThreadState::ALIVE | ThreadState::RUNNABLE);
        let pop_frame = PopFrameCoordinator::new();
        let bag = match EventGate::on_entry(&controller.state, controller.runtime(), &pop_frame, &1, EventIndex::ThreadStart) {
            EntryOutcome::Proceed(bag) => bag,
            EntryOutcome::Consumed => panic!("thread start is never consumed"),
        };
        EventGate::on_exit(&controller.state, controller.runtime(), &1, EventIndex::ThreadStart, bag);

        assert!(controller.runtime().thread_state(&1).contains(ThreadState::SUSPENDED));
        assert_eq!(controller.suspend_count(&1), 1);
    }

    #[test]
    fn suspend_all_covers_a_virtual_thread() {
        let controller = make_controller(ThreadControllerConfig::default());
        controller.runtime().add_thread(1, ThreadState::ALIVE, false);
        controller.runtime().add_thread(2, ThreadState::ALIVE, true);
        controller.on_hook(&[1, 2]);

        controller.suspend_all().unwrap();
        assert_eq!(controller.suspend_count(&1), 1);
        assert_eq!(controller.suspend_count(&2), 1);
        assert!(controller.runtime().thread_state(&2).contains(ThreadState::SUSPENDED));
    }

    #[test]
    fn resume_all_excludes_threads_still_wanted_suspended() {
        let controller = make_controller(ThreadControllerConfig::default());
        controller.runtime().add_thread(1, ThreadState::ALIVE, true);
        controller.on_hook(&[1]);

        controller.suspend_all().unwrap();
        // An extra, independent suspend on the same virtual thread: it
        // must stay suspended even after resume_all.
        controller.suspend_thread(&1, false).unwrap();
        controller.resume_all().unwrap();

        assert_eq!(controller.suspend_count(&1), 1);
        assert!(controller.runtime().thread_state(&1).contains(ThreadState::SUSPENDED));
    }

    #[test]
    fn pop_one_frame() {
        let controller = Arc::new(make_controller(ThreadControllerConfig::default()));
        controller.runtime().add_thread(1, ThreadState::ALIVE, false);
        controller.on_hook(&[1]);

        // `MockRuntime::pop_frame`/`resume_thread`/`suspend_thread` are
        // no-ops that don't themselves fire a single-step event, so
        // play the target thread's side of the rendezvous by hand
        // rather than going through a real event-dispatch loop.
        let target = {
            let controller = controller.clone();
            std::thread::spawn(move || {
                controller.pop_frame.signal_event();
                controller.pop_frame.wait_for_proceed();
            })
        };

        // `fnum == 0` pops exactly one frame (`popCount = fnum + 1`).
        controller.pop_frames(&1, 0).unwrap();
        target.join().unwrap();

        assert_eq!(controller.frame_generation(&1), 1);
        assert!(!controller.state.lock().registry.get(&1).unwrap().pop_frame_thread);
    }

    #[test]
    fn pop_frames_rejects_negative_frame_number() {
        let controller = make_controller(ThreadControllerConfig::default());
        controller.runtime().add_thread(1, ThreadState::ALIVE, false);
        controller.on_hook(&[1]);
        assert_eq!(controller.pop_frames(&1, -1), Err(ThreadControlError::NoMoreFrames));
    }

    #[test]
    fn pending_stop_applied_on_event_exit() {
        let controller = make_controller(ThreadControllerConfig::default());
        controller.runtime().add_thread(1, ThreadState::ALIVE, false);
        controller.on_hook(&[1]);

        let pop_frame = PopFrameCoordinator::new();
        let bag = match EventGate::on_entry(&controller.state, controller.runtime(), &pop_frame, &1, EventIndex::Breakpoint) {
            EntryOutcome::Proceed(bag) => bag,
            EntryOutcome::Consumed => panic!("unexpected"),
        };
        controller.stop(&1, 42).unwrap();
        EventGate::on_exit(&controller.state, controller.runtime(), &1, EventIndex::Breakpoint, bag);

        let state = controller.state.lock();
        assert!(state.registry.get(&1).unwrap().pending_stop.is_none());
    }

    #[test]
    fn reset_resumes_suspended_threads_and_drops_virtual_nodes() {
        let controller = make_controller(ThreadControllerConfig::default());
        controller.runtime().add_thread(1, ThreadState::ALIVE, false);
        controller.runtime().add_thread(2, ThreadState::ALIVE, true);
        controller.on_hook(&[1, 2]);
        controller.suspend_thread(&1, false).unwrap();
        controller.suspend_thread(&2, false).unwrap();

        controller.reset();

        assert!(!controller.runtime().thread_state(&1).contains(ThreadState::SUSPENDED));
        assert_eq!(controller.suspend_count(&2), 0);
        assert!(!controller.state.lock().registry.contains(&2));
    }
}
