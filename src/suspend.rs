//! Translates debugger suspend/resume requests into runtime primitive
//! calls and reconciles the debugger-visible nesting counts against
//! them. Every function here expects the caller to already hold
//! `thread_lock` (the `ReentrantGuard` parameter *is* that proof) and
//! that the caller has gone through `LockOrderManager::acquire` first
//! where the original algorithm requires it (per-thread resume, every
//! VM-wide operation).

use std::collections::HashSet;

use crate::controller::ThreadControlState;
use crate::error::{ThreadControlError, ThreadControlResult};
use crate::node::{ThreadListKind, ThreadNode};
use crate::runtime::{Runtime, RuntimeError, SuspendResult, ThreadState};
use crate::sync::ReentrantGuard;

/// Stateless namespace for the suspend/resume algorithms; all state
/// lives in the locked [`ThreadControlState`] passed to each call.
pub struct SuspendEngine;

impl SuspendEngine {
    /// Find the node for `thread`, creating it if this is the first
    /// time it's been named. Not-yet-known non-virtual threads start on
    /// `other`; virtual threads start on `running_virtual` if currently
    /// alive, `other` otherwise.
    pub fn ensure_node<R: Runtime>(guard: &mut ReentrantGuard<'_, ThreadControlState<R>>, runtime: &R, thread: &R::Thread) {
        if guard.registry.contains(thread) {
            return;
        }
        let is_virtual = runtime.is_virtual(thread);
        let kind = if is_virtual && runtime.thread_state(thread).contains(ThreadState::ALIVE) {
            ThreadListKind::RunningVirtual
        } else {
            ThreadListKind::Other
        };
        let mut node = ThreadNode::new(thread.clone(), is_virtual, kind);
        // A node created while the VM is suspended must start out at
        // least as suspended as the VM itself; whether a
        // matching primitive suspend already landed on this exact
        // thread is unknowable here, so `to_be_resumed` is left false
        // and reconciled the next time this thread is actually suspended
        // or resumed.
        if guard.suspend_all_count > 0 {
            node.suspend_count = guard.suspend_all_count;
        }
        guard.registry.insert(node);
    }

    /// Per-thread suspend.
    pub fn suspend_thread<R: Runtime>(
        guard: &mut ReentrantGuard<'_, ThreadControlState<R>>,
        runtime: &R,
        thread: &R::Thread,
        deferred: bool,
    ) -> ThreadControlResult<()> {
        if deferred {
            return Self::deferred_suspend(guard, runtime, thread);
        }
        Self::ensure_node(guard, runtime, thread);
        let node = guard.registry.get_mut(thread).expect("just ensured");
        if node.is_debug_thread {
            return Ok(());
        }
        if node.suspend_on_start {
            node.suspend_count += 1;
            return Ok(());
        }
        if node.suspend_count == 0 {
            match runtime.suspend_thread(thread) {
                Ok(()) => node.to_be_resumed = true,
                Err(RuntimeError::ThreadNotAlive) => node.suspend_on_start = true,
                Err(e) => return Err(e.into()),
            }
        }
        let node = guard.registry.get_mut(thread).expect("still present");
        node.suspend_count += 1;
        debug_assert!(!(node.to_be_resumed && node.suspend_on_start));
        guard.notify_all();
        Ok(())
    }

    /// Deferred-suspend resolution: the node exists but was not alive
    /// when the original request counted it. Called with no locks held
    /// other than `thread_lock` itself, once the thread has started.
    fn deferred_suspend<R: Runtime>(
        guard: &mut ReentrantGuard<'_, ThreadControlState<R>>,
        runtime: &R,
        thread: &R::Thread,
    ) -> ThreadControlResult<()> {
        let node = guard.registry.get_mut(thread).ok_or(ThreadControlError::InvalidThread)?;
        node.suspend_on_start = false;
        if node.suspend_count > 0 {
            match runtime.suspend_thread(thread) {
                Ok(()) => {
                    let node = guard.registry.get_mut(thread).unwrap();
                    node.to_be_resumed = true;
                }
                Err(RuntimeError::ThreadNotAlive) => {
                    // Absorbed: nothing to suspend, the original request's
                    // count increment already stands.
                }
                Err(e) => {
                    let node = guard.registry.get_mut(thread).unwrap();
                    node.suspend_count -= 1;
                    return Err(e.into());
                }
            }
        }
        guard.notify_all();
        Ok(())
    }

    /// Per-thread resume.
    pub fn resume_thread<R: Runtime>(
        guard: &mut ReentrantGuard<'_, ThreadControlState<R>>,
        runtime: &R,
        thread: &R::Thread,
    ) -> ThreadControlResult<()> {
        let (is_debug, suspend_count, is_started) = match guard.registry.get(thread) {
            Some(n) => (n.is_debug_thread, n.suspend_count, n.is_started),
            None => return Ok(()),
        };
        if is_debug || suspend_count == 0 {
            return Ok(());
        }
        guard.registry.get_mut(thread).unwrap().suspend_count -= 1;
        guard.notify_all();

        let should_hard_resume = {
            let node = guard.registry.get(thread).unwrap();
            node.suspend_count == 0 && node.to_be_resumed
        };
        if should_hard_resume {
            match runtime.resume_thread(thread) {
                Ok(()) => {}
                Err(RuntimeError::ThreadNotAlive) if !is_started => {}
                Err(e) => return Err(e.into()),
            }
            let node = guard.registry.get_mut(thread).unwrap();
            node.frame_generation += 1;
            node.to_be_resumed = false;
        }
        Self::sweep_other(guard, runtime);
        Ok(())
    }

    /// Free nodes parked on `other` that have fully unwound (no
    /// outstanding suspend count, nothing left to resume, and the
    /// runtime no longer reports them alive), threads suspended before
    /// they ever started and then resumed without ever running.
    fn sweep_other<R: Runtime>(guard: &mut ReentrantGuard<'_, ThreadControlState<R>>, runtime: &R) {
        let candidates: Vec<R::Thread> = guard.registry.list(ThreadListKind::Other).iter().cloned().collect();
        for t in candidates {
            let should_free = {
                let node = guard.registry.get(&t).unwrap();
                node.suspend_count == 0 && !node.to_be_resumed && !runtime.thread_state(&t).contains(ThreadState::ALIVE)
            };
            if should_free {
                guard.registry.remove(&t);
            }
        }
    }

    /// VM-wide suspend.
    pub fn suspend_all<R: Runtime>(
        guard: &mut ReentrantGuard<'_, ThreadControlState<R>>,
        runtime: &R,
        virtual_threads_supported: bool,
    ) -> ThreadControlResult<()> {
        if virtual_threads_supported && guard.suspend_all_count == 0 {
            runtime.suspend_all_virtual_threads(&[])?;
        }
        let virt: Vec<R::Thread> = guard.registry.list(ThreadListKind::RunningVirtual).iter().cloned().collect();
        for t in &virt {
            let node = guard.registry.get_mut(t).unwrap();
            node.suspend_count += 1;
            node.to_be_resumed = true;
        }

        // `Runtime::all_threads` is documented as the full platform
        // thread roster; virtual threads are excluded defensively since
        // they were just handled above via the bulk call.
        let platform: Vec<R::Thread> = runtime.all_threads().into_iter().filter(|t| !runtime.is_virtual(t)).collect();
        for t in &platform {
            Self::ensure_node(guard, runtime, t);
        }
        Self::list_suspend(guard, runtime, &platform)?;

        let platform_set: HashSet<R::Thread> = platform.into_iter().collect();
        let other: Vec<R::Thread> = guard.registry.list(ThreadListKind::Other).iter().cloned().collect();
        for t in other {
            if !platform_set.contains(&t) {
                Self::suspend_thread(guard, runtime, &t, false)?;
            }
        }

        runtime.pin_all();
        guard.suspend_all_count += 1;
        guard.notify_all();
        Ok(())
    }

    /// VM-wide resume.
    pub fn resume_all<R: Runtime>(
        guard: &mut ReentrantGuard<'_, ThreadControlState<R>>,
        runtime: &R,
        virtual_threads_supported: bool,
    ) -> ThreadControlResult<()> {
        if virtual_threads_supported && guard.suspend_all_count == 1 {
            let virt: Vec<R::Thread> = guard.registry.list(ThreadListKind::RunningVirtual).iter().cloned().collect();
            let exclude: Vec<R::Thread> =
                virt.into_iter().filter(|t| guard.registry.get(t).map(|n| n.suspend_count > 0).unwrap_or(false)).collect();
            runtime.resume_all_virtual_threads(&exclude)?;
            guard.notify_all();
        }

        let running_and_virtual: Vec<R::Thread> = guard
            .registry
            .list(ThreadListKind::Running)
            .iter()
            .chain(guard.registry.list(ThreadListKind::RunningVirtual).iter())
            .cloned()
            .collect();
        Self::list_resume(guard, runtime, &running_and_virtual)?;

        let other: Vec<R::Thread> = guard.registry.list(ThreadListKind::Other).iter().cloned().collect();
        for t in other {
            Self::resume_thread(guard, runtime, &t)?;
        }
        Self::sweep_other(guard, runtime);

        runtime.unpin_all();
        guard.suspend_all_count -= 1;
        Ok(())
    }

    /// Batch suspend.
    pub fn list_suspend<R: Runtime>(
        guard: &mut ReentrantGuard<'_, ThreadControlState<R>>,
        runtime: &R,
        threads: &[R::Thread],
    ) -> ThreadControlResult<()> {
        for t in threads {
            Self::ensure_node(guard, runtime, t);
        }

        let mut needs_primitive = Vec::new();
        for t in threads {
            let node = guard.registry.get(t).unwrap();
            if !node.is_debug_thread && !node.suspend_on_start && node.suspend_count == 0 {
                needs_primitive.push(t.clone());
            }
        }
        let needing_set: HashSet<R::Thread> = needs_primitive.iter().cloned().collect();

        let results = runtime.suspend_thread_list(&needs_primitive);
        for (t, result) in needs_primitive.iter().zip(results.into_iter()) {
            let node = guard.registry.get_mut(t).unwrap();
            match result {
                SuspendResult::Ok => {
                    node.to_be_resumed = true;
                    node.suspend_count += 1;
                }
                SuspendResult::AlreadySuspendedByOther => {
                    node.suspend_count += 1;
                }
                SuspendResult::ThreadNotAlive => {
                    node.suspend_on_start = true;
                    node.suspend_count += 1;
                }
                SuspendResult::Err(_) => {
                    // Left as an error: no count change, no retry here.
                }
            }
        }

        // Nested suspends: threads pre-filtered out above just get their
        // count bumped.
        for t in threads {
            if needing_set.contains(t) {
                continue;
            }
            let node = guard.registry.get_mut(t).unwrap();
            if node.is_debug_thread {
                continue;
            }
            node.suspend_count += 1;
        }

        guard.notify_all();
        Ok(())
    }

    /// Batch resume, two passes so pass 2's accounting never
    /// observes a mutation pass 1 depended on.
    pub fn list_resume<R: Runtime>(
        guard: &mut ReentrantGuard<'_, ThreadControlState<R>>,
        runtime: &R,
        threads: &[R::Thread],
    ) -> ThreadControlResult<()> {
        let mut hard_resume = Vec::new();
        for t in threads {
            if let Some(node) = guard.registry.get(t) {
                if node.suspend_count == 1 && node.to_be_resumed {
                    hard_resume.push(t.clone());
                }
            }
        }
        let hard_set: HashSet<R::Thread> = hard_resume.iter().cloned().collect();

        for t in threads {
            if hard_set.contains(t) {
                continue;
            }
            if let Some(node) = guard.registry.get_mut(t) {
                if node.suspend_count > 0 {
                    node.suspend_count -= 1;
                    if node.suspend_count == 0 {
                        node.suspend_on_start = false;
                    }
                }
            }
        }

        if !hard_resume.is_empty() {
            runtime.resume_thread_list(&hard_resume)?;
            for t in &hard_resume {
                let node = guard.registry.get_mut(t).unwrap();
                node.suspend_count -= 1;
                node.to_be_resumed = false;
                node.frame_generation += 1;
            }
        }

        guard.notify_all();
        Ok(())
    }

    /// Suspend-count query.
    pub fn suspend_count<R: Runtime>(guard: &ReentrantGuard<'_, ThreadControlState<R>>, runtime: &R, thread: &R::Thread) -> i32 {
        if let Some(node) = guard.registry.get(thread) {
            return node.suspend_count;
        }
        if runtime.is_virtual(thread) {
            if runtime.thread_state(thread).is_empty() {
                0
            } else {
                guard.suspend_all_count
            }
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ThreadControlState;
    use crate::runtime::mock::MockRuntime;
    use crate::sync::ReentrantLock;

    fn fresh() -> (ReentrantLock<ThreadControlState<MockRuntime>>, MockRuntime) {
        (ReentrantLock::new(ThreadControlState::new()), MockRuntime::new())
    }

    #[test]
    fn suspend_then_resume_round_trips_count() {
        let (lock, rt) = fresh();
        rt.add_thread(1, ThreadState::ALIVE | ThreadState::RUNNABLE, false);
        let mut guard = lock.lock();
        SuspendEngine::suspend_thread(&mut guard, &rt, &1, false).unwrap();
        assert_eq!(SuspendEngine::suspend_count(&guard, &rt, &1), 1);
        SuspendEngine::suspend_thread(&mut guard, &rt, &1, false).unwrap();
        assert_eq!(SuspendEngine::suspend_count(&guard, &rt, &1), 2);
        SuspendEngine::resume_thread(&mut guard, &rt, &1).unwrap();
        assert_eq!(SuspendEngine::suspend_count(&guard, &rt, &1), 1);
        assert!(rt.thread_state(&1).contains(ThreadState::SUSPENDED));
        SuspendEngine::resume_thread(&mut guard, &rt, &1).unwrap();
        assert_eq!(SuspendEngine::suspend_count(&guard, &rt, &1), 0);
        assert!(!rt.thread_state(&1).contains(ThreadState::SUSPENDED));
    }

    #[test]
    fn suspend_of_unstarted_thread_is_deferred() {
        let (lock, rt) = fresh();
        rt.add_thread(1, ThreadState::empty(), false);
        let mut guard = lock.lock();
        SuspendEngine::suspend_thread(&mut guard, &rt, &1, false).unwrap();
        assert!(guard.registry.get(&1).unwrap().suspend_on_start);
        assert_eq!(SuspendEngine::suspend_count(&guard, &rt, &1), 1);

        // Thread starts; controller would call deferred_suspend here.
        rt.set_state(1, ThreadState::ALIVE | ThreadState::RUNNABLE);
        SuspendEngine::suspend_thread(&mut guard, &rt, &1, true).unwrap();
        assert!(!guard.registry.get(&1).unwrap().suspend_on_start);
        assert!(rt.thread_state(&1).contains(ThreadState::SUSPENDED));
    }

    #[test]
    fn list_suspend_absorbs_already_suspended_by_other() {
        let (lock, rt) = fresh();
        rt.add_thread(1, ThreadState::ALIVE, false);
        rt.mark_suspended_by_other(1);
        let mut guard = lock.lock();
        SuspendEngine::list_suspend(&mut guard, &rt, &[1]).unwrap();
        let node = guard.registry.get(&1).unwrap();
        assert_eq!(node.suspend_count, 1);
        assert!(!node.to_be_resumed);
    }

    #[test]
    fn list_resume_two_pass_distinguishes_nested_from_hard_resume() {
        let (lock, rt) = fresh();
        rt.add_thread(1, ThreadState::ALIVE, false);
        rt.add_thread(2, ThreadState::ALIVE, false);
        let mut guard = lock.lock();
        SuspendEngine::list_suspend(&mut guard, &rt, &[1, 2]).unwrap();
        // Thread 1 gets a second, nested suspend.
        SuspendEngine::suspend_thread(&mut guard, &rt, &1, false).unwrap();

        SuspendEngine::list_resume(&mut guard, &rt, &[1, 2]).unwrap();
        assert_eq!(guard.registry.get(&1).unwrap().suspend_count, 1);
        assert_eq!(guard.registry.get(&2).unwrap().suspend_count, 0);
        assert!(rt.thread_state(&1).contains(ThreadState::SUSPENDED));
        assert!(!rt.thread_state(&2).contains(ThreadState::SUSPENDED));
    }

    #[test]
    fn suspend_all_covers_virtual_and_platform_threads() {
        let (lock, rt) = fresh();
        rt.add_thread(1, ThreadState::ALIVE, false);
        rt.add_thread(2, ThreadState::ALIVE, true);
        let mut guard = lock.lock();
        // Register the virtual thread on running_virtual first, as the
        // event gate would have on its start event.
        SuspendEngine::ensure_node(&mut guard, &rt, &2);
        guard.registry.move_to(&2, ThreadListKind::RunningVirtual);

        SuspendEngine::suspend_all(&mut guard, &rt, true).unwrap();
        assert_eq!(guard.registry.get(&1).unwrap().suspend_count, 1);
        assert_eq!(guard.registry.get(&2).unwrap().suspend_count, 1);
        assert_eq!(guard.suspend_all_count, 1);
        assert_eq!(rt.pinned_count(), 1);
    }

    #[test]
    fn suspend_count_of_untracked_virtual_thread_follows_vm_wide_count() {
        let (lock, rt) = fresh();
        rt.add_thread(1, ThreadState::ALIVE, true);
        let mut guard = lock.lock();
        SuspendEngine::suspend_all(&mut guard, &rt, true).unwrap();
        // Thread 1 was never separately tracked/ensured before suspend_all
        // ran its virtual-thread bulk step, so it has no node yet.
        assert!(!guard.registry.contains(&1));
        assert_eq!(SuspendEngine::suspend_count(&guard, &rt, &1), guard.suspend_all_count);
    }
}
