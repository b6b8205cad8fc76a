//! A recursive monitor with an associated condition variable.
//!
//! The thread-control state must be guarded by a single recursive lock
//! (`thread_lock` in the original JVMTI agent): the same thread may
//! re-enter it while already holding it (e.g. a public entry point that
//! locks, then calls an internal helper that also locks), and every
//! blocking wait must be spelled `while !condition { cv.wait(lock) }`
//! rather than a one-shot check. `std::sync::Mutex` is not reentrant, so
//! this module implements the classic owner/depth scheme on top of a
//! small `Mutex` + `Condvar` pair, with the protected data behind an
//! `UnsafeCell` that only the recorded owner thread may dereference.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};

struct RawState {
    owner: Option<ThreadId>,
    depth: u32,
}

pub struct ReentrantLock<T> {
    state: Mutex<RawState>,
    cv: Condvar,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is gated by `RawState.owner`, which only ever
// names the single thread currently allowed to dereference it.
unsafe impl<T: Send> Send for ReentrantLock<T> {}
unsafe impl<T: Send> Sync for ReentrantLock<T> {}

pub struct ReentrantGuard<'a, T> {
    lock: &'a ReentrantLock<T>,
}

impl<T> ReentrantLock<T> {
    pub fn new(data: T) -> Self {
        ReentrantLock {
            state: Mutex::new(RawState { owner: None, depth: 0 }),
            cv: Condvar::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire the monitor, blocking until it is free or already held by
    /// this thread.
    pub fn lock(&self) -> ReentrantGuard<'_, T> {
        let me = thread::current().id();
        let mut st = self.state.lock().unwrap();
        loop {
            match st.owner {
                None => {
                    st.owner = Some(me);
                    st.depth = 1;
                    break;
                }
                Some(o) if o == me => {
                    st.depth += 1;
                    break;
                }
                Some(_) => {
                    st = self.cv.wait(st).unwrap();
                }
            }
        }
        ReentrantGuard { lock: self }
    }

    fn unlock(&self) {
        let mut st = self.state.lock().unwrap();
        st.depth -= 1;
        if st.depth == 0 {
            st.owner = None;
            self.cv.notify_all();
        }
    }

    /// Wake every thread blocked in `lock()` or `wait_while()`. Must be
    /// called while holding the monitor (via the guard), matching
    /// `debugMonitorNotifyAll(threadLock)` in the original.
    fn notify_all(&self) {
        self.cv.notify_all();
    }

    /// Block while `condition` holds, re-checking it after every wakeup.
    /// Only supported at recursion depth 1: a thread already re-entering
    /// the monitor must not also try to sleep on it, since there would be
    /// no way to tell which recursion level should resume ownership.
    fn wait_while<F>(&self, guard: ReentrantGuard<'_, T>, mut condition: F) -> ReentrantGuard<'_, T>
    where
        F: FnMut(&T) -> bool,
    {
        let me = thread::current().id();
        let mut st = self.state.lock().unwrap();
        assert_eq!(st.owner, Some(me), "wait_while called without holding the lock");
        assert_eq!(st.depth, 1, "cannot wait while holding the lock recursively");

        // SAFETY: we still hold the logical lock (depth == 1, owner == me)
        // at this point, so dereferencing is exclusive.
        while condition(unsafe { &*self.data.get() }) {
            st.owner = None;
            st.depth = 0;
            self.cv.notify_all();
            st = self.cv.wait(st).unwrap();

            loop {
                match st.owner {
                    None => {
                        st.owner = Some(me);
                        st.depth = 1;
                        break;
                    }
                    Some(o) if o == me => {
                        // Should not normally happen (we released above),
                        // but re-entrant wakeups are handled uniformly.
                        st.depth += 1;
                        break;
                    }
                    Some(_) => {
                        st = self.cv.wait(st).unwrap();
                    }
                }
            }
        }
        drop(st);
        guard
    }
}

impl<T> Deref for ReentrantGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: this guard exists only while `self.lock`'s owner is the
        // current thread (established in `ReentrantLock::lock`).
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for ReentrantGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `Deref` above; exclusivity holds for the same reason.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for ReentrantGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

impl<'a, T> ReentrantGuard<'a, T> {
    /// Wake any thread blocked on this monitor.
    pub fn notify_all(&self) {
        self.lock.notify_all();
    }

    /// Block while `condition` holds. Consumes and returns the guard so
    /// callers can chain straight back into further locked access.
    pub fn wait_while<F>(self, condition: F) -> ReentrantGuard<'a, T>
    where
        F: FnMut(&T) -> bool,
    {
        let lock = self.lock;
        lock.wait_while(self, condition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn reentrant_lock_allows_same_thread_nesting() {
        let lock = ReentrantLock::new(0i32);
        let outer = lock.lock();
        {
            let inner = lock.lock();
            assert_eq!(*inner, 0);
        }
        assert_eq!(*outer, 0);
    }

    #[test]
    fn mutation_is_visible_after_unlock() {
        let lock = Arc::new(ReentrantLock::new(0i32));
        {
            let mut guard = lock.lock();
            *guard = 42;
        }
        let guard = lock.lock();
        assert_eq!(*guard, 42);
    }

    #[test]
    fn other_thread_blocks_until_release() {
        let lock = Arc::new(ReentrantLock::new(false));
        let guard = lock.lock();
        let lock2 = lock.clone();
        let handle = thread::spawn(move || {
            let g = lock2.lock();
            assert!(*g);
        });
        thread::sleep(Duration::from_millis(20));
        drop(guard);
        let mut g = lock.lock();
        *g = true;
        drop(g);
        handle.join().unwrap();
    }

    #[test]
    fn wait_while_blocks_until_condition_clears() {
        let lock = Arc::new(ReentrantLock::new(false));
        let lock2 = lock.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let mut g = lock2.lock();
            *g = true;
            g.notify_all();
        });
        let guard = lock.lock();
        let guard = guard.wait_while(|ready| !*ready);
        assert!(*guard);
        handle.join().unwrap();
    }
}
