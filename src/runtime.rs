//! The seam between this crate and a particular managed runtime.
//!
//! Everything the thread-control core needs from the embedding runtime,
//! suspend/resume primitives, per-thread state queries, the thread-local
//! slot, event-notification toggles and the bulk virtual-thread calls,
//! is expressed here as the [`Runtime`] trait, generic over a handful of
//! associated types. This mirrors the way `mizl_h`'s `Debugger` trait
//! abstracts over host-specific ptrace backends while keeping the
//! higher-level logic host-agnostic.

use std::fmt;

use bitflags::bitflags;

/// Errors a [`Runtime`] implementation reports back to this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The runtime could not allocate a structural resource.
    OutOfMemory,
    /// The named thread is not alive (not yet started, or already dead).
    ThreadNotAlive,
    /// The thread was already suspended by someone other than this agent.
    AlreadySuspendedByOther,
    /// The thread handle does not name a thread the runtime knows about.
    InvalidThread,
    /// Any other primitive failure, carrying the runtime's own message.
    Other(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::OutOfMemory => write!(f, "out of memory"),
            RuntimeError::ThreadNotAlive => write!(f, "thread is not alive"),
            RuntimeError::AlreadySuspendedByOther => write!(f, "thread already suspended by another party"),
            RuntimeError::InvalidThread => write!(f, "invalid thread handle"),
            RuntimeError::Other(msg) => write!(f, "runtime error: {msg}"),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Outcome of suspending a single thread as part of a batch
/// (`Runtime::suspend_thread_list`) call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuspendResult {
    Ok,
    AlreadySuspendedByOther,
    ThreadNotAlive,
    Err(RuntimeError),
}

bitflags! {
    /// Mirrors the subset of JVMTI-style thread-state bits this crate
    /// cares about. An empty state means the thread has not started yet.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThreadState: u32 {
        const ALIVE       = 0b0000_0001;
        const RUNNABLE     = 0b0000_0010;
        const WAITING      = 0b0000_0100;
        const SUSPENDED    = 0b0000_1000;
        const INTERRUPTED  = 0b0001_0000;
        const IN_NATIVE    = 0b0010_0000;
        const TERMINATED   = 0b0100_0000;
    }
}

bitflags! {
    /// Wire-protocol suspend-status flags reported alongside a
    /// [`ThreadStatus`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SuspendFlags: u32 {
        const SUSPENDED = 0b0000_0001;
    }
}

/// Wire-protocol thread status, as reported by
/// `ThreadController::application_thread_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Running,
    Sleeping,
    Monitor,
    Wait,
    Zombie,
    NotStarted,
}

/// The runtime event kinds this crate reasons about directly (thread
/// lifecycle, stepping, and the events a pop-frame sequence must treat
/// as consumed). The embedding runtime may dispatch other event kinds;
/// those never reach this crate's event-gate logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventIndex {
    ThreadStart,
    ThreadEnd,
    SingleStep,
    Breakpoint,
    Exception,
    FieldAccess,
    FieldModification,
    MethodEntry,
    MethodExit,
}

/// Whether an event-notification mode change enables or disables
/// delivery of the given [`EventIndex`] for a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventMode {
    Disable,
    Enable,
}

/// Everything this crate consumes from the embedding managed runtime.
///
/// Associated types keep the core fully generic: `Thread` is an opaque,
/// cheaply-cloned handle; `EventBag`, `StepRequest` and `InvokeRequest`
/// are opaque records this crate stores but never inspects; `Throwable`
/// is the value passed back to `stop_thread`.
pub trait Runtime {
    type Thread: Clone + Eq + std::hash::Hash + Send + 'static;
    type EventBag: Send + 'static;
    type StepRequest: Send + 'static;
    type InvokeRequest: Send + 'static;
    type Throwable: Clone + Send + 'static;

    fn suspend_thread(&self, thread: &Self::Thread) -> RuntimeResult<()>;
    fn resume_thread(&self, thread: &Self::Thread) -> RuntimeResult<()>;
    fn suspend_thread_list(&self, threads: &[Self::Thread]) -> Vec<SuspendResult>;
    fn resume_thread_list(&self, threads: &[Self::Thread]) -> RuntimeResult<()>;
    fn suspend_all_virtual_threads(&self, exclude: &[Self::Thread]) -> RuntimeResult<()>;
    fn resume_all_virtual_threads(&self, exclude: &[Self::Thread]) -> RuntimeResult<()>;

    fn thread_state(&self, thread: &Self::Thread) -> ThreadState;

    /// Opaque per-thread slot used as a direct-lookup fast path. This
    /// crate never stores anything in it beyond "a node exists for this
    /// thread"; the registry owns the actual node storage.
    fn get_tls(&self, thread: &Self::Thread) -> bool;
    fn set_tls(&self, thread: &Self::Thread, present: bool);

    fn set_event_notification_mode(&self, mode: EventMode, event: EventIndex, thread: &Self::Thread) -> RuntimeResult<()>;

    fn interrupt_thread(&self, thread: &Self::Thread) -> RuntimeResult<()>;
    fn stop_thread(&self, thread: &Self::Thread, throwable: Self::Throwable) -> RuntimeResult<()>;
    fn pop_frame(&self, thread: &Self::Thread) -> RuntimeResult<()>;
    fn generate_events(&self, event: EventIndex) -> RuntimeResult<()>;

    /// Optional checkpoint/restore-aware hook so agent-owned threads are
    /// not snapshotted as application state. Default: no-op.
    fn on_debug_thread_change(&self, _thread: &Self::Thread, _added: bool) {}

    fn is_virtual(&self, thread: &Self::Thread) -> bool;
    fn all_threads(&self) -> Vec<Self::Thread>;
    fn all_virtual_threads(&self) -> Vec<Self::Thread>;

    fn new_event_bag(&self) -> Self::EventBag;

    fn pin_all(&self);
    fn unpin_all(&self);

    /// The thread handle for whatever thread is calling into the agent
    /// right now, if the runtime can map that cheaply (`GetCurrentThread`
    /// in JVMTI terms). Default: unknown.
    fn current_thread(&self) -> Option<Self::Thread> {
        None
    }
}

pub mod mock {
    //! An in-memory [`Runtime`] implementation used by this crate's own
    //! tests, and a reasonable starting point for integration tests in
    //! an embedding agent.

    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use super::{EventIndex, EventMode, Runtime, RuntimeError, RuntimeResult, SuspendResult, ThreadState};

    #[derive(Debug, Default)]
    struct ThreadRecord {
        state: ThreadState,
        virtual_thread: bool,
        tls: bool,
        suspended_by_other: bool,
    }

    /// Identity-keyed, in-memory stand-in for a managed runtime.
    ///
    /// Threads are named by `u64` handles chosen by the test. Mutating
    /// methods take `&self` (matching the real trait's shared-reference
    /// shape) and serialize through an internal `Mutex`.
    #[derive(Debug, Default)]
    pub struct MockRuntime {
        threads: Mutex<HashMap<u64, ThreadRecord>>,
        pinned: Mutex<u32>,
    }

    impl MockRuntime {
        pub fn new() -> Self {
            MockRuntime::default()
        }

        /// Register a thread with the given starting state.
        pub fn add_thread(&self, thread: u64, state: ThreadState, is_virtual: bool) {
            self.threads.lock().unwrap().insert(
                thread,
                ThreadRecord { state, virtual_thread: is_virtual, tls: false, suspended_by_other: false },
            );
        }

        pub fn mark_suspended_by_other(&self, thread: u64) {
            if let Some(rec) = self.threads.lock().unwrap().get_mut(&thread) {
                rec.suspended_by_other = true;
            }
        }

        pub fn set_state(&self, thread: u64, state: ThreadState) {
            if let Some(rec) = self.threads.lock().unwrap().get_mut(&thread) {
                rec.state = state;
            }
        }

        pub fn pinned_count(&self) -> u32 {
            *self.pinned.lock().unwrap()
        }
    }

    impl Runtime for MockRuntime {
        type Thread = u64;
        type EventBag = Vec<EventIndex>;
        type StepRequest = ();
        type InvokeRequest = ();
        type Throwable = u64;

        fn suspend_thread(&self, thread: &u64) -> RuntimeResult<()> {
            let mut threads = self.threads.lock().unwrap();
            let rec = threads.get_mut(thread).ok_or(RuntimeError::InvalidThread)?;
            if !rec.state.contains(ThreadState::ALIVE) {
                return Err(RuntimeError::ThreadNotAlive);
            }
            rec.state |= ThreadState::SUSPENDED;
            Ok(())
        }

        fn resume_thread(&self, thread: &u64) -> RuntimeResult<()> {
            let mut threads = self.threads.lock().unwrap();
            let rec = threads.get_mut(thread).ok_or(RuntimeError::InvalidThread)?;
            rec.state.remove(ThreadState::SUSPENDED);
            Ok(())
        }

        fn suspend_thread_list(&self, threads_in: &[u64]) -> Vec<SuspendResult> {
            let mut threads = self.threads.lock().unwrap();
            threads_in
                .iter()
                .map(|t| match threads.get_mut(t) {
                    None => SuspendResult::Err(RuntimeError::InvalidThread),
                    Some(rec) if rec.suspended_by_other => SuspendResult::AlreadySuspendedByOther,
                    Some(rec) if !rec.state.contains(ThreadState::ALIVE) => SuspendResult::ThreadNotAlive,
                    Some(rec) => {
                        rec.state |= ThreadState::SUSPENDED;
                        SuspendResult::Ok
                    }
                })
                .collect()
        }

        fn resume_thread_list(&self, threads_in: &[u64]) -> RuntimeResult<()> {
            let mut threads = self.threads.lock().unwrap();
            for t in threads_in {
                if let Some(rec) = threads.get_mut(t) {
                    rec.state.remove(ThreadState::SUSPENDED);
                }
            }
            Ok(())
        }

        fn suspend_all_virtual_threads(&self, exclude: &[u64]) -> RuntimeResult<()> {
            let exclude: HashSet<_> = exclude.iter().collect();
            let mut threads = self.threads.lock().unwrap();
            for (t, rec) in threads.iter_mut() {
                if rec.virtual_thread && !exclude.contains(t) {
                    rec.state |= ThreadState::SUSPENDED;
                }
            }
            Ok(())
        }

        fn resume_all_virtual_threads(&self, exclude: &[u64]) -> RuntimeResult<()> {
            let exclude: HashSet<_> = exclude.iter().collect();
            let mut threads = self.threads.lock().unwrap();
            for (t, rec) in threads.iter_mut() {
                if rec.virtual_thread && !exclude.contains(t) {
                    rec.state.remove(ThreadState::SUSPENDED);
                }
            }
            Ok(())
        }

        fn thread_state(&self, thread: &u64) -> ThreadState {
            self.threads.lock().unwrap().get(thread).map(|r| r.state).unwrap_or(ThreadState::empty())
        }

        fn get_tls(&self, thread: &u64) -> bool {
            self.threads.lock().unwrap().get(thread).map(|r| r.tls).unwrap_or(false)
        }

        fn set_tls(&self, thread: &u64, present: bool) {
            if let Some(rec) = self.threads.lock().unwrap().get_mut(thread) {
                rec.tls = present;
            }
        }

        fn set_event_notification_mode(&self, _mode: EventMode, _event: EventIndex, _thread: &u64) -> RuntimeResult<()> {
            Ok(())
        }

        fn interrupt_thread(&self, _thread: &u64) -> RuntimeResult<()> {
            Ok(())
        }

        fn stop_thread(&self, _thread: &u64, _throwable: u64) -> RuntimeResult<()> {
            Ok(())
        }

        fn pop_frame(&self, _thread: &u64) -> RuntimeResult<()> {
            Ok(())
        }

        fn generate_events(&self, _event: EventIndex) -> RuntimeResult<()> {
            Ok(())
        }

        fn is_virtual(&self, thread: &u64) -> bool {
            self.threads.lock().unwrap().get(thread).map(|r| r.virtual_thread).unwrap_or(false)
        }

        fn all_threads(&self) -> Vec<u64> {
            self.threads.lock().unwrap().keys().copied().collect()
        }

        fn all_virtual_threads(&self) -> Vec<u64> {
            self.threads.lock().unwrap().iter().filter(|(_, r)| r.virtual_thread).map(|(t, _)| *t).collect()
        }

        fn new_event_bag(&self) -> Vec<EventIndex> {
            Vec::new()
        }

        fn pin_all(&self) {
            *self.pinned.lock().unwrap() += 1;
        }

        fn unpin_all(&self) {
            let mut p = self.pinned.lock().unwrap();
            *p = p.saturating_sub(1);
        }
    }

}
