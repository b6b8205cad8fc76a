//! Small fixed-capacity set of threads owned by the debug agent itself,
//! never suspended by debugger commands.

use crate::error::{ThreadControlError, ThreadControlResult};
use crate::runtime::Runtime;

const MAX_DEBUG_THREADS: usize = 10;

pub struct DebugThreadSet<R: Runtime> {
    threads: Vec<R::Thread>,
}

impl<R: Runtime> Default for DebugThreadSet<R> {
    fn default() -> Self {
        DebugThreadSet { threads: Vec::with_capacity(MAX_DEBUG_THREADS) }
    }
}

impl<R: Runtime> DebugThreadSet<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, thread: &R::Thread) -> bool {
        self.threads.iter().any(|t| t == thread)
    }

    pub fn add(&mut self, thread: R::Thread, runtime: &R) -> ThreadControlResult<()> {
        if self.contains(&thread) {
            return Ok(());
        }
        if self.threads.len() >= MAX_DEBUG_THREADS {
            return Err(ThreadControlError::DebugThreadSetFull);
        }
        runtime.on_debug_thread_change(&thread, true);
        self.threads.push(thread);
        Ok(())
    }

    pub fn remove(&mut self, thread: &R::Thread, runtime: &R) {
        if let Some(pos) = self.threads.iter().position(|t| t == thread) {
            self.threads.remove(pos);
            runtime.on_debug_thread_change(thread, false);
        }
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::MockRuntime;

    #[test]
    fn add_is_idempotent() {
        let rt = MockRuntime::new();
        let mut set: DebugThreadSet<MockRuntime> = DebugThreadSet::new();
        set.add(1, &rt).unwrap();
        set.add(1, &rt).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn remove_compacts() {
        let rt = MockRuntime::new();
        let mut set: DebugThreadSet<MockRuntime> = DebugThreadSet::new();
        set.add(1, &rt).unwrap();
        set.add(2, &rt).unwrap();
        set.remove(&1, &rt);
        assert!(!set.contains(&1));
        assert!(set.contains(&2));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn full_set_is_rejected() {
        let rt = MockRuntime::new();
        let mut set: DebugThreadSet<MockRuntime> = DebugThreadSet::new();
        for t in 0..MAX_DEBUG_THREADS as u64 {
            set.add(t, &rt).unwrap();
        }
        assert_eq!(set.add(999, &rt), Err(ThreadControlError::DebugThreadSetFull));
    }
}
