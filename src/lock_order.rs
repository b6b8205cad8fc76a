//! Fixed acquisition order for every suspend: `event_handler → invoker →
//! event_helper → step_control → common_ref → thread_lock`. Released in
//! reverse. The four external locks are owned by other parts of the
//! embedding agent; this crate only ever acquires them through the
//! `Arc<dyn ExternalLock>` handles supplied at construction time, in
//! the published order, so a debugger command can never deadlock
//! against an application thread holding one of them mid-event.

use std::sync::Arc;

/// A lock this crate does not own the implementation of, but must
/// acquire/release in lock-step with its own `thread_lock`.
pub trait ExternalLock: Send + Sync {
    fn acquire(&self);
    fn release(&self);
}

/// Acquires the four external locks in the fixed order and hands back a
/// guard that releases them in reverse on drop. `thread_lock` itself is
/// acquired separately by the caller afterward (it's this crate's own
/// `ReentrantLock`, not one of the externally supplied locks).
pub struct LockOrderManager {
    event_handler: Arc<dyn ExternalLock>,
    invoker: Arc<dyn ExternalLock>,
    event_helper: Arc<dyn ExternalLock>,
    step_control: Arc<dyn ExternalLock>,
    common_ref: Arc<dyn ExternalLock>,
}

impl LockOrderManager {
    pub fn new(
        event_handler: Arc<dyn ExternalLock>,
        invoker: Arc<dyn ExternalLock>,
        event_helper: Arc<dyn ExternalLock>,
        step_control: Arc<dyn ExternalLock>,
        common_ref: Arc<dyn ExternalLock>,
    ) -> Self {
        LockOrderManager { event_handler, invoker, event_helper, step_control, common_ref }
    }

    /// Acquire all five locks (four external, in order, then the
    /// caller's own `thread_lock` step is left to the caller) for the
    /// duration of the returned guard.
    pub fn acquire(&self) -> LockOrderGuard<'_> {
        self.event_handler.acquire();
        self.invoker.acquire();
        self.event_helper.acquire();
        self.step_control.acquire();
        self.common_ref.acquire();
        LockOrderGuard { manager: self }
    }
}

pub struct LockOrderGuard<'a> {
    manager: &'a LockOrderManager,
}

impl Drop for LockOrderGuard<'_> {
    fn drop(&mut self) {
        self.manager.common_ref.release();
        self.manager.step_control.release();
        self.manager.event_helper.release();
        self.manager.invoker.release();
        self.manager.event_handler.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingLock {
        name: &'static str,
        log: Arc<StdMutex<Vec<(&'static str, &'static str)>>>,
    }

    impl ExternalLock for RecordingLock {
        fn acquire(&self) {
            self.log.lock().unwrap().push((self.name, "acquire"));
        }
        fn release(&self) {
            self.log.lock().unwrap().push((self.name, "release"));
        }
    }

    #[test]
    fn acquires_in_order_and_releases_in_reverse() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let lock = |name| Arc::new(RecordingLock { name, log: log.clone() }) as Arc<dyn ExternalLock>;
        let manager = LockOrderManager::new(
            lock("event_handler"),
            lock("invoker"),
            lock("event_helper"),
            lock("step_control"),
            lock("common_ref"),
        );
        {
            let _guard = manager.acquire();
        }
        let events = log.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                ("event_handler", "acquire"),
                ("invoker", "acquire"),
                ("event_helper", "acquire"),
                ("step_control", "acquire"),
                ("common_ref", "acquire"),
                ("common_ref", "release"),
                ("step_control", "release"),
                ("event_helper", "release"),
                ("invoker", "release"),
                ("event_handler", "release"),
            ]
        );
    }
}
