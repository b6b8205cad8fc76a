//! Rendezvous primitives for driving a pop-frame sequence.
//!
//! A pop-frame is not a single primitive call: the runtime's `pop_frame`
//! only takes effect once the thread is resumed and a single-step event
//! fires, and the driver must see that event before re-suspending the
//! thread and deciding whether to pop another frame. `PopFrameCoordinator`
//! provides the two monitors that rendezvous is built from; the looping
//! algorithm itself (`ThreadController::pop_frames`) lives in
//! `controller` since it needs the full locked thread-control state.

use std::sync::{Condvar, Mutex};

/// Signals "the synthetic single-step event arrived" (driver waits,
/// the event gate's target-side pre-check signals) and "the target
/// thread may unblock" (event gate waits, driver signals).
pub struct PopFrameCoordinator {
    event: Mutex<bool>,
    event_cv: Condvar,
    proceed: Mutex<bool>,
    proceed_cv: Condvar,
}

impl Default for PopFrameCoordinator {
    fn default() -> Self {
        PopFrameCoordinator {
            event: Mutex::new(false),
            event_cv: Condvar::new(),
            proceed: Mutex::new(false),
            proceed_cv: Condvar::new(),
        }
    }
}

impl PopFrameCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Driver side: block until the target thread's single-step event
    /// has signalled arrival, then consume the signal.
    pub fn wait_for_event(&self) {
        let mut arrived = self.event.lock().unwrap();
        while !*arrived {
            arrived = self.event_cv.wait(arrived).unwrap();
        }
        *arrived = false;
    }

    /// Target side (event gate pre-check): signal that the expected
    /// single-step event has arrived.
    pub fn signal_event(&self) {
        let mut arrived = self.event.lock().unwrap();
        *arrived = true;
        self.event_cv.notify_all();
    }

    /// Target side: block until the driver has suspended the thread
    /// again and says it's safe to return from the event callback.
    pub fn wait_for_proceed(&self) {
        let mut proceed = self.proceed.lock().unwrap();
        while !*proceed {
            proceed = self.proceed_cv.wait(proceed).unwrap();
        }
        *proceed = false;
    }

    /// Driver side: release the target thread's event callback.
    pub fn signal_proceed(&self) {
        let mut proceed = self.proceed.lock().unwrap();
        *proceed = true;
        self.proceed_cv.notify_all();
    }
}
