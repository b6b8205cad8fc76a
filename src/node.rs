//! Per-thread state record.

use crate::runtime::{EventIndex, Runtime};

/// Which of the three lists a [`ThreadNode`] currently lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadListKind {
    Running,
    RunningVirtual,
    Other,
}

/// Co-located-event info: suppresses the second of two events reported
/// at the same bytecode location (e.g. a breakpoint and a method-entry
/// firing together). `class`/`method`/`location` are opaque identity
/// keys supplied by the embedding runtime through the event-handler
/// entry call; this crate only ever compares them for equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoLocatedEventInfo {
    pub ei: EventIndex,
    pub class: u64,
    pub method: u64,
    pub location: u64,
}

/// Per-thread state tracked by the core. Identity is the runtime's
/// opaque thread handle (`R::Thread`); this record never outlives the
/// thread it describes.
pub struct ThreadNode<R: Runtime> {
    pub thread: R::Thread,
    pub is_virtual: bool,
    pub is_debug_thread: bool,
    pub is_started: bool,

    pub suspend_on_start: bool,
    pub to_be_resumed: bool,
    pub suspend_count: i32,

    pub pending_interrupt: bool,
    pub pending_stop: Option<R::Throwable>,

    pub current_ei: Option<EventIndex>,
    pub instruction_step_mode: bool,
    pub current_step: Option<R::StepRequest>,
    pub current_invoke: Option<R::InvokeRequest>,
    pub event_bag: Option<R::EventBag>,

    pub cle_info: Option<CoLocatedEventInfo>,

    pub frame_generation: i64,

    pub pop_frame_thread: bool,
    pub pop_frame_event: bool,
    pub pop_frame_proceed: bool,

    pub list: ThreadListKind,
}

impl<R: Runtime> ThreadNode<R> {
    pub fn new(thread: R::Thread, is_virtual: bool, list: ThreadListKind) -> Self {
        ThreadNode {
            thread,
            is_virtual,
            is_debug_thread: false,
            is_started: false,
            suspend_on_start: false,
            to_be_resumed: false,
            suspend_count: 0,
            pending_interrupt: false,
            pending_stop: None,
            current_ei: None,
            instruction_step_mode: false,
            current_step: None,
            current_invoke: None,
            event_bag: None,
            cle_info: None,
            frame_generation: 0,
            pop_frame_thread: false,
            pop_frame_event: false,
            pop_frame_proceed: false,
            list,
        }
    }

    pub fn handling_event(&self) -> bool {
        self.current_ei.is_some()
    }

    pub fn save_cle_info(&mut self, ei: EventIndex, class: u64, method: u64, location: u64) {
        self.cle_info = Some(CoLocatedEventInfo { ei, class, method, location });
    }

    pub fn cmp_cle_info(&self, class: u64, method: u64, location: u64) -> bool {
        matches!(self.cle_info, Some(info) if info.class == class && info.method == method && info.location == location)
    }

    pub fn clear_cle_info(&mut self) {
        self.cle_info = None;
    }

    #[cfg(test)]
    pub(crate) fn debug_assert_invariants(&self) {
        debug_assert!(!(self.to_be_resumed && self.suspend_on_start));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::MockRuntime;

    #[test]
    fn new_node_has_no_pending_event() {
        let node: ThreadNode<MockRuntime> = ThreadNode::new(1, false, ThreadListKind::Other);
        assert!(!node.handling_event());
        assert_eq!(node.suspend_count, 0);
    }

    #[test]
    fn cle_info_round_trips() {
        let mut node: ThreadNode<MockRuntime> = ThreadNode::new(1, false, ThreadListKind::Other);
        node.save_cle_info(EventIndex::Breakpoint, 10, 20, 30);
        assert!(node.cmp_cle_info(10, 20, 30));
        assert!(!node.cmp_cle_info(10, 20, 31));
        node.clear_cle_info();
        assert!(!node.cmp_cle_info(10, 20, 30));
    }
}
