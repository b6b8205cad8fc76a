//! Owns the three thread lists and provides lookup/insert/move/remove
//! over them. Every operation here requires the caller to already hold
//! `thread_lock` (enforced one level up, in `ThreadControlState`); this
//! module itself is not thread-safe on its own.

use std::collections::{HashMap, HashSet};

use crate::node::{ThreadListKind, ThreadNode};
use crate::runtime::Runtime;

/// `HashMap<R::Thread, ThreadNode<R>>` is the single source of truth
/// (mirroring `mizl_h`'s `threads: HashMap<i32, DebuggerLinuxThread>`);
/// each list is a `HashSet` used purely as a membership index, since
/// enumeration order is immaterial and intrusive linked-list pointers
/// would add nothing a hash set doesn't already give us.
pub struct ThreadRegistry<R: Runtime> {
    nodes: HashMap<R::Thread, ThreadNode<R>>,
    running: HashSet<R::Thread>,
    running_virtual: HashSet<R::Thread>,
    other: HashSet<R::Thread>,
}

impl<R: Runtime> Default for ThreadRegistry<R> {
    fn default() -> Self {
        ThreadRegistry {
            nodes: HashMap::new(),
            running: HashSet::new(),
            running_virtual: HashSet::new(),
            other: HashSet::new(),
        }
    }
}

impl<R: Runtime> ThreadRegistry<R> {
    pub fn new() -> Self {
        Self::default()
    }

    fn list_mut(&mut self, kind: ThreadListKind) -> &mut HashSet<R::Thread> {
        match kind {
            ThreadListKind::Running => &mut self.running,
            ThreadListKind::RunningVirtual => &mut self.running_virtual,
            ThreadListKind::Other => &mut self.other,
        }
    }

    pub fn list(&self, kind: ThreadListKind) -> &HashSet<R::Thread> {
        match kind {
            ThreadListKind::Running => &self.running,
            ThreadListKind::RunningVirtual => &self.running_virtual,
            ThreadListKind::Other => &self.other,
        }
    }

    pub fn num_running_virtual(&self) -> usize {
        self.running_virtual.len()
    }

    /// Insert a freshly created node into its declared list.
    pub fn insert(&mut self, node: ThreadNode<R>) {
        let thread = node.thread.clone();
        let kind = node.list;
        self.list_mut(kind).insert(thread.clone());
        self.nodes.insert(thread, node);
    }

    /// Primary lookup path: the runtime's thread-local slot says a node
    /// exists, so go straight to the map. Returns `None` if the slot
    /// lied (which would itself indicate a registry bug, not a normal
    /// condition); callers needing the restricted fallback scan should
    /// use [`ThreadRegistry::find_in_list`] instead.
    pub fn get(&self, thread: &R::Thread) -> Option<&ThreadNode<R>> {
        self.nodes.get(thread)
    }

    pub fn get_mut(&mut self, thread: &R::Thread) -> Option<&mut ThreadNode<R>> {
        self.nodes.get_mut(thread)
    }

    /// Fallback lookup used when the runtime's TLS slot for `thread` is
    /// empty. Restricted to `other` during normal operation: a node can
    /// only have a cleared slot while alive on `running`/`running_virtual`
    /// after the agent has torn down its event callbacks during VM death.
    pub fn find_in_list(&self, thread: &R::Thread, kind: ThreadListKind) -> Option<&ThreadNode<R>> {
        debug_assert!(
            kind == ThreadListKind::Other || self.nodes.get(thread).map(|n| n.list) == Some(kind),
            "fallback scan outside `other` implies stale bookkeeping unless VM-death teardown already ran"
        );
        if self.list(kind).contains(thread) {
            self.nodes.get(thread)
        } else {
            None
        }
    }

    pub fn contains(&self, thread: &R::Thread) -> bool {
        self.nodes.contains_key(thread)
    }

    /// Move an already-registered node to a different list.
    pub fn move_to(&mut self, thread: &R::Thread, kind: ThreadListKind) {
        if let Some(node) = self.nodes.get_mut(thread) {
            let old = node.list;
            if old == kind {
                return;
            }
            self.list_mut(old).remove(thread);
            self.list_mut(kind).insert(thread.clone());
            node.list = kind;
        }
    }

    pub fn remove(&mut self, thread: &R::Thread) -> Option<ThreadNode<R>> {
        let node = self.nodes.remove(thread)?;
        self.list_mut(node.list).remove(thread);
        Some(node)
    }

    /// Enumerate every node on `kind`, invoking `visitor` on each.
    /// Aborts early on the first `false` the visitor returns.
    pub fn for_each(&self, kind: ThreadListKind, mut visitor: impl FnMut(&ThreadNode<R>) -> bool) {
        for thread in self.list(kind).iter() {
            if let Some(node) = self.nodes.get(thread) {
                if !visitor(node) {
                    break;
                }
            }
        }
    }

    pub fn for_each_mut(&mut self, kind: ThreadListKind, mut visitor: impl FnMut(&mut ThreadNode<R>) -> bool) {
        let threads: Vec<R::Thread> = self.list(kind).iter().cloned().collect();
        for thread in threads {
            if let Some(node) = self.nodes.get_mut(&thread) {
                if !visitor(node) {
                    break;
                }
            }
        }
    }

    pub fn all_threads(&self) -> impl Iterator<Item = &R::Thread> {
        self.nodes.keys()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::MockRuntime;

    fn node(t: u64, kind: ThreadListKind) -> ThreadNode<MockRuntime> {
        ThreadNode::new(t, kind == ThreadListKind::RunningVirtual, kind)
    }

    #[test]
    fn insert_and_lookup() {
        let mut reg: ThreadRegistry<MockRuntime> = ThreadRegistry::new();
        reg.insert(node(1, ThreadListKind::Other));
        assert!(reg.contains(&1));
        assert_eq!(reg.list(ThreadListKind::Other).len(), 1);
    }

    #[test]
    fn move_between_lists_updates_indices() {
        let mut reg: ThreadRegistry<MockRuntime> = ThreadRegistry::new();
        reg.insert(node(1, ThreadListKind::Other));
        reg.move_to(&1, ThreadListKind::Running);
        assert!(!reg.list(ThreadListKind::Other).contains(&1));
        assert!(reg.list(ThreadListKind::Running).contains(&1));
        assert_eq!(reg.get(&1).unwrap().list, ThreadListKind::Running);
    }

    #[test]
    fn remove_clears_both_map_and_index() {
        let mut reg: ThreadRegistry<MockRuntime> = ThreadRegistry::new();
        reg.insert(node(1, ThreadListKind::Running));
        assert!(reg.remove(&1).is_some());
        assert!(!reg.contains(&1));
        assert!(reg.list(ThreadListKind::Running).is_empty());
    }

    #[test]
    fn for_each_mut_stops_on_false() {
        let mut reg: ThreadRegistry<MockRuntime> = ThreadRegistry::new();
        reg.insert(node(1, ThreadListKind::Running));
        reg.insert(node(2, ThreadListKind::Running));
        let mut visited = 0;
        reg.for_each_mut(ThreadListKind::Running, |_n| {
            visited += 1;
            false
        });
        assert_eq!(visited, 1);
    }

    #[test]
    fn num_running_virtual_matches_set_len() {
        let mut reg: ThreadRegistry<MockRuntime> = ThreadRegistry::new();
        reg.insert(node(1, ThreadListKind::RunningVirtual));
        reg.insert(node(2, ThreadListKind::RunningVirtual));
        assert_eq!(reg.num_running_virtual(), 2);
        assert_eq!(reg.num_running_virtual(), reg.list(ThreadListKind::RunningVirtual).len());
    }
}
