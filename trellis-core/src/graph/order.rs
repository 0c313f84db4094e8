//! Depth Order
//!
//! Each scope walks its nodes from lowest to highest depth when it flushes.
//! Rather than an intrusive linked list, the order is a sorted index of
//! `(depth, sequence)` slots pointing into the arena. A node that gains
//! depth is moved by removing its old slot and inserting a new one with the
//! same sequence number.
//!
//! Walking uses a cursor (the last visited slot) instead of a borrowed
//! iterator, so nodes can be inserted or repositioned while a flush is in
//! progress: anything that lands after the cursor is still visited.

use std::collections::BTreeMap;
use std::ops::Bound;

use super::NodeKey;

/// Position of a node in a [`DepthOrder`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct OrderSlot {
    depth: u32,
    seq: u64,
}

impl OrderSlot {
    pub(crate) fn depth(&self) -> u32 {
        self.depth
    }
}

/// Nodes of one scope, sorted by depth.
#[derive(Debug, Default)]
pub(crate) struct DepthOrder {
    entries: BTreeMap<OrderSlot, NodeKey>,
    next_seq: u64,
}

impl DepthOrder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot at depth 0, where every new node starts.
    pub(crate) fn reserve(&mut self) -> OrderSlot {
        let slot = OrderSlot {
            depth: 0,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        slot
    }

    /// Insert `key` at a slot obtained from [`DepthOrder::reserve`].
    pub(crate) fn insert(&mut self, slot: OrderSlot, key: NodeKey) {
        self.entries.insert(slot, key);
    }

    /// Move the node at `slot` to `depth`, returning its new slot.
    pub(crate) fn reposition(&mut self, slot: OrderSlot, depth: u32) -> OrderSlot {
        let moved = OrderSlot { depth, seq: slot.seq };
        if let Some(key) = self.entries.remove(&slot) {
            self.entries.insert(moved, key);
        }
        moved
    }

    pub(crate) fn remove(&mut self, slot: OrderSlot) -> Option<NodeKey> {
        self.entries.remove(&slot)
    }

    /// The first entry after `cursor`, or the first entry overall.
    pub(crate) fn next_after(&self, cursor: Option<OrderSlot>) -> Option<(OrderSlot, NodeKey)> {
        let lower = match cursor {
            Some(slot) => Bound::Excluded(slot),
            None => Bound::Unbounded,
        };
        self.entries
            .range((lower, Bound::Unbounded))
            .next()
            .map(|(slot, key)| (*slot, *key))
    }

    /// Keys from lowest to highest depth.
    pub(crate) fn keys(&self) -> impl DoubleEndedIterator<Item = NodeKey> + '_ {
        self.entries.values().copied()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(index: usize) -> NodeKey {
        NodeKey::from_index(index)
    }

    fn push(order: &mut DepthOrder, index: usize) -> OrderSlot {
        let slot = order.reserve();
        order.insert(slot, key(index));
        slot
    }

    #[test]
    fn new_nodes_start_at_depth_zero_in_creation_order() {
        let mut order = DepthOrder::new();
        push(&mut order, 0);
        push(&mut order, 1);

        assert_eq!(order.keys().collect::<Vec<_>>(), vec![key(0), key(1)]);
    }

    #[test]
    fn repositioned_nodes_sort_after_shallower_ones() {
        let mut order = DepthOrder::new();
        let first = push(&mut order, 0);
        push(&mut order, 1);
        push(&mut order, 2);

        let moved = order.reposition(first, 2);
        assert_eq!(moved.depth(), 2);
        assert_eq!(order.keys().collect::<Vec<_>>(), vec![key(1), key(2), key(0)]);
        assert_eq!(order.len(), 3);
    }

    #[test]
    fn cursor_walk_sees_nodes_moved_past_it() {
        let mut order = DepthOrder::new();
        let a = push(&mut order, 0);
        let b = push(&mut order, 1);

        let (slot, first) = order.next_after(None).unwrap();
        assert_eq!(first, key(0));

        // Move `a` behind `b` while the walk is past it.
        order.reposition(a, 3);
        let (slot, second) = order.next_after(Some(slot)).unwrap();
        assert_eq!(second, key(1));
        assert_eq!(slot, b);

        let (_, third) = order.next_after(Some(slot)).unwrap();
        assert_eq!(third, key(0));
    }

    #[test]
    fn removed_nodes_are_not_visited() {
        let mut order = DepthOrder::new();
        let a = push(&mut order, 0);
        push(&mut order, 1);

        assert_eq!(order.remove(a), Some(key(0)));
        assert_eq!(order.keys().collect::<Vec<_>>(), vec![key(1)]);

        order.clear();
        assert!(order.next_after(None).is_none());
    }
}
