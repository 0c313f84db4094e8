//! Node Arena
//!
//! All node states of an owner family live in one arena and refer to each
//! other by [`NodeKey`]. Edges are stored on both ends: a node knows what
//! it depends on and what depends on it.
//!
//! A torn-down node frees its slot for the next insertion. Every removal
//! bumps the slot's generation, so a stale key can only ever miss, never
//! alias the newer node.

use std::collections::HashSet;

use super::node::NodeState;
use super::NodeKey;

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    node: Option<NodeState>,
}

/// Storage for every node of an owner family.
#[derive(Debug, Default)]
pub(crate) struct NodeArena {
    slots: Vec<Slot>,
    free: Vec<usize>,
    live: usize,
}

impl NodeArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a node to the arena.
    pub(crate) fn add_node(&mut self, node: NodeState) -> NodeKey {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.node = Some(node);
            return NodeKey::new(index, slot.generation);
        }

        let key = NodeKey::new(self.slots.len(), 0);
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        key
    }

    /// Remove a node from the arena.
    ///
    /// Also removes all edges involving this node, including edges that
    /// cross into other scopes.
    pub(crate) fn remove_node(&mut self, key: NodeKey) -> Option<NodeState> {
        let slot = self
            .slots
            .get_mut(key.index())
            .filter(|slot| slot.generation == key.generation())?;
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index());
        self.live -= 1;

        for dep in &node.dependencies {
            if let Some(dependency) = self.get_mut(*dep) {
                dependency.dependents.shift_remove(&key);
            }
        }
        for dependent_key in &node.dependents {
            if let Some(dependent) = self.get_mut(*dependent_key) {
                dependent.dependencies.shift_remove(&key);
            }
        }
        Some(node)
    }

    pub(crate) fn get(&self, key: NodeKey) -> Option<&NodeState> {
        self.slots
            .get(key.index())
            .filter(|slot| slot.generation == key.generation())
            .and_then(|slot| slot.node.as_ref())
    }

    pub(crate) fn get_mut(&mut self, key: NodeKey) -> Option<&mut NodeState> {
        self.slots
            .get_mut(key.index())
            .filter(|slot| slot.generation == key.generation())
            .and_then(|slot| slot.node.as_mut())
    }

    /// Add a dependency edge: `dependent` depends on `dependency`.
    ///
    /// Returns `false` if the edge already existed.
    pub(crate) fn add_edge(&mut self, dependency: NodeKey, dependent: NodeKey) -> bool {
        let added = match self.get_mut(dependent) {
            Some(node) => node.dependencies.insert(dependency),
            None => return false,
        };
        if let Some(node) = self.get_mut(dependency) {
            node.dependents.insert(dependent);
        }
        added
    }

    /// Remove a dependency edge.
    pub(crate) fn remove_edge(&mut self, dependency: NodeKey, dependent: NodeKey) {
        if let Some(node) = self.get_mut(dependency) {
            node.dependents.shift_remove(&dependent);
        }
        if let Some(node) = self.get_mut(dependent) {
            node.dependencies.shift_remove(&dependency);
        }
    }

    /// Drop every outgoing dependency edge of `key`, returning the targets.
    pub(crate) fn clear_dependencies(&mut self, key: NodeKey) -> Vec<NodeKey> {
        let targets: Vec<NodeKey> = match self.get(key) {
            Some(node) => node.dependencies.iter().copied().collect(),
            None => return Vec::new(),
        };
        for target in &targets {
            self.remove_edge(*target, key);
        }
        targets
    }

    /// Whether `from` reaches `target` by following dependency edges.
    ///
    /// Anything that depends on `target` sits deeper than it, so nodes at or
    /// above `target`'s depth are never expanded.
    pub(crate) fn depends_on(&self, from: NodeKey, target: NodeKey) -> bool {
        if from == target {
            return true;
        }
        let Some(floor) = self.get(target).map(|node| node.depth) else {
            return false;
        };

        let mut visited = HashSet::new();
        let mut stack = vec![from];

        while let Some(key) = stack.pop() {
            if key == target {
                return true;
            }
            if !visited.insert(key) {
                continue;
            }
            if let Some(node) = self.get(key).filter(|node| node.depth > floor) {
                stack.extend(node.dependencies.iter().copied());
            }
        }
        false
    }

    /// Get the number of live nodes.
    pub(crate) fn node_count(&self) -> usize {
        self.live
    }

    /// Slots allocated so far, live or free.
    #[cfg(test)]
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }
}
