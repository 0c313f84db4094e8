//! Graph Nodes
//!
//! This module defines the per-owner record kept for every materialized
//! provider.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;
use smallvec::SmallVec;

use super::order::OrderSlot;
use crate::error::Error;
use crate::owner::{ListenerId, ScopeId};
use crate::provider::{Descriptor, Identity, ProviderKind, Value};

/// Handle to a node in the arena.
///
/// Arena slots are reused once a node is torn down. The generation tells a
/// key for the old occupant apart from a key for the new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    index: u32,
    generation: u32,
}

impl NodeKey {
    pub(crate) fn new(index: usize, generation: u32) -> Self {
        Self {
            index: u32::try_from(index).expect("node arena exceeded u32::MAX slots"),
            generation,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_index(index: usize) -> Self {
        Self::new(index, 0)
    }

    /// Position of the node in the arena.
    pub fn index(self) -> usize {
        self.index as usize
    }

    pub(crate) fn generation(self) -> u32 {
        self.generation
    }
}

/// Lifecycle of a node's value.
#[derive(Debug, Clone)]
pub(crate) enum NodeStatus {
    /// The initializer is running. Reading the node now means a cycle.
    Initializing,

    /// The node holds a value.
    Ready(Value),

    /// The initializer failed. The error is replayed on every read.
    Failed(Error),
}

impl NodeStatus {
    pub(crate) fn value(&self) -> Option<&Value> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Ready(_) => "ready",
            Self::Failed(_) => "failed",
        }
    }
}

pub(crate) type DisposeCallback = Box<dyn FnOnce()>;

/// An external subscriber to a node.
#[derive(Clone)]
pub(crate) struct Listener {
    pub(crate) id: ListenerId,
    pub(crate) callback: Rc<RefCell<dyn FnMut(&Value)>>,
}

/// Mutable state of one materialized provider.
///
/// Owned by exactly one scope. Child scopes that inherit the node refer to
/// it by key; they never copy it.
pub(crate) struct NodeState {
    /// The provider this node materializes.
    pub(crate) identity: Identity,

    /// The scope that owns the node.
    pub(crate) scope: ScopeId,

    /// Descriptor currently producing the value. Differs from the
    /// identity's origin when overridden.
    pub(crate) descriptor: Rc<dyn Descriptor>,

    pub(crate) status: NodeStatus,

    /// One more than the depth of the deepest dependency; 0 without
    /// dependencies. Only ever grows.
    pub(crate) depth: u32,

    /// Set between a change and the flush that delivers it.
    pub(crate) dirty: bool,

    /// Cleared when the owning scope tears the node down.
    pub(crate) mounted: bool,

    /// Position in the owning scope's traversal order.
    pub(crate) slot: OrderSlot,

    /// Nodes this node reads from.
    pub(crate) dependencies: IndexSet<NodeKey>,

    /// Nodes that read from this node.
    pub(crate) dependents: IndexSet<NodeKey>,

    pub(crate) listeners: SmallVec<[Listener; 2]>,

    /// Run in registration order at teardown.
    pub(crate) dispose_callbacks: Vec<DisposeCallback>,
}

impl NodeState {
    pub(crate) fn new(
        identity: Identity,
        scope: ScopeId,
        descriptor: Rc<dyn Descriptor>,
        slot: OrderSlot,
    ) -> Self {
        Self {
            identity,
            scope,
            descriptor,
            status: NodeStatus::Initializing,
            depth: 0,
            dirty: false,
            mounted: true,
            slot,
            dependencies: IndexSet::new(),
            dependents: IndexSet::new(),
            listeners: SmallVec::new(),
            dispose_callbacks: Vec::new(),
        }
    }

    /// Kind of the active descriptor.
    pub(crate) fn kind(&self) -> ProviderKind {
        self.descriptor.kind()
    }

    pub(crate) fn value(&self) -> Option<&Value> {
        self.status.value()
    }

    /// Clear the dirty flag, returning whether it was set.
    pub(crate) fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    pub(crate) fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|listener| listener.id != id);
        self.listeners.len() != before
    }
}

impl fmt::Debug for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeState")
            .field("provider", &self.identity.name())
            .field("kind", &self.kind())
            .field("status", &self.status.label())
            .field("depth", &self.depth)
            .field("dirty", &self.dirty)
            .field("dependencies", &self.dependencies.len())
            .field("dependents", &self.dependents.len())
            .finish()
    }
}
