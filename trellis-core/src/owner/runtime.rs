//! Owner Runtime
//!
//! The runtime is the state shared by a root owner and all of its
//! descendants: the node arena plus one [`ScopeState`] per owner. Keeping
//! the family in one place is what lets a child read its parent's nodes by
//! key, and lets a parent node mark a child node dirty, without any owner
//! holding a pointer into another.
//!
//! Everything sits behind a single `RefCell`. Borrows are kept short and are
//! never held while user code runs (initializers, listeners, observers,
//! disposal callbacks), so user code may call back into the owner.

use std::cell::{self, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;

use super::overrides::OverrideTable;
use crate::config::OwnerConfig;
use crate::error::{Error, Result};
use crate::graph::arena::NodeArena;
use crate::graph::node::NodeState;
use crate::graph::order::DepthOrder;
use crate::graph::NodeKey;
use crate::observer::{default_handler, FailureSink, FailureSource, Observer};
use crate::owner::ListenerId;
use crate::provider::ProviderId;

/// Index of an owner within its family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ScopeId(pub(crate) usize);

impl ScopeId {
    #[cfg(test)]
    pub(crate) const ROOT: ScopeId = ScopeId(0);
}

/// Host callbacks of one owner. Cheap to clone so they can be called after
/// the state borrow is released.
#[derive(Clone)]
pub(crate) struct Hooks {
    pub(crate) on_needs_flush: Option<Rc<dyn Fn()>>,
    pub(crate) observers: Vec<Rc<dyn Observer>>,
    pub(crate) failures: FailureSink,
}

impl Hooks {
    /// Hooks that call nothing, left behind by a disposed owner.
    fn inert() -> Self {
        Self {
            on_needs_flush: None,
            observers: Vec::new(),
            failures: FailureSink {
                handler: default_handler(),
                isolate: true,
            },
        }
    }

    /// Call `f` on every observer, isolating failures.
    pub(crate) fn notify_observers<F>(&self, provider: Option<&Arc<str>>, f: F)
    where
        F: Fn(&dyn Observer),
    {
        for observer in &self.observers {
            self.failures
                .run(FailureSource::Observer, provider, || f(observer.as_ref()));
        }
    }
}

/// Flush bookkeeping of one owner.
#[derive(Debug, Default)]
pub(crate) struct FlushState {
    /// A flush was requested and has not run yet.
    pub(crate) pending: bool,

    /// A flush pass is walking the order.
    pub(crate) flushing: bool,

    /// Depth of the node whose notification (or teardown) is running.
    pub(crate) notifying_depth: Option<u32>,
}

/// Everything one owner keeps for itself.
pub(crate) struct ScopeState {
    pub(crate) label: Arc<str>,
    pub(crate) parent: Option<ScopeId>,
    pub(crate) children: Vec<ScopeId>,
    pub(crate) config: OwnerConfig,

    /// Nodes materialized by this owner.
    pub(crate) readers: IndexMap<ProviderId, NodeKey>,

    pub(crate) overrides: OverrideTable,
    pub(crate) order: DepthOrder,
    pub(crate) flush: FlushState,

    /// Node whose initializer (or recomputation) is currently running in
    /// this owner. Saved and restored around nested initializations.
    pub(crate) initializing: Option<NodeKey>,

    /// Listeners this owner registered, possibly on inherited nodes.
    pub(crate) listeners: SmallVec<[(NodeKey, ListenerId); 4]>,

    pub(crate) disposed: bool,
    pub(crate) hooks: Hooks,
}

impl ScopeState {
    pub(crate) fn new(
        label: Arc<str>,
        parent: Option<ScopeId>,
        config: OwnerConfig,
        overrides: OverrideTable,
        hooks: Hooks,
    ) -> Self {
        Self {
            label,
            parent,
            children: Vec::new(),
            config,
            readers: IndexMap::new(),
            overrides,
            order: DepthOrder::new(),
            flush: FlushState::default(),
            initializing: None,
            listeners: SmallVec::new(),
            disposed: false,
            hooks,
        }
    }

    /// Release everything a disposed owner no longer needs, user closures
    /// in particular. Only the label and the parent link stay behind.
    pub(crate) fn retire(&mut self) {
        self.disposed = true;
        self.flush = FlushState::default();
        self.initializing = None;
        self.children = Vec::new();
        self.config = OwnerConfig::default();
        self.readers = IndexMap::new();
        self.overrides = OverrideTable::default();
        self.order = DepthOrder::new();
        self.listeners = SmallVec::new();
        self.hooks = Hooks::inert();
    }
}

/// The mutable state of an owner family.
pub(crate) struct GraphState {
    pub(crate) nodes: NodeArena,

    /// Every owner ever created, disposed ones as retired tombstones.
    /// Indexed by [`ScopeId`], so entries are never removed.
    pub(crate) scopes: Vec<ScopeState>,

    /// Owners that are not disposed, in creation order.
    pub(crate) live: IndexSet<ScopeId>,
}

impl GraphState {
    pub(crate) fn scope(&self, id: ScopeId) -> &ScopeState {
        &self.scopes[id.0]
    }

    pub(crate) fn scope_mut(&mut self, id: ScopeId) -> &mut ScopeState {
        &mut self.scopes[id.0]
    }

    /// Fail if the owner was disposed.
    pub(crate) fn ensure_live(&self, id: ScopeId) -> Result<()> {
        let scope = self.scope(id);
        if scope.disposed {
            return Err(Error::invalid_state(format!(
                "owner `{}` is disposed",
                scope.label
            )));
        }
        Ok(())
    }

    pub(crate) fn node(&self, key: NodeKey) -> Result<&NodeState> {
        self.nodes
            .get(key)
            .ok_or_else(|| Error::invalid_state(format!("node {} was disposed", key.index())))
    }

    pub(crate) fn node_mut(&mut self, key: NodeKey) -> Result<&mut NodeState> {
        self.nodes
            .get_mut(key)
            .ok_or_else(|| Error::invalid_state(format!("node {} was disposed", key.index())))
    }

    /// Raise `key` to at least `depth`, pushing the increase down to every
    /// node that depends on it.
    ///
    /// Depth never shrinks, so this terminates on an acyclic graph.
    pub(crate) fn raise_depth(&mut self, key: NodeKey, depth: u32) {
        let mut pending = vec![(key, depth)];

        while let Some((key, depth)) = pending.pop() {
            let Some(node) = self.nodes.get_mut(key) else {
                continue;
            };
            if node.depth >= depth {
                continue;
            }
            node.depth = depth;
            let scope = node.scope;
            let slot = node.slot;
            let dependents: SmallVec<[NodeKey; 4]> = node.dependents.iter().copied().collect();

            let moved = self.scopes[scope.0].order.reposition(slot, depth);
            if let Some(node) = self.nodes.get_mut(key) {
                node.slot = moved;
            }
            tracing::trace!(node = key.index(), depth, "depth raised");

            pending.extend(dependents.into_iter().map(|dependent| (dependent, depth + 1)));
        }
    }

    /// Whether any owner of the family is inside a flush or an initializer.
    pub(crate) fn is_busy(&self) -> bool {
        self.live.iter().any(|&id| {
            let scope = self.scope(id);
            scope.flush.flushing || scope.initializing.is_some()
        })
    }
}

/// Shared state of an owner family.
pub(crate) struct Runtime {
    state: RefCell<GraphState>,
}

impl Runtime {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            state: RefCell::new(GraphState {
                nodes: NodeArena::new(),
                scopes: Vec::new(),
                live: IndexSet::new(),
            }),
        })
    }

    pub(crate) fn state(&self) -> cell::Ref<'_, GraphState> {
        self.state.borrow()
    }

    pub(crate) fn state_mut(&self) -> cell::RefMut<'_, GraphState> {
        self.state.borrow_mut()
    }

    /// Borrow for guard restoration, which must not panic while unwinding.
    pub(crate) fn try_state_mut(&self) -> Option<cell::RefMut<'_, GraphState>> {
        self.state.try_borrow_mut().ok()
    }

    pub(crate) fn add_scope(&self, scope: ScopeState) -> ScopeId {
        let mut state = self.state_mut();
        let id = ScopeId(state.scopes.len());
        if let Some(parent) = scope.parent {
            state.scope_mut(parent).children.push(id);
        }
        state.scopes.push(scope);
        state.live.insert(id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::order::OrderSlot;
    use crate::provider::StateProvider;

    fn hooks() -> Hooks {
        Hooks {
            on_needs_flush: None,
            observers: Vec::new(),
            failures: FailureSink {
                handler: default_handler(),
                isolate: true,
            },
        }
    }

    fn scope(runtime: &Runtime, parent: Option<ScopeId>) -> ScopeId {
        runtime.add_scope(ScopeState::new(
            Arc::from("test"),
            parent,
            OwnerConfig::default(),
            OverrideTable::default(),
            hooks(),
        ))
    }

    fn add(state: &mut GraphState, scope: ScopeId) -> NodeKey {
        let provider = StateProvider::with_value("n", 0_u8);
        let identity = provider.identity().clone();
        let descriptor = identity.origin().clone();
        let slot = state.scope_mut(scope).order.reserve();
        let key = state
            .nodes
            .add_node(NodeState::new(identity, scope, descriptor, slot));
        state.scope_mut(scope).order.insert(slot, key);
        key
    }

    #[test]
    fn child_scopes_are_linked_to_their_parent() {
        let runtime = Runtime::new();
        let root = scope(&runtime, None);
        let child = scope(&runtime, Some(root));

        assert_eq!(root, ScopeId::ROOT);
        assert_eq!(runtime.state().scope(root).children, vec![child]);
        assert_eq!(runtime.state().scope(child).parent, Some(root));
    }

    #[test]
    fn raising_depth_propagates_to_dependents_across_scopes() {
        let runtime = Runtime::new();
        let root = scope(&runtime, None);
        let child = scope(&runtime, Some(root));

        let mut state = runtime.state_mut();
        let a = add(&mut state, root);
        let b = add(&mut state, root);
        let c = add(&mut state, child);

        // c -> b, b at depth 1 after depending on a.
        state.nodes.add_edge(b, c);
        state.raise_depth(c, 1);
        state.nodes.add_edge(a, b);
        state.raise_depth(b, 1);

        assert_eq!(state.node(a).unwrap().depth, 0);
        assert_eq!(state.node(b).unwrap().depth, 1);
        assert_eq!(state.node(c).unwrap().depth, 2);

        let root_order: Vec<_> = state.scope(root).order.keys().collect();
        assert_eq!(root_order, vec![a, b]);
        assert_eq!(state.node(c).unwrap().slot.depth(), 2);
    }

    #[test]
    fn disposed_scopes_reject_access() {
        let runtime = Runtime::new();
        let root = scope(&runtime, None);

        runtime.state_mut().scope_mut(root).disposed = true;
        let err = runtime.state().ensure_live(root).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn default_slot_is_depth_zero() {
        assert_eq!(OrderSlot::default().depth(), 0);
    }
}
