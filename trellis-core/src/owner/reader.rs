//! Node Lookup and Lazy Materialization
//!
//! A provider has no node until somebody reads it. The first read decides
//! which owner the node belongs to, runs the initializer once, and caches
//! the outcome: a value, or a sticky error that every later read replays.
//!
//! Lookup order for an owner:
//!
//! 1. A node this owner already materialized.
//! 2. An override installed on this owner: materialize here.
//! 3. For each ancestor, nearest first: a node it materialized, else an
//!    override it installed (materialize in that ancestor).
//! 4. Otherwise materialize here with the provider's own descriptor.

use std::rc::Rc;

use super::context::{InitGuard, UnwindGuard};
use super::runtime::{GraphState, Runtime, ScopeId};
use super::Ref;
use crate::error::{Error, Result};
use crate::graph::node::{NodeState, NodeStatus};
use crate::graph::NodeKey;
use crate::observer::FailureSource;
use crate::provider::{Identity, ProviderId, Value};

/// Outcome of resolving a provider in an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lookup {
    Found(NodeKey),
    Create(ScopeId),
}

impl GraphState {
    pub(crate) fn lookup(&self, scope: ScopeId, id: ProviderId) -> Lookup {
        let own = self.scope(scope);
        if let Some(&key) = own.readers.get(&id) {
            return Lookup::Found(key);
        }
        if own.overrides.contains(id) {
            return Lookup::Create(scope);
        }

        let mut ancestor = own.parent;
        while let Some(current) = ancestor {
            let state = self.scope(current);
            if let Some(&key) = state.readers.get(&id) {
                return Lookup::Found(key);
            }
            if state.overrides.contains(id) {
                return Lookup::Create(current);
            }
            ancestor = state.parent;
        }

        Lookup::Create(scope)
    }

    /// Replay the cached outcome of an existing node.
    pub(crate) fn check_status(&self, key: NodeKey) -> Result<NodeKey> {
        let node = self.node(key)?;
        match &node.status {
            NodeStatus::Ready(_) => Ok(key),
            NodeStatus::Failed(err) => Err(err.clone()),
            NodeStatus::Initializing => Err(Error::circular(node.identity.shared_name())),
        }
    }
}

impl Runtime {
    /// Resolve `identity` from `scope`, materializing it if needed.
    pub(crate) fn read_node(self: &Rc<Self>, scope: ScopeId, identity: &Identity) -> Result<NodeKey> {
        let lookup = {
            let state = self.state();
            state.ensure_live(scope)?;
            state.lookup(scope, identity.id())
        };

        match lookup {
            Lookup::Found(key) => self.state().check_status(key),
            Lookup::Create(owner) => self.materialize(owner, identity),
        }
    }

    /// Current value of a node.
    pub(crate) fn value_of(&self, key: NodeKey) -> Result<Value> {
        let state = self.state();
        let node = state.node(key)?;
        match &node.status {
            NodeStatus::Ready(value) => Ok(value.clone()),
            NodeStatus::Failed(err) => Err(err.clone()),
            NodeStatus::Initializing => Err(Error::circular(node.identity.shared_name())),
        }
    }

    fn materialize(self: &Rc<Self>, scope: ScopeId, identity: &Identity) -> Result<NodeKey> {
        let (key, descriptor, label) = {
            let mut state = self.state_mut();
            state.ensure_live(scope)?;
            let descriptor = state
                .scope(scope)
                .overrides
                .descriptor(identity.id())
                .unwrap_or_else(|| identity.origin().clone());

            let slot = state.scope_mut(scope).order.reserve();
            let key = state
                .nodes
                .add_node(NodeState::new(identity.clone(), scope, descriptor.clone(), slot));

            let owner = state.scope_mut(scope);
            owner.order.insert(slot, key);
            owner.readers.insert(identity.id(), key);
            (key, descriptor, owner.label.clone())
        };

        tracing::debug!(
            owner = %label,
            provider = identity.name(),
            kind = %descriptor.kind(),
            node = key.index(),
            "materializing provider"
        );

        let created = {
            let unwinding = UnwindGuard::arm(self, key);
            let _guard = InitGuard::enter(self, scope, key);
            let mut reference = Ref::new(self, key);
            let created = descriptor.create(&mut reference);
            unwinding.disarm();
            created
        };

        match created {
            Ok(value) => {
                let hooks = {
                    let mut state = self.state_mut();
                    if let Some(node) = state.nodes.get_mut(key) {
                        node.status = NodeStatus::Ready(value.clone());
                        node.dirty = false;
                    }
                    state.scope(scope).hooks.clone()
                };
                hooks.notify_observers(Some(identity.shared_name()), |observer| {
                    observer.on_node_added(identity, &value)
                });
                Ok(key)
            }
            Err(err) => {
                let err = Error::from_initializer(identity.shared_name(), err);
                if err.is_circular() {
                    // Leave no trace: the same read may succeed once the
                    // reader that closed the cycle is gone.
                    self.discard(key);
                } else {
                    tracing::warn!(
                        owner = %label,
                        provider = identity.name(),
                        error = %err,
                        "provider failed to initialize"
                    );
                    if let Some(node) = self.state_mut().nodes.get_mut(key) {
                        node.status = NodeStatus::Failed(err.clone());
                        node.dirty = false;
                    }
                }
                Err(err)
            }
        }
    }

    /// Remove a node whose initialization was abandoned.
    fn discard(&self, key: NodeKey) {
        let removed = {
            let mut state = self.state_mut();
            let Some(node) = state.nodes.remove_node(key) else {
                return;
            };
            let owner = state.scope_mut(node.scope);
            owner.order.remove(node.slot);
            if owner.readers.get(&node.identity.id()) == Some(&key) {
                owner.readers.shift_remove(&node.identity.id());
            }
            let hooks = owner.hooks.clone();
            (node, hooks)
        };
        let (node, hooks) = removed;

        tracing::debug!(
            provider = node.identity.name(),
            node = key.index(),
            "discarding node caught in a cycle"
        );
        for callback in node.dispose_callbacks {
            hooks.failures.run(
                FailureSource::DisposeCallback,
                Some(node.identity.shared_name()),
                callback,
            );
        }
    }
}
