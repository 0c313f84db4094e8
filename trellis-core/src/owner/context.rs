//! Reentrancy Guards
//!
//! An owner tracks which node is initializing and which depth is notifying
//! so it can reject cycles and out-of-order mutations. The values live on
//! the owner itself, not in process-wide statics, so independent owners
//! never see each other's state.
//!
//! Each guard saves the previous value when entered and restores it when
//! dropped. Nested initializations (a node's initializer reading another
//! node for the first time) stack naturally, and the state is restored even
//! if user code panics.

use super::runtime::{Runtime, ScopeId};
use crate::error::Error;
use crate::graph::node::NodeStatus;
use crate::graph::NodeKey;

/// Marks `key` as the node initializing in its owner.
pub(crate) struct InitGuard<'a> {
    runtime: &'a Runtime,
    scope: ScopeId,
    previous: Option<NodeKey>,
}

impl<'a> InitGuard<'a> {
    pub(crate) fn enter(runtime: &'a Runtime, scope: ScopeId, key: NodeKey) -> Self {
        let previous = runtime
            .state_mut()
            .scope_mut(scope)
            .initializing
            .replace(key);
        Self {
            runtime,
            scope,
            previous,
        }
    }
}

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        if let Some(mut state) = self.runtime.try_state_mut() {
            state.scope_mut(self.scope).initializing = self.previous;
        }
    }
}

/// Marks `depth` as the depth currently notifying in an owner.
pub(crate) struct NotifyGuard<'a> {
    runtime: &'a Runtime,
    scope: ScopeId,
    previous: Option<u32>,
}

impl<'a> NotifyGuard<'a> {
    pub(crate) fn enter(runtime: &'a Runtime, scope: ScopeId, depth: u32) -> Self {
        let previous = runtime
            .state_mut()
            .scope_mut(scope)
            .flush
            .notifying_depth
            .replace(depth);
        Self {
            runtime,
            scope,
            previous,
        }
    }
}

impl Drop for NotifyGuard<'_> {
    fn drop(&mut self) {
        if let Some(mut state) = self.runtime.try_state_mut() {
            state.scope_mut(self.scope).flush.notifying_depth = self.previous;
        }
    }
}

/// Marks an owner as walking its flush order.
pub(crate) struct FlushGuard<'a> {
    runtime: &'a Runtime,
    scope: ScopeId,
}

impl<'a> FlushGuard<'a> {
    pub(crate) fn enter(runtime: &'a Runtime, scope: ScopeId) -> Self {
        runtime.state_mut().scope_mut(scope).flush.flushing = true;
        Self { runtime, scope }
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        if let Some(mut state) = self.runtime.try_state_mut() {
            state.scope_mut(self.scope).flush.flushing = false;
        }
    }
}

/// Fails a node whose initializer unwinds instead of returning.
///
/// Without it the node would stay `Initializing` and every later read
/// would report a cycle.
pub(crate) struct UnwindGuard<'a> {
    runtime: &'a Runtime,
    key: NodeKey,
    armed: bool,
}

impl<'a> UnwindGuard<'a> {
    pub(crate) fn arm(runtime: &'a Runtime, key: NodeKey) -> Self {
        Self {
            runtime,
            key,
            armed: true,
        }
    }

    /// The initializer returned normally.
    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for UnwindGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some(mut state) = self.runtime.try_state_mut() else {
            return;
        };
        if let Some(node) = state.nodes.get_mut(self.key) {
            if matches!(node.status, NodeStatus::Initializing) {
                let err = Error::from_initializer(node.identity.shared_name(), "initializer panicked".into());
                node.status = NodeStatus::Failed(err);
                node.dirty = false;
            }
        }
    }
}
