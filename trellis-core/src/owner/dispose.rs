//! Owner Teardown
//!
//! Disposal takes an owner out of service for good. Children go first, then
//! the owner's own nodes in descending depth, so a node's teardown runs
//! while everything it depends on is still mounted.

use std::rc::Rc;

use super::context::NotifyGuard;
use super::runtime::{Runtime, ScopeId};
use crate::error::{Error, Result};
use crate::observer::FailureSource;

impl Runtime {
    pub(crate) fn dispose(self: &Rc<Self>, scope: ScopeId) -> Result<()> {
        let children = {
            let state = self.state();
            let owner = state.scope(scope);
            if owner.disposed {
                return Err(Error::invalid_state(format!(
                    "owner `{}` was already disposed",
                    owner.label
                )));
            }
            if owner.flush.flushing || owner.initializing.is_some() {
                return Err(Error::invalid_state(format!(
                    "owner `{}` cannot be disposed while it is flushing or initializing",
                    owner.label
                )));
            }
            owner.children.clone()
        };

        for child in children {
            let live = !self.state().scope(child).disposed;
            if live {
                self.dispose(child)?;
            }
        }

        self.remove_listeners(scope);

        let (keys, hooks, label) = {
            let mut state = self.state_mut();
            state.live.shift_remove(&scope);
            let owner = state.scope_mut(scope);
            owner.disposed = true;
            owner.flush.pending = false;
            let keys: Vec<_> = owner.order.keys().rev().collect();
            (keys, owner.hooks.clone(), owner.label.clone())
        };

        let span = tracing::debug_span!("dispose", owner = %label);
        let _entered = span.enter();

        for &key in &keys {
            let (identity, callbacks, depth) = {
                let mut state = self.state_mut();
                let Some(node) = state.nodes.get_mut(key) else {
                    continue;
                };
                node.mounted = false;
                node.listeners.clear();
                (
                    node.identity.clone(),
                    std::mem::take(&mut node.dispose_callbacks),
                    node.depth,
                )
            };

            {
                let _guard = NotifyGuard::enter(self, scope, depth);
                for callback in callbacks {
                    hooks.failures.run(
                        FailureSource::DisposeCallback,
                        Some(identity.shared_name()),
                        callback,
                    );
                }
            }

            hooks.notify_observers(Some(identity.shared_name()), |observer| {
                observer.on_node_disposed(&identity)
            });
        }

        let mut state = self.state_mut();
        for &key in &keys {
            state.nodes.remove_node(key);
        }
        let owner = state.scope_mut(scope);
        owner.retire();
        let parent = owner.parent;
        if let Some(parent) = parent {
            state.scope_mut(parent).children.retain(|child| *child != scope);
        }

        tracing::debug!(
            nodes = keys.len(),
            remaining = state.nodes.node_count(),
            "owner disposed"
        );
        Ok(())
    }
}
