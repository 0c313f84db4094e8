//! External Listeners
//!
//! Listeners are how code outside the graph hears about changes. They are
//! called during a flush, after the node's dependents have been marked, and
//! never run while the owner's state is borrowed.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use super::runtime::{Runtime, ScopeId};
use crate::error::Result;
use crate::graph::node::Listener;
use crate::graph::NodeKey;
use crate::provider::{Identity, Value};

/// Global counter for listener IDs.
static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn new() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Keeps a listener registered until closed or until its owner is disposed.
///
/// Dropping the handle does not unregister the listener.
#[derive(Debug)]
pub struct ListenerHandle {
    runtime: Weak<Runtime>,
    scope: ScopeId,
    key: NodeKey,
    id: ListenerId,
}

impl ListenerHandle {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Node the listener is attached to.
    pub fn node(&self) -> NodeKey {
        self.key
    }

    /// Unregister the listener. Returns `false` if it was already gone.
    pub fn close(&self) -> bool {
        let Some(runtime) = self.runtime.upgrade() else {
            return false;
        };
        let mut state = runtime.state_mut();
        let id = self.id;
        state.scope_mut(self.scope).listeners.retain(|(_, registered)| *registered != id);
        state
            .nodes
            .get_mut(self.key)
            .map_or(false, |node| node.remove_listener(id))
    }

    pub fn is_active(&self) -> bool {
        self.runtime.upgrade().map_or(false, |runtime| {
            runtime
                .state()
                .nodes
                .get(self.key)
                .map_or(false, |node| node.listeners.iter().any(|l| l.id == self.id))
        })
    }
}

impl Runtime {
    /// Attach `callback` to the node `scope` resolves `identity` to.
    pub(crate) fn add_listener(
        self: &Rc<Self>,
        scope: ScopeId,
        identity: &Identity,
        callback: Rc<RefCell<dyn FnMut(&Value)>>,
    ) -> Result<ListenerHandle> {
        let key = self.read_node(scope, identity)?;
        let id = ListenerId::new();

        let mut state = self.state_mut();
        state.node_mut(key)?.listeners.push(Listener { id, callback });
        state.scope_mut(scope).listeners.push((key, id));
        tracing::trace!(provider = identity.name(), listener = id.0, "listener added");

        Ok(ListenerHandle {
            runtime: Rc::downgrade(self),
            scope,
            key,
            id,
        })
    }

    /// Remove every listener `scope` registered, including those on
    /// inherited nodes.
    pub(crate) fn remove_listeners(&self, scope: ScopeId) {
        let mut state = self.state_mut();
        let registered = std::mem::take(&mut state.scope_mut(scope).listeners);
        for (key, id) in registered {
            if let Some(node) = state.nodes.get_mut(key) {
                node.remove_listener(id);
            }
        }
    }
}
