//! Initializer Context
//!
//! [`Ref`] is what an initializer (or a recomputation) sees of the owner:
//! it can read other providers, which registers them as dependencies, ask
//! whether its node is still mounted, and register teardown work.

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;

use super::runtime::Runtime;
use crate::error::{Error, Result};
use crate::graph::node::DisposeCallback;
use crate::graph::NodeKey;
use crate::provider::{Identity, Readable, Value};

/// Handle passed to provider initializers.
pub struct Ref<'a> {
    runtime: &'a Rc<Runtime>,
    node: NodeKey,
}

impl<'a> Ref<'a> {
    pub(crate) fn new(runtime: &'a Rc<Runtime>, node: NodeKey) -> Self {
        Self { runtime, node }
    }

    /// Register `provider` as a dependency and return a live handle to it.
    ///
    /// Reading a provider that is already initializing higher up the stack
    /// fails with [`Error::CircularDependency`].
    pub fn depend_on<T, P>(&mut self, provider: &P) -> Result<Subscription<T>>
    where
        P: Readable<T> + ?Sized,
        T: Clone + 'static,
    {
        let identity = provider.identity();
        let key = self.runtime.depend_on(self.node, identity)?;
        Ok(Subscription {
            runtime: self.runtime.clone(),
            key,
            provider: identity.shared_name().clone(),
            _marker: PhantomData,
        })
    }

    /// Register `provider` as a dependency and read its current value.
    pub fn watch<T, P>(&mut self, provider: &P) -> Result<T>
    where
        P: Readable<T> + ?Sized,
        T: Clone + 'static,
    {
        self.depend_on(provider)?.read()
    }

    /// Whether the node is still part of a live owner.
    pub fn mounted(&self) -> bool {
        let state = self.runtime.state();
        state
            .nodes
            .get(self.node)
            .map_or(false, |node| node.mounted && !state.scope(node.scope).disposed)
    }

    /// Run `callback` when the node is torn down.
    ///
    /// Callbacks run once, in registration order. If the node is already
    /// gone the callback runs immediately.
    pub fn on_dispose<F>(&mut self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        let callback: DisposeCallback = Box::new(callback);
        let rejected = {
            let mut state = self.runtime.state_mut();
            match state.nodes.get_mut(self.node) {
                Some(node) if node.mounted => {
                    node.dispose_callbacks.push(callback);
                    None
                }
                _ => Some(callback),
            }
        };
        if let Some(callback) = rejected {
            callback();
        }
    }

    /// Name of the provider being initialized.
    pub fn provider_name(&self) -> Option<String> {
        self.runtime
            .state()
            .nodes
            .get(self.node)
            .map(|node| node.identity.name().to_string())
    }
}

impl fmt::Debug for Ref<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref").field("node", &self.node).finish()
    }
}

/// A typed handle to a dependency, readable after initialization.
pub struct Subscription<T> {
    runtime: Rc<Runtime>,
    key: NodeKey,
    provider: Arc<str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Subscription<T>
where
    T: Clone + 'static,
{
    /// Current value of the dependency.
    pub fn read(&self) -> Result<T> {
        let value = self.runtime.value_of(self.key)?;
        downcast(&value, &self.provider)
    }

    pub fn key(&self) -> NodeKey {
        self.key
    }
}

impl<T> Clone for Subscription<T> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            key: self.key,
            provider: self.provider.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("provider", &self.provider)
            .field("node", &self.key)
            .finish()
    }
}

/// Extract a typed value from a node.
pub(crate) fn downcast<T: Clone + 'static>(value: &Value, provider: &str) -> Result<T> {
    value.downcast_ref::<T>().cloned().ok_or_else(|| {
        Error::invalid_state(format!(
            "provider `{provider}` holds a value of type other than {}",
            std::any::type_name::<T>()
        ))
    })
}

impl Runtime {
    /// Link `dependent` to the node for `identity`, materializing it first
    /// if needed.
    pub(crate) fn depend_on(self: &Rc<Self>, dependent: NodeKey, identity: &Identity) -> Result<NodeKey> {
        let scope = {
            let state = self.state();
            let node = state.node(dependent)?;
            state.ensure_live(node.scope)?;
            if state.scope(node.scope).initializing != Some(dependent) {
                return Err(Error::invalid_state(format!(
                    "`{}` registered a dependency outside of its initialization",
                    node.identity.name()
                )));
            }
            if node.identity.id() == identity.id() {
                return Err(Error::circular(identity.shared_name()));
            }
            node.scope
        };

        let target = self.read_node(scope, identity)?;

        let mut state = self.state_mut();
        if state.node(dependent)?.dependencies.contains(&target) {
            return Ok(target);
        }
        if state.nodes.depends_on(target, dependent) {
            return Err(Error::circular(identity.shared_name()));
        }
        state.nodes.add_edge(target, dependent);
        let depth = state.node(target)?.depth + 1;
        state.raise_depth(dependent, depth);

        tracing::trace!(
            dependency = identity.name(),
            dependent = dependent.index(),
            "dependency registered"
        );
        Ok(target)
    }
}
