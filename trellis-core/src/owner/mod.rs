//! Graph Owners
//!
//! A [`GraphOwner`] is the container that materializes providers, caches
//! their values, and delivers changes in dependency order.
//!
//! # Overview
//!
//! ```text
//!        root owner
//!   ┌──────────────────┐
//!   │ count    depth 0 │◀──── set / modify
//!   │ doubled  depth 1 │────▶ listeners, observers
//!   └──────────────────┘
//!            ▲ inherits
//!   ┌──────────────────┐
//!   │ child owner      │  overrides: count = 10
//!   │ count    depth 0 │  (its own node)
//!   └──────────────────┘
//! ```
//!
//! Owners form a tree. A child reads its ancestors' nodes unless it
//! overrides the provider itself; a provider overridden on an ancestor is
//! materialized in that ancestor and shared with its descendants.
//!
//! Changes are batched: `set` marks the node dirty and asks the host for a
//! flush, and `flush` delivers everything that changed since the last one.

mod context;
mod dispose;
mod listener;
mod overrides;
mod reader;
mod reference;
mod runtime;
mod scheduler;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

pub use listener::{ListenerHandle, ListenerId};
pub use overrides::Override;
pub use reference::{Ref, Subscription};

pub(crate) use runtime::ScopeId;

use overrides::OverrideTable;
use reference::downcast;
use runtime::{GraphState, Hooks, Runtime, ScopeState};

use crate::config::OwnerConfig;
use crate::error::Result;
use crate::graph::node::NodeStatus;
use crate::graph::NodeKey;
use crate::observer::{default_handler, FailureSink, Observer, UncaughtFailure, UncaughtHandler};
use crate::provider::{ProviderKind, Readable, StateProvider, Value};
use crate::snapshot::{GraphSnapshot, NodeSnapshot};

/// Container for provider state.
///
/// Cloning a `GraphOwner` yields another handle to the same owner.
///
/// # Example
///
/// ```rust,ignore
/// let count = StateProvider::with_value("count", 0);
/// let doubled = {
///     let count = count.clone();
///     Provider::new("doubled", move |r| Ok(r.watch(&count)? * 2))
/// };
///
/// let owner = GraphOwner::new();
/// owner.listen(&doubled, |value| println!("doubled = {value}"))?;
///
/// owner.set(&count, 5)?;
/// owner.flush()?; // prints "doubled = 10"
/// ```
#[derive(Clone)]
pub struct GraphOwner {
    runtime: Rc<Runtime>,
    scope: ScopeId,
}

impl GraphOwner {
    /// Create a root owner with default settings.
    pub fn new() -> Self {
        Self::create(None, OverrideTable::default(), GraphOwnerBuilder::default())
    }

    pub fn builder() -> GraphOwnerBuilder {
        GraphOwnerBuilder::default()
    }

    fn create(parent: Option<&GraphOwner>, overrides: OverrideTable, builder: GraphOwnerBuilder) -> Self {
        let runtime = parent.map_or_else(Runtime::new, |parent| parent.runtime.clone());
        let parent_scope = parent.map(|parent| parent.scope);
        let override_count = overrides.len();

        let label: Arc<str> = match builder.label.or_else(|| builder.config.label.clone()) {
            Some(label) => Arc::from(label),
            None if parent_scope.is_none() => Arc::from("root"),
            None => Arc::from(format!("scope-{}", runtime.state().scopes.len())),
        };

        let hooks = Hooks {
            on_needs_flush: builder.on_needs_flush,
            observers: builder.observers,
            failures: FailureSink {
                handler: builder.uncaught.unwrap_or_else(default_handler),
                isolate: builder.config.isolate_panics,
            },
        };

        let scope = runtime.add_scope(ScopeState::new(
            label.clone(),
            parent_scope,
            builder.config,
            overrides,
            hooks,
        ));

        tracing::debug!(
            owner = %label,
            parent = ?parent_scope.map(|scope| scope.0),
            overrides = override_count,
            "owner created"
        );

        Self { runtime, scope }
    }

    #[cfg(test)]
    pub(crate) fn parts(&self) -> (&Rc<Runtime>, ScopeId) {
        (&self.runtime, self.scope)
    }

    /// Name used in logs and snapshots.
    pub fn label(&self) -> String {
        self.runtime.state().scope(self.scope).label.to_string()
    }

    /// The owner this one inherits from.
    pub fn parent(&self) -> Option<GraphOwner> {
        let parent = self.runtime.state().scope(self.scope).parent?;
        Some(Self {
            runtime: self.runtime.clone(),
            scope: parent,
        })
    }

    /// Read the current value of `provider`, materializing it on first use.
    ///
    /// A provider whose initializer failed returns the same error on every
    /// read.
    pub fn read<T, P>(&self, provider: &P) -> Result<T>
    where
        P: Readable<T> + ?Sized,
        T: Clone + 'static,
    {
        let identity = provider.identity();
        let key = self.runtime.read_node(self.scope, identity)?;
        let value = self.runtime.value_of(key)?;
        downcast(&value, identity.name())
    }

    /// The node `provider` resolves to from this owner.
    pub fn node<T, P>(&self, provider: &P) -> Result<NodeRef>
    where
        P: Readable<T> + ?Sized,
    {
        let key = self.runtime.read_node(self.scope, provider.identity())?;
        Ok(NodeRef {
            runtime: self.runtime.clone(),
            key,
        })
    }

    /// Replace the value of a state provider.
    ///
    /// Listeners hear about it on the next flush.
    pub fn set<T>(&self, provider: &StateProvider<T>, value: T) -> Result<()>
    where
        T: Clone + fmt::Debug + 'static,
    {
        self.runtime
            .set_value(self.scope, provider.identity(), Value::new(value))
    }

    /// Replace the value of a state provider with `f(current)`.
    pub fn modify<T, F>(&self, provider: &StateProvider<T>, f: F) -> Result<()>
    where
        T: Clone + fmt::Debug + 'static,
        F: FnOnce(&T) -> T,
    {
        let current = self.read(provider)?;
        self.set(provider, f(&current))
    }

    /// Call `listener` whenever `provider` notifies a change.
    ///
    /// The listener is not called with the current value.
    pub fn listen<T, P, F>(&self, provider: &P, mut listener: F) -> Result<ListenerHandle>
    where
        P: Readable<T> + ?Sized,
        T: 'static,
        F: FnMut(&T) + 'static,
    {
        let identity = provider.identity();
        let name = identity.shared_name().clone();
        let callback: Rc<RefCell<dyn FnMut(&Value)>> = Rc::new(RefCell::new(move |value: &Value| {
            match value.downcast_ref::<T>() {
                Some(value) => listener(value),
                None => tracing::warn!(provider = %name, "listener skipped a value of another type"),
            }
        }));
        self.runtime.add_listener(self.scope, identity, callback)
    }

    /// Deliver every change queued since the last flush.
    ///
    /// Does nothing when no flush is pending. Fails when called from inside
    /// a flush of the same owner.
    pub fn flush(&self) -> Result<()> {
        self.runtime.flush(self.scope)?;
        self.runtime.settle()
    }

    pub fn is_flush_pending(&self) -> bool {
        self.runtime.state().scope(self.scope).flush.pending
    }

    /// Install a new override list, then flush whatever it invalidated.
    ///
    /// The list must have the same shape as the one the owner was built
    /// with: same providers, same order, same kinds. Passing `None` only
    /// flushes.
    pub fn update(&self, overrides: Option<Vec<Override>>) -> Result<()> {
        match overrides {
            Some(next) => self.runtime.update_overrides(self.scope, next)?,
            None => self.runtime.state().ensure_live(self.scope)?,
        }
        if self.is_flush_pending() {
            self.runtime.flush(self.scope)?;
        }
        self.runtime.settle()
    }

    /// Tear the owner down, children first.
    ///
    /// Disposal callbacks run exactly once. A second call fails.
    pub fn dispose(&self) -> Result<()> {
        self.runtime.dispose(self.scope)
    }

    pub fn is_disposed(&self) -> bool {
        self.runtime.state().scope(self.scope).disposed
    }

    /// Number of nodes this owner materialized itself.
    pub fn node_count(&self) -> usize {
        self.runtime.state().scope(self.scope).order.len()
    }

    /// Serializable view of this owner's nodes.
    pub fn snapshot(&self) -> GraphSnapshot {
        self.runtime.state().snapshot(self.scope)
    }
}

impl Default for GraphOwner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GraphOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.runtime.state();
        let scope = state.scope(self.scope);
        f.debug_struct("GraphOwner")
            .field("label", &scope.label)
            .field("nodes", &scope.order.len())
            .field("disposed", &scope.disposed)
            .finish()
    }
}

/// Configures a [`GraphOwner`] before it is created.
#[derive(Default)]
pub struct GraphOwnerBuilder {
    parent: Option<GraphOwner>,
    overrides: Vec<Override>,
    on_needs_flush: Option<Rc<dyn Fn()>>,
    observers: Vec<Rc<dyn Observer>>,
    uncaught: Option<UncaughtHandler>,
    config: OwnerConfig,
    label: Option<String>,
}

impl GraphOwnerBuilder {
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Inherit nodes and overrides from `parent`.
    pub fn parent(mut self, parent: &GraphOwner) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    pub fn with_override(mut self, o: Override) -> Self {
        self.overrides.push(o);
        self
    }

    pub fn overrides(mut self, overrides: impl IntoIterator<Item = Override>) -> Self {
        self.overrides.extend(overrides);
        self
    }

    /// Called once each time the owner goes from clean to dirty.
    ///
    /// The host is expected to call [`GraphOwner::flush`] soon after, e.g.
    /// on its next frame or event loop turn.
    pub fn on_needs_flush<F>(mut self, callback: F) -> Self
    where
        F: Fn() + 'static,
    {
        self.on_needs_flush = Some(Rc::new(callback));
        self
    }

    pub fn observer<O>(mut self, observer: O) -> Self
    where
        O: Observer + 'static,
    {
        self.observers.push(Rc::new(observer));
        self
    }

    /// Share an observer between owners.
    pub fn shared_observer(mut self, observer: Rc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Receive panics and failures that were isolated instead of
    /// propagated. Defaults to [`log_uncaught`](crate::observer::log_uncaught).
    pub fn uncaught_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&UncaughtFailure) + 'static,
    {
        self.uncaught = Some(Rc::new(handler));
        self
    }

    pub fn config(mut self, config: OwnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Create the owner.
    ///
    /// Fails if the parent is disposed or a provider is overridden twice.
    pub fn build(mut self) -> Result<GraphOwner> {
        let overrides = OverrideTable::new(std::mem::take(&mut self.overrides))?;
        let parent = self.parent.take();
        if let Some(parent) = &parent {
            parent.runtime.state().ensure_live(parent.scope)?;
        }
        Ok(GraphOwner::create(parent.as_ref(), overrides, self))
    }
}

impl fmt::Debug for GraphOwnerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphOwnerBuilder")
            .field("parent", &self.parent)
            .field("overrides", &self.overrides)
            .field("observers", &self.observers.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Handle to a materialized node, for inspection.
///
/// Two handles are equal when they point at the same node.
#[derive(Clone)]
pub struct NodeRef {
    runtime: Rc<Runtime>,
    key: NodeKey,
}

impl NodeRef {
    pub fn key(&self) -> NodeKey {
        self.key
    }

    /// `None` once the node is disposed.
    pub fn depth(&self) -> Option<u32> {
        self.runtime.state().nodes.get(self.key).map(|node| node.depth)
    }

    pub fn is_dirty(&self) -> bool {
        self.runtime
            .state()
            .nodes
            .get(self.key)
            .map_or(false, |node| node.dirty)
    }

    pub fn is_mounted(&self) -> bool {
        self.runtime
            .state()
            .nodes
            .get(self.key)
            .map_or(false, |node| node.mounted)
    }

    /// Kind of the descriptor the node currently runs with.
    pub fn kind(&self) -> Option<ProviderKind> {
        self.runtime.state().nodes.get(self.key).map(|node| node.kind())
    }

    pub fn provider_name(&self) -> Option<String> {
        self.runtime
            .state()
            .nodes
            .get(self.key)
            .map(|node| node.identity.name().to_string())
    }

    /// Names of the providers this node depends on, in registration order.
    pub fn dependencies(&self) -> Vec<String> {
        let state = self.runtime.state();
        let Some(node) = state.nodes.get(self.key) else {
            return Vec::new();
        };
        node.dependencies
            .iter()
            .filter_map(|key| state.nodes.get(*key))
            .map(|dependency| dependency.identity.name().to_string())
            .collect()
    }

    pub fn dependent_count(&self) -> usize {
        self.runtime
            .state()
            .nodes
            .get(self.key)
            .map_or(0, |node| node.dependents.len())
    }

    /// Cached value, if the node initialized successfully.
    pub fn value(&self) -> Option<Value> {
        self.runtime
            .state()
            .nodes
            .get(self.key)
            .and_then(|node| node.value().cloned())
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && Rc::ptr_eq(&self.runtime, &other.runtime)
    }
}

impl Eq for NodeRef {}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("key", &self.key)
            .field("provider", &self.provider_name())
            .field("depth", &self.depth())
            .finish()
    }
}

impl GraphState {
    fn snapshot(&self, scope: ScopeId) -> GraphSnapshot {
        let owner = self.scope(scope);
        let nodes = owner
            .order
            .keys()
            .filter_map(|key| self.nodes.get(key).map(|node| (key, node)))
            .map(|(key, node)| NodeSnapshot {
                key: key.index(),
                provider: node.identity.name().to_string(),
                provider_id: node.identity.id().raw(),
                kind: node.kind(),
                depth: node.depth,
                status: node.status.label().to_string(),
                dirty: node.dirty,
                dependencies: node
                    .dependencies
                    .iter()
                    .filter_map(|dependency| self.nodes.get(*dependency))
                    .map(|dependency| dependency.identity.name().to_string())
                    .collect(),
                dependents: node.dependents.len(),
                listeners: node.listeners.len(),
                error: match &node.status {
                    NodeStatus::Failed(err) => Some(err.to_string()),
                    _ => None,
                },
                value: node
                    .value()
                    .filter(|_| owner.config.trace_values)
                    .map(|value| format!("{value:?}")),
            })
            .collect();

        GraphSnapshot {
            owner: owner.label.to_string(),
            parent: owner.parent.map(|parent| self.scope(parent).label.to_string()),
            flush_pending: owner.flush.pending,
            disposed: owner.disposed,
            overrides: owner.overrides.len(),
            nodes,
        }
    }
}
