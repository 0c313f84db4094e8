//! Flush Scheduling
//!
//! Mutations do not notify anybody on their own. They mark the node dirty
//! and, the first time an owner goes from clean to dirty, ask the host for
//! a flush through `on_needs_flush`. The flush then walks the owner's depth
//! order once:
//!
//! ```text
//! depth 0:  count (dirty)      -> notify listeners, mark `doubled` dirty
//! depth 1:  doubled (dirty)    -> recompute, notify if the value changed
//! depth 2:  label              -> clean, skipped
//! ```
//!
//! Because every dependency sits at a lower depth than its dependents, a
//! node is visited after everything it reads, and dirtiness only ever
//! spreads forward, past the cursor. Marking a node at or above the depth
//! that is currently notifying would require going back, so it is refused.

use std::rc::Rc;

use super::context::{FlushGuard, InitGuard, NotifyGuard};
use super::runtime::{GraphState, Runtime, ScopeId};
use super::Ref;
use crate::config::FlushPolicy;
use crate::error::{Error, Result};
use crate::graph::node::NodeStatus;
use crate::graph::NodeKey;
use crate::observer::FailureSource;
use crate::provider::{Identity, ProviderKind, Refresh, Value};

impl GraphState {
    /// Refuse to mutate `key` when that would go against the flush order.
    fn check_mutable(&self, key: NodeKey) -> Result<ScopeId> {
        let node = self.node(key)?;
        self.ensure_live(node.scope)?;
        if let Some(current) = self.scope(node.scope).flush.notifying_depth {
            if node.depth <= current {
                return Err(Error::invalid_state(format!(
                    "cannot mark `{}` (depth {}) dirty while depth {} is notifying",
                    node.identity.name(),
                    node.depth,
                    current
                )));
            }
        }
        Ok(node.scope)
    }
}

impl Runtime {
    /// Mark `key` dirty and request a flush if its owner was clean.
    pub(crate) fn mark_dirty(&self, key: NodeKey) -> Result<()> {
        let request = {
            let mut state = self.state_mut();
            let scope = state.check_mutable(key)?;
            state.node_mut(key)?.dirty = true;

            let owner = state.scope_mut(scope);
            if owner.flush.flushing || owner.flush.pending {
                None
            } else {
                owner.flush.pending = true;
                Some(owner.hooks.clone())
            }
        };

        if let Some(hooks) = request {
            tracing::trace!(node = key.index(), "flush requested");
            if let Some(on_needs_flush) = &hooks.on_needs_flush {
                hooks
                    .failures
                    .run(FailureSource::FlushRequest, None, || on_needs_flush());
            }
        }
        Ok(())
    }

    /// Store a new value for a state node and queue its notification.
    pub(crate) fn set_value(self: &Rc<Self>, scope: ScopeId, identity: &Identity, value: Value) -> Result<()> {
        let key = self.read_node(scope, identity)?;
        {
            let mut state = self.state_mut();
            let kind = state.node(key)?.kind();
            if kind != ProviderKind::State {
                return Err(Error::unsupported(format!(
                    "provider `{}` is a {kind} node and cannot be set",
                    identity.name()
                )));
            }
            state.check_mutable(key)?;
            state.node_mut(key)?.status = NodeStatus::Ready(value);
        }

        self.mark_dirty(key)?;
        self.settle()
    }

    /// Run one flush pass over `scope`.
    pub(crate) fn flush(self: &Rc<Self>, scope: ScopeId) -> Result<()> {
        let (label, hooks) = {
            let mut state = self.state_mut();
            state.ensure_live(scope)?;
            let owner = state.scope_mut(scope);
            if owner.flush.flushing {
                return Err(Error::invalid_state(format!(
                    "owner `{}` is already flushing",
                    owner.label
                )));
            }
            if !owner.flush.pending {
                return Ok(());
            }
            owner.flush.pending = false;
            (owner.label.clone(), owner.hooks.clone())
        };

        let span = tracing::debug_span!("flush", owner = %label);
        let _entered = span.enter();
        let mut notified = 0_usize;

        {
            let _flushing = FlushGuard::enter(self, scope);
            let mut cursor = None;

            loop {
                let next = self.state().scope(scope).order.next_after(cursor);
                let Some((slot, key)) = next else {
                    break;
                };
                cursor = Some(slot);

                let depth = {
                    let mut state = self.state_mut();
                    let Some(node) = state.nodes.get_mut(key) else {
                        continue;
                    };
                    if !node.take_dirty() {
                        continue;
                    }
                    node.depth
                };

                let _notifying = NotifyGuard::enter(self, scope, depth);
                self.notify_node(key);
                notified += 1;
            }
        }

        hooks.notify_observers(None, |observer| observer.on_flush_complete());
        tracing::debug!(notified, "flush complete");
        Ok(())
    }

    /// Refresh one dirty node and fan out if it changed.
    fn notify_node(self: &Rc<Self>, key: NodeKey) {
        let (descriptor, previous, scope, name, hooks) = {
            let state = self.state();
            let Some(node) = state.nodes.get(key) else {
                return;
            };
            let Some(previous) = node.value().cloned() else {
                return;
            };
            (
                node.descriptor.clone(),
                previous,
                node.scope,
                node.identity.shared_name().clone(),
                state.scope(node.scope).hooks.clone(),
            )
        };

        let recomputes = descriptor.kind().recomputes();
        let stale = if recomputes {
            self.state_mut().nodes.clear_dependencies(key)
        } else {
            Vec::new()
        };

        let outcome = {
            let _guard = InitGuard::enter(self, scope, key);
            let mut reference = Ref::new(self, key);
            descriptor.refresh(&mut reference, &previous)
        };

        match outcome {
            Ok(Refresh::Unchanged) => {
                tracing::trace!(provider = %name, "recomputed to an equal value");
            }
            Ok(Refresh::Notify) => self.fan_out(key, previous),
            Ok(Refresh::Replace(value)) => {
                if let Some(node) = self.state_mut().nodes.get_mut(key) {
                    node.status = NodeStatus::Ready(value.clone());
                }
                self.fan_out(key, value);
            }
            Err(err) => {
                // Keep the last good value and the edges that produced it.
                // Edges the failed pass registered before erroring go.
                let mut state = self.state_mut();
                if recomputes {
                    state.nodes.clear_dependencies(key);
                }
                for dependency in stale {
                    let Some(depth) = state.nodes.get(dependency).map(|node| node.depth + 1) else {
                        continue;
                    };
                    state.nodes.add_edge(dependency, key);
                    state.raise_depth(key, depth);
                }
                drop(state);

                tracing::warn!(provider = %name, error = %err, "recompute failed, keeping previous value");
                hooks
                    .failures
                    .report(FailureSource::Recompute, Some(&name), err.to_string());
            }
        }
    }

    /// Deliver a change: dirty the recomputing dependents, then call
    /// listeners and observers.
    fn fan_out(self: &Rc<Self>, key: NodeKey, value: Value) {
        let (identity, dependents, listeners, hooks) = {
            let state = self.state();
            let Some(node) = state.nodes.get(key) else {
                return;
            };
            let dependents: Vec<NodeKey> = node
                .dependents
                .iter()
                .copied()
                .filter(|dependent| {
                    state
                        .nodes
                        .get(*dependent)
                        .map_or(false, |node| node.kind().recomputes())
                })
                .collect();
            (
                node.identity.clone(),
                dependents,
                node.listeners.clone(),
                state.scope(node.scope).hooks.clone(),
            )
        };

        tracing::trace!(
            provider = identity.name(),
            dependents = dependents.len(),
            listeners = listeners.len(),
            "notifying"
        );

        for dependent in dependents {
            if let Err(err) = self.mark_dirty(dependent) {
                hooks
                    .failures
                    .report(FailureSource::Recompute, Some(identity.shared_name()), err.to_string());
            }
        }

        for listener in listeners {
            hooks
                .failures
                .run(FailureSource::Listener, Some(identity.shared_name()), || {
                    // A listener that is already running (it triggered this
                    // flush itself) is not re-entered.
                    if let Ok(mut callback) = listener.callback.try_borrow_mut() {
                        let callback = &mut *callback;
                        callback(&value);
                    }
                });
        }

        hooks.notify_observers(Some(identity.shared_name()), |observer| {
            observer.on_node_changed(&identity, &value)
        });
    }

    /// Flush every owner configured with [`FlushPolicy::Immediate`] that has
    /// work queued, unless some owner of the family is mid-flush or
    /// mid-initialization.
    pub(crate) fn settle(self: &Rc<Self>) -> Result<()> {
        loop {
            let next = {
                let state = self.state();
                if state.is_busy() {
                    return Ok(());
                }
                state.live.iter().copied().find(|&id| {
                    let scope = state.scope(id);
                    scope.config.flush == FlushPolicy::Immediate && scope.flush.pending
                })
            };
            match next {
                Some(scope) => self.flush(scope)?,
                None => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OwnerConfig;
    use crate::owner::GraphOwner;
    use crate::provider::{Provider, StateProvider};
    use std::cell::{Cell, RefCell};

    #[test]
    fn many_marks_request_one_flush() {
        let requests = Rc::new(Cell::new(0));
        let counter = requests.clone();
        let owner = GraphOwner::builder()
            .on_needs_flush(move || counter.set(counter.get() + 1))
            .build()
            .unwrap();
        let count = StateProvider::with_value("count", 0);

        for value in 1..=5 {
            owner.set(&count, value).unwrap();
        }

        assert_eq!(requests.get(), 1);
        assert!(owner.is_flush_pending());
        owner.flush().unwrap();
        assert!(!owner.is_flush_pending());

        owner.set(&count, 6).unwrap();
        assert_eq!(requests.get(), 2);
    }

    #[test]
    fn flush_without_pending_work_is_a_no_op() {
        let owner = GraphOwner::new();
        owner.flush().unwrap();
        owner.flush().unwrap();
        assert!(!owner.is_flush_pending());
    }

    #[test]
    fn equal_recomputations_stop_propagation() {
        let owner = GraphOwner::new();
        let count = StateProvider::with_value("count", 1);
        let watched = count.clone();
        let parity = Provider::new("parity", move |r| Ok(r.watch(&watched)? % 2));

        let changes = Rc::new(Cell::new(0));
        let seen = changes.clone();
        owner.listen(&parity, move |_| seen.set(seen.get() + 1)).unwrap();

        owner.set(&count, 3).unwrap();
        owner.flush().unwrap();
        assert_eq!(changes.get(), 0);

        owner.set(&count, 4).unwrap();
        owner.flush().unwrap();
        assert_eq!(changes.get(), 1);
        assert_eq!(owner.read(&parity).unwrap(), 0);
    }

    #[test]
    fn failed_recompute_keeps_the_previous_value() {
        let failures = Rc::new(RefCell::new(Vec::new()));
        let sink = failures.clone();
        let owner = GraphOwner::builder()
            .uncaught_handler(move |failure| sink.borrow_mut().push(failure.source))
            .build()
            .unwrap();

        let count = StateProvider::with_value("count", 1);
        let watched = count.clone();
        let checked = Provider::new("checked", move |r| {
            let value = r.watch(&watched)?;
            if value < 0 {
                return Err("negative".into());
            }
            Ok(value)
        });

        assert_eq!(owner.read(&checked).unwrap(), 1);
        owner.set(&count, -1).unwrap();
        owner.flush().unwrap();

        assert_eq!(owner.read(&checked).unwrap(), 1);
        assert_eq!(*failures.borrow(), vec![FailureSource::Recompute]);

        // The edge survived, so a later good value recomputes again.
        owner.set(&count, 5).unwrap();
        owner.flush().unwrap();
        assert_eq!(owner.read(&checked).unwrap(), 5);
    }

    #[test]
    fn failed_recompute_drops_edges_it_registered() {
        let owner = GraphOwner::builder().uncaught_handler(|_| {}).build().unwrap();
        let a = StateProvider::with_value("a", 1);
        let b = StateProvider::with_value("b", 0);
        let (watched_a, watched_b) = (a.clone(), b.clone());
        let checked = Provider::new("checked", move |r| {
            let value = r.watch(&watched_a)?;
            if value < 0 {
                r.watch(&watched_b)?;
                return Err("negative".into());
            }
            Ok(value)
        });

        assert_eq!(owner.read(&checked).unwrap(), 1);
        owner.set(&a, -1).unwrap();
        owner.flush().unwrap();

        let node = owner.node(&checked).unwrap();
        assert_eq!(node.dependencies(), vec!["a".to_string()]);
        assert_eq!(owner.node(&b).unwrap().dependent_count(), 0);

        // `b` never fed the cached value, so changing it is not a change.
        owner.set(&b, 7).unwrap();
        owner.flush().unwrap();
        assert!(!node.is_dirty());
        assert_eq!(owner.read(&checked).unwrap(), 1);
    }

    #[test]
    fn recompute_rejects_a_dependency_that_closes_a_cycle() {
        let failures = Rc::new(RefCell::new(Vec::new()));
        let sink = failures.clone();
        let owner = GraphOwner::builder()
            .uncaught_handler(move |failure| sink.borrow_mut().push(failure.message.clone()))
            .build()
            .unwrap();

        let flag = StateProvider::with_value("flag", false);
        let late: Rc<RefCell<Option<Provider<i32>>>> = Rc::new(RefCell::new(None));

        let watched_flag = flag.clone();
        let slot = late.clone();
        let head = Provider::new("head", move |r| {
            if r.watch(&watched_flag)? {
                let tail = slot.borrow().clone();
                if let Some(tail) = tail {
                    return Ok(r.watch(&tail)? + 1);
                }
            }
            Ok(0)
        });

        let watched_head = head.clone();
        let tail = Provider::new("tail", move |r| Ok(r.watch(&watched_head)? + 1));
        *late.borrow_mut() = Some(tail.clone());

        assert_eq!(owner.read(&tail).unwrap(), 1);
        owner.set(&flag, true).unwrap();
        owner.flush().unwrap();

        assert_eq!(failures.borrow().len(), 1);
        assert!(failures.borrow()[0].contains("circular"));
        assert_eq!(owner.read(&head).unwrap(), 0);
        assert_eq!(owner.node(&head).unwrap().dependencies(), vec!["flag".to_string()]);
        assert_eq!(owner.node(&tail).unwrap().depth(), Some(2));
    }

    #[test]
    fn listeners_may_not_mark_shallower_nodes() {
        let owner = GraphOwner::new();
        let count = StateProvider::with_value("count", 0);
        let watched = count.clone();
        let doubled = Provider::new("doubled", move |r| Ok(r.watch(&watched)? * 2));

        let outcome = Rc::new(RefCell::new(None));
        let record = outcome.clone();
        let target = count.clone();
        let handle_owner = owner.clone();
        owner
            .listen(&doubled, move |_| {
                *record.borrow_mut() = Some(handle_owner.set(&target, 100));
            })
            .unwrap();

        owner.set(&count, 1).unwrap();
        owner.flush().unwrap();

        let result = outcome.borrow_mut().take().expect("listener ran");
        assert!(matches!(result, Err(Error::InvalidState(_))));
        assert_eq!(owner.read(&count).unwrap(), 1);
    }

    #[test]
    fn listeners_may_mark_deeper_nodes() {
        let owner = GraphOwner::new();
        let source = StateProvider::with_value("source", 0);
        let seed = source.clone();
        // `mirror` sits at depth 1 because its initializer links `source`.
        let mirror = StateProvider::new("mirror", move |r| r.watch(&seed).map_err(Into::into));

        assert_eq!(owner.read(&mirror).unwrap(), 0);

        let target = mirror.clone();
        let handle_owner = owner.clone();
        owner
            .listen(&source, move |value: &i32| {
                handle_owner.set(&target, value * 10).unwrap();
            })
            .unwrap();

        let mirrored = Rc::new(Cell::new(0));
        let seen = mirrored.clone();
        owner.listen(&mirror, move |value| seen.set(*value)).unwrap();

        owner.set(&source, 4).unwrap();
        owner.flush().unwrap();

        assert_eq!(mirrored.get(), 40);
        assert!(!owner.is_flush_pending());
    }

    #[test]
    fn immediate_policy_flushes_after_each_set() {
        let owner = GraphOwner::builder()
            .config(OwnerConfig {
                flush: FlushPolicy::Immediate,
                ..OwnerConfig::default()
            })
            .build()
            .unwrap();
        let count = StateProvider::with_value("count", 0);

        let seen = Rc::new(Cell::new(0));
        let sink = seen.clone();
        owner.listen(&count, move |value| sink.set(*value)).unwrap();

        owner.set(&count, 3).unwrap();
        assert_eq!(seen.get(), 3);
        assert!(!owner.is_flush_pending());
    }

    #[test]
    fn computed_nodes_cannot_be_set() {
        let owner = GraphOwner::new();
        let fixed = Provider::new("fixed", |_| Ok(1));
        let (runtime, scope) = owner.parts();

        let err = runtime
            .set_value(scope, fixed.identity(), Value::new(2))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation(_)));
    }
}
