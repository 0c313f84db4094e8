//! Overrides
//!
//! An override replaces the descriptor a provider is materialized with,
//! for one owner and the descendants that inherit from it. The provider's
//! identity is unchanged, so every reader still refers to it the same way.
//!
//! An owner's override list has a fixed shape: `update` may swap what an
//! override computes, but not which providers are overridden, in which
//! order, or with which kind of node.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::runtime::{Runtime, ScopeId};
use crate::error::{Error, Result};
use crate::graph::node::NodeStatus;
use crate::graph::NodeKey;
use crate::provider::{Descriptor, Identity, ProviderId, ProviderKind, Swap, Value};

/// A replacement descriptor for one provider.
#[derive(Clone)]
pub struct Override {
    origin: Identity,
    replacement: Rc<dyn Descriptor>,
}

impl Override {
    pub(crate) fn new(origin: Identity, replacement: Rc<dyn Descriptor>) -> Self {
        Self { origin, replacement }
    }

    /// The provider being overridden.
    pub fn origin(&self) -> &Identity {
        &self.origin
    }

    /// Kind of node the override materializes.
    pub fn kind(&self) -> ProviderKind {
        self.replacement.kind()
    }
}

impl fmt::Debug for Override {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Override")
            .field("provider", &self.origin.name())
            .field("kind", &self.kind())
            .finish()
    }
}

/// The overrides installed on one owner, in declaration order.
#[derive(Default)]
pub(crate) struct OverrideTable {
    entries: IndexMap<ProviderId, Override>,
}

impl OverrideTable {
    pub(crate) fn new(overrides: Vec<Override>) -> Result<Self> {
        let mut entries = IndexMap::with_capacity(overrides.len());
        for o in overrides {
            let name = o.origin.name().to_string();
            if entries.insert(o.origin.id(), o).is_some() {
                return Err(Error::unsupported(format!(
                    "provider `{name}` is overridden twice on the same owner"
                )));
            }
        }
        Ok(Self { entries })
    }

    pub(crate) fn contains(&self, id: ProviderId) -> bool {
        self.entries.contains_key(&id)
    }

    pub(crate) fn descriptor(&self, id: ProviderId) -> Option<Rc<dyn Descriptor>> {
        self.entries.get(&id).map(|o| o.replacement.clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check that `next` has the same shape as the installed list.
    pub(crate) fn validate(&self, next: &[Override]) -> Result<()> {
        if next.len() != self.entries.len() {
            return Err(Error::unsupported(format!(
                "override list changed length from {} to {}",
                self.entries.len(),
                next.len()
            )));
        }

        for (index, (current, next)) in self.entries.values().zip(next).enumerate() {
            if current.origin != next.origin {
                return Err(Error::unsupported(format!(
                    "override #{index} changed provider from `{}` to `{}`",
                    current.origin.name(),
                    next.origin.name()
                )));
            }
            if current.kind() != next.kind() {
                return Err(Error::unsupported(format!(
                    "override #{index} for `{}` changed kind from {} to {}",
                    current.origin.name(),
                    current.kind(),
                    next.kind()
                )));
            }
        }
        Ok(())
    }

    /// Install an already validated list. Keys and order are unchanged.
    fn replace(&mut self, next: Vec<Override>) {
        for o in next {
            self.entries.insert(o.origin.id(), o);
        }
    }
}

impl Runtime {
    /// Swap the overrides of `scope` and reconcile the nodes it already
    /// materialized with them.
    pub(crate) fn update_overrides(&self, scope: ScopeId, next: Vec<Override>) -> Result<()> {
        let swaps: Vec<(NodeKey, Rc<dyn Descriptor>, Value)> = {
            let mut state = self.state_mut();
            state.ensure_live(scope)?;
            state.scope(scope).overrides.validate(&next)?;

            let mut swaps = Vec::new();
            for o in &next {
                let Some(&key) = state.scope(scope).readers.get(&o.origin.id()) else {
                    continue;
                };
                let Some(node) = state.nodes.get_mut(key) else {
                    continue;
                };
                node.descriptor = o.replacement.clone();
                if let Some(previous) = node.value().cloned() {
                    swaps.push((key, o.replacement.clone(), previous));
                }
            }
            state.scope_mut(scope).overrides.replace(next);
            swaps
        };

        tracing::debug!(swapped = swaps.len(), "overrides updated");

        for (key, replacement, previous) in swaps {
            match replacement.swapped(&previous) {
                Swap::Keep => {}
                Swap::Recompute => self.mark_dirty(key)?,
                Swap::Replace(value) => {
                    if let Some(node) = self.state_mut().nodes.get_mut(key) {
                        node.status = NodeStatus::Ready(value);
                    }
                    self.mark_dirty(key)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Provider, StateProvider};

    #[test]
    fn duplicate_overrides_are_rejected() {
        let count = StateProvider::with_value("count", 0);
        let result = OverrideTable::new(vec![
            count.override_with_value(1),
            count.override_with_value(2),
        ]);
        assert!(matches!(result, Err(Error::UnsupportedOperation(_))));
    }

    #[test]
    fn validation_accepts_same_shape() {
        let count = StateProvider::with_value("count", 0);
        let label = Provider::new("label", |_| Ok(String::new()));
        let table = OverrideTable::new(vec![
            count.override_with_value(1),
            label.override_with(|_| Ok("a".to_string())),
        ])
        .unwrap();

        let next = vec![
            count.override_with_value(2),
            label.override_with(|_| Ok("b".to_string())),
        ];
        assert!(table.validate(&next).is_ok());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn validation_rejects_reordering_and_kind_changes() {
        let count = StateProvider::with_value("count", 0);
        let other = StateProvider::with_value("other", 0);
        let table = OverrideTable::new(vec![
            count.override_with_value(1),
            other.override_with_value(1),
        ])
        .unwrap();

        let reordered = vec![other.override_with_value(1), count.override_with_value(1)];
        assert!(matches!(
            table.validate(&reordered),
            Err(Error::UnsupportedOperation(_))
        ));

        let rekinded = vec![count.override_with(|_| Ok(1)), other.override_with_value(1)];
        let err = table.validate(&rekinded).unwrap_err();
        assert!(err.to_string().contains("changed kind from constant to state"));

        assert!(table.validate(&[]).is_err());
    }
}
