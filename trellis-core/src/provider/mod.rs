//! Providers
//!
//! A provider is the stable key for one lazily-computed piece of state. It
//! never holds state itself: each [`GraphOwner`](crate::owner::GraphOwner)
//! materializes its own node for it on first read.
//!
//! # Kinds
//!
//! The engine knows a closed set of node kinds, tagged by [`ProviderKind`]:
//!
//! - [`StateProvider`]: a mutable value created by an initializer.
//! - [`Provider`]: a derived value, recomputed when a dependency notifies.
//! - Constant: a fixed value, only available as an override replacement
//!   (`override_with_value`).
//!
//! Each kind supplies its behaviour through the crate-private
//! [`Descriptor`] trait. Overrides swap the descriptor a node runs with but
//! never its identity.

mod computed;
mod constant;
mod state;

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::BoxError;
use crate::owner::Ref;

pub use computed::Provider;
pub use state::StateProvider;

pub(crate) use constant::ConstantDescriptor;

/// Unique identifier for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId(u64);

impl ProviderId {
    /// Generate a new unique provider ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ProviderId {
    fn default() -> Self {
        Self::new()
    }
}

/// The kind of node a descriptor produces.
///
/// Overrides are validated against this tag: an update may change what a
/// replacement computes, never which kind of replacement it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Mutable value, changed through the owner.
    State,
    /// Derived value, recomputed when a dependency notifies.
    Computed,
    /// Fixed value supplied by an override.
    Constant,
}

impl ProviderKind {
    /// Whether nodes of this kind re-run their initializer when a
    /// dependency changes.
    pub fn recomputes(self) -> bool {
        matches!(self, Self::Computed)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State => f.write_str("state"),
            Self::Computed => f.write_str("computed"),
            Self::Constant => f.write_str("constant"),
        }
    }
}

/// The immutable descriptor behind a provider: its ID, its name and the
/// descriptor it was declared with.
///
/// Equality and hashing only look at the ID.
#[derive(Clone)]
pub struct Identity {
    id: ProviderId,
    name: Arc<str>,
    origin: Rc<dyn Descriptor>,
}

impl Identity {
    pub(crate) fn new(name: impl Into<Arc<str>>, origin: Rc<dyn Descriptor>) -> Self {
        Self {
            id: ProviderId::new(),
            name: name.into(),
            origin,
        }
    }

    /// The provider's ID.
    pub fn id(&self) -> ProviderId {
        self.id
    }

    /// The provider's name, used in errors, logs and snapshots.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The kind of the descriptor the provider was declared with.
    pub fn kind(&self) -> ProviderKind {
        self.origin.kind()
    }

    pub(crate) fn shared_name(&self) -> &Arc<str> {
        &self.name
    }

    pub(crate) fn origin(&self) -> &Rc<dyn Descriptor> {
        &self.origin
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id.raw())
            .field("name", &self.name)
            .field("kind", &self.kind())
            .finish()
    }
}

/// Anything an owner can read a typed value from.
pub trait Readable<T> {
    /// The identity of the provider.
    fn identity(&self) -> &Identity;
}

/// Object-safe view of a stored value.
pub trait AnyValue: Any + fmt::Debug {
    /// Upcast for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + fmt::Debug> AnyValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A type-erased node value.
///
/// Cloning is cheap: the value itself is shared.
#[derive(Clone)]
pub struct Value(Rc<dyn AnyValue>);

impl Value {
    pub(crate) fn new<T: Any + fmt::Debug>(value: T) -> Self {
        Self(Rc::new(value))
    }

    /// Borrow the value as `T`, if that is its type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.0).as_any().downcast_ref::<T>()
    }

    /// Whether both handles share the same allocation.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

/// What a dirty node decided to do when the flush reached it.
pub(crate) enum Refresh {
    /// Nothing observable changed; do not fan out.
    Unchanged,
    /// The stored value changed already; fan it out.
    Notify,
    /// Store this value, then fan it out.
    Replace(Value),
}

/// What a node does when an override update hands it a new descriptor.
pub(crate) enum Swap {
    /// Keep the current value.
    Keep,
    /// Recompute on the next flush.
    Recompute,
    /// Store this value and notify on the next flush.
    Replace(Value),
}

/// Kind-specific behaviour of a node.
pub(crate) trait Descriptor {
    /// The kind tag, compared when overrides are updated.
    fn kind(&self) -> ProviderKind;

    /// Produce the initial value. Runs at most once per node and owner.
    fn create(&self, reference: &mut Ref<'_>) -> Result<Value, BoxError>;

    /// Called by the flush for a dirty node.
    fn refresh(&self, reference: &mut Ref<'_>, previous: &Value) -> Result<Refresh, BoxError>;

    /// Called on the replacement descriptor when an override update swaps
    /// it onto an existing node.
    fn swapped(&self, previous: &Value) -> Swap;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_ids_are_unique() {
        let id1 = ProviderId::new();
        let id2 = ProviderId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn value_downcasts_to_its_own_type() {
        let value = Value::new(42_i32);
        assert_eq!(value.downcast_ref::<i32>(), Some(&42));
        assert!(value.downcast_ref::<String>().is_none());
        assert_eq!(format!("{value:?}"), "42");
    }

    #[test]
    fn identities_compare_by_id() {
        let a = StateProvider::with_value("a", 1);
        let b = StateProvider::with_value("a", 1);

        assert_eq!(a.identity(), a.clone().identity());
        assert_ne!(a.identity(), b.identity());
        assert_eq!(a.identity().kind(), ProviderKind::State);
    }

    #[test]
    fn only_computed_kinds_recompute() {
        assert!(ProviderKind::Computed.recomputes());
        assert!(!ProviderKind::State.recomputes());
        assert!(!ProviderKind::Constant.recomputes());
    }
}
