//! Computed Providers
//!
//! A computed provider derives its value from other providers. It is a
//! lazy memo bound to one owner:
//!
//! 1. On first read, the computation runs and the value is cached.
//!
//! 2. When a dependency notifies, the node is marked dirty.
//!
//! 3. When the flush reaches the node, the computation re-runs and the
//!    dependencies it reads are collected again.
//!
//! 4. Dependents and listeners are only notified when the new value differs
//!    from the cached one.

use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;

use super::{ConstantDescriptor, Descriptor, Identity, ProviderKind, Readable, Refresh, Swap, Value};
use crate::error::BoxError;
use crate::owner::{Override, Ref};

type Computation<T> = dyn Fn(&mut Ref<'_>) -> Result<T, BoxError>;

struct ComputedDescriptor<T> {
    compute: Box<Computation<T>>,
}

impl<T> Descriptor for ComputedDescriptor<T>
where
    T: Clone + Debug + PartialEq + 'static,
{
    fn kind(&self) -> ProviderKind {
        ProviderKind::Computed
    }

    fn create(&self, reference: &mut Ref<'_>) -> Result<Value, BoxError> {
        (self.compute)(reference).map(Value::new)
    }

    fn refresh(&self, reference: &mut Ref<'_>, previous: &Value) -> Result<Refresh, BoxError> {
        let next = (self.compute)(reference)?;
        if previous.downcast_ref::<T>() == Some(&next) {
            Ok(Refresh::Unchanged)
        } else {
            Ok(Refresh::Replace(Value::new(next)))
        }
    }

    fn swapped(&self, _previous: &Value) -> Swap {
        Swap::Recompute
    }
}

/// A derived provider.
///
/// The `PartialEq` bound is what lets a recomputation that lands on the
/// same value stop the notification from spreading further.
///
/// # Example
///
/// ```rust,ignore
/// let count = StateProvider::with_value("count", 1);
/// let doubled = Provider::new("doubled", {
///     let count = count.clone();
///     move |r| Ok(r.watch(&count)? * 2)
/// });
/// ```
pub struct Provider<T> {
    identity: Identity,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Provider<T>
where
    T: Clone + Debug + PartialEq + 'static,
{
    /// Create a computed provider.
    pub fn new<F>(name: impl Into<Arc<str>>, compute: F) -> Self
    where
        F: Fn(&mut Ref<'_>) -> Result<T, BoxError> + 'static,
    {
        let origin: Rc<dyn Descriptor> = Rc::new(ComputedDescriptor {
            compute: Box::new(compute),
        });
        Self {
            identity: Identity::new(name, origin),
            _marker: PhantomData,
        }
    }

    /// Override this provider with another computation.
    pub fn override_with<F>(&self, compute: F) -> Override
    where
        F: Fn(&mut Ref<'_>) -> Result<T, BoxError> + 'static,
    {
        Override::new(
            self.identity.clone(),
            Rc::new(ComputedDescriptor {
                compute: Box::new(compute),
            }),
        )
    }

    /// Override this provider with a fixed value.
    pub fn override_with_value(&self, value: T) -> Override {
        Override::new(self.identity.clone(), Rc::new(ConstantDescriptor::new(value)))
    }

    /// The provider's identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

impl<T> Readable<T> for Provider<T> {
    fn identity(&self) -> &Identity {
        &self.identity
    }
}

impl<T> Clone for Provider<T> {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Debug for Provider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.identity.id().raw())
            .field("name", &self.identity.name())
            .finish()
    }
}
