//! State Providers
//!
//! A state provider holds a mutable value. The initializer produces the
//! first value; after that the value only changes through
//! [`GraphOwner::set`](crate::owner::GraphOwner::set) or
//! [`GraphOwner::modify`](crate::owner::GraphOwner::modify), and every
//! change notifies on the next flush.
//!
//! Dependencies registered by the initializer are plain links: a
//! dependency changing later does not re-run the initializer.

use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;

use super::{ConstantDescriptor, Descriptor, Identity, ProviderKind, Readable, Refresh, Swap, Value};
use crate::error::BoxError;
use crate::owner::{Override, Ref};

type Initializer<T> = dyn Fn(&mut Ref<'_>) -> Result<T, BoxError>;

struct StateDescriptor<T> {
    init: Box<Initializer<T>>,
}

impl<T> Descriptor for StateDescriptor<T>
where
    T: Clone + Debug + 'static,
{
    fn kind(&self) -> ProviderKind {
        ProviderKind::State
    }

    fn create(&self, reference: &mut Ref<'_>) -> Result<Value, BoxError> {
        (self.init)(reference).map(Value::new)
    }

    fn refresh(&self, _reference: &mut Ref<'_>, _previous: &Value) -> Result<Refresh, BoxError> {
        // The new value was stored when it was set.
        Ok(Refresh::Notify)
    }

    fn swapped(&self, _previous: &Value) -> Swap {
        Swap::Keep
    }
}

/// A provider of mutable state.
///
/// # Example
///
/// ```rust,ignore
/// let count = StateProvider::with_value("count", 0);
/// let owner = GraphOwner::new();
///
/// owner.set(&count, 5)?;
/// owner.flush()?;
/// assert_eq!(owner.read(&count)?, 5);
/// ```
pub struct StateProvider<T> {
    identity: Identity,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StateProvider<T>
where
    T: Clone + Debug + 'static,
{
    /// Create a state provider whose first value comes from `init`.
    pub fn new<F>(name: impl Into<Arc<str>>, init: F) -> Self
    where
        F: Fn(&mut Ref<'_>) -> Result<T, BoxError> + 'static,
    {
        let origin: Rc<dyn Descriptor> = Rc::new(StateDescriptor {
            init: Box::new(init),
        });
        Self {
            identity: Identity::new(name, origin),
            _marker: PhantomData,
        }
    }

    /// Create a state provider starting at `value`.
    pub fn with_value(name: impl Into<Arc<str>>, value: T) -> Self {
        Self::new(name, move |_| Ok(value.clone()))
    }

    /// Override this provider with another state initializer.
    pub fn override_with<F>(&self, init: F) -> Override
    where
        F: Fn(&mut Ref<'_>) -> Result<T, BoxError> + 'static,
    {
        Override::new(
            self.identity.clone(),
            Rc::new(StateDescriptor {
                init: Box::new(init),
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

impl<T> Readable<T> for StateProvider<T> {
    fn identity(&self) -> &Identity {
        &self.identity
    }
}

impl<T> Clone for StateProvider<T> {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Debug for StateProvider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateProvider")
            .field("id", &self.identity.id().raw())
            .field("name", &self.identity.name())
            .finish()
    }
}
