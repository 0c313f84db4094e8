//! Constant descriptors back `override_with_value`.

use std::fmt::Debug;

use super::{Descriptor, ProviderKind, Refresh, Swap, Value};
use crate::error::BoxError;
use crate::owner::Ref;

pub(crate) struct ConstantDescriptor<T> {
    value: T,
}

impl<T> ConstantDescriptor<T> {
    pub(crate) fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> Descriptor for ConstantDescriptor<T>
where
    T: Clone + Debug + 'static,
{
    fn kind(&self) -> ProviderKind {
        ProviderKind::Constant
    }

    fn create(&self, _reference: &mut Ref<'_>) -> Result<Value, BoxError> {
        Ok(Value::new(self.value.clone()))
    }

    fn refresh(&self, _reference: &mut Ref<'_>, _previous: &Value) -> Result<Refresh, BoxError> {
        Ok(Refresh::Notify)
    }

    fn swapped(&self, _previous: &Value) -> Swap {
        Swap::Replace(Value::new(self.value.clone()))
    }
}
