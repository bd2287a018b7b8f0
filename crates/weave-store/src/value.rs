#![forbid(unsafe_code)]

//! Type-erased values held by the store.
//!
//! Every key maps to one committed value of some concrete type. The store
//! keeps it behind [`ErasedValue`] so unrelated keys can hold unrelated types;
//! typed accessors downcast on the way out.

use std::any::Any;
use std::fmt;

/// Values that can be committed to the store.
///
/// Blanket-implemented for every `'static` type that is `Clone`, `PartialEq`
/// and `Debug`. `PartialEq` gates notification: an update whose result equals
/// the current value is dropped.
pub trait StateValue: Any + Clone + PartialEq + fmt::Debug {}

impl<T: Any + Clone + PartialEq + fmt::Debug> StateValue for T {}

/// Object-safe view of a committed value.
pub trait ErasedValue: Any + fmt::Debug + 'static {
    fn as_any(&self) -> &dyn Any;

    /// Equality against another erased value. Values of different types are
    /// never equal.
    fn dyn_eq(&self, other: &dyn ErasedValue) -> bool;

    fn type_name(&self) -> &'static str;
}

impl<T: StateValue> ErasedValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn ErasedValue) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

impl dyn ErasedValue {
    /// Borrow the value as `T`, if that is its concrete type.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// Whether a key has ever been committed.
///
/// This is tracked independently of the value itself: `0`, `false` and `""`
/// are legitimate initialized values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryState {
    #[default]
    Uninitialized,
    Initialized,
}

impl EntryState {
    #[must_use]
    pub const fn is_initialized(self) -> bool {
        matches!(self, Self::Initialized)
    }
}
