#![forbid(unsafe_code)]

//! Error types for the value store.

use thiserror::Error;

/// Message carried by [`StoreError::MissingIdentity`].
///
/// Kept as a constant so callers and tests can match on the exact text.
pub const INDEX_ERROR_MESSAGE: &str =
    "weave-store: an explicit key is required when declaring shared state inside a render scope";

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A state was declared without a key where a stable identity is required.
    #[error("{}", INDEX_ERROR_MESSAGE)]
    MissingIdentity,

    /// The committed value for `key` is not of the requested type.
    #[error("type mismatch for key {key:?}: expected {expected}, found {found}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
}

impl StoreError {
    #[must_use]
    pub(crate) fn mismatch(key: &str, expected: &'static str, found: &'static str) -> Self {
        Self::TypeMismatch {
            key: key.to_string(),
            expected,
            found,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_identity_uses_fixed_message() {
        assert_eq!(StoreError::MissingIdentity.to_string(), INDEX_ERROR_MESSAGE);
    }

    #[test]
    fn mismatch_names_both_types() {
        let err = StoreError::mismatch("counter", "i32", "alloc::string::String");
        let text = err.to_string();
        assert!(text.contains("\"counter\""));
        assert!(text.contains("expected i32"));
        assert!(text.contains("found alloc::string::String"));
    }
}
