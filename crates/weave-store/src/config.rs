#![forbid(unsafe_code)]

//! Store configuration.

/// Default prefix for generated anonymous keys.
pub const DEFAULT_ANONYMOUS_PREFIX: &str = "anon-";

/// Configuration for a [`Store`](crate::Store).
///
/// # Example
///
/// ```
/// use weave_store::{Store, StoreConfig};
///
/// let store = Store::with_config(StoreConfig::default().with_label("settings"));
/// assert_eq!(store.config().label, "settings");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Name attached to every log event emitted by the store.
    pub label: String,
    /// Prefix used when generating keys for anonymous shared state.
    pub anonymous_prefix: String,
}

impl StoreConfig {
    /// Set the label used in log events.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the prefix for generated anonymous keys.
    #[must_use]
    pub fn with_anonymous_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.anonymous_prefix = prefix.into();
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            label: "store".to_string(),
            anonymous_prefix: DEFAULT_ANONYMOUS_PREFIX.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = StoreConfig::default()
            .with_label("prefs")
            .with_anonymous_prefix("tmp/");
        assert_eq!(config.label, "prefs");
        assert_eq!(config.anonymous_prefix, "tmp/");
    }

    #[test]
    fn default_prefix() {
        assert_eq!(StoreConfig::default().anonymous_prefix, "anon-");
    }
}
