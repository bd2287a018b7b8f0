#![forbid(unsafe_code)]

//! Observer handles.
//!
//! Two observer classes hang off every key and they have independent
//! lifecycles:
//!
//! - **Subscribers** get a payload-free wake-up and re-read the store. They are
//!   owned through a [`Subscription`] guard that detaches on drop.
//! - **Listeners** get `(new, old, key)` on every committed change. They are
//!   addressed by [`ListenerId`] and live until explicitly removed.

use std::fmt;

/// RAII guard for a wake-up callback.
///
/// Dropping the guard (or calling [`unsubscribe`](Self::unsubscribe)) removes
/// the callback before the next notification cycle. Releasing a subscription
/// whose target is already gone is a no-op.
#[must_use = "dropping a Subscription detaches the callback immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub(crate) fn new(release: impl FnOnce() + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A subscription that owns nothing.
    pub fn detached() -> Self {
        Self { release: None }
    }

    /// Detach now. Equivalent to dropping the guard.
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    /// Whether this guard still holds a registration.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Identifier of a registered change listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

impl ListenerId {
    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}
