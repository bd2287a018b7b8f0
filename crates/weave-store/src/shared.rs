#![forbid(unsafe_code)]

//! Typed handles to individual keys.
//!
//! A [`SharedState<T>`] bundles a store, a key, a default value and an
//! optional loader. Reading through the handle initializes the key on first
//! access, so every consumer of the same key agrees on a single initial value.
//!
//! # Identity
//!
//! Handles declared with [`Store::state`] carry an explicit key.
//! [`Store::anonymous_state`] generates one from a per-store counter instead,
//! which is only stable if the declaration itself runs once. While a
//! [`RenderScope`] is active (the caller is inside a repeatedly-invoked render
//! pass) anonymous declarations are refused with
//! [`StoreError::MissingIdentity`].

use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::error::{Result, StoreError};
use crate::store::{Key, Store, StoreInner};
use crate::subscription::{ListenerId, Subscription};
use crate::value::StateValue;

type Loader<T> = Rc<dyn Fn(&str, T) -> T>;

/// Typed handle to one key of a [`Store`].
///
/// Cloning a `SharedState` creates a new handle to the **same** key.
pub struct SharedState<T> {
    store: Store,
    key: Key,
    default: T,
    loader: Option<Loader<T>>,
}

impl<T: Clone> Clone for SharedState<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            key: Rc::clone(&self.key),
            default: self.default.clone(),
            loader: self.loader.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for SharedState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedState")
            .field("key", &self.key)
            .field("default", &self.default)
            .field("has_loader", &self.loader.is_some())
            .finish()
    }
}

impl<T: StateValue> SharedState<T> {
    pub(crate) fn new(store: Store, key: Key, default: T) -> Self {
        Self {
            store,
            key,
            default,
            loader: None,
        }
    }

    /// Attach a loader consulted the first time the key is initialized.
    #[must_use]
    pub fn with_loader(mut self, loader: impl Fn(&str, T) -> T + 'static) -> Self {
        self.loader = Some(Rc::new(loader));
        self
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn default_value(&self) -> &T {
        &self.default
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Current value, initializing the key from the loader or the default if
    /// it has never been set.
    pub fn get_value(&self) -> Result<T> {
        match &self.loader {
            Some(loader) => {
                let loader = Rc::clone(loader);
                self.store
                    .ensure_with(&self.key, self.default.clone(), move |key, default| {
                        loader(key, default)
                    })
            }
            None => self.store.ensure(&self.key, self.default.clone()),
        }
    }

    /// Commit `value`. Returns the value now stored.
    pub fn set_value(&self, value: T) -> Result<T> {
        self.get_value()?;
        self.store.set(&self.key, value)
    }

    /// Replace the value with `f(&current)`; the key is initialized first so
    /// `f` always sees a value.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<T> {
        let current = self.get_value()?;
        Ok(self.store.update(&self.key, f)?.unwrap_or(current))
    }

    /// Register a wake-up callback for this key.
    pub fn subscribe(&self, wake: impl Fn() + 'static) -> Subscription {
        self.store.subscribe(&self.key, wake)
    }

    /// Register a change listener for this key.
    pub fn on_change(&self, spy: impl Fn(&T, &T, &str) + 'static) -> ListenerId {
        self.store.listen(&self.key, spy)
    }

    pub fn off_change(&self, id: ListenerId) -> bool {
        self.store.unlisten(&self.key, id)
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.store.is_initialized(&self.key)
    }

    /// Forget the committed value. The next read re-initializes it.
    pub fn clear(&self) {
        self.store.clear(&self.key);
    }
}

/// Guard marking the current code as part of a render pass.
///
/// Scopes nest; anonymous declarations are refused until every scope on the
/// store has been dropped.
#[must_use = "the scope ends when the guard is dropped"]
pub struct RenderScope {
    store: Weak<StoreInner>,
}

impl Drop for RenderScope {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            let mut state = inner.state.borrow_mut();
            state.render_depth = state.render_depth.saturating_sub(1);
        }
    }
}

impl fmt::Debug for RenderScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderScope").finish_non_exhaustive()
    }
}

impl Store {
    /// Declare a typed handle for `key`. Nothing is committed until the
    /// handle is first read.
    pub fn state<T: StateValue>(&self, key: impl Into<Key>, default: T) -> SharedState<T> {
        SharedState::new(self.clone(), key.into(), default)
    }

    /// Declare a handle under a generated key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingIdentity`] inside a [`RenderScope`], where
    /// a generated key would change on every pass.
    pub fn anonymous_state<T: StateValue>(&self, default: T) -> Result<SharedState<T>> {
        let key = self.next_anonymous_key()?;
        debug!(store = %self.config().label, key = %key, "anonymous state declared");
        Ok(SharedState::new(self.clone(), key, default))
    }

    /// Enter a render pass. See [`RenderScope`].
    pub fn render_scope(&self) -> RenderScope {
        self.inner().state.borrow_mut().render_depth += 1;
        RenderScope {
            store: Rc::downgrade(self.inner()),
        }
    }

    #[must_use]
    pub fn in_render_scope(&self) -> bool {
        self.inner().state.borrow().render_depth > 0
    }

    fn next_anonymous_key(&self) -> Result<Key> {
        let mut state = self.inner().state.borrow_mut();
        if state.render_depth > 0 {
            return Err(StoreError::MissingIdentity);
        }
        state.anonymous_seq += 1;
        Ok(Key::from(format!(
            "{}{}",
            self.config().anonymous_prefix,
            state.anonymous_seq
        )))
    }
}
