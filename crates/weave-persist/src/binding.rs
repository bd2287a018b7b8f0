#![forbid(unsafe_code)]

//! Wiring a codec and a backend into a store key.
//!
//! [`Persistence`] is the `load`/`save` hook pair. [`PersistedState`] attaches
//! it to a [`SharedState`]: `load` becomes the handle's loader, consulted the
//! first time the key is initialized, and `save` is registered as an ordinary
//! change listener, so it runs once per committed change in the same pipeline
//! pass as every other listener.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::rc::Rc;
use std::str::FromStr;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use weave_store::{Key, ListenerId, SharedState, StateValue, Store};

use crate::backend::Backend;
use crate::codec::{BoolCodec, Codec, JsonCodec, NumberCodec, StringCodec};
use crate::error::PersistError;

/// `load`/`save` for values of `T` through codec `C`.
pub struct Persistence<T, C> {
    codec: C,
    backend: Rc<dyn Backend>,
    _value: PhantomData<fn() -> T>,
}

impl<T, C: fmt::Debug> fmt::Debug for Persistence<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persistence")
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

impl<T, C: Codec<T>> Persistence<T, C> {
    pub fn new(codec: C, backend: Rc<dyn Backend>) -> Self {
        Self {
            codec,
            backend,
            _value: PhantomData,
        }
    }

    #[must_use]
    pub fn backend(&self) -> &Rc<dyn Backend> {
        &self.backend
    }

    #[must_use]
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Stored value for `key`, `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Backend read failures and undecodable data.
    pub fn try_load(&self, key: &str) -> Result<Option<T>, PersistError> {
        let raw = self
            .backend
            .get_item(key)
            .map_err(|source| PersistError::Backend {
                key: key.to_owned(),
                source,
            })?;
        raw.map(|raw| {
            self.codec
                .decode(&raw)
                .map_err(|source| PersistError::Codec {
                    key: key.to_owned(),
                    source,
                })
        })
        .transpose()
    }

    /// Encode and write `value` under `key`.
    ///
    /// # Errors
    ///
    /// Encoding failures and backend write failures.
    pub fn try_save(&self, key: &str, value: &T) -> Result<(), PersistError> {
        let raw = self
            .codec
            .encode(value)
            .map_err(|source| PersistError::Codec {
                key: key.to_owned(),
                source,
            })?;
        self.backend
            .set_item(key, &raw)
            .map_err(|source| PersistError::Backend {
                key: key.to_owned(),
                source,
            })
    }

    /// Stored value for `key`, or `fallback`.
    ///
    /// An absent key (or an unreadable backend) gets `fallback` written back.
    /// Corrupt data is left in place and `fallback` is returned. Never fails.
    pub fn load(&self, key: &str, fallback: T) -> T {
        match self.try_load(key) {
            Ok(Some(value)) => {
                debug!(key, "persisted value loaded");
                value
            }
            Ok(None) => {
                debug!(key, "no persisted value; writing fallback");
                self.save(key, &fallback);
                fallback
            }
            Err(err) if err.is_corrupt() => {
                warn!(key, error = %err, "corrupt persisted value; using fallback");
                fallback
            }
            Err(err) => {
                warn!(key, error = %err, "persisted value unreadable; using fallback");
                self.save(key, &fallback);
                fallback
            }
        }
    }

    /// Write `value` under `key`. Failures are logged, never raised.
    pub fn save(&self, key: &str, value: &T) {
        if let Err(err) = self.try_save(key, value) {
            warn!(key, error = %err, "failed to persist value");
        }
    }
}

/// A [`SharedState`] backed by a [`Backend`].
///
/// Dereferences to the underlying handle. The save listener stays registered
/// on the store after this value is dropped; call [`detach`](Self::detach) to
/// stop persisting.
pub struct PersistedState<T> {
    state: SharedState<T>,
    save_listener: ListenerId,
}

impl<T: fmt::Debug> fmt::Debug for PersistedState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedState")
            .field("state", &self.state)
            .field("save_listener", &self.save_listener)
            .finish()
    }
}

impl<T> Deref for PersistedState<T> {
    type Target = SharedState<T>;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl<T: StateValue> PersistedState<T> {
    /// Back `key` on `store` with `codec` over `backend`.
    ///
    /// If the key is already initialized its current value is written
    /// immediately.
    pub fn new<C>(
        store: &Store,
        key: impl Into<Key>,
        default: T,
        codec: C,
        backend: Rc<dyn Backend>,
    ) -> Self
    where
        C: Codec<T> + 'static,
    {
        let persistence = Rc::new(Persistence::new(codec, backend));
        let loader = Rc::clone(&persistence);
        let state = store
            .state(key, default)
            .with_loader(move |key, fallback| loader.load(key, fallback));
        let save_listener =
            state.on_change(move |value: &T, _: &T, key: &str| persistence.save(key, value));
        debug!(store = %store.config().label, key = state.key(), "persistence attached");
        Self {
            state,
            save_listener,
        }
    }

    #[must_use]
    pub fn state(&self) -> &SharedState<T> {
        &self.state
    }

    #[must_use]
    pub fn save_listener(&self) -> ListenerId {
        self.save_listener
    }

    /// Stop persisting and return the plain handle.
    pub fn detach(self) -> SharedState<T> {
        self.state.off_change(self.save_listener);
        self.state
    }
}

impl PersistedState<String> {
    pub fn string(
        store: &Store,
        key: impl Into<Key>,
        default: impl Into<String>,
        backend: Rc<dyn Backend>,
    ) -> Self {
        Self::new(store, key, default.into(), StringCodec, backend)
    }
}

impl PersistedState<bool> {
    pub fn boolean(store: &Store, key: impl Into<Key>, default: bool, backend: Rc<dyn Backend>) -> Self {
        Self::new(store, key, default, BoolCodec, backend)
    }
}

impl<N> PersistedState<N>
where
    N: StateValue + FromStr + fmt::Display,
    N::Err: fmt::Display,
{
    pub fn number(store: &Store, key: impl Into<Key>, default: N, backend: Rc<dyn Backend>) -> Self {
        Self::new(store, key, default, NumberCodec::new(), backend)
    }
}

impl<T> PersistedState<T>
where
    T: StateValue + Serialize + DeserializeOwned,
{
    pub fn json(store: &Store, key: impl Into<Key>, default: T, backend: Rc<dyn Backend>) -> Self {
        Self::new(store, key, default, JsonCodec::new(), backend)
    }
}
