#![forbid(unsafe_code)]

//! The keyed value store and its update pipeline.
//!
//! # Design
//!
//! [`Store`] is a cheaply cloneable handle to shared, single-threaded state:
//!
//! - an ordered map from key to committed value (presence in the map is the
//!   "initialized" marker),
//! - per-key subscriber lists (payload-free wake-ups),
//! - per-key and global listener lists (`(new, old, key)` callbacks).
//!
//! Every mutation of a committed value goes through [`Store::set`],
//! [`Store::update`] or [`Store::apply`]. Each call resolves the new value
//! once, compares it with the current one and, only on a real change, commits
//! it and then fans out: subscribers first, then key listeners, then global
//! listeners, each in registration order.
//!
//! # Invariants
//!
//! 1. At most one committed value exists per key.
//! 2. A value equal (`PartialEq`) to the current one is never committed and
//!    never notifies anyone.
//! 3. The new value is committed before the first callback runs, so callbacks
//!    that re-read the store observe it.
//! 4. No internal borrow is held while a callback runs. Callbacks may read,
//!    write, subscribe or listen re-entrantly.
//! 5. Registries and values are independent: clearing values keeps observers,
//!    clearing observers keeps values.
//!
//! # Failure Modes
//!
//! - **Missing key**: not an error. Reads return `None`, functional updates
//!   are skipped, detaching something never attached is a no-op.
//! - **Type mismatch**: reading or updating a key as a type other than the
//!   committed one returns [`StoreError::TypeMismatch`] and leaves the value
//!   untouched.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::subscription::{ListenerId, Subscription};
use crate::value::{EntryState, ErasedValue, StateValue};

/// Identity of a stored value.
pub type Key = Rc<str>;

pub(crate) type SharedValue = Rc<dyn ErasedValue>;
pub(crate) type WakeFn = Rc<dyn Fn()>;
pub(crate) type SpyFn = Rc<dyn Fn(&dyn ErasedValue, &dyn ErasedValue, &str)>;

thread_local! {
    static GLOBAL: Store = Store::with_config(StoreConfig::default().with_label("global"));
}

/// The process-wide store for the current thread.
///
/// Every call returns a handle to the same instance. Use
/// [`Store::teardown`] to reset it between tests.
#[must_use]
pub fn global() -> Store {
    GLOBAL.with(Store::clone)
}

/// A requested change to a key.
pub enum Update<T> {
    /// Replace the value.
    Value(T),
    /// Derive the new value from the current one. Invoked at most once.
    With(Box<dyn FnOnce(&T) -> T>),
}

impl<T> Update<T> {
    /// Build a functional update.
    pub fn with(f: impl FnOnce(&T) -> T + 'static) -> Self {
        Self::With(Box::new(f))
    }
}

impl<T> From<T> for Update<T> {
    fn from(value: T) -> Self {
        Self::Value(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for Update<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::With(_) => f.write_str("With(..)"),
        }
    }
}

pub(crate) struct StoreState {
    entries: IndexMap<Key, SharedValue, ahash::RandomState>,
    subscribers: AHashMap<Key, Vec<(u64, WakeFn)>>,
    listeners: AHashMap<Key, Vec<(ListenerId, SpyFn)>>,
    global_listeners: Vec<(ListenerId, SpyFn)>,
    next_id: u64,
    /// Bumped on every change to `entries`.
    revision: u64,
    /// Bumped by `teardown`, which drops every registration.
    epoch: u64,
    pub(crate) anonymous_seq: u64,
    pub(crate) render_depth: usize,
}

impl StoreState {
    fn new() -> Self {
        Self {
            entries: IndexMap::default(),
            subscribers: AHashMap::new(),
            listeners: AHashMap::new(),
            global_listeners: Vec::new(),
            next_id: 1,
            revision: 0,
            epoch: 0,
            anonymous_seq: 0,
            render_depth: 0,
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn wakers(&self, key: &str) -> Vec<WakeFn> {
        self.subscribers
            .get(key)
            .map(|subs| subs.iter().map(|(_, wake)| Rc::clone(wake)).collect())
            .unwrap_or_default()
    }

    /// Key listeners followed by global listeners.
    fn spies(&self, key: &str) -> Vec<SpyFn> {
        self.listeners
            .get(key)
            .into_iter()
            .flatten()
            .chain(self.global_listeners.iter())
            .map(|(_, spy)| Rc::clone(spy))
            .collect()
    }
}

pub(crate) struct StoreInner {
    pub(crate) config: StoreConfig,
    pub(crate) state: RefCell<StoreState>,
}

impl StoreInner {
    fn remove_subscriber(&self, key: &str, id: u64) {
        let removed = {
            let mut state = self.state.borrow_mut();
            let Some(subs) = state.subscribers.get_mut(key) else {
                return;
            };
            let removed = subs
                .iter()
                .position(|(sub_id, _)| *sub_id == id)
                .map(|index| subs.remove(index));
            if subs.is_empty() {
                state.subscribers.remove(key);
            }
            removed
        };
        if removed.is_some() {
            trace!(store = %self.config.label, key, "subscriber detached");
        }
        // Callbacks are dropped outside the borrow; they may own guards.
        drop(removed);
    }
}

/// Handle to a keyed reactive value store.
///
/// Cloning a `Store` creates a new handle to the **same** state.
///
/// # Example
///
/// ```
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use weave_store::Store;
///
/// let store = Store::new();
/// let seen = Rc::new(RefCell::new(Vec::new()));
/// let log = Rc::clone(&seen);
/// store.listen("counter", move |new: &i32, old: &i32, _key: &str| {
///     log.borrow_mut().push((*new, *old));
/// });
///
/// store.ensure("counter", 0).unwrap();
/// store.update("counter", |n: &i32| n + 1).unwrap();
///
/// assert_eq!(store.get::<i32>("counter").unwrap(), Some(1));
/// assert_eq!(*seen.borrow(), vec![(0, 0), (1, 0)]);
/// ```
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Store")
            .field("label", &self.inner.config.label)
            .field("entries", &state.entries.len())
            .field("subscribed_keys", &state.subscribers.len())
            .field("listened_keys", &state.listeners.len())
            .field("global_listeners", &state.global_listeners.len())
            .finish()
    }
}

impl Store {
    /// Create an empty store with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    #[must_use]
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                config,
                state: RefCell::new(StoreState::new()),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Whether both handles point at the same store.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn inner(&self) -> &Rc<StoreInner> {
        &self.inner
    }

    // ---------------------------------------------------------------------
    // Value store
    // ---------------------------------------------------------------------

    /// Read the committed value for `key`.
    ///
    /// Returns `Ok(None)` if the key has never been initialized (or was
    /// cleared).
    pub fn get<T: StateValue>(&self, key: &str) -> Result<Option<T>> {
        self.get_erased(key)
            .map(|value| downcast::<T>(key, value.as_ref()).cloned())
            .transpose()
    }

    /// Read the committed value without knowing its type.
    #[must_use]
    pub fn get_erased(&self, key: &str) -> Option<Rc<dyn ErasedValue>> {
        self.inner.state.borrow().entries.get(key).cloned()
    }

    #[must_use]
    pub fn is_initialized(&self, key: &str) -> bool {
        self.inner.state.borrow().entries.contains_key(key)
    }

    #[must_use]
    pub fn entry_state(&self, key: &str) -> EntryState {
        if self.is_initialized(key) {
            EntryState::Initialized
        } else {
            EntryState::Uninitialized
        }
    }

    /// Initialized keys in first-initialization order.
    #[must_use]
    pub fn keys(&self) -> Vec<Key> {
        self.inner.state.borrow().entries.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.borrow().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state.borrow().entries.is_empty()
    }

    /// Return the committed value, initializing the key with `default` first
    /// if needed.
    pub fn ensure<T: StateValue>(&self, key: &str, default: T) -> Result<T> {
        self.ensure_with(key, default, |_, default| default)
    }

    /// Like [`ensure`](Self::ensure), but the initial value comes from
    /// `loader(key, default)`.
    ///
    /// The loader runs only when the key is uninitialized. After the initial
    /// value is committed every listener on the key (and every global
    /// listener) is replayed with `(initial, initial, key)`. Subscribers are
    /// not woken.
    pub fn ensure_with<T: StateValue>(
        &self,
        key: &str,
        default: T,
        loader: impl FnOnce(&str, T) -> T,
    ) -> Result<T> {
        if let Some(current) = self.get::<T>(key)? {
            return Ok(current);
        }
        let initial = loader(key, default);
        // The loader may have initialized the key through re-entry.
        if let Some(current) = self.get::<T>(key)? {
            return Ok(current);
        }

        let committed: SharedValue = Rc::new(initial.clone());
        let spies = {
            let mut state = self.inner.state.borrow_mut();
            state
                .entries
                .insert(Key::from(key), Rc::clone(&committed));
            state.revision += 1;
            state.spies(key)
        };
        debug!(
            store = %self.inner.config.label,
            key,
            listeners = spies.len(),
            "entry initialized"
        );
        for spy in &spies {
            spy(committed.as_ref(), committed.as_ref(), key);
        }
        Ok(initial)
    }

    /// Forget the committed value for `key`. Observers stay registered.
    pub fn clear(&self, key: &str) {
        let removed = {
            let mut state = self.inner.state.borrow_mut();
            let removed = state.entries.shift_remove(key);
            if removed.is_some() {
                state.revision += 1;
            }
            removed
        };
        if removed.is_some() {
            debug!(store = %self.inner.config.label, key, "entry cleared");
        }
        drop(removed);
    }

    /// Forget every committed value. Observers stay registered.
    pub fn clear_all(&self) {
        let removed = {
            let mut state = self.inner.state.borrow_mut();
            state.revision += 1;
            std::mem::take(&mut state.entries)
        };
        debug!(
            store = %self.inner.config.label,
            count = removed.len(),
            "all entries cleared"
        );
        drop(removed);
    }

    /// Reset values and every observer registration.
    pub fn teardown(&self) {
        let (entries, subscribers, listeners, global_listeners) = {
            let mut state = self.inner.state.borrow_mut();
            state.revision += 1;
            state.epoch += 1;
            (
                std::mem::take(&mut state.entries),
                std::mem::take(&mut state.subscribers),
                std::mem::take(&mut state.listeners),
                std::mem::take(&mut state.global_listeners),
            )
        };
        debug!(store = %self.inner.config.label, "store torn down");
        drop((entries, subscribers, listeners, global_listeners));
    }

    // ---------------------------------------------------------------------
    // Update pipeline
    // ---------------------------------------------------------------------

    /// Commit `value` under `key` and return the value now stored.
    ///
    /// If `value` equals the current value nothing is committed or notified
    /// and the current value is returned. Setting an uninitialized key
    /// initializes it; its listeners then see `(value, value, key)`.
    pub fn set<T: StateValue>(&self, key: &str, value: T) -> Result<T> {
        match self.get_erased(key) {
            Some(current) => self.transition(key, current, move |_| value),
            None => {
                self.commit(key, value.clone(), None);
                Ok(value)
            }
        }
    }

    /// Replace the value with `f(&current)`.
    ///
    /// `f` runs exactly once per call, regardless of how many observers the
    /// key has. Returns `Ok(None)` without calling `f` when the key is
    /// uninitialized.
    pub fn update<T: StateValue>(&self, key: &str, f: impl FnOnce(&T) -> T) -> Result<Option<T>> {
        match self.get_erased(key) {
            Some(current) => self.transition(key, current, f).map(Some),
            None => {
                trace!(
                    store = %self.inner.config.label,
                    key,
                    "functional update on uninitialized key skipped"
                );
                Ok(None)
            }
        }
    }

    /// Single entry point accepting either a literal or a functional update.
    pub fn apply<T: StateValue>(&self, key: &str, update: Update<T>) -> Result<Option<T>> {
        match update {
            Update::Value(value) => self.set(key, value).map(Some),
            Update::With(f) => self.update(key, f),
        }
    }

    fn transition<T: StateValue>(
        &self,
        key: &str,
        current: SharedValue,
        f: impl FnOnce(&T) -> T,
    ) -> Result<T> {
        let old = downcast::<T>(key, current.as_ref())?;
        let next = f(old);
        if next == *old {
            trace!(store = %self.inner.config.label, key, "update unchanged; skipped");
            return Ok(old.clone());
        }
        self.commit(key, next.clone(), Some(current));
        Ok(next)
    }

    fn commit<T: StateValue>(&self, key: &str, value: T, old: Option<SharedValue>) {
        let new: SharedValue = Rc::new(value);
        let (wakers, spies) = {
            let mut state = self.inner.state.borrow_mut();
            match state.entries.get_mut(key) {
                Some(slot) => *slot = Rc::clone(&new),
                None => {
                    state.entries.insert(Key::from(key), Rc::clone(&new));
                }
            }
            state.revision += 1;
            (state.wakers(key), state.spies(key))
        };
        debug!(
            store = %self.inner.config.label,
            key,
            subscribers = wakers.len(),
            listeners = spies.len(),
            "value committed"
        );

        let old = old.unwrap_or_else(|| Rc::clone(&new));
        for wake in &wakers {
            wake();
        }
        for spy in &spies {
            spy(new.as_ref(), old.as_ref(), key);
        }
    }

    // ---------------------------------------------------------------------
    // Subscriber registry
    // ---------------------------------------------------------------------

    /// Register a wake-up callback for changes to `key`.
    ///
    /// The callback receives no payload; it should re-read the store.
    pub fn subscribe(&self, key: &str, wake: impl Fn() + 'static) -> Subscription {
        let key = Key::from(key);
        let id = {
            let mut state = self.inner.state.borrow_mut();
            let id = state.next_id();
            state
                .subscribers
                .entry(Rc::clone(&key))
                .or_default()
                .push((id, Rc::new(wake)));
            id
        };
        trace!(store = %self.inner.config.label, key = %key, "subscriber attached");

        let store = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = store.upgrade() {
                inner.remove_subscriber(&key, id);
            }
        })
    }

    #[must_use]
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.inner
            .state
            .borrow()
            .subscribers
            .get(key)
            .map_or(0, Vec::len)
    }

    // ---------------------------------------------------------------------
    // Listener registry
    // ---------------------------------------------------------------------

    /// Register a typed change listener on `key`.
    ///
    /// If the key is already initialized the listener runs once immediately
    /// with `(value, value, key)`. Changes whose value is not a `T` are
    /// skipped with a warning.
    pub fn listen<T: StateValue>(
        &self,
        key: &str,
        spy: impl Fn(&T, &T, &str) + 'static,
    ) -> ListenerId {
        self.listen_erased(key, typed_spy(self.inner.config.label.clone(), spy))
    }

    /// Register a change listener that receives type-erased values.
    pub fn listen_erased(
        &self,
        key: &str,
        spy: impl Fn(&dyn ErasedValue, &dyn ErasedValue, &str) + 'static,
    ) -> ListenerId {
        let spy: SpyFn = Rc::new(spy);
        let (id, current) = {
            let mut state = self.inner.state.borrow_mut();
            let id = ListenerId(state.next_id());
            state
                .listeners
                .entry(Key::from(key))
                .or_default()
                .push((id, Rc::clone(&spy)));
            (id, state.entries.get(key).cloned())
        };
        trace!(store = %self.inner.config.label, key, %id, "listener attached");
        if let Some(current) = current {
            spy(current.as_ref(), current.as_ref(), key);
        }
        id
    }

    /// Remove a listener from `key`. Returns whether it was registered.
    pub fn unlisten(&self, key: &str, id: ListenerId) -> bool {
        let removed = {
            let mut state = self.inner.state.borrow_mut();
            let Some(spies) = state.listeners.get_mut(key) else {
                return false;
            };
            let removed = spies
                .iter()
                .position(|(spy_id, _)| *spy_id == id)
                .map(|index| spies.remove(index));
            if spies.is_empty() {
                state.listeners.remove(key);
            }
            removed
        };
        removed.is_some()
    }

    /// Register a listener on every key.
    ///
    /// Replays `(value, value, key)` once for every initialized key, in
    /// initialization order.
    pub fn listen_all(
        &self,
        spy: impl Fn(&dyn ErasedValue, &dyn ErasedValue, &str) + 'static,
    ) -> ListenerId {
        let spy: SpyFn = Rc::new(spy);
        let (id, snapshot) = {
            let mut state = self.inner.state.borrow_mut();
            let id = ListenerId(state.next_id());
            state.global_listeners.push((id, Rc::clone(&spy)));
            let snapshot: Vec<(Key, SharedValue)> = state
                .entries
                .iter()
                .map(|(key, value)| (Rc::clone(key), Rc::clone(value)))
                .collect();
            (id, snapshot)
        };
        trace!(store = %self.inner.config.label, %id, "global listener attached");
        for (key, value) in &snapshot {
            spy(value.as_ref(), value.as_ref(), key.as_ref());
        }
        id
    }

    /// Remove a global listener. Returns whether it was registered.
    pub fn unlisten_all(&self, id: ListenerId) -> bool {
        let removed = {
            let mut state = self.inner.state.borrow_mut();
            state
                .global_listeners
                .iter()
                .position(|(spy_id, _)| *spy_id == id)
                .map(|index| state.global_listeners.remove(index))
        };
        removed.is_some()
    }

    /// Remove every listener on `key`. Global listeners are kept.
    pub fn clear_listeners(&self, key: &str) {
        let removed = self.inner.state.borrow_mut().listeners.remove(key);
        drop(removed);
    }

    /// Remove every per-key and global listener.
    pub fn clear_all_listeners(&self) {
        let removed = {
            let mut state = self.inner.state.borrow_mut();
            (
                std::mem::take(&mut state.listeners),
                std::mem::take(&mut state.global_listeners),
            )
        };
        debug!(store = %self.inner.config.label, "all listeners cleared");
        drop(removed);
    }

    #[must_use]
    pub fn listener_count(&self, key: &str) -> usize {
        self.inner
            .state
            .borrow()
            .listeners
            .get(key)
            .map_or(0, Vec::len)
    }

    #[must_use]
    pub fn global_listener_count(&self) -> usize {
        self.inner.state.borrow().global_listeners.len()
    }

    /// Counter advanced by every commit, initialization and clear.
    pub(crate) fn revision(&self) -> u64 {
        self.inner.state.borrow().revision
    }

    /// Counter advanced by every [`teardown`](Self::teardown).
    pub(crate) fn epoch(&self) -> u64 {
        self.inner.state.borrow().epoch
    }

    /// Current values of `keys`, in order.
    pub(crate) fn snapshot(&self, keys: &[Key]) -> Vec<Option<SharedValue>> {
        let state = self.inner.state.borrow();
        keys.iter()
            .map(|key| state.entries.get(key.as_ref()).cloned())
            .collect()
    }
}

fn downcast<'a, T: StateValue>(key: &str, value: &'a dyn ErasedValue) -> Result<&'a T> {
    value
        .downcast_ref::<T>()
        .ok_or_else(|| StoreError::mismatch(key, std::any::type_name::<T>(), value.type_name()))
}

fn typed_spy<T: StateValue>(
    label: String,
    spy: impl Fn(&T, &T, &str) + 'static,
) -> impl Fn(&dyn ErasedValue, &dyn ErasedValue, &str) + 'static {
    move |new: &dyn ErasedValue, old: &dyn ErasedValue, key: &str| match (
        new.downcast_ref::<T>(),
        old.downcast_ref::<T>(),
    ) {
        (Some(new), Some(old)) => spy(new, old, key),
        _ => warn!(
            store = %label,
            key,
            expected = std::any::type_name::<T>(),
            found = new.type_name(),
            "listener skipped: value type mismatch"
        ),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
