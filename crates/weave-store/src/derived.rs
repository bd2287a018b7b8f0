#![forbid(unsafe_code)]

//! Values derived from one or more source keys.
//!
//! # Design
//!
//! [`Derived<T>`] holds a compute function over the current values of its
//! source keys. It only listens to its sources while it is observed:
//!
//! - The first [`subscribe`](Derived::subscribe) attaches to every source
//!   twice: a store subscription for committed changes, and a listener for
//!   initializations (which do not wake subscribers). Both paths share one
//!   recompute per store revision.
//! - Every change event on any source recomputes, caches the result and wakes
//!   the derived value's own subscribers (no payload).
//! - Dropping the last observer releases every source registration.
//!
//! The cache is tagged with the store revision it was computed at.
//! [`get`](Derived::get) recomputes whenever the store has moved on, so it is
//! never stale: not while unobserved, not after a nested write was skipped,
//! and not after [`Store::clear_all_listeners`] removed the initialization
//! listeners. After [`Store::teardown`] an observed value re-attaches on its
//! next `get`.
//!
//! # Invariants
//!
//! 1. Observers are woken at least once per committed source change; a
//!    change is never dropped. Equality of the *derived* output is not checked
//!    here; consumers that care dedupe downstream (or use
//!    [`publish`](Derived::publish), which goes through the equality-gated
//!    update pipeline).
//! 2. An unobserved derived value holds no registration on any source.
//!    Clearing listeners never cuts an observed value off from committed
//!    changes.
//! 3. `version` increments by exactly 1 per evaluation of the compute function.
//!
//! # Failure Modes
//!
//! - **Re-entrant recompute**: a compute function that writes one of its own
//!   sources would recurse into itself. The nested evaluation is skipped and
//!   logged at WARN; the outer evaluation still completes and the value is
//!   recomputed on the next source event or `get`.
//! - **Source uninitialized**: [`SourceValues::get`] returns `None`; typed
//!   constructors substitute the source handle's default.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::shared::SharedState;
use crate::store::{Key, SharedValue, Store, WakeFn};
use crate::subscription::{ListenerId, Subscription};
use crate::value::{ErasedValue, StateValue};

/// The current values of a derived value's sources, in declaration order.
pub struct SourceValues {
    keys: Vec<Key>,
    values: Vec<Option<SharedValue>>,
}

impl SourceValues {
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn key(&self, index: usize) -> Option<&str> {
        self.keys.get(index).map(|key| &**key)
    }

    /// Borrow the `index`-th source as `U`. `None` if the source is
    /// uninitialized, out of range, or of another type.
    #[must_use]
    pub fn get_ref<U: StateValue>(&self, index: usize) -> Option<&U> {
        self.erased(index)?.downcast_ref::<U>()
    }

    #[must_use]
    pub fn get<U: StateValue>(&self, index: usize) -> Option<U> {
        self.get_ref::<U>(index).cloned()
    }

    #[must_use]
    pub fn erased(&self, index: usize) -> Option<&dyn ErasedValue> {
        self.values.get(index)?.as_deref()
    }

    #[must_use]
    pub fn is_initialized(&self, index: usize) -> bool {
        self.values.get(index).is_some_and(Option::is_some)
    }
}

impl fmt::Debug for SourceValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.keys.iter().zip(self.values.iter()))
            .finish()
    }
}

struct DerivedInner<T> {
    store: Store,
    sources: Vec<Key>,
    compute: Box<dyn Fn(&SourceValues) -> T>,
    /// Last result; only meaningful while observed.
    cached: Option<T>,
    version: u64,
    /// Store revision `cached` was computed at.
    evaluated_at: u64,
    /// Store revision observers were last woken for.
    notified_at: u64,
    /// Store epoch the source registrations belong to.
    attached_epoch: u64,
    observers: Vec<(u64, WakeFn)>,
    next_observer: u64,
    source_subscriptions: Vec<Subscription>,
    source_listeners: Vec<(Key, ListenerId)>,
    /// Set while source listeners are being attached, to swallow their
    /// replay calls.
    attaching: bool,
}

impl<T> DerivedInner<T> {
    fn evaluate(&mut self) -> T {
        let values = SourceValues {
            keys: self.sources.clone(),
            values: self.store.snapshot(&self.sources),
        };
        // Taken before compute runs: a write from inside compute leaves the
        // result out of date.
        self.evaluated_at = self.store.revision();
        self.version += 1;
        (self.compute)(&values)
    }

    fn is_current(&self) -> bool {
        self.cached.is_some() && self.evaluated_at == self.store.revision()
    }

    fn is_severed(&self) -> bool {
        !self.observers.is_empty() && self.attached_epoch != self.store.epoch()
    }
}

/// A value computed from one or more source keys.
///
/// Cloning a `Derived` creates a new handle to the **same** inner state.
///
/// # Example
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use weave_store::{Derived, Store};
///
/// let store = Store::new();
/// let width = store.state("width", 10);
/// let height = store.state("height", 20);
/// let area = Derived::from2(&width, &height, |w, h| w * h);
/// width.get_value().unwrap();
/// height.get_value().unwrap();
///
/// let wakes = Rc::new(Cell::new(0));
/// let w = Rc::clone(&wakes);
/// let sub = area.subscribe(move || w.set(w.get() + 1));
///
/// width.set_value(5).unwrap();
/// assert_eq!(area.get(), 100);
/// assert_eq!(wakes.get(), 1);
///
/// drop(sub);
/// assert!(!area.is_observed());
/// ```
pub struct Derived<T> {
    inner: Rc<RefCell<DerivedInner<T>>>,
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Derived")
            .field("sources", &inner.sources)
            .field("cached", &inner.cached)
            .field("version", &inner.version)
            .field("observers", &inner.observers.len())
            .finish()
    }
}

impl<T: Clone + 'static> Derived<T> {
    /// Derive a value from raw source keys.
    pub fn new<K: Into<Key>>(
        store: &Store,
        sources: impl IntoIterator<Item = K>,
        compute: impl Fn(&SourceValues) -> T + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(RefCell::new(DerivedInner {
                store: store.clone(),
                sources: sources.into_iter().map(Into::into).collect(),
                compute: Box::new(compute),
                cached: None,
                version: 0,
                evaluated_at: 0,
                notified_at: 0,
                attached_epoch: 0,
                observers: Vec::new(),
                next_observer: 1,
                source_subscriptions: Vec::new(),
                source_listeners: Vec::new(),
                attaching: false,
            })),
        }
    }

    /// Derive a value from a single shared state.
    ///
    /// While the source is uninitialized `map` receives its default.
    pub fn from_state<A: StateValue>(
        source: &SharedState<A>,
        map: impl Fn(&A) -> T + 'static,
    ) -> Self {
        let default = source.default_value().clone();
        Self::new(source.store(), [source.key()], move |values| {
            map(values.get_ref::<A>(0).unwrap_or(&default))
        })
    }

    /// Derive a value from two shared states on the same store.
    pub fn from2<A: StateValue, B: StateValue>(
        a: &SharedState<A>,
        b: &SharedState<B>,
        map: impl Fn(&A, &B) -> T + 'static,
    ) -> Self {
        let (da, db) = (a.default_value().clone(), b.default_value().clone());
        Self::new(a.store(), [a.key(), b.key()], move |values| {
            map(
                values.get_ref::<A>(0).unwrap_or(&da),
                values.get_ref::<B>(1).unwrap_or(&db),
            )
        })
    }

    /// Derive a value from three shared states on the same store.
    pub fn from3<A: StateValue, B: StateValue, C: StateValue>(
        a: &SharedState<A>,
        b: &SharedState<B>,
        c: &SharedState<C>,
        map: impl Fn(&A, &B, &C) -> T + 'static,
    ) -> Self {
        let (da, db, dc) = (
            a.default_value().clone(),
            b.default_value().clone(),
            c.default_value().clone(),
        );
        Self::new(a.store(), [a.key(), b.key(), c.key()], move |values| {
            map(
                values.get_ref::<A>(0).unwrap_or(&da),
                values.get_ref::<B>(1).unwrap_or(&db),
                values.get_ref::<C>(2).unwrap_or(&dc),
            )
        })
    }

    /// Current value.
    ///
    /// Returns the cached result while observed and nothing in the store has
    /// changed since it was computed; otherwise evaluates against the current
    /// store contents.
    ///
    /// # Panics
    ///
    /// Panics if called from inside this value's own compute function.
    #[must_use]
    pub fn get(&self) -> T {
        if self.inner.borrow().is_severed() {
            Self::reattach(&self.inner);
        }
        let mut inner = self.inner.borrow_mut();
        if !inner.observers.is_empty()
            && inner.is_current()
            && let Some(cached) = &inner.cached
        {
            return cached.clone();
        }
        let value = inner.evaluate();
        if !inner.observers.is_empty() {
            inner.cached = Some(value.clone());
        }
        value
    }

    /// Register a wake-up callback, attaching to the sources if this is the
    /// first observer.
    pub fn subscribe(&self, wake: impl Fn() + 'static) -> Subscription {
        let (id, first) = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_observer;
            inner.next_observer += 1;
            inner.observers.push((id, Rc::new(wake)));
            (id, inner.observers.len() == 1)
        };
        if first {
            Self::attach(&self.inner);
        }

        let weak = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                Self::detach(&inner, id);
            }
        })
    }

    /// Republish every evaluation under `key` through the store's update
    /// pipeline.
    ///
    /// The returned guard is an observer: the key is kept up to date until
    /// it is dropped. Values equal to the published one are not re-committed.
    pub fn publish(&self, key: impl Into<Key>) -> Subscription
    where
        T: StateValue,
    {
        let key = key.into();
        let store = self.inner.borrow().store.clone();
        let weak = Rc::downgrade(&self.inner);
        let target = Rc::clone(&key);
        let publisher = store.clone();
        let sub = self.subscribe(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let value = inner.borrow().cached.clone();
            if let Some(value) = value {
                publish_value(&publisher, &target, value);
            }
        });
        publish_value(&store, &key, self.get());
        sub
    }

    #[must_use]
    pub fn is_observed(&self) -> bool {
        !self.inner.borrow().observers.is_empty()
    }

    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.borrow().observers.len()
    }

    /// Number of compute evaluations so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    #[must_use]
    pub fn sources(&self) -> Vec<Key> {
        self.inner.borrow().sources.clone()
    }

    fn attach(inner: &Rc<RefCell<DerivedInner<T>>>) {
        let (store, sources) = {
            let mut guard = inner.borrow_mut();
            guard.attaching = true;
            (guard.store.clone(), guard.sources.clone())
        };

        let mut subscriptions = Vec::with_capacity(sources.len());
        let mut listeners = Vec::with_capacity(sources.len());
        for key in &sources {
            let weak = Rc::downgrade(inner);
            subscriptions.push(store.subscribe(key, move || {
                if let Some(inner) = weak.upgrade() {
                    Self::on_source_change(&inner);
                }
            }));
            let weak = Rc::downgrade(inner);
            let id = store.listen_erased(key, move |_, _, _| {
                if let Some(inner) = weak.upgrade() {
                    Self::on_source_change(&inner);
                }
            });
            listeners.push((Rc::clone(key), id));
        }

        let mut guard = inner.borrow_mut();
        guard.source_subscriptions = subscriptions;
        guard.source_listeners = listeners;
        guard.attached_epoch = store.epoch();
        guard.notified_at = store.revision();
        guard.attaching = false;
        let value = guard.evaluate();
        guard.cached = Some(value);
        debug!(
            store = %store.config().label,
            sources = sources.len(),
            version = guard.version,
            "derived value attached"
        );
    }

    fn detach(inner: &Rc<RefCell<DerivedInner<T>>>, id: u64) {
        let (removed, released, store) = {
            let mut guard = inner.borrow_mut();
            let removed = guard
                .observers
                .iter()
                .position(|(observer, _)| *observer == id)
                .map(|index| guard.observers.remove(index));
            let released = if removed.is_some() && guard.observers.is_empty() {
                guard.cached = None;
                Some(Self::take_registrations(&mut guard))
            } else {
                None
            };
            (removed, released, guard.store.clone())
        };
        if let Some((subscriptions, listeners)) = released {
            debug!(
                store = %store.config().label,
                sources = listeners.len(),
                "derived value released its sources"
            );
            Self::release(&store, subscriptions, listeners);
        }
        drop(removed);
    }

    /// Drop registrations lost to a store teardown and attach afresh.
    fn reattach(inner: &Rc<RefCell<DerivedInner<T>>>) {
        let (store, subscriptions, listeners) = {
            let mut guard = inner.borrow_mut();
            let (subscriptions, listeners) = Self::take_registrations(&mut guard);
            guard.cached = None;
            (guard.store.clone(), subscriptions, listeners)
        };
        debug!(store = %store.config().label, "derived value re-attaching after teardown");
        Self::release(&store, subscriptions, listeners);
        Self::attach(inner);
    }

    fn take_registrations(
        guard: &mut DerivedInner<T>,
    ) -> (Vec<Subscription>, Vec<(Key, ListenerId)>) {
        (
            std::mem::take(&mut guard.source_subscriptions),
            std::mem::take(&mut guard.source_listeners),
        )
    }

    fn release(store: &Store, subscriptions: Vec<Subscription>, listeners: Vec<(Key, ListenerId)>) {
        drop(subscriptions);
        for (key, listener) in listeners {
            store.unlisten(&key, listener);
        }
    }

    fn on_source_change(inner: &Rc<RefCell<DerivedInner<T>>>) {
        let wakers = {
            let Ok(mut guard) = inner.try_borrow_mut() else {
                warn!("derived value changed its own source while computing; nested recompute skipped");
                return;
            };
            if guard.attaching || guard.observers.is_empty() {
                return;
            }
            // A commit reaches us through both the subscription and the
            // listener; the second arrival finds it already handled.
            let revision = guard.store.revision();
            if guard.notified_at == revision {
                return;
            }
            guard.notified_at = revision;
            if !guard.is_current() {
                let value = guard.evaluate();
                guard.cached = Some(value);
            }
            guard
                .observers
                .iter()
                .map(|(_, wake)| Rc::clone(wake))
                .collect::<Vec<_>>()
        };
        for wake in &wakers {
            wake();
        }
    }
}

fn publish_value<T: StateValue>(store: &Store, key: &str, value: T) {
    if let Err(err) = store.set(key, value) {
        warn!(key, %err, "derived value could not be published");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn counter() -> (Rc<Cell<u32>>, impl Fn() + 'static) {
        let count = Rc::new(Cell::new(0u32));
        let inc = Rc::clone(&count);
        (count, move || inc.set(inc.get() + 1))
    }

    #[test]
    fn unobserved_get_reads_current_sources() {
        let store = Store::new();
        let a = store.state("a", 2);
        let doubled = Derived::from_state(&a, |v| v * 2);
        assert_eq!(doubled.get(), 4);
        a.set_value(5).unwrap();
        assert_eq!(doubled.get(), 10);
        assert!(!doubled.is_observed());
    }

    #[test]
    fn uninitialized_source_uses_default() {
        let store = Store::new();
        let a = store.state("a", 3);
        let derived = Derived::from_state(&a, |v| v + 1);
        assert!(!a.is_initialized());
        assert_eq!(derived.get(), 4);
    }

    #[test]
    fn observed_recomputes_on_each_source_change() {
        let store = Store::new();
        let a = store.state("a", 1);
        let b = store.state("b", 10);
        a.get_value().unwrap();
        b.get_value().unwrap();

        let sum = Derived::from2(&a, &b, |x, y| x + y);
        let (wakes, wake) = counter();
        let _sub = sum.subscribe(wake);
        assert_eq!(sum.get(), 11);
        let base = sum.version();

        a.set_value(2).unwrap();
        assert_eq!(sum.get(), 12);
        b.set_value(20).unwrap();
        assert_eq!(sum.get(), 22);
        assert_eq!(wakes.get(), 2);
        assert_eq!(sum.version(), base + 2);
    }

    #[test]
    fn attach_evaluates_once_despite_replays() {
        let store = Store::new();
        let a = store.state("a", 1);
        let b = store.state("b", 2);
        let c = store.state("c", 3);
        a.get_value().unwrap();
        b.get_value().unwrap();
        c.get_value().unwrap();

        let sum = Derived::from3(&a, &b, &c, |x, y, z| x + y + z);
        let (wakes, wake) = counter();
        let _sub = sum.subscribe(wake);
        assert_eq!(sum.version(), 1);
        assert_eq!(wakes.get(), 0);
        assert_eq!(sum.get(), 6);
    }

    #[test]
    fn detaching_last_observer_releases_sources() {
        let store = Store::new();
        let a = store.state("a", 1);
        let b = store.state("b", 1);
        let evaluations = Rc::new(Cell::new(0u32));
        let e = Rc::clone(&evaluations);
        let derived = Derived::from2(&a, &b, move |x, y| {
            e.set(e.get() + 1);
            x * y
        });

        let s1 = derived.subscribe(|| {});
        let s2 = derived.subscribe(|| {});
        assert_eq!(store.listener_count("a"), 1);
        assert_eq!(store.listener_count("b"), 1);
        assert_eq!(store.subscriber_count("a"), 1);
        assert_eq!(store.subscriber_count("b"), 1);

        drop(s1);
        assert_eq!(store.listener_count("a"), 1);
        drop(s2);
        assert_eq!(store.listener_count("a"), 0);
        assert_eq!(store.listener_count("b"), 0);
        assert_eq!(store.subscriber_count("a"), 0);
        assert_eq!(store.subscriber_count("b"), 0);

        let before = evaluations.get();
        a.set_value(4).unwrap();
        b.set_value(5).unwrap();
        assert_eq!(evaluations.get(), before);
        assert_eq!(derived.get(), 20);
    }

    #[test]
    fn resubscribe_reattaches() {
        let store = Store::new();
        let a = store.state("a", 1);
        a.get_value().unwrap();
        let derived = Derived::from_state(&a, |v| *v);
        drop(derived.subscribe(|| {}));
        let (wakes, wake) = counter();
        let _sub = derived.subscribe(wake);
        a.set_value(2).unwrap();
        assert_eq!(wakes.get(), 1);
        assert_eq!(derived.get(), 2);
    }

    #[test]
    fn source_initialized_after_attach_triggers_recompute() {
        let store = Store::new();
        let a = store.state("a", 0);
        let derived = Derived::from_state(&a, |v| v + 100);
        let (wakes, wake) = counter();
        let _sub = derived.subscribe(wake);
        assert_eq!(derived.get(), 100);

        store.ensure("a", 0).unwrap();
        assert_eq!(wakes.get(), 1);
        store.set("a", 7).unwrap();
        assert_eq!(derived.get(), 107);
        assert_eq!(wakes.get(), 2);
    }

    #[test]
    fn notifies_even_when_output_is_unchanged() {
        let store = Store::new();
        let obj = store.state("compound", (1, 2));
        obj.get_value().unwrap();
        let first = Derived::from_state(&obj, |(a, _)| *a);
        let (wakes, wake) = counter();
        let _sub = first.subscribe(wake);

        obj.update(|(a, _)| (*a, 5)).unwrap();
        assert_eq!(first.get(), 1);
        assert_eq!(wakes.get(), 1);
    }

    #[test]
    fn publish_commits_through_pipeline() {
        let store = Store::new();
        let obj = store.state("compound", (1, 2));
        obj.get_value().unwrap();
        let first = Derived::from_state(&obj, |(a, _)| *a);

        let changes = Rc::new(Cell::new(0u32));
        let c = Rc::clone(&changes);
        store.listen("compound.a", move |_: &i32, _: &i32, _: &str| c.set(c.get() + 1));

        let publication = first.publish("compound.a");
        assert_eq!(store.get::<i32>("compound.a").unwrap(), Some(1));
        assert_eq!(changes.get(), 1);

        // Output unchanged: the pipeline drops the duplicate.
        obj.update(|(a, _)| (*a, 5)).unwrap();
        assert_eq!(changes.get(), 1);

        obj.update(|(_, b)| (9, *b)).unwrap();
        assert_eq!(store.get::<i32>("compound.a").unwrap(), Some(9));
        assert_eq!(changes.get(), 2);

        drop(publication);
        assert!(!first.is_observed());
        obj.set_value((3, 3)).unwrap();
        assert_eq!(store.get::<i32>("compound.a").unwrap(), Some(9));
    }

    #[test]
    fn raw_sources_with_source_values() {
        let store = Store::new();
        store.ensure("name", "Ada".to_string()).unwrap();
        store.ensure("age", 36_u32).unwrap();
        let label = Derived::new(&store, ["name", "age", "missing"], |values| {
            assert_eq!(values.len(), 3);
            assert_eq!(values.key(2), Some("missing"));
            assert!(!values.is_initialized(2));
            format!(
                "{} ({})",
                values.get::<String>(0).unwrap_or_default(),
                values.get::<u32>(1).unwrap_or_default()
            )
        });
        assert_eq!(label.get(), "Ada (36)");
    }

    #[test]
    fn wrong_type_reads_as_missing() {
        let store = Store::new();
        store.ensure("n", 1_i64).unwrap();
        let derived = Derived::new(&store, ["n"], |values| values.get::<i32>(0));
        assert_eq!(derived.get(), None);
    }

    #[test]
    fn fan_out_many_derived() {
        let store = Store::new();
        let root = store.state("root", 0);
        root.get_value().unwrap();
        let derived: Vec<Derived<String>> = (0..100)
            .map(|i| Derived::from_state(&root, move |v| format!("Derived {i}: {v}")))
            .collect();
        let subs: Vec<Subscription> = derived.iter().map(|d| d.subscribe(|| {})).collect();

        root.set_value(1).unwrap();
        assert_eq!(derived[0].get(), "Derived 0: 1");
        assert_eq!(derived[99].get(), "Derived 99: 1");
        drop(subs);
        assert_eq!(store.listener_count("root"), 0);
    }

    #[test]
    fn compute_writing_its_source_does_not_recurse() {
        let store = Store::new();
        store.ensure("n", 0).unwrap();
        let writer = store.clone();
        let derived = Derived::new(&store, ["n"], move |values| {
            let n = values.get::<i32>(0).unwrap_or_default();
            if n == 1 {
                writer.set("n", 2).unwrap();
            }
            n
        });
        let _sub = derived.subscribe(|| {});
        store.set("n", 1).unwrap();
        assert_eq!(store.get::<i32>("n").unwrap(), Some(2));
        // The nested write was not lost: the value reflects the final state.
        assert_eq!(derived.get(), 2);
    }

    #[test]
    fn skipped_nested_write_is_picked_up_by_get() {
        let store = Store::new();
        store.ensure("n", 0).unwrap();
        let writer = store.clone();
        let derived = Derived::new(&store, ["n"], move |values| {
            let n = values.get::<i32>(0).unwrap_or_default();
            if n == 1 {
                writer.set("n", 2).unwrap();
            }
            n * 10
        });
        let _sub = derived.subscribe(|| {});
        // Only the subscription path is left, so the follow-up event for the
        // nested write is the one that gets skipped.
        store.clear_all_listeners();
        store.set("n", 1).unwrap();
        assert_eq!(store.get::<i32>("n").unwrap(), Some(2));
        assert_eq!(derived.get(), 20);
    }

    #[test]
    fn clearing_listeners_keeps_observed_value_connected() {
        let store = Store::new();
        let a = store.state("a", 1);
        a.get_value().unwrap();
        let doubled = Derived::from_state(&a, |v| v * 2);
        let (wakes, wake) = counter();
        let _sub = doubled.subscribe(wake);

        store.clear_listeners("a");
        a.set_value(5).unwrap();
        assert!(doubled.is_observed());
        assert_eq!(wakes.get(), 1);
        assert_eq!(doubled.get(), 10);

        store.clear_all_listeners();
        a.set_value(6).unwrap();
        assert_eq!(wakes.get(), 2);
        assert_eq!(doubled.get(), 12);
    }

    #[test]
    fn get_is_fresh_after_initialization_without_listener() {
        let store = Store::new();
        let a = store.state("a", 1);
        let doubled = Derived::from_state(&a, |v| v * 2);
        let _sub = doubled.subscribe(|| {});
        store.clear_all_listeners();

        // Initialization does not wake subscribers; `get` still sees it.
        store.ensure("a", 4).unwrap();
        assert_eq!(doubled.get(), 8);
    }

    #[test]
    fn teardown_reattaches_on_next_get() {
        let store = Store::new();
        let a = store.state("a", 1);
        a.set_value(3).unwrap();
        let doubled = Derived::from_state(&a, |v| v * 2);
        let (wakes, wake) = counter();
        let _sub = doubled.subscribe(wake);
        assert_eq!(doubled.get(), 6);

        store.teardown();
        assert_eq!(store.subscriber_count("a"), 0);
        assert_eq!(doubled.get(), 2);
        assert_eq!(store.subscriber_count("a"), 1);
        assert_eq!(store.listener_count("a"), 1);

        a.set_value(4).unwrap();
        assert_eq!(wakes.get(), 2);
        assert_eq!(doubled.get(), 8);
    }

    #[test]
    fn one_wake_per_commit() {
        let store = Store::new();
        let a = store.state("a", 0);
        a.get_value().unwrap();
        let derived = Derived::from_state(&a, |v| v + 1);
        let (wakes, wake) = counter();
        let _sub = derived.subscribe(wake);
        for n in 1..=5 {
            a.set_value(n).unwrap();
        }
        assert_eq!(wakes.get(), 5);
        assert_eq!(derived.version(), 6);
    }

    #[test]
    fn wake_survives_early_read_by_sibling_subscriber() {
        let store = Store::new();
        let a = store.state("a", 0);
        a.get_value().unwrap();
        let derived = Derived::from_state(&a, |v| v * 3);

        // Registered before the derived value attaches, so it runs first and
        // refreshes the cache.
        let reader = derived.clone();
        let _early = a.subscribe(move || {
            let _ = reader.get();
        });
        let (wakes, wake) = counter();
        let _sub = derived.subscribe(wake);

        a.set_value(2).unwrap();
        assert_eq!(wakes.get(), 1);
        assert_eq!(derived.get(), 6);
    }

    #[test]
    fn debug_format() {
        let store = Store::new();
        let a = store.state("a", 1);
        let derived = Derived::from_state(&a, |v| *v);
        let dbg = format!("{:?}", derived);
        assert!(dbg.contains("Derived"));
        assert!(dbg.contains("version"));
    }
}
