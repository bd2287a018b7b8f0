#![forbid(unsafe_code)]

//! Reactive keyed value store.
//!
//! A [`Store`] maps string keys to values of arbitrary type and lets many
//! independent consumers observe them:
//!
//! - [`Store::subscribe`]: payload-free wake-ups for readers that re-read a
//!   snapshot ([`Subscription`] detaches on drop).
//! - [`Store::listen`] / [`Store::listen_all`]: `(new, old, key)` change
//!   listeners, replayed once on attach if the key already has a value.
//! - [`Derived`]: values computed from several keys, attached to their sources
//!   only while observed.
//! - [`SharedState`]: typed per-key handles with a default and an optional
//!   loader, used by persistence adapters.
//!
//! # Architecture
//!
//! The store is single-threaded (`Rc<RefCell<..>>`). [`global()`] returns the
//! thread's shared instance; [`Store::new`] builds isolated ones. All writes go
//! through one pipeline that computes the new value once, drops it if it
//! equals the current value, commits it, and only then notifies subscribers
//! followed by listeners.
//!
//! # Example
//!
//! ```
//! use weave_store::Store;
//!
//! let store = Store::new();
//! let counter = store.state("counter", 0);
//! for _ in 0..3 {
//!     counter.update(|n| n + 1).unwrap();
//! }
//! assert_eq!(counter.get_value().unwrap(), 3);
//! ```

pub mod config;
pub mod derived;
pub mod error;
pub mod shared;
pub mod store;
pub mod subscription;
pub mod value;

pub use config::StoreConfig;
pub use derived::{Derived, SourceValues};
pub use error::{INDEX_ERROR_MESSAGE, Result, StoreError};
pub use shared::{RenderScope, SharedState};
pub use store::{Key, Store, Update, global};
pub use subscription::{ListenerId, Subscription};
pub use value::{EntryState, ErasedValue, StateValue};
