#![forbid(unsafe_code)]

//! Persistence adapters for weave-store.
//!
//! Backs individual store keys with an external string key/value store.
//!
//! # Role in the workspace
//! - **Codecs**: [`StringCodec`], [`NumberCodec`], [`BoolCodec`] and
//!   [`JsonCodec`] convert values to the strings a backend holds.
//! - **Backends**: [`MemoryBackend`] and [`FileBackend`] implement
//!   [`Backend`].
//! - **Binding**: [`PersistedState`] loads a key from the backend on first
//!   access and writes it back on every committed change.
//!
//! Corrupt or unreadable data never fails a read: the caller's default is
//! used instead and a warning is logged.
//!
//! # Example
//! ```
//! use std::rc::Rc;
//! use weave_persist::{MemoryBackend, PersistedState};
//! use weave_store::Store;
//!
//! let backend = Rc::new(MemoryBackend::new());
//! let store = Store::new();
//! let name = PersistedState::string(&store, "name", "guest", backend.clone());
//! name.set_value("ada".to_string()).unwrap();
//! assert_eq!(backend.raw("name").as_deref(), Some("ada"));
//! ```

pub mod backend;
pub mod binding;
pub mod codec;
pub mod error;

pub use backend::{Backend, FileBackend, FileBackendConfig, MemoryBackend};
pub use binding::{PersistedState, Persistence};
pub use codec::{BoolCodec, Codec, JsonCodec, NumberCodec, StringCodec};
pub use error::{BackendError, CodecError, PersistError};
