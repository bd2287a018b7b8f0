#![forbid(unsafe_code)]

//! Backing key/value stores.
//!
//! A [`Backend`] is the external string store a persisted key is written to:
//! [`MemoryBackend`] keeps everything in process, [`FileBackend`] mirrors a
//! single JSON object file on disk.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::error::BackendError;

/// String key/value store with interior mutability.
///
/// Backends are shared through `Rc<dyn Backend>` by every binding that
/// persists into them, so all methods take `&self`.
pub trait Backend {
    /// Raw value stored for `key`, or `None` if absent.
    fn get_item(&self, key: &str) -> Result<Option<String>, BackendError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), BackendError>;

    fn remove_item(&self, key: &str) -> Result<(), BackendError>;

    fn clear(&self) -> Result<(), BackendError>;
}

// ---------------------------------------------------------------------------
// MemoryBackend
// ---------------------------------------------------------------------------

/// In-process backend. Never fails.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    items: RefCell<BTreeMap<String, String>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-populated with `items`.
    pub fn with_items<K, V>(items: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            items: RefCell::new(
                items
                    .into_iter()
                    .map(|(key, value)| (key.into(), value.into()))
                    .collect(),
            ),
        }
    }

    /// Raw stored value, bypassing the `Result` of [`Backend::get_item`].
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<String> {
        self.items.borrow().get(key).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }
}

impl Backend for MemoryBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self.raw(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.items
            .borrow_mut()
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), BackendError> {
        self.items.borrow_mut().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), BackendError> {
        self.items.borrow_mut().clear();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileBackend
// ---------------------------------------------------------------------------

/// Settings for a [`FileBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBackendConfig {
    /// JSON file holding the object of stored strings.
    pub path: PathBuf,
    /// Create missing parent directories on open.
    pub create_dirs: bool,
    /// Write indented JSON.
    pub pretty: bool,
}

impl FileBackendConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            create_dirs: true,
            pretty: false,
        }
    }

    #[must_use]
    pub fn with_create_dirs(mut self, create_dirs: bool) -> Self {
        self.create_dirs = create_dirs;
        self
    }

    #[must_use]
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }
}

/// Backend persisting to a JSON object file.
///
/// The file is read once on open. Every mutation rewrites the whole file
/// through a sibling temporary file followed by a rename, so a crash leaves
/// either the old or the new contents on disk.
pub struct FileBackend {
    config: FileBackendConfig,
    items: RefCell<BTreeMap<String, String>>,
}

impl fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileBackend")
            .field("path", &self.config.path)
            .field("items", &self.items.borrow().len())
            .finish()
    }
}

impl FileBackend {
    /// Open `path` with default settings. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, BackendError> {
        Self::with_config(FileBackendConfig::new(path))
    }

    pub fn with_config(config: FileBackendConfig) -> Result<Self, BackendError> {
        if config.create_dirs
            && let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let items: BTreeMap<String, String> = match fs::read_to_string(&config.path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        debug!(path = %config.path.display(), items = items.len(), "file backend opened");
        Ok(Self {
            config,
            items: RefCell::new(items),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    #[must_use]
    pub fn config(&self) -> &FileBackendConfig {
        &self.config
    }

    fn flush(&self, items: &BTreeMap<String, String>) -> Result<(), BackendError> {
        let text = if self.config.pretty {
            serde_json::to_string_pretty(items)?
        } else {
            serde_json::to_string(items)?
        };
        let tmp = self.temp_path();
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.config.path)?;
        trace!(path = %self.config.path.display(), items = items.len(), "file backend flushed");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .config
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.config.path.with_file_name(name)
    }

    /// Apply `mutate` and write the result. The in-memory view only changes
    /// if the write succeeds.
    fn mutate(
        &self,
        mutate: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), BackendError> {
        let mut next = self.items.borrow().clone();
        mutate(&mut next);
        self.flush(&next)?;
        *self.items.borrow_mut() = next;
        Ok(())
    }
}

impl Backend for FileBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self.items.borrow().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.mutate(|items| {
            items.insert(key.to_owned(), value.to_owned());
        })
    }

    fn remove_item(&self, key: &str) -> Result<(), BackendError> {
        if !self.items.borrow().contains_key(key) {
            return Ok(());
        }
        self.mutate(|items| {
            items.remove(key);
        })
    }

    fn clear(&self) -> Result<(), BackendError> {
        self.mutate(BTreeMap::clear)
    }
}
