#![forbid(unsafe_code)]

//! Error types for codecs and backing stores.
//!
//! None of these reach callers of [`Persistence::load`](crate::Persistence::load)
//! or [`Persistence::save`](crate::Persistence::save): those degrade to the
//! fallback and log. The fallible `try_*` variants surface them.

use std::io;

use thiserror::Error;

/// A value could not be encoded or a raw string could not be decoded.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid {kind} data: {message}")]
    Invalid { kind: &'static str, message: String },

    #[error("json codec: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodecError {
    pub(crate) fn invalid(kind: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            kind,
            message: message.into(),
        }
    }
}

/// The backing key/value store failed.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend I/O: {0}")]
    Io(#[from] io::Error),

    #[error("backend file is not a JSON object of strings: {0}")]
    Json(#[from] serde_json::Error),

    #[error("backend unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Any failure along the load or save path.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("key {key:?}: {source}")]
    Codec {
        key: String,
        #[source]
        source: CodecError,
    },

    #[error("key {key:?}: {source}")]
    Backend {
        key: String,
        #[source]
        source: BackendError,
    },
}

impl PersistError {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Codec { key, .. } | Self::Backend { key, .. } => key,
        }
    }

    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Codec { .. })
    }
}
