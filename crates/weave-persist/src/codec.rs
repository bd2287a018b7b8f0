#![forbid(unsafe_code)]

//! Serialization strategies between values and backing-store strings.

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CodecError;

/// Converts values of `T` to and from the strings a [`Backend`](crate::Backend)
/// stores.
pub trait Codec<T> {
    fn encode(&self, value: &T) -> Result<String, CodecError>;

    fn decode(&self, raw: &str) -> Result<T, CodecError>;
}

/// Stores strings verbatim. Decoding never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl Codec<String> for StringCodec {
    fn encode(&self, value: &String) -> Result<String, CodecError> {
        Ok(value.clone())
    }

    fn decode(&self, raw: &str) -> Result<String, CodecError> {
        Ok(raw.to_owned())
    }
}

/// Stores any number through its `Display` and `FromStr` forms.
///
/// Surrounding whitespace is ignored on decode.
pub struct NumberCodec<N>(PhantomData<fn() -> N>);

impl<N> NumberCodec<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<N> Default for NumberCodec<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> Clone for NumberCodec<N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<N> Copy for NumberCodec<N> {}

impl<N> fmt::Debug for NumberCodec<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NumberCodec<{}>", std::any::type_name::<N>())
    }
}

impl<N> Codec<N> for NumberCodec<N>
where
    N: FromStr + fmt::Display,
    N::Err: fmt::Display,
{
    fn encode(&self, value: &N) -> Result<String, CodecError> {
        Ok(value.to_string())
    }

    fn decode(&self, raw: &str) -> Result<N, CodecError> {
        raw.trim()
            .parse()
            .map_err(|err: N::Err| CodecError::invalid("number", format!("{raw:?}: {err}")))
    }
}

/// Stores `true` as `"1"` and `false` as the empty string.
///
/// Decoding also accepts `"true"`, `"false"` and `"0"`; anything else is
/// treated as corrupt. This is stricter than reading any non-empty string as
/// `true`: data such as `"yes"` or `"0"` written by a truthiness-based
/// encoder decodes to the fallback or to `false` rather than to `true`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoolCodec;

impl Codec<bool> for BoolCodec {
    fn encode(&self, value: &bool) -> Result<String, CodecError> {
        Ok(if *value { "1" } else { "" }.to_owned())
    }

    fn decode(&self, raw: &str) -> Result<bool, CodecError> {
        match raw {
            "1" | "true" => Ok(true),
            "" | "0" | "false" => Ok(false),
            other => Err(CodecError::invalid("boolean", format!("{other:?}"))),
        }
    }
}

/// Stores structured values as JSON via serde.
pub struct JsonCodec<T>(PhantomData<fn() -> T>);

impl<T> JsonCodec<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for JsonCodec<T> {}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JsonCodec<{}>", std::any::type_name::<T>())
    }
}

impl<T: Serialize + DeserializeOwned> Codec<T> for JsonCodec<T> {
    fn encode(&self, value: &T) -> Result<String, CodecError> {
        Ok(serde_json::to_string(value)?)
    }

    fn decode(&self, raw: &str) -> Result<T, CodecError> {
        Ok(serde_json::from_str(raw)?)
    }
}
