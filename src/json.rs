//! This module exports different types for JSON interactions. It keeps the
//! rest of the codebase independent from the concrete serde backend.

use serde::de::{Deserialize, DeserializeOwned};
use serde::ser::Serialize;

use crate::Result;

pub type Value = serde_json::Value;
pub type JsonMap = serde_json::Map<String, Value>;

pub use serde_json::json;

pub const NULL: Value = Value::Null;

pub(crate) fn to_string<T>(v: &T) -> Result<String>
where
    T: Serialize,
{
    Ok(serde_json::to_string(v)?)
}

pub(crate) fn from_str<'a, T>(s: &'a str) -> Result<T>
where
    T: Deserialize<'a>,
{
    Ok(serde_json::from_str(s)?)
}

pub(crate) fn from_slice<T>(v: &[u8]) -> Result<T>
where
    T: DeserializeOwned,
{
    Ok(serde_json::from_slice(v)?)
}
