//! Pluggable JSON engine.
//!
//! The executor and [`Session`](crate::server::Session) only see the
//! object-safe [`JsonEngine`] capability, which works on `serde_json::Value`.
//! The typed helpers [`serialize`], [`deserialize`] and [`populate`] bridge
//! between an engine and concrete Rust types.

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JsonError {
    #[error("invalid JSON: {0}")]
    Syntax(String),
    #[error("JSON does not match the target type: {0}")]
    Shape(String),
    #[error("populate target must serialise to a JSON object")]
    NotAnObject,
}

/// Serialisation capability used to encode handler values and decode bodies.
pub trait JsonEngine: Send + Sync {
    fn to_vec(&self, value: &Value) -> Result<Vec<u8>, JsonError>;
    fn from_slice(&self, bytes: &[u8]) -> Result<Value, JsonError>;
}

/// Default engine backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerdeJsonEngine {
    pub pretty: bool,
}

impl JsonEngine for SerdeJsonEngine {
    fn to_vec(&self, value: &Value) -> Result<Vec<u8>, JsonError> {
        let out = if self.pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        };
        out.map_err(|e| JsonError::Syntax(e.to_string()))
    }

    fn from_slice(&self, bytes: &[u8]) -> Result<Value, JsonError> {
        serde_json::from_slice(bytes).map_err(|e| JsonError::Syntax(e.to_string()))
    }
}

/// Encode `value` with `engine`.
pub fn serialize<T: Serialize + ?Sized>(
    engine: &dyn JsonEngine,
    value: &T,
) -> Result<Vec<u8>, JsonError> {
    let tree = serde_json::to_value(value).map_err(|e| JsonError::Shape(e.to_string()))?;
    engine.to_vec(&tree)
}

/// Decode `bytes` into `T` with `engine`.
pub fn deserialize<T: DeserializeOwned>(engine: &dyn JsonEngine, bytes: &[u8]) -> Result<T, JsonError> {
    let tree = engine.from_slice(bytes)?;
    serde_json::from_value(tree).map_err(|e| JsonError::Shape(e.to_string()))
}

/// Overwrite fields of `target` with the members of the JSON object `bytes`.
///
/// When `include` is given only those members are applied; members listed in
/// `exclude` are never applied. Members absent from the JSON keep the value
/// already held by `target`.
pub fn populate<T: Serialize + DeserializeOwned>(
    engine: &dyn JsonEngine,
    bytes: &[u8],
    target: &mut T,
    include: Option<&[&str]>,
    exclude: Option<&[&str]>,
) -> Result<(), JsonError> {
    let Value::Object(incoming) = engine.from_slice(bytes)? else {
        return Err(JsonError::Shape("expected a JSON object".to_string()));
    };
    let Value::Object(mut current) =
        serde_json::to_value(&*target).map_err(|e| JsonError::Shape(e.to_string()))?
    else {
        return Err(JsonError::NotAnObject);
    };

    let include: Option<HashSet<&str>> = include.map(|i| i.iter().copied().collect());
    let exclude: HashSet<&str> = exclude.unwrap_or_default().iter().copied().collect();
    for (key, value) in incoming {
        if exclude.contains(key.as_str()) {
            continue;
        }
        if include.as_ref().is_some_and(|i| !i.contains(key.as_str())) {
            continue;
        }
        current.insert(key, value);
    }
    *target = serde_json::from_value(Value::Object(current))
        .map_err(|e| JsonError::Shape(e.to_string()))?;
    Ok(())
}

/// Build an object from key/value pairs; handy for ad-hoc handler replies.
#[must_use]
pub fn object<I, K>(pairs: I) -> Value
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    Value::Object(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect::<Map<_, _>>())
}
