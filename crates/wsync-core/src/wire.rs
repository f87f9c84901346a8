#![forbid(unsafe_code)]

//! JSON-like wire values with binary leaves.
//!
//! [`WireValue`] is the shape attribute serializers produce and the shape
//! channel payloads carry. It is plain JSON plus one extra leaf kind,
//! [`WireValue::Binary`], which never reaches a JSON encoder: the buffer
//! codec moves binary leaves into a side list before sending and puts them
//! back after receiving.
//!
//! # Invariants
//!
//! 1. Object key order is insertion order and survives (de)serialization.
//! 2. Serializing a value that still holds a binary leaf fails with
//!    [`CodecError::UnextractedBinary`]; it is never silently encoded.
//! 3. Deserializing never produces a binary leaf.

use bytes::Bytes;
use indexmap::IndexMap;
use serde::de::Deserializer;
use serde::ser::{Error as _, Serializer};
use serde::{Deserialize, Serialize};

use crate::codec::CodecError;

/// Ordered map of wire values, keyed by attribute or field name.
pub type WireMap = IndexMap<String, WireValue>;

/// A JSON-like value that may contain binary leaves.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum WireValue {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Binary(Bytes),
    Array(Vec<WireValue>),
    Object(WireMap),
}

impl WireValue {
    /// Whether this value or any descendant is a binary leaf.
    #[must_use]
    pub fn has_binary(&self) -> bool {
        match self {
            Self::Binary(_) => true,
            Self::Array(items) => items.iter().any(Self::has_binary),
            Self::Object(map) => map.values().any(Self::has_binary),
            _ => false,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&WireMap> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[WireValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Convert to a `serde_json::Value`.
    ///
    /// Fails if a binary leaf is still present.
    pub fn to_json(&self) -> Result<serde_json::Value, CodecError> {
        use serde_json::Value as Json;
        Ok(match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Number(n) => Json::Number(n.clone()),
            Self::String(s) => Json::String(s.clone()),
            Self::Binary(_) => return Err(CodecError::UnextractedBinary),
            Self::Array(items) => Json::Array(
                items
                    .iter()
                    .map(Self::to_json)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Self::Object(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), v.to_json()?)))
                    .collect::<Result<serde_json::Map<_, _>, CodecError>>()?,
            ),
        })
    }
}

impl From<serde_json::Value> for WireValue {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => Self::Number(n),
            Json::String(s) => Self::String(s),
            Json::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Json::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&str> for WireValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<i64> for WireValue {
    fn from(i: i64) -> Self {
        Self::Number(i.into())
    }
}

impl From<bool> for WireValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Bytes> for WireValue {
    fn from(b: Bytes) -> Self {
        Self::Binary(b)
    }
}

impl From<WireMap> for WireValue {
    fn from(map: WireMap) -> Self {
        Self::Object(map)
    }
}

impl Serialize for WireValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => n.serialize(serializer),
            Self::String(s) => serializer.serialize_str(s),
            Self::Binary(_) => Err(S::Error::custom(CodecError::UnextractedBinary)),
            Self::Array(items) => items.serialize(serializer),
            Self::Object(map) => map.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for WireValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::from)
    }
}

/// Equality as seen after a JSON round trip.
///
/// Numbers compare numerically when either side is a float (`5 == 5.0`),
/// objects compare without regard to key order, binary leaves compare
/// bytewise.
#[must_use]
pub fn wire_eq(a: &WireValue, b: &WireValue) -> bool {
    match (a, b) {
        (WireValue::Number(x), WireValue::Number(y)) => {
            if x.is_f64() || y.is_f64() {
                matches!((x.as_f64(), y.as_f64()), (Some(p), Some(q)) if p == q)
            } else {
                x == y
            }
        }
        (WireValue::Array(x), WireValue::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| wire_eq(p, q))
        }
        (WireValue::Object(x), WireValue::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| wire_eq(v, w)))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_conversion_preserves_key_order() {
        let wire = WireValue::from(json!({"z": 1, "a": 2, "m": [true, null]}));
        let keys: Vec<_> = wire.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, ["z", "a", "m"]);
        assert_eq!(
            serde_json::to_string(&wire).unwrap(),
            r#"{"z":1,"a":2,"m":[true,null]}"#
        );
    }

    #[test]
    fn serializing_binary_fails() {
        let mut map = WireMap::new();
        map.insert("data".into(), WireValue::Binary(Bytes::from_static(b"\x00")));
        let err = serde_json::to_string(&WireValue::Object(map)).unwrap_err();
        assert!(err.to_string().contains("binary"));
    }

    #[test]
    fn to_json_rejects_nested_binary() {
        let wire = WireValue::Array(vec![WireValue::Binary(Bytes::new())]);
        assert_eq!(wire.to_json(), Err(CodecError::UnextractedBinary));
    }

    #[test]
    fn has_binary_finds_deep_leaves() {
        let wire = WireValue::from(json!({"a": [{"b": 1}]}));
        assert!(!wire.has_binary());
        let mut inner = WireMap::new();
        inner.insert("b".into(), WireValue::Binary(Bytes::from_static(b"x")));
        let wire = WireValue::Array(vec![WireValue::Null, WireValue::Object(inner)]);
        assert!(wire.has_binary());
    }

    #[test]
    fn wire_eq_is_numeric_for_floats() {
        let int = WireValue::from(json!(5));
        let float = WireValue::from(json!(5.0));
        assert_ne!(int, float);
        assert!(wire_eq(&int, &float));
        assert!(!wire_eq(&int, &WireValue::from(json!(5.5))));
    }

    #[test]
    fn wire_eq_ignores_key_order() {
        let a = WireValue::from(json!({"x": 1, "y": [1, 2]}));
        let b = WireValue::from(json!({"y": [1, 2.0], "x": 1}));
        assert!(wire_eq(&a, &b));
    }

    #[test]
    fn wire_eq_compares_binary_bytewise() {
        let a = WireValue::Binary(Bytes::from_static(b"abc"));
        let b = WireValue::Binary(Bytes::from(b"abc".to_vec()));
        let c = WireValue::Binary(Bytes::from_static(b"abd"));
        assert!(wire_eq(&a, &b));
        assert!(!wire_eq(&a, &c));
    }
}
