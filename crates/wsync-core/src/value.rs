#![forbid(unsafe_code)]

//! Backend attribute values and model identities.
//!
//! A [`Value`] is what a model attribute holds on the backend side. It is
//! richer than the wire representation: it can hold a direct reference to
//! another live model ([`Value::Model`]) and raw binary data
//! ([`Value::Bytes`]). Attribute serializers turn values into
//! [`WireValue`](crate::WireValue)s and back.
//!
//! # Model references
//!
//! On the wire a model reference is the string `"IPY_MODEL_<id>"`. The
//! helpers on [`ModelId`] are the only place that prefix is spelled out.

use core::fmt;

use bytes::Bytes;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::wire::WireValue;

/// Prefix that marks a cross-model reference in serialized state.
pub const MODEL_REF_PREFIX: &str = "IPY_MODEL_";

/// Identifier of a live model.
///
/// The id is assigned by the channel implementation when the model's channel
/// opens and stays stable for the model's lifetime.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    /// Wrap a raw channel id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id string.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Encode as a wire reference: `"IPY_MODEL_<id>"`.
    #[must_use]
    pub fn to_reference(&self) -> String {
        format!("{MODEL_REF_PREFIX}{}", self.0)
    }

    /// Decode a wire reference. Returns `None` for strings without the
    /// prefix or with an empty id.
    #[must_use]
    pub fn from_reference(reference: &str) -> Option<Self> {
        reference
            .strip_prefix(MODEL_REF_PREFIX)
            .filter(|id| !id.is_empty())
            .map(Self::new)
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ModelId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Read-only view of which model ids are currently live.
///
/// Deserializers that resolve `"IPY_MODEL_<id>"` strings consult this to
/// reject references to models that do not exist.
pub trait ModelLookup {
    /// Whether `id` names a live model.
    fn is_live(&self, id: &ModelId) -> bool;
}

/// A lookup in which no model is live. Used when decoding detached state.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoModels;

impl ModelLookup for NoModels {
    fn is_live(&self, _id: &ModelId) -> bool {
        false
    }
}

impl ModelLookup for std::collections::HashSet<ModelId> {
    fn is_live(&self, id: &ModelId) -> bool {
        self.contains(id)
    }
}

/// A backend attribute value.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    /// Absent / `None`.
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Binary payload; travels as a side-channel buffer.
    Bytes(Bytes),
    List(Vec<Value>),
    Dict(IndexMap<String, Value>),
    /// Direct reference to another model.
    Model(ModelId),
}

impl Value {
    /// Human-readable kind name, used in validation messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
            Self::Model(_) => "model",
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_dict(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Self::Dict(map) => Some(map),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_model(&self) -> Option<&ModelId> {
        match self {
            Self::Model(id) => Some(id),
            _ => None,
        }
    }

    /// Structural encoding used when an attribute declares no `to_json`.
    ///
    /// Model references become `"IPY_MODEL_<id>"`, bytes become binary
    /// leaves, non-finite floats become `null`.
    #[must_use]
    pub fn to_wire(&self) -> WireValue {
        match self {
            Self::Null => WireValue::Null,
            Self::Bool(b) => WireValue::Bool(*b),
            Self::Int(i) => WireValue::Number((*i).into()),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(WireValue::Number)
                .unwrap_or(WireValue::Null),
            Self::Str(s) => WireValue::String(s.clone()),
            Self::Bytes(b) => WireValue::Binary(b.clone()),
            Self::List(items) => WireValue::Array(items.iter().map(Self::to_wire).collect()),
            Self::Dict(map) => WireValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_wire()))
                    .collect(),
            ),
            Self::Model(id) => WireValue::String(id.to_reference()),
        }
    }

    /// Structural decoding used when an attribute declares no `from_json`.
    ///
    /// Strings are kept as strings, including ones that look like model
    /// references; use the `model_refs` serializer to resolve those.
    #[must_use]
    pub fn from_wire(wire: &WireValue) -> Self {
        match wire {
            WireValue::Null => Self::Null,
            WireValue::Bool(b) => Self::Bool(*b),
            WireValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            WireValue::String(s) => Self::Str(s.clone()),
            WireValue::Binary(b) => Self::Bytes(b.clone()),
            WireValue::Array(items) => Self::List(items.iter().map(Self::from_wire).collect()),
            WireValue::Object(map) => Self::Dict(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_wire(v)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Self::Bytes(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(b))
    }
}

impl From<ModelId> for Value {
    fn from(id: ModelId) -> Self {
        Self::Model(id)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
