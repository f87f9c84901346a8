#![forbid(unsafe_code)]

//! Wire message shapes.
//!
//! Inbound messages are parsed once into [`InboundMessage`] and dispatched
//! with a single exhaustive match. Outbound messages are built as
//! [`OutboundMessage`] and serialized with serde.
//!
//! | method | direction | fields |
//! |--------|-----------|--------|
//! | `backbone` | in | `sync_data`, `buffer_paths` or `buffer_keys` |
//! | `update` | in/out | `state`, `buffer_paths` (+ `buffers` outbound) |
//! | `request_state` | in | none |
//! | `custom` | in/out | `content` |
//! | `display` | out | none |

use serde::{Deserialize, Serialize};
use wsync_core::{BufferPath, WireMap, WireValue};

use crate::error::ProtocolError;

const METHODS: [&str; 4] = ["backbone", "update", "request_state", "custom"];

/// A message from the front-end.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Legacy state update. Buffers are located either by full path or, in
    /// the oldest form, by top-level attribute name.
    Backbone {
        sync_data: WireMap,
        #[serde(default)]
        buffer_paths: Option<Vec<BufferPath>>,
        #[serde(default)]
        buffer_keys: Option<Vec<String>>,
    },
    /// State update.
    Update {
        state: WireMap,
        #[serde(default)]
        buffer_paths: Vec<BufferPath>,
    },
    /// Ask for a full state resend.
    RequestState,
    /// Application payload, opaque to the protocol.
    Custom { content: serde_json::Value },
}

impl InboundMessage {
    /// Parse a message payload.
    ///
    /// A missing or non-string `method` is [`ProtocolError::MissingField`];
    /// an unrecognized one is [`ProtocolError::UnknownMethod`]; a known
    /// method with the wrong companion fields is [`ProtocolError::Malformed`].
    pub fn parse(data: serde_json::Value) -> Result<Self, ProtocolError> {
        let method = data
            .get("method")
            .and_then(serde_json::Value::as_str)
            .ok_or(ProtocolError::MissingField("method"))?
            .to_owned();
        if !METHODS.contains(&method.as_str()) {
            return Err(ProtocolError::UnknownMethod(method));
        }
        serde_json::from_value(data).map_err(|e| ProtocolError::Malformed {
            method,
            reason: e.to_string(),
        })
    }

    /// The method name, for logging.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::Backbone { .. } => "backbone",
            Self::Update { .. } => "update",
            Self::RequestState => "request_state",
            Self::Custom { .. } => "custom",
        }
    }
}

/// A message to the front-end.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Attribute values. `buffers[i]` names the attribute owning buffer `i`.
    Update {
        state: WireValue,
        buffer_paths: Vec<BufferPath>,
        buffers: Vec<String>,
    },
    Custom { content: serde_json::Value },
    Display,
}

impl OutboundMessage {
    /// Serialize to a JSON payload.
    ///
    /// Fails if a binary leaf was left in the state.
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// The `data` payload of an open message.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OpenPayload {
    pub state: WireValue,
    pub buffer_paths: Vec<BufferPath>,
}
