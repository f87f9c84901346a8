#![forbid(unsafe_code)]

//! Channel abstraction provided by the host.
//!
//! A [`Transport`] opens channels; a [`Comm`] is one open channel. Both are
//! implemented by the embedding host (a kernel session, a websocket bridge,
//! a test recorder). Sends are fire-and-forget and delivered in order.
//!
//! Inbound traffic does not go through these traits: the host routes it to
//! [`ModelRegistry::dispatch`](crate::ModelRegistry::dispatch) and
//! [`ModelRegistry::handle_comm_opened`](crate::ModelRegistry::handle_comm_opened).

use std::rc::Rc;

use bytes::Bytes;

use crate::error::ChannelUnavailable;

/// One open bidirectional channel.
pub trait Comm {
    /// Unique channel id; becomes the model id.
    fn comm_id(&self) -> &str;

    /// Send a JSON payload with ordered binary buffers.
    fn send(&self, data: serde_json::Value, buffers: Vec<Bytes>);

    /// Close the channel. Called at most once per model.
    fn close(&self);
}

/// Everything the open message carries.
#[derive(Clone, Debug, PartialEq)]
pub struct OpenRequest {
    pub target_name: String,
    pub data: serde_json::Value,
    pub metadata: serde_json::Value,
    pub buffers: Vec<Bytes>,
}

/// Factory for new channels.
pub trait Transport {
    /// Open a channel announcing a new model.
    fn open(&self, request: OpenRequest) -> Result<Rc<dyn Comm>, ChannelUnavailable>;

    /// Whether the open message can carry binary buffers. When `false`, the
    /// model opens with buffer-free state and follows up with a full update.
    fn supports_open_buffers(&self) -> bool {
        true
    }
}
