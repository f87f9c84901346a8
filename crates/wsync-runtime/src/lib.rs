#![forbid(unsafe_code)]

//! Model registry and state synchronization for wsync.
//!
//! # Role in wsync
//! `wsync-runtime` is the protocol engine. It keeps each backend [`Model`]
//! and its remote view consistent over a host-provided channel, suppresses
//! echoes of front-end writes, batches bulk edits and isolates application
//! callbacks.
//!
//! # Primary responsibilities
//! - **ModelRegistry**: live models by id, constructible types by key,
//!   remote opens, message routing.
//! - **Model**: open/close, state get/send/set, inbound dispatch, batching,
//!   observers, custom messages and display.
//! - **Comm / Transport**: the channel seam the host implements.
//! - **ErrorSink**: where contained failures are reported.
//!
//! # How it fits in the system
//! Values, schemas and the buffer codec come from `wsync-core`. The embed
//! layer (`wsync-embed`) reads models through this crate to build static
//! snapshots. Everything is single-threaded: models are `!Send` and all
//! dispatch happens on the host's event loop.

pub mod callbacks;
pub mod comm;
pub mod config;
pub mod error;
pub mod hold;
pub mod message;
pub mod model;
pub mod observe;
pub mod registry;

pub use callbacks::{CallbackId, CallbackResult};
pub use comm::{Comm, OpenRequest, Transport};
pub use config::{ConfigError, RegistryConfig};
pub use error::{
    ChannelUnavailable, ErrorSink, HandlerError, ProtocolError, SyncError, TracingErrorSink,
};
pub use hold::{HoldSync, NotificationHold};
pub use message::{InboundMessage, OpenPayload, OutboundMessage};
pub use model::{DisplayCallback, Lifecycle, Model, MsgCallback};
pub use observe::{Change, Subscription};
pub use registry::{ModelRegistry, ModelType, RegistryBuilder};
