#![forbid(unsafe_code)]

//! Error taxonomy and the host error surface.
//!
//! # Propagation
//!
//! | Error | Origin | Handling |
//! |-------|--------|----------|
//! | [`ProtocolError`] | Malformed or unrecognized inbound message | Reported, message dropped |
//! | [`HandlerError`] | Application callback returned `Err` or panicked | Reported, other callbacks still run |
//! | [`CodecError`] | Buffer path does not resolve | Returned to the dispatch caller |
//! | [`AttributeError`] | Value failed validation or conversion | Returned to the caller of `set`/`set_state` |
//! | [`ChannelUnavailable`] | No transport, or the transport refused | Returned from `open`; model stays usable detached |
//!
//! "Reported" means handed to the registry's [`ErrorSink`], which the host
//! supplies. The default sink logs through `tracing`.

use core::fmt;

use wsync_core::{AttributeError, CodecError, TypeKey};

/// A malformed or unrecognized inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A required field is absent.
    MissingField(&'static str),
    /// The `method` field names no known message kind.
    UnknownMethod(String),
    /// The message has the right method but the wrong shape.
    Malformed { method: String, reason: String },
    /// The remote side speaks a different protocol major version.
    IncompatibleVersion { expected: String, found: String },
    /// A remote open named a type nobody registered.
    UnknownModelType(TypeKey),
    /// A message arrived for a channel id with no live model.
    UnknownComm(String),
    /// A view was displayed before any front-end announced its version.
    FrontendNotDetected,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "message is missing required field '{field}'"),
            Self::UnknownMethod(method) => {
                write!(f, "unknown front-end to back-end widget msg with method \"{method}\"")
            }
            Self::Malformed { method, reason } => {
                write!(f, "malformed \"{method}\" message: {reason}")
            }
            Self::IncompatibleVersion { expected, found } => write!(
                f,
                "incompatible widget protocol versions: received {found:?}, expected {expected:?}"
            ),
            Self::UnknownModelType(key) => write!(f, "no model type registered for {key}"),
            Self::UnknownComm(id) => write!(f, "no live model for comm id {id}"),
            Self::FrontendNotDetected => write!(
                f,
                "widget front-end not detected; it may not be installed or enabled"
            ),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// An application callback failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    /// Which registry the callback belongs to (`"msg"`, `"displayed"`).
    pub kind: &'static str,
    /// Registration id of the failing callback.
    pub callback: u64,
    /// Error text, or the panic payload.
    pub message: String,
    /// Whether the callback panicked rather than returning `Err`.
    pub panicked: bool,
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let how = if self.panicked { "panicked" } else { "failed" };
        write!(
            f,
            "{} callback #{} {how}: {}",
            self.kind, self.callback, self.message
        )
    }
}

impl std::error::Error for HandlerError {}

/// No channel could be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelUnavailable {
    pub reason: String,
}

impl ChannelUnavailable {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ChannelUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel unavailable: {}", self.reason)
    }
}

impl std::error::Error for ChannelUnavailable {}

/// Umbrella error for model and registry operations.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncError {
    Protocol(ProtocolError),
    Handler(HandlerError),
    Codec(CodecError),
    Attribute(AttributeError),
    ChannelUnavailable(ChannelUnavailable),
    /// The attribute is not declared by the model's schema.
    UnknownAttribute { model: String, attribute: String },
    /// The model has been closed; channel operations are no longer allowed.
    Closed,
    /// JSON encoding of an outbound message failed.
    Json(String),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::Handler(e) => write!(f, "handler error: {e}"),
            Self::Codec(e) => write!(f, "codec error: {e}"),
            Self::Attribute(e) => write!(f, "attribute error: {e}"),
            Self::ChannelUnavailable(e) => write!(f, "{e}"),
            Self::UnknownAttribute { model, attribute } => {
                write!(f, "{model} has no attribute '{attribute}'")
            }
            Self::Closed => write!(f, "model is closed"),
            Self::Json(reason) => write!(f, "json error: {reason}"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Protocol(e) => Some(e),
            Self::Handler(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::Attribute(e) => Some(e),
            Self::ChannelUnavailable(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<HandlerError> for SyncError {
    fn from(e: HandlerError) -> Self {
        Self::Handler(e)
    }
}

impl From<CodecError> for SyncError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<AttributeError> for SyncError {
    fn from(e: AttributeError) -> Self {
        Self::Attribute(e)
    }
}

impl From<ChannelUnavailable> for SyncError {
    fn from(e: ChannelUnavailable) -> Self {
        Self::ChannelUnavailable(e)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}

/// The host's error-reporting surface.
///
/// Errors passed here have already been contained; the sink only makes them
/// visible (log, traceback widget, notebook output).
pub trait ErrorSink {
    fn report(&self, error: &SyncError);
}

/// Default sink: logs through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, error: &SyncError) {
        match error {
            SyncError::Protocol(e) => tracing::warn!(error = %e, "dropped widget message"),
            SyncError::Handler(e) => tracing::error!(error = %e, "widget callback failed"),
            other => tracing::error!(error = %other, "widget synchronization error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let e = SyncError::from(ProtocolError::UnknownMethod("frobnicate".into()));
        assert!(e.to_string().contains("\"frobnicate\""));

        let e = HandlerError {
            kind: "msg",
            callback: 3,
            message: "boom".into(),
            panicked: true,
        };
        assert_eq!(e.to_string(), "msg callback #3 panicked: boom");
    }

    #[test]
    fn source_chain() {
        use std::error::Error as _;
        let e = SyncError::from(ChannelUnavailable::new("no kernel"));
        assert!(e.source().is_some());
        assert!(SyncError::Closed.source().is_none());
    }
}
