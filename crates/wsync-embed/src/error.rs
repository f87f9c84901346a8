#![forbid(unsafe_code)]

use core::fmt;
use std::io;

use wsync_core::ModelId;
use wsync_runtime::SyncError;

/// Errors raised while snapshotting or rendering embedded state.
#[derive(Debug)]
pub enum EmbedError {
    /// Reading model state failed.
    Sync(SyncError),
    /// A root model has no id because its channel never opened.
    Unopened { model: String },
    /// A captured model references a model that is no longer live.
    DanglingReference { from: ModelId, to: ModelId },
    /// JSON rendering failed.
    Json(serde_json::Error),
    /// Writing the document failed.
    Io(io::Error),
    /// The script escaping pattern failed to compile.
    Pattern(regex::Error),
}

impl fmt::Display for EmbedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(e) => write!(f, "cannot read model state: {e}"),
            Self::Unopened { model } => {
                write!(f, "{model} has no id; open the model before embedding it")
            }
            Self::DanglingReference { from, to } => {
                write!(f, "model {from} references {to}, which is no longer live")
            }
            Self::Json(e) => write!(f, "cannot render embed JSON: {e}"),
            Self::Io(e) => write!(f, "cannot write embed document: {e}"),
            Self::Pattern(e) => write!(f, "cannot build script escaping pattern: {e}"),
        }
    }
}

impl std::error::Error for EmbedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sync(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Pattern(e) => Some(e),
            Self::Unopened { .. } | Self::DanglingReference { .. } => None,
        }
    }
}

impl From<SyncError> for EmbedError {
    fn from(e: SyncError) -> Self {
        Self::Sync(e)
    }
}

impl From<serde_json::Error> for EmbedError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<io::Error> for EmbedError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
