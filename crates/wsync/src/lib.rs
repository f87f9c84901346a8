#![forbid(unsafe_code)]

//! wsync: keep backend widget models and their browser views in sync.
//!
//! This facade re-exports the workspace crates:
//! - [`core`]: attribute values, wire values, schemas, the buffer codec
//! - [`runtime`]: the model registry, models, channels and errors
//! - [`embed`]: static snapshots and HTML export (feature `embed`)
//!
//! Most hosts only need the [`prelude`].
//!
//! # Example
//!
//! ```
//! use wsync::prelude::*;
//!
//! let registry = ModelRegistry::new();
//! let key = registry.register(
//!     Schema::builder(TypeKey::widget("IntSliderModel", "IntSliderView"))
//!         .attribute(AttributeSpec::synced("value", 0))
//!         .build(),
//! );
//! // No transport configured: the model works locally until one is.
//! let slider = registry.create_detached(&key)?;
//! slider.set("value", 7)?;
//! assert_eq!(slider.get("value"), Some(Value::Int(7)));
//! # Ok::<(), SyncError>(())
//! ```

pub use wsync_core as core;
#[cfg(feature = "embed")]
pub use wsync_embed as embed;
pub use wsync_runtime as runtime;

pub use wsync_core::{AttributeSpec, ModelId, Schema, TypeKey, Value, WireValue};
pub use wsync_runtime::{Model, ModelRegistry, SyncError};

pub mod prelude {
    pub use wsync_core::serializers::model_refs;
    pub use wsync_core::{AttributeSpec, ModelId, Schema, TypeKey, Value, WireMap, WireValue};
    pub use wsync_runtime::{
        Change, Comm, ErrorSink, Model, ModelRegistry, ModelType, OpenRequest, RegistryConfig,
        SyncError, Transport,
    };

    #[cfg(feature = "embed")]
    pub use wsync_embed::{EmbedOptions, embed_minimal_html, embed_snippet};
}
