#![forbid(unsafe_code)]

//! Test harness for wsync.
//!
//! Provides a recording transport, an error sink that keeps what it is
//! given, reference widget types and a [`Session`] bundling them with a
//! registry. Integration tests for the whole stack live in this crate's
//! `tests/` directory.
//!
//! Set `RUST_LOG=wsync_runtime=trace` to see protocol traffic while a test
//! runs.

pub mod fixtures;
pub mod recorder;

use std::rc::Rc;
use std::sync::Once;

pub use fixtures::{Controls, model_ref};
pub use recorder::{
    RecordedOpen, Recording, RecordingComm, RecordingErrorSink, RecordingTransport, SentMessage,
};

use wsync_runtime::{ModelRegistry, RegistryConfig};

/// Install a test-friendly `tracing` subscriber once per process.
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A registry wired to a recording transport and error sink, with the
/// reference types registered.
pub struct Session {
    pub registry: ModelRegistry,
    pub recording: Rc<Recording>,
    pub errors: Rc<RecordingErrorSink>,
    pub controls: Controls,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::with_transport(RecordingTransport::new(), RegistryConfig::default())
    }

    #[must_use]
    pub fn with_transport(transport: RecordingTransport, config: RegistryConfig) -> Self {
        init_test_logging();
        let recording = transport.recording();
        let errors = Rc::new(RecordingErrorSink::default());
        let registry = ModelRegistry::builder()
            .config(config)
            .transport(Rc::new(transport))
            .error_sink(Rc::clone(&errors) as Rc<dyn wsync_runtime::ErrorSink>)
            .build();
        let controls = Controls::register(&registry);
        Self {
            registry,
            recording,
            errors,
            controls,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
