#![forbid(unsafe_code)]

//! The model registry: live models by id and constructible types by key.
//!
//! One registry is created per host session and passed to every model it
//! owns. It carries the session's [`RegistryConfig`], the [`Transport`] used
//! to open channels and the [`ErrorSink`] that receives contained failures.
//!
//! # Invariants
//!
//! 1. At most one live model per id; inserting an id again replaces the
//!    entry in one step.
//! 2. A model is listed from the moment its channel opens until it closes.
//! 3. The front-end version check runs at most once per registry.
//!
//! Models hold the registry weakly. Open models are owned by the registry
//! until closed; [`ModelRegistry::close_all`] closes every one of them and
//! is the host's shutdown hook.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use bytes::Bytes;
use indexmap::IndexMap;
use serde::Deserialize;
use wsync_core::{
    BufferPath, ModelId, ModelLookup, Schema, TypeKey, Value, WireMap, WireValue, inject_buffers,
};

use crate::comm::{Comm, Transport};
use crate::config::{RegistryConfig, version_major};
use crate::error::{ErrorSink, ProtocolError, SyncError, TracingErrorSink};
use crate::model::Model;

/// Per-type setup run on every newly constructed model of that type.
pub type InitHook = dyn Fn(&Model);
/// Fallback lookup for types missing from the registered table.
pub type TypeResolver = dyn Fn(&TypeKey) -> Option<ModelType>;

/// A constructible model type: its schema and optional setup hook.
#[derive(Clone)]
pub struct ModelType {
    schema: Rc<Schema>,
    init: Option<Rc<InitHook>>,
}

impl ModelType {
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        Self {
            schema: Rc::new(schema),
            init: None,
        }
    }

    /// Run `init` on each new instance, before its channel opens.
    #[must_use]
    pub fn with_init(mut self, init: impl Fn(&Model) + 'static) -> Self {
        self.init = Some(Rc::new(init));
        self
    }

    #[must_use]
    pub fn schema(&self) -> &Rc<Schema> {
        &self.schema
    }
}

impl From<Schema> for ModelType {
    fn from(schema: Schema) -> Self {
        Self::new(schema)
    }
}

impl fmt::Debug for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelType")
            .field("key", self.schema.key())
            .field("init", &self.init.is_some())
            .finish()
    }
}

pub(crate) struct RegistryInner {
    config: RegistryConfig,
    transport: Option<Rc<dyn Transport>>,
    sink: Rc<dyn ErrorSink>,
    models: RefCell<IndexMap<ModelId, Model>>,
    types: RefCell<HashMap<TypeKey, ModelType>>,
    fallback: RefCell<Option<Rc<TypeResolver>>>,
    frontend_version: RefCell<Option<String>>,
    version_checked: Cell<bool>,
}

/// Shared handle to a registry. Cloning yields another handle.
#[derive(Clone)]
pub struct ModelRegistry {
    pub(crate) inner: Rc<RegistryInner>,
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("config", &self.inner.config)
            .field("models", &self.inner.models.borrow().len())
            .field("types", &self.inner.types.borrow().len())
            .field("transport", &self.inner.transport.is_some())
            .finish()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    /// A registry with default configuration and no transport.
    ///
    /// Models created here stay detached.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub(crate) fn from_inner(inner: Rc<RegistryInner>) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn transport(&self) -> Option<Rc<dyn Transport>> {
        self.inner.transport.clone()
    }

    /// Hand a contained failure to the host's error surface.
    pub fn report(&self, error: &SyncError) {
        self.inner.sink.report(error);
    }

    // -----------------------------------------------------------------
    // Types
    // -----------------------------------------------------------------

    /// Register a type under its schema's key. Returns the key.
    pub fn register(&self, model_type: impl Into<ModelType>) -> TypeKey {
        let model_type = model_type.into();
        let key = model_type.schema.key().clone();
        self.register_as(key.clone(), model_type);
        key
    }

    /// Register a type under an explicit key, replacing any previous entry.
    pub fn register_as(&self, key: TypeKey, model_type: impl Into<ModelType>) {
        tracing::debug!(key = %key, "registered model type");
        self.inner.types.borrow_mut().insert(key, model_type.into());
    }

    /// Install the lookup consulted when a key is not registered.
    pub fn set_fallback_resolver(
        &self,
        resolver: impl Fn(&TypeKey) -> Option<ModelType> + 'static,
    ) {
        *self.inner.fallback.borrow_mut() = Some(Rc::new(resolver));
    }

    /// Find the type for `key`: registered table first, then the fallback.
    #[must_use]
    pub fn resolve_type(&self, key: &TypeKey) -> Option<ModelType> {
        if let Some(found) = self.inner.types.borrow().get(key).cloned() {
            return Some(found);
        }
        let fallback = self.inner.fallback.borrow().clone();
        fallback.and_then(|resolve| resolve(key))
    }

    // -----------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------

    /// Construct a registered type with default values and open it.
    pub fn create(&self, key: &TypeKey) -> Result<Model, SyncError> {
        self.create_with(key, std::iter::empty::<(&str, Value)>())
    }

    /// Construct a registered type, assign `values`, and open it.
    ///
    /// The open message already carries the assigned values.
    pub fn create_with<'a, V: Into<Value>>(
        &self,
        key: &TypeKey,
        values: impl IntoIterator<Item = (&'a str, V)>,
    ) -> Result<Model, SyncError> {
        let model = self.create_detached(key)?;
        for (name, value) in values {
            model.set(name, value)?;
        }
        model.open()?;
        Ok(model)
    }

    /// Construct a registered type without opening it.
    pub fn create_detached(&self, key: &TypeKey) -> Result<Model, SyncError> {
        let model_type = self
            .resolve_type(key)
            .ok_or_else(|| ProtocolError::UnknownModelType(key.clone()))?;
        let model = Model::detached(self, Rc::clone(&model_type.schema));
        if let Some(init) = &model_type.init {
            init(&model);
        }
        Ok(model)
    }

    /// Construct the model announced by a front-end channel open.
    ///
    /// Checks the protocol major version in `metadata`, derives the type key
    /// from the identity attributes in the state, binds a new model to
    /// `comm`, then applies the announced state.
    pub fn handle_comm_opened(
        &self,
        comm: Rc<dyn Comm>,
        data: serde_json::Value,
        metadata: &serde_json::Value,
        buffers: Vec<Bytes>,
    ) -> Result<Model, SyncError> {
        #[derive(Deserialize)]
        struct OpenData {
            state: WireMap,
            #[serde(default)]
            buffer_paths: Vec<BufferPath>,
        }

        let found = metadata
            .get("version")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        let major = version_major(found);
        if major.is_none() || major != self.config().protocol_major() {
            return Err(ProtocolError::IncompatibleVersion {
                expected: self.config().protocol_version.clone(),
                found: found.to_owned(),
            }
            .into());
        }

        let OpenData {
            state,
            buffer_paths,
        } = serde_json::from_value(data).map_err(|e| ProtocolError::Malformed {
            method: "comm_open".to_owned(),
            reason: e.to_string(),
        })?;
        let key = TypeKey::from_state(&state).map_err(ProtocolError::MissingField)?;
        let model_type = self
            .resolve_type(&key)
            .ok_or(ProtocolError::UnknownModelType(key))?;

        let model = Model::bind(self, Rc::clone(&model_type.schema), Rc::clone(&comm));
        if let Some(init) = &model_type.init {
            init(&model);
        }
        let id = ModelId::new(comm.comm_id());
        self.insert(id.clone(), model.clone());

        let applied = Self::apply_open_state(&model, state, &buffer_paths, buffers);
        if let Err(error) = applied {
            self.remove(&id);
            return Err(error);
        }
        Ok(model)
    }

    fn apply_open_state(
        model: &Model,
        state: WireMap,
        buffer_paths: &[BufferPath],
        buffers: Vec<Bytes>,
    ) -> Result<(), SyncError> {
        let mut state = WireValue::Object(state);
        inject_buffers(&mut state, buffer_paths, buffers)?;
        let WireValue::Object(state) = state else {
            return Err(ProtocolError::Malformed {
                method: "comm_open".to_owned(),
                reason: "state is not an object".to_owned(),
            }
            .into());
        };
        model.set_state(state)
    }

    // -----------------------------------------------------------------
    // Live models
    // -----------------------------------------------------------------

    pub(crate) fn insert(&self, id: ModelId, model: Model) {
        let replaced = self.inner.models.borrow_mut().insert(id.clone(), model);
        tracing::debug!(model_id = %id, replaced = replaced.is_some(), "registered model");
    }

    pub(crate) fn remove(&self, id: &ModelId) -> Option<Model> {
        let removed = self.inner.models.borrow_mut().shift_remove(id);
        if removed.is_some() {
            tracing::debug!(model_id = %id, "deregistered model");
        }
        removed
    }

    #[must_use]
    pub fn get(&self, id: &ModelId) -> Option<Model> {
        self.inner.models.borrow().get(id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &ModelId) -> bool {
        self.inner.models.borrow().contains_key(id)
    }

    /// Live models in registration order.
    #[must_use]
    pub fn models(&self) -> Vec<Model> {
        self.inner.models.borrow().values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.models.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.models.borrow().is_empty()
    }

    /// Route an inbound message to the model owning `comm_id`.
    ///
    /// Every failure is reported to the error sink; nothing propagates to
    /// the transport.
    pub fn dispatch(&self, comm_id: &str, data: serde_json::Value, buffers: Vec<Bytes>) {
        let Some(model) = self.get(&ModelId::new(comm_id)) else {
            self.report(&ProtocolError::UnknownComm(comm_id.to_owned()).into());
            return;
        };
        if let Err(error) = model.handle_message(data, buffers) {
            self.report(&error);
        }
    }

    /// Close every live model.
    pub fn close_all(&self) {
        for model in self.models() {
            model.close();
        }
    }

    // -----------------------------------------------------------------
    // Front-end version
    // -----------------------------------------------------------------

    /// Record the version announced by the front-end.
    pub fn negotiate_frontend_version(&self, version: impl Into<String>) {
        let version = version.into();
        tracing::debug!(version = %version, "front-end version negotiated");
        *self.inner.frontend_version.borrow_mut() = Some(version);
    }

    #[must_use]
    pub fn frontend_version(&self) -> Option<String> {
        self.inner.frontend_version.borrow().clone()
    }

    /// Compare the negotiated front-end version against the expected major,
    /// once per registry. Problems are reported, never returned.
    pub(crate) fn check_frontend_version(&self) {
        if self.inner.version_checked.replace(true) {
            return;
        }
        let expected = self.config().expected_frontend_major;
        let error = match self.frontend_version() {
            None => Some(ProtocolError::FrontendNotDetected),
            Some(found) if version_major(&found) != Some(expected) => {
                Some(ProtocolError::IncompatibleVersion {
                    expected: expected.to_string(),
                    found,
                })
            }
            Some(_) => None,
        };
        if let Some(error) = error {
            self.report(&error.into());
        }
    }
}

impl ModelLookup for ModelRegistry {
    fn is_live(&self, id: &ModelId) -> bool {
        self.contains(id)
    }
}

/// Builder for [`ModelRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    config: RegistryConfig,
    transport: Option<Rc<dyn Transport>>,
    sink: Option<Rc<dyn ErrorSink>>,
}

impl RegistryBuilder {
    #[must_use]
    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Rc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Where contained failures go. Defaults to [`TracingErrorSink`].
    #[must_use]
    pub fn error_sink(mut self, sink: Rc<dyn ErrorSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    #[must_use]
    pub fn build(self) -> ModelRegistry {
        ModelRegistry {
            inner: Rc::new(RegistryInner {
                config: self.config,
                transport: self.transport,
                sink: self.sink.unwrap_or_else(|| Rc::new(TracingErrorSink)),
                models: RefCell::new(IndexMap::new()),
                types: RefCell::new(HashMap::new()),
                fallback: RefCell::new(None),
                frontend_version: RefCell::new(None),
                version_checked: Cell::new(false),
            }),
        }
    }
}
