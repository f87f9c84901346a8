#![forbid(unsafe_code)]

//! The synchronization engine for one model.
//!
//! A [`Model`] holds attribute values described by a [`Schema`], owns at most
//! one channel, and keeps the remote view in step with local writes while
//! applying remote writes without echoing them back.
//!
//! # Lifecycle
//!
//! `Unopened -> Open -> Closed`. [`Model::open`] is idempotent;
//! [`Model::close`] is safe to repeat. `Closed` is terminal: reopening fails
//! with [`SyncError::Closed`]. Closing is explicit; dropping the last handle
//! does not close the channel, and an open model stays alive in its
//! registry until closed.
//!
//! # Invariants
//!
//! 1. **No echo**: while [`Model::set_state`] applies a remote write, an
//!    attribute whose wire encoding equals the value the remote asserted is
//!    not sent back.
//! 2. **Convergence**: if the applied value encodes differently from what
//!    the remote asserted (a validator or transform normalized it), exactly
//!    one update carrying the applied value is sent.
//! 3. **Atomic visibility**: observers of a remote write see every attribute
//!    of the message already assigned.
//! 4. **All or nothing**: if any attribute of a remote write fails
//!    conversion or validation, the attributes already assigned are restored
//!    and their notifications discarded.
//! 5. **Coalescing**: writes inside one [`Model::hold_sync`] scope leave as
//!    a single update when the outermost scope ends, on every exit path.
//! 6. **Re-entrancy**: no `RefCell` borrow is held while calling out to
//!    observers, callbacks, serializers or the channel.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Unknown method / missing field | Bad inbound message | Reported as [`ProtocolError`], dropped |
//! | Callback error or panic | Application code | Reported as [`HandlerError`](crate::HandlerError), others still run |
//! | Validation failure in `set_state` | Remote sent an invalid value | Rolled back, returned |
//! | Buffer path mismatch | Codec mismatch | [`SyncError::Codec`] returned |
//! | No transport | Detached host | [`SyncError::ChannelUnavailable`] from `open` |
//! | Send with no channel | Model unopened or closed | Silently dropped |

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use bytes::Bytes;
use indexmap::{IndexMap, IndexSet};
use serde_json::json;
use wsync_core::{
    AttributeSpec, ModelId, ModelLookup, NoModels, PathSegment, Schema, Value, WireMap, WireValue,
    extract_buffers, inject_buffers, wire_eq,
};

use crate::callbacks::{CallbackId, CallbackList, CallbackResult, invoke_isolated};
use crate::comm::{Comm, OpenRequest};
use crate::error::{ChannelUnavailable, ErrorSink, ProtocolError, SyncError, TracingErrorSink};
use crate::hold::{HoldSync, NotificationHold, PropertyLock};
use crate::message::{InboundMessage, OpenPayload, OutboundMessage};
use crate::observe::{Change, Observers, Subscription};
use crate::registry::{ModelRegistry, RegistryInner};

/// Handler for `custom` messages: `(model, content, buffers)`.
pub type MsgCallback = dyn Fn(&Model, &serde_json::Value, &[Bytes]) -> CallbackResult;
/// Handler run after the model is displayed.
pub type DisplayCallback = dyn Fn(&Model) -> CallbackResult;

/// Channel state of a model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Unopened,
    Open,
    Closed,
}

pub(crate) struct ModelState {
    schema: Rc<Schema>,
    values: IndexMap<String, Value>,
    lifecycle: Lifecycle,
    comm: Option<Rc<dyn Comm>>,
    id: Option<ModelId>,
    pub(crate) property_lock: WireMap,
    pub(crate) hold_depth: usize,
    pub(crate) states_to_send: IndexSet<String>,
    pub(crate) notify_depth: usize,
    pub(crate) pending_changes: IndexMap<String, Change>,
    observers: Observers,
    msg_callbacks: CallbackList<MsgCallback>,
    display_callbacks: CallbackList<DisplayCallback>,
}

/// Shared handle to one synchronized model.
///
/// Cloning yields another handle to the same model.
#[derive(Clone)]
pub struct Model {
    pub(crate) inner: Rc<RefCell<ModelState>>,
    registry: Weak<RegistryInner>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("Model")
            .field("type", &state.schema.key().model_name)
            .field("id", &state.id)
            .field("lifecycle", &state.lifecycle)
            .finish_non_exhaustive()
    }
}

impl Model {
    // -----------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------

    /// Construct a model and open its channel.
    pub fn new(registry: &ModelRegistry, schema: Rc<Schema>) -> Result<Self, SyncError> {
        let model = Self::detached(registry, schema);
        model.open()?;
        Ok(model)
    }

    /// Construct a model without opening a channel.
    ///
    /// The model is fully usable locally; [`Model::open`] connects it later.
    #[must_use]
    pub fn detached(registry: &ModelRegistry, schema: Rc<Schema>) -> Self {
        let values = schema
            .attributes()
            .map(|spec| (spec.name().to_owned(), spec.default_value().clone()))
            .collect();
        Self {
            inner: Rc::new(RefCell::new(ModelState {
                schema,
                values,
                lifecycle: Lifecycle::Unopened,
                comm: None,
                id: None,
                property_lock: WireMap::new(),
                hold_depth: 0,
                states_to_send: IndexSet::new(),
                notify_depth: 0,
                pending_changes: IndexMap::new(),
                observers: Observers::default(),
                msg_callbacks: CallbackList::new("msg"),
                display_callbacks: CallbackList::new("displayed"),
            })),
            registry: Rc::downgrade(&registry.inner),
        }
    }

    /// Construct a model already bound to a remotely opened channel.
    pub(crate) fn bind(registry: &ModelRegistry, schema: Rc<Schema>, comm: Rc<dyn Comm>) -> Self {
        let model = Self::detached(registry, schema);
        {
            let mut state = model.inner.borrow_mut();
            state.id = Some(ModelId::new(comm.comm_id()));
            state.comm = Some(comm);
            state.lifecycle = Lifecycle::Open;
        }
        model
    }

    // -----------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------

    /// The model id; known once the channel has opened.
    #[must_use]
    pub fn id(&self) -> Option<ModelId> {
        self.inner.borrow().id.clone()
    }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.borrow().lifecycle
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.lifecycle() == Lifecycle::Open
    }

    #[must_use]
    pub fn schema(&self) -> Rc<Schema> {
        Rc::clone(&self.inner.borrow().schema)
    }

    /// Current value of an attribute.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner.borrow().values.get(name).cloned()
    }

    /// Whether two handles refer to the same model.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The owning registry, if it is still alive.
    #[must_use]
    pub fn registry(&self) -> Option<ModelRegistry> {
        self.registry.upgrade().map(ModelRegistry::from_inner)
    }

    fn label(&self) -> String {
        self.inner
            .borrow()
            .id
            .as_ref()
            .map_or_else(|| "<unopened>".to_owned(), ToString::to_string)
    }

    pub(crate) fn report(&self, error: &SyncError) {
        match self.registry() {
            Some(registry) => registry.report(error),
            None => TracingErrorSink.report(error),
        }
    }

    // -----------------------------------------------------------------
    // Local writes and notification
    // -----------------------------------------------------------------

    /// Validate and assign an attribute.
    ///
    /// A change to a synchronized attribute is sent to the front-end unless
    /// it is being applied from the front-end or a sync hold is active.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<(), SyncError> {
        let schema = self.schema();
        let spec = schema
            .attribute(name)
            .ok_or_else(|| SyncError::UnknownAttribute {
                model: schema.key().model_name.clone(),
                attribute: name.to_owned(),
            })?;
        let value = spec.check(value.into())?;
        if let Some(change) = self.store(name, value) {
            self.notify(change);
        }
        Ok(())
    }

    /// Assign without validation; returns the change, if the value differs.
    fn store(&self, name: &str, value: Value) -> Option<Change> {
        let mut state = self.inner.borrow_mut();
        let old = state.values.insert(name.to_owned(), value.clone())?;
        (old != value).then(|| Change {
            name: name.to_owned(),
            old,
            new: value,
        })
    }

    fn notify(&self, change: Change) {
        {
            let mut state = self.inner.borrow_mut();
            if state.notify_depth > 0 {
                match state.pending_changes.get_mut(&change.name) {
                    Some(pending) => pending.new = change.new,
                    None => {
                        state.pending_changes.insert(change.name.clone(), change);
                    }
                }
                return;
            }
        }
        self.dispatch_change(&change);
    }

    /// Send (if needed) and then notify observers.
    pub(crate) fn dispatch_change(&self, change: &Change) {
        let synced = self.schema().is_synced(&change.name);
        if synced && self.should_send(&change.name, &change.new) {
            let names = [change.name.as_str()];
            if let Err(error) = self.send_state(Some(&names[..])) {
                self.report(&error);
            }
        }
        let observers = self.inner.borrow_mut().observers.matching(&change.name);
        for observer in observers {
            observer(change);
        }
    }

    /// Decide whether a change to `name` goes out now.
    ///
    /// Returns `false` when the attribute is locked by an inbound write and
    /// `value` encodes to the locked wire value (an echo), or when a sync
    /// hold is active, in which case the name is queued for the batch.
    pub fn should_send(&self, name: &str, value: &Value) -> bool {
        let (locked, schema) = {
            let state = self.inner.borrow();
            (
                state.property_lock.get(name).cloned(),
                Rc::clone(&state.schema),
            )
        };
        if let (Some(locked), Some(spec)) = (locked, schema.attribute(name)) {
            if spec.encode(value).is_ok_and(|wire| wire_eq(&wire, &locked)) {
                tracing::trace!(model_id = %self.label(), attribute = name, "suppressed echo");
                let mut state = self.inner.borrow_mut();
                if state.hold_depth > 0 {
                    state.states_to_send.shift_remove(name);
                }
                return false;
            }
        }
        let mut state = self.inner.borrow_mut();
        if state.hold_depth > 0 {
            state.states_to_send.insert(name.to_owned());
            tracing::trace!(attribute = name, "queued for batched send");
            return false;
        }
        true
    }

    /// Subscribe to changes of one attribute, or of all with `None`.
    pub fn observe(
        &self,
        name: Option<&str>,
        callback: impl Fn(&Change) + 'static,
    ) -> Subscription {
        self.inner.borrow_mut().observers.subscribe(name, callback)
    }

    // -----------------------------------------------------------------
    // Batching
    // -----------------------------------------------------------------

    /// Defer outbound updates until the returned guard drops.
    ///
    /// Nested holds are no-ops; the outermost one sends a single update
    /// with every attribute changed meanwhile. Use [`HoldSync::finish`] to
    /// observe a send failure instead of having it reported.
    pub fn hold_sync(&self) -> HoldSync {
        HoldSync::acquire(self.clone())
    }

    /// Run `f` under [`Model::hold_sync`].
    pub fn with_hold_sync<R>(&self, f: impl FnOnce() -> R) -> Result<R, SyncError> {
        let hold = self.hold_sync();
        let result = f();
        hold.finish()?;
        Ok(result)
    }

    /// Defer change notifications until the returned guard drops.
    ///
    /// Changes to the same attribute coalesce; a net no-op change is
    /// dropped.
    pub fn hold_notifications(&self) -> NotificationHold {
        NotificationHold::acquire(self.clone())
    }

    /// Send the queued attribute names in one update.
    pub(crate) fn flush_queued(&self) -> Result<(), SyncError> {
        let queued: Vec<String> = std::mem::take(&mut self.inner.borrow_mut().states_to_send)
            .into_iter()
            .collect();
        if queued.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = queued.iter().map(String::as_str).collect();
        self.send_state(Some(names.as_slice()))
    }

    // -----------------------------------------------------------------
    // Channel lifecycle
    // -----------------------------------------------------------------

    /// Open the channel, announcing the full synchronized state.
    ///
    /// No-op when already open. Binary buffers ride on the open message
    /// unless the configuration or the transport rule it out, in which case
    /// a full update follows the open.
    pub fn open(&self) -> Result<(), SyncError> {
        match self.lifecycle() {
            Lifecycle::Open => return Ok(()),
            Lifecycle::Closed => return Err(SyncError::Closed),
            Lifecycle::Unopened => {}
        }
        let registry = self
            .registry()
            .ok_or_else(|| ChannelUnavailable::new("model registry has been dropped"))?;
        let transport = registry
            .transport()
            .ok_or_else(|| ChannelUnavailable::new("no transport configured"))?;
        let config = registry.config();

        let (state, buffer_paths, buffers) =
            extract_buffers(WireValue::Object(self.get_state(None)?)).into_parts();
        let carry_buffers = config.send_open_buffers && transport.supports_open_buffers();
        let follow_up = !carry_buffers && !buffers.is_empty();
        let (buffer_paths, buffers) = if follow_up {
            (Vec::new(), Vec::new())
        } else {
            (buffer_paths, buffers)
        };

        let request = OpenRequest {
            target_name: config.target_name.clone(),
            data: serde_json::to_value(OpenPayload {
                state,
                buffer_paths,
            })?,
            metadata: json!({ "version": config.protocol_version }),
            buffers,
        };
        let comm = transport.open(request)?;
        let id = ModelId::new(comm.comm_id());
        {
            let mut state = self.inner.borrow_mut();
            state.comm = Some(comm);
            state.id = Some(id.clone());
            state.lifecycle = Lifecycle::Open;
        }
        registry.insert(id.clone(), self.clone());
        tracing::debug!(model_id = %id, follow_up, "opened model channel");

        if follow_up {
            self.send_state(None)?;
        }
        Ok(())
    }

    /// Close the channel and leave the registry. Idempotent.
    ///
    /// The id goes with the channel: a closed model has no id.
    pub fn close(&self) {
        let (comm, id) = {
            let mut state = self.inner.borrow_mut();
            if state.lifecycle != Lifecycle::Open {
                return;
            }
            state.lifecycle = Lifecycle::Closed;
            (state.comm.take(), state.id.take())
        };
        if let (Some(registry), Some(id)) = (self.registry(), id.as_ref()) {
            registry.remove(id);
        }
        if let Some(comm) = comm {
            comm.close();
        }
        tracing::debug!(model_id = ?id, "closed model channel");
    }

    // -----------------------------------------------------------------
    // State
    // -----------------------------------------------------------------

    /// Wire encoding of the requested attributes (all synchronized ones by
    /// default). Binary leaves are left in place.
    pub fn get_state(&self, keys: Option<&[&str]>) -> Result<WireMap, SyncError> {
        let (schema, values) = {
            let state = self.inner.borrow();
            let names: Vec<String> = match keys {
                Some(keys) => keys.iter().map(|k| (*k).to_owned()).collect(),
                None => state.schema.sync_keys().map(str::to_owned).collect(),
            };
            let values: Vec<(String, Option<Value>)> = names
                .into_iter()
                .map(|name| {
                    let value = state.values.get(&name).cloned();
                    (name, value)
                })
                .collect();
            (Rc::clone(&state.schema), values)
        };

        let mut wire = WireMap::with_capacity(values.len());
        for (name, value) in values {
            let (Some(spec), Some(value)) = (schema.attribute(&name), value) else {
                return Err(SyncError::UnknownAttribute {
                    model: schema.key().model_name.clone(),
                    attribute: name,
                });
            };
            let encoded = spec.encode(&value)?;
            wire.insert(name, encoded);
        }
        Ok(wire)
    }

    /// Full synchronized state, optionally without attributes whose wire
    /// encoding equals the encoding of their declared default.
    pub fn state_snapshot(&self, drop_defaults: bool) -> Result<WireMap, SyncError> {
        let mut state = self.get_state(None)?;
        if drop_defaults {
            let schema = self.schema();
            state.retain(|name, wire| {
                !schema.attribute(name).is_some_and(|spec| {
                    spec.encode(spec.default_value())
                        .is_ok_and(|default| wire_eq(&default, wire))
                })
            });
        }
        Ok(state)
    }

    /// Send the requested attributes (all synchronized ones by default).
    ///
    /// Locked attributes have their lock refreshed to the sent value. No-op
    /// without an open channel or when nothing is requested.
    pub fn send_state(&self, keys: Option<&[&str]>) -> Result<(), SyncError> {
        if self.inner.borrow().comm.is_none() {
            return Ok(());
        }
        let state = self.get_state(keys)?;
        if state.is_empty() {
            return Ok(());
        }
        {
            let mut inner = self.inner.borrow_mut();
            for (name, wire) in &state {
                if let Some(locked) = inner.property_lock.get_mut(name) {
                    *locked = wire.clone();
                }
            }
        }
        let attributes = state.len();
        let (state, buffer_paths, buffers) = extract_buffers(WireValue::Object(state)).into_parts();
        let owners = buffer_paths
            .iter()
            .map(|path| match path.first() {
                Some(PathSegment::Key(name)) => name.clone(),
                _ => String::new(),
            })
            .collect();
        tracing::debug!(
            model_id = %self.label(),
            attributes,
            buffers = buffers.len(),
            "sending state update"
        );
        self.send_message(
            &OutboundMessage::Update {
                state,
                buffer_paths,
                buffers: owners,
            },
            buffers,
        )
    }

    /// Apply a state written by the front-end.
    ///
    /// Only synchronized attributes present in `state` are touched. The
    /// incoming wire values are locked for the duration so that applying
    /// them does not echo; notifications fire once every attribute is
    /// assigned. Afterwards any attribute whose applied value encodes
    /// differently from what was received is sent back.
    pub fn set_state(&self, state: WireMap) -> Result<(), SyncError> {
        let _span = tracing::debug_span!(
            "model_set_state",
            model_id = %self.label(),
            attrs = state.len()
        )
        .entered();

        let _lock = PropertyLock::acquire(self.clone(), &state);
        {
            let _hold = self.hold_notifications();
            self.apply_state(&state)?;
        }
        self.resync_diverged(&state)
    }

    fn apply_state(&self, state: &WireMap) -> Result<(), SyncError> {
        let schema = self.schema();
        let registry = self.registry();
        let lookup: &dyn ModelLookup = match &registry {
            Some(registry) => registry,
            None => &NoModels,
        };

        let mut applied: Vec<(String, Value)> = Vec::new();
        for (name, wire) in state {
            let Some(spec) = schema.attribute(name).filter(|spec| spec.is_synced()) else {
                continue;
            };
            match spec.decode(wire, lookup).and_then(|value| spec.check(value)) {
                Ok(value) => {
                    let old = self.get(name).unwrap_or_default();
                    if let Some(change) = self.store(name, value) {
                        self.notify(change);
                    }
                    applied.push((name.clone(), old));
                }
                Err(error) => {
                    self.roll_back(applied);
                    return Err(error.into());
                }
            }
        }
        Ok(())
    }

    fn roll_back(&self, applied: Vec<(String, Value)>) {
        let mut state = self.inner.borrow_mut();
        for (name, old) in applied.into_iter().rev() {
            if let Some(pending) = state.pending_changes.get_mut(&name) {
                if pending.old == old {
                    state.pending_changes.shift_remove(&name);
                } else {
                    pending.new = old.clone();
                }
            }
            state.values.insert(name, old);
        }
    }

    fn resync_diverged(&self, incoming: &WireMap) -> Result<(), SyncError> {
        let schema = self.schema();
        let mut diverged = Vec::new();
        for name in incoming.keys() {
            let Some(spec) = schema.attribute(name).filter(|spec| spec.is_synced()) else {
                continue;
            };
            let locked = self.inner.borrow().property_lock.get(name).cloned();
            let (Some(locked), Some(value)) = (locked, self.get(name)) else {
                continue;
            };
            if !spec.encode(&value).is_ok_and(|wire| wire_eq(&wire, &locked)) {
                diverged.push(name.as_str());
            }
        }
        if diverged.is_empty() {
            return Ok(());
        }
        {
            let mut state = self.inner.borrow_mut();
            if state.hold_depth > 0 {
                state
                    .states_to_send
                    .extend(diverged.iter().map(|name| (*name).to_owned()));
                return Ok(());
            }
        }
        tracing::debug!(
            model_id = %self.label(),
            attributes = ?diverged,
            "resending normalized values"
        );
        self.send_state(Some(diverged.as_slice()))
    }

    // -----------------------------------------------------------------
    // Inbound dispatch
    // -----------------------------------------------------------------

    /// Handle one inbound channel message.
    ///
    /// Protocol errors are reported and the message dropped. Codec and
    /// validation errors are returned.
    pub fn handle_message(
        &self,
        data: serde_json::Value,
        buffers: Vec<Bytes>,
    ) -> Result<(), SyncError> {
        let message = match InboundMessage::parse(data) {
            Ok(message) => message,
            Err(error) => {
                self.report(&error.into());
                return Ok(());
            }
        };
        tracing::debug!(model_id = %self.label(), method = message.method(), "received message");
        match message {
            InboundMessage::Backbone {
                sync_data,
                buffer_paths,
                buffer_keys,
            } => {
                let paths = match (buffer_paths, buffer_keys) {
                    (Some(paths), _) => paths,
                    (None, Some(keys)) => keys
                        .into_iter()
                        .map(|key| vec![PathSegment::Key(key)])
                        .collect(),
                    (None, None) => Vec::new(),
                };
                self.apply_remote(sync_data, &paths, buffers, "backbone")
            }
            InboundMessage::Update {
                state,
                buffer_paths,
            } => self.apply_remote(state, &buffer_paths, buffers, "update"),
            InboundMessage::RequestState => self.send_state(None),
            InboundMessage::Custom { content } => {
                self.run_msg_callbacks(&content, &buffers);
                Ok(())
            }
        }
    }

    fn apply_remote(
        &self,
        state: WireMap,
        paths: &[wsync_core::BufferPath],
        buffers: Vec<Bytes>,
        method: &str,
    ) -> Result<(), SyncError> {
        let mut state = WireValue::Object(state);
        inject_buffers(&mut state, paths, buffers)?;
        let WireValue::Object(state) = state else {
            return Err(ProtocolError::Malformed {
                method: method.to_owned(),
                reason: "state is not an object".to_owned(),
            }
            .into());
        };
        self.set_state(state)
    }

    // -----------------------------------------------------------------
    // Schema extension
    // -----------------------------------------------------------------

    /// Add attributes after construction.
    ///
    /// New attributes take their defaults; synchronized ones are sent in a
    /// single update right away.
    pub fn add_traits(
        &self,
        specs: impl IntoIterator<Item = AttributeSpec>,
    ) -> Result<(), SyncError> {
        let mut synced = Vec::new();
        {
            let mut state = self.inner.borrow_mut();
            let state = &mut *state;
            let schema = Rc::make_mut(&mut state.schema);
            for spec in specs {
                if spec.is_synced() {
                    synced.push(spec.name().to_owned());
                }
                state
                    .values
                    .insert(spec.name().to_owned(), spec.default_value().clone());
                schema.insert(spec);
            }
        }
        if synced.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = synced.iter().map(String::as_str).collect();
        self.send_state(Some(names.as_slice()))
    }

    // -----------------------------------------------------------------
    // Custom messages and callbacks
    // -----------------------------------------------------------------

    /// Send a `custom` message. No-op without an open channel.
    pub fn send(&self, content: serde_json::Value, buffers: Vec<Bytes>) -> Result<(), SyncError> {
        self.send_message(&OutboundMessage::Custom { content }, buffers)
    }

    fn send_message(
        &self,
        message: &OutboundMessage,
        buffers: Vec<Bytes>,
    ) -> Result<(), SyncError> {
        let Some(comm) = self.inner.borrow().comm.clone() else {
            return Ok(());
        };
        comm.send(message.to_json()?, buffers);
        Ok(())
    }

    /// Register a handler for `custom` messages.
    pub fn on_msg(
        &self,
        callback: impl Fn(&Model, &serde_json::Value, &[Bytes]) -> CallbackResult + 'static,
    ) -> CallbackId {
        self.inner.borrow_mut().msg_callbacks.register(Rc::new(callback))
    }

    /// Returns whether the callback was registered.
    pub fn remove_msg_callback(&self, id: CallbackId) -> bool {
        self.inner.borrow_mut().msg_callbacks.remove(id)
    }

    /// Register a handler run each time the model is displayed.
    pub fn on_displayed(
        &self,
        callback: impl Fn(&Model) -> CallbackResult + 'static,
    ) -> CallbackId {
        self.inner
            .borrow_mut()
            .display_callbacks
            .register(Rc::new(callback))
    }

    /// Returns whether the callback was registered.
    pub fn remove_displayed_callback(&self, id: CallbackId) -> bool {
        self.inner.borrow_mut().display_callbacks.remove(id)
    }

    fn run_msg_callbacks(&self, content: &serde_json::Value, buffers: &[Bytes]) {
        let (kind, callbacks) = {
            let state = self.inner.borrow();
            (state.msg_callbacks.kind(), state.msg_callbacks.snapshot())
        };
        for (id, callback) in callbacks {
            if let Err(error) = invoke_isolated(kind, id, || callback(self, content, buffers)) {
                self.report(&error.into());
            }
        }
    }

    // -----------------------------------------------------------------
    // Display
    // -----------------------------------------------------------------

    /// Ask the front-end to render a view, opening the channel if needed.
    ///
    /// Models without a view are ignored.
    pub fn display(&self) -> Result<(), SyncError> {
        if !self.schema().is_displayable() {
            return Ok(());
        }
        self.open()?;
        self.send_message(&OutboundMessage::Display, Vec::new())?;
        self.handle_displayed();
        Ok(())
    }

    /// Run the once-per-registry version check and the display callbacks.
    pub fn handle_displayed(&self) {
        if let Some(registry) = self.registry() {
            registry.check_frontend_version();
        }
        let (kind, callbacks) = {
            let state = self.inner.borrow();
            (state.display_callbacks.kind(), state.display_callbacks.snapshot())
        };
        for (id, callback) in callbacks {
            if let Err(error) = invoke_isolated(kind, id, || callback(self)) {
                self.report(&error.into());
            }
        }
    }
}
