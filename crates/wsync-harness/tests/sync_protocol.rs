#![forbid(unsafe_code)]

//! Integration tests: model lifecycle, state sync and inbound dispatch
//! against a recording transport.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;
use serde_json::json;
use wsync_core::{AttributeSpec, ModelId, Schema, TypeKey, Value};
use wsync_harness::{RecordingTransport, Session, model_ref};
use wsync_runtime::{Comm, ProtocolError, RegistryConfig, SyncError};

fn comm_id(model: &wsync_runtime::Model) -> String {
    model.id().unwrap().as_str().to_owned()
}

// ============================================================================
// Open
// ============================================================================

#[test]
fn open_announces_identity_and_state() {
    let session = Session::new();
    let slider = session.controls.slider(&session.registry, 40).unwrap();

    let opens = session.recording.opens();
    // layout, style, slider
    assert_eq!(opens.len(), 3);
    let open = &opens[2];
    assert_eq!(open.comm_id, comm_id(&slider));
    assert_eq!(open.request.target_name, "jupyter.widget");
    assert_eq!(open.request.metadata, json!({"version": "2.0.0"}));

    let state = &open.request.data["state"];
    assert_eq!(state["_model_name"], "IntSliderModel");
    assert_eq!(state["_view_name"], "IntSliderView");
    assert_eq!(state["_model_module"], "@jupyter-widgets/controls");
    assert_eq!(state["value"], 40);
    assert_eq!(state["layout"], format!("IPY_MODEL_{}", opens[0].comm_id));
    assert_eq!(state["style"], format!("IPY_MODEL_{}", opens[1].comm_id));
    assert_eq!(open.request.data["buffer_paths"], json!([]));
    assert!(session.recording.sent().is_empty());
}

#[test]
fn open_is_idempotent() {
    let session = Session::new();
    let slider = session.controls.slider(&session.registry, 1).unwrap();
    let before = session.recording.opens().len();
    slider.open().unwrap();
    slider.open().unwrap();
    assert_eq!(session.recording.opens().len(), before);
    assert_eq!(session.registry.len(), 3);
}

#[test]
fn binary_state_rides_on_open() {
    let session = Session::new();
    let image = session.registry.create_detached(&session.controls.image).unwrap();
    image.set("value", Bytes::from_static(b"\x89PNG")).unwrap();
    image.open().unwrap();

    let open = &session.recording.opens()[0];
    assert_eq!(open.request.data["buffer_paths"], json!([["value"]]));
    assert!(open.request.data["state"].get("value").is_none());
    assert_eq!(open.request.buffers, vec![Bytes::from_static(b"\x89PNG")]);
    assert!(session.recording.sent().is_empty());
}

#[test]
fn open_without_buffer_support_follows_up_with_update() {
    let session = Session::with_transport(
        RecordingTransport::new().without_open_buffers(),
        RegistryConfig::default(),
    );
    let image = session.registry.create_detached(&session.controls.image).unwrap();
    image.set("value", Bytes::from_static(b"raw")).unwrap();
    image.open().unwrap();

    let open = &session.recording.opens()[0];
    assert!(open.request.buffers.is_empty());
    assert_eq!(open.request.data["buffer_paths"], json!([]));

    let sent = session.recording.sent_to(&comm_id(&image));
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method(), Some("update"));
    assert_eq!(sent[0].data["buffer_paths"], json!([["value"]]));
    assert_eq!(sent[0].data["buffers"], json!(["value"]));
    assert_eq!(sent[0].buffers, vec![Bytes::from_static(b"raw")]);
    assert_eq!(sent[0].data["state"]["format"], "png");
}

#[test]
fn unavailable_transport_leaves_model_unopened() {
    let session = Session::with_transport(
        RecordingTransport::new().unavailable("kernel is shutting down"),
        RegistryConfig::default(),
    );
    let err = session.registry.create(&session.controls.layout).unwrap_err();
    assert!(matches!(err, SyncError::ChannelUnavailable(_)));
    assert!(session.registry.is_empty());
}

// ============================================================================
// Outbound updates
// ============================================================================

#[test]
fn binary_update_names_buffer_owner() {
    let session = Session::new();
    let image = session.registry.create(&session.controls.image).unwrap();
    session.recording.take_sent();

    image.set("value", Bytes::from_static(b"frame-2")).unwrap();
    let sent = session.recording.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].data,
        json!({
            "method": "update",
            "state": {},
            "buffer_paths": [["value"]],
            "buffers": ["value"],
        })
    );
    assert_eq!(sent[0].buffers, vec![Bytes::from_static(b"frame-2")]);
}

#[test]
fn hold_sync_sends_one_coalesced_update() {
    let session = Session::new();
    let slider = session.controls.slider(&session.registry, 0).unwrap();
    session.recording.take_sent();

    {
        let _hold = slider.hold_sync();
        slider.set("value", 5).unwrap();
        slider.set("description", "speed").unwrap();
        slider.set("value", 6).unwrap();
        assert!(session.recording.sent().is_empty());
    }

    let updates = session.recording.updates_to(&comm_id(&slider));
    assert_eq!(updates.len(), 1);
    let keys: Vec<&str> = updates[0].keys().map(String::as_str).collect();
    assert_eq!(keys, ["value", "description"]);
    assert_eq!(updates[0]["value"], 6);
}

#[test]
fn local_only_attribute_changes_are_not_sent() {
    let session = Session::new();
    let slider = session.controls.slider(&session.registry, 0).unwrap();
    slider
        .add_traits([wsync_core::AttributeSpec::new("scratch", 0)])
        .unwrap();
    session.recording.take_sent();
    slider.set("scratch", 9).unwrap();
    assert!(session.recording.sent().is_empty());
    assert_eq!(slider.get("scratch"), Some(Value::Int(9)));
}

// ============================================================================
// Inbound updates
// ============================================================================

#[test]
fn front_end_write_is_not_echoed() {
    let session = Session::new();
    let slider = session.controls.slider(&session.registry, 10).unwrap();
    session.recording.take_sent();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    let _sub = slider.observe(Some("value"), move |change| {
        log.borrow_mut().push(change.new.clone());
    });

    session.registry.dispatch(
        &comm_id(&slider),
        json!({"method": "update", "state": {"value": 55}, "buffer_paths": []}),
        Vec::new(),
    );
    assert_eq!(slider.get("value"), Some(Value::Int(55)));
    assert_eq!(*seen.borrow(), vec![Value::Int(55)]);
    assert!(session.recording.sent().is_empty());
    assert!(session.errors.is_empty());
}

#[test]
fn normalized_front_end_write_is_sent_back_once() {
    let session = Session::new();
    let slider = session.controls.slider(&session.registry, 10).unwrap();
    session.recording.take_sent();

    session.registry.dispatch(
        &comm_id(&slider),
        json!({"method": "update", "state": {"value": 250}}),
        Vec::new(),
    );
    assert_eq!(slider.get("value"), Some(Value::Int(100)));
    let updates = session.recording.updates_to(&comm_id(&slider));
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["value"], 100);
}

#[test]
fn transformed_front_end_write_is_sent_back_once() {
    let session = Session::new();
    let key = session.registry.register(
        Schema::builder(TypeKey::widget("PairModel", "PairView"))
            .attribute(
                AttributeSpec::synced("points", Value::List(Vec::new())).from_json(|wire, _| {
                    let items = wire.as_array().unwrap_or_default();
                    Ok(Value::List(items.iter().take(2).map(Value::from_wire).collect()))
                }),
            )
            .build(),
    );
    let pair = session.registry.create(&key).unwrap();
    let id = comm_id(&pair);
    session.recording.take_sent();

    session.registry.dispatch(
        &id,
        json!({"method": "update", "state": {"points": [1, 2, 3]}}),
        Vec::new(),
    );
    assert_eq!(
        pair.get("points"),
        Some(Value::List(vec![Value::Int(1), Value::Int(2)]))
    );
    let updates = session.recording.updates_to(&id);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["points"], json!([1, 2]));

    session.recording.take_sent();
    session.registry.dispatch(
        &id,
        json!({"method": "update", "state": {"points": [4, 5]}}),
        Vec::new(),
    );
    assert_eq!(
        pair.get("points"),
        Some(Value::List(vec![Value::Int(4), Value::Int(5)]))
    );
    assert!(session.recording.updates_to(&id).is_empty());
    assert!(session.errors.is_empty());
}

#[test]
fn observer_writes_during_inbound_update_are_sent() {
    let session = Session::new();
    let slider = session.controls.slider(&session.registry, 10).unwrap();
    session.recording.take_sent();

    let handle = slider.clone();
    let _sub = slider.observe(Some("value"), move |change| {
        if let Value::Int(v) = change.new {
            handle.set("description", format!("at {v}")).unwrap();
        }
    });
    session.registry.dispatch(
        &comm_id(&slider),
        json!({"method": "update", "state": {"value": 20}}),
        Vec::new(),
    );
    let updates = session.recording.updates_to(&comm_id(&slider));
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["description"], "at 20");
    assert!(updates[0].get("value").is_none());
}

#[test]
fn legacy_backbone_message_with_buffer_keys() {
    let session = Session::new();
    let image = session.registry.create(&session.controls.image).unwrap();
    session.recording.take_sent();

    session.registry.dispatch(
        &comm_id(&image),
        json!({"method": "backbone", "sync_data": {"format": "jpeg"}, "buffer_keys": ["value"]}),
        vec![Bytes::from_static(b"jpeg-bytes")],
    );
    assert_eq!(image.get("format"), Some(Value::from("jpeg")));
    assert_eq!(image.get("value"), Some(Value::Bytes(Bytes::from_static(b"jpeg-bytes"))));
    assert!(session.recording.sent().is_empty());
}

#[test]
fn failed_validation_leaves_state_untouched() {
    let session = Session::new();
    let slider = session.controls.slider(&session.registry, 10).unwrap();
    session.recording.take_sent();

    session.registry.dispatch(
        &comm_id(&slider),
        json!({"method": "update", "state": {"description": "changed", "value": "not a number"}}),
        Vec::new(),
    );
    assert_eq!(slider.get("description"), Some(Value::from("")));
    assert_eq!(slider.get("value"), Some(Value::Int(10)));
    assert!(session.recording.sent().is_empty());
    assert!(matches!(session.errors.errors()[..], [SyncError::Attribute(_)]));
}

#[test]
fn request_state_sends_full_state() {
    let session = Session::new();
    let slider = session.controls.slider(&session.registry, 33).unwrap();
    session.recording.take_sent();

    session
        .registry
        .dispatch(&comm_id(&slider), json!({"method": "request_state"}), Vec::new());
    let updates = session.recording.updates_to(&comm_id(&slider));
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["value"], 33);
    assert_eq!(updates[0]["_model_name"], "IntSliderModel");
}

#[test]
fn malformed_messages_are_reported_and_dropped() {
    let session = Session::new();
    let slider = session.controls.slider(&session.registry, 0).unwrap();
    let id = comm_id(&slider);

    session.registry.dispatch(&id, json!({"state": {}}), Vec::new());
    session.registry.dispatch(&id, json!({"method": "explode"}), Vec::new());
    session.registry.dispatch("comm-missing", json!({"method": "request_state"}), Vec::new());

    let errors = session.errors.errors();
    assert!(matches!(
        errors[..],
        [
            SyncError::Protocol(ProtocolError::MissingField("method")),
            SyncError::Protocol(ProtocolError::UnknownMethod(_)),
            SyncError::Protocol(ProtocolError::UnknownComm(_)),
        ]
    ));
    assert_eq!(slider.get("value"), Some(Value::Int(0)));
}

// ============================================================================
// Custom messages
// ============================================================================

#[test]
fn failing_custom_handler_does_not_stop_the_next() {
    let session = Session::new();
    let slider = session.controls.slider(&session.registry, 0).unwrap();
    let received = Rc::new(RefCell::new(Vec::new()));

    slider.on_msg(|_, _, _| Err("handler one failed".into()));
    slider.on_msg(|_, _, _| panic!("handler two panicked"));
    let log = Rc::clone(&received);
    slider.on_msg(move |_, content, buffers| {
        log.borrow_mut().push((content.clone(), buffers.len()));
        Ok(())
    });

    session.registry.dispatch(
        &comm_id(&slider),
        json!({"method": "custom", "content": {"event": "click"}}),
        vec![Bytes::from_static(b"x")],
    );
    assert_eq!(*received.borrow(), vec![(json!({"event": "click"}), 1)]);
    let errors = session.errors.errors();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| matches!(e, SyncError::Handler(_))));
}

#[test]
fn custom_send_wraps_content() {
    let session = Session::new();
    let slider = session.controls.slider(&session.registry, 0).unwrap();
    session.recording.take_sent();
    slider
        .send(json!({"ping": 1}), vec![Bytes::from_static(b"p")])
        .unwrap();
    let sent = session.recording.take_sent();
    assert_eq!(sent[0].data, json!({"method": "custom", "content": {"ping": 1}}));
    assert_eq!(sent[0].buffers.len(), 1);
}

// ============================================================================
// Remote open and close
// ============================================================================

struct FrontEndComm(String);

impl Comm for FrontEndComm {
    fn comm_id(&self) -> &str {
        &self.0
    }
    fn send(&self, _data: serde_json::Value, _buffers: Vec<Bytes>) {}
    fn close(&self) {}
}

#[test]
fn front_end_created_model_resolves_references() {
    let session = Session::new();
    let layout = session.registry.create(&session.controls.layout).unwrap();
    let layout_ref = format!("IPY_MODEL_{}", comm_id(&layout));

    let model = session
        .registry
        .handle_comm_opened(
            Rc::new(FrontEndComm("fe-1".into())),
            json!({
                "state": {
                    "_model_module": "@jupyter-widgets/controls",
                    "_model_module_version": "1.0.0",
                    "_model_name": "IntSliderModel",
                    "_view_module": "@jupyter-widgets/controls",
                    "_view_module_version": "1.0.0",
                    "_view_name": "IntSliderView",
                    "value": 7,
                    "layout": layout_ref,
                },
                "buffer_paths": [],
            }),
            &json!({"version": "2.0.0"}),
            Vec::new(),
        )
        .unwrap();

    assert_eq!(model.id(), Some(ModelId::new("fe-1")));
    assert_eq!(model.get("value"), Some(Value::Int(7)));
    assert_eq!(model.get("layout"), layout.id().map(Value::Model));
    assert!(session.registry.get(&ModelId::new("fe-1")).is_some());
}

#[test]
fn front_end_open_with_unknown_reference_fails() {
    let session = Session::new();
    let err = session
        .registry
        .handle_comm_opened(
            Rc::new(FrontEndComm("fe-2".into())),
            json!({
                "state": {
                    "_model_module": "@jupyter-widgets/controls",
                    "_model_module_version": "1.0.0",
                    "_model_name": "HBoxModel",
                    "_view_module": "@jupyter-widgets/controls",
                    "_view_module_version": "1.0.0",
                    "_view_name": "HBoxView",
                    "children": ["IPY_MODEL_nowhere"],
                },
            }),
            &json!({"version": "2.0.0"}),
            Vec::new(),
        )
        .unwrap_err();
    assert!(matches!(err, SyncError::Attribute(_)));
    assert!(session.registry.get(&ModelId::new("fe-2")).is_none());
}

#[test]
fn close_is_terminal_and_idempotent() {
    let session = Session::new();
    let slider = session.controls.slider(&session.registry, 0).unwrap();
    let id = comm_id(&slider);

    slider.close();
    slider.close();
    assert_eq!(session.recording.closed(), vec![id.clone()]);
    assert!(session.registry.get(&ModelId::new(id)).is_none());
    assert_eq!(slider.id(), None);
    assert!(model_ref(&slider).is_err());
    assert!(matches!(slider.open(), Err(SyncError::Closed)));

    session.recording.take_sent();
    slider.set("value", 4).unwrap();
    assert!(session.recording.sent().is_empty());
}

#[test]
fn close_all_closes_every_channel() {
    let session = Session::new();
    let _ = session.controls.slider(&session.registry, 0).unwrap();
    session.registry.close_all();
    assert!(session.registry.is_empty());
    assert_eq!(session.recording.closed().len(), 3);
}
