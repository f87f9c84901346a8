#![no_main]

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use wsync_core::serializers::model_refs;
use wsync_core::{AttributeSpec, Schema, TypeKey, Value};
use wsync_runtime::{InboundMessage, ModelRegistry};

#[derive(Arbitrary, Debug)]
struct Input {
    message: String,
    buffers: Vec<Vec<u8>>,
}

fn schema() -> Schema {
    Schema::builder(TypeKey::widget("FuzzModel", "FuzzView"))
        .attribute(
            AttributeSpec::synced("value", 0).validate(|value| match value.as_int() {
                Some(n) => Ok(Value::Int(n.clamp(0, 100))),
                None => Err("expected an integer".to_owned()),
            }),
        )
        .attribute(AttributeSpec::synced("label", ""))
        .attribute(AttributeSpec::synced("data", Vec::<u8>::new()).binary())
        .attribute(AttributeSpec::synced("child", Value::Null).serializers(model_refs()))
        .build()
}

fuzz_target!(|input: Input| {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(&input.message) else {
        return;
    };
    if let Ok(message) = InboundMessage::parse(json.clone()) {
        let _ = message.method();
    }

    // Dispatch must report or return errors, never panic.
    let registry = ModelRegistry::new();
    let key = registry.register(schema());
    let Ok(model) = registry.create_detached(&key) else {
        return;
    };
    let buffers = input.buffers.into_iter().map(Bytes::from).collect();
    let _ = model.handle_message(json, buffers);
});
