#![no_main]

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use wsync_core::{WireMap, WireValue, extract_buffers, inject_buffers, wire_eq};

#[derive(Arbitrary, Debug)]
enum Node {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Binary(Vec<u8>),
    List(Vec<Node>),
    Dict(Vec<(String, Node)>),
}

impl Node {
    fn into_wire(self) -> WireValue {
        match self {
            Self::Null => WireValue::Null,
            Self::Bool(b) => WireValue::Bool(b),
            Self::Int(i) => WireValue::Number(i.into()),
            Self::Float(f) => {
                serde_json::Number::from_f64(f).map_or(WireValue::Null, WireValue::Number)
            }
            Self::Text(s) => WireValue::String(s),
            Self::Binary(data) => WireValue::Binary(Bytes::from(data)),
            Self::List(items) => WireValue::Array(items.into_iter().map(Self::into_wire).collect()),
            Self::Dict(entries) => WireValue::Object(
                entries
                    .into_iter()
                    .map(|(key, node)| (key, node.into_wire()))
                    .collect::<WireMap>(),
            ),
        }
    }
}

fuzz_target!(|root: Node| {
    let original = root.into_wire();

    let (stripped, paths, buffers) = extract_buffers(original.clone()).into_parts();
    assert!(!stripped.has_binary());
    assert_eq!(paths.len(), buffers.len());

    let mut restored = stripped;
    inject_buffers(&mut restored, &paths, buffers).expect("extracted paths are valid");
    assert!(wire_eq(&restored, &original));
});
