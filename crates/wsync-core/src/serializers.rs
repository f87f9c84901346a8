#![forbid(unsafe_code)]

//! Stock serializer pairs.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::schema::Serializers;
use crate::value::{ModelId, ModelLookup, Value};
use crate::wire::WireValue;

/// Serializers for attributes that hold model references.
///
/// `to_json` encodes [`Value::Model`] as `"IPY_MODEL_<id>"`, recursing into
/// lists and dicts. `from_json` turns such strings back into
/// [`Value::Model`] and fails if the referenced id is not live.
#[must_use]
pub fn model_refs() -> Serializers {
    Serializers {
        to_json: Rc::new(|value| Ok(value.to_wire())),
        from_json: Rc::new(|wire, models| decode_refs(wire, models)),
    }
}

fn decode_refs(wire: &WireValue, models: &dyn ModelLookup) -> Result<Value, String> {
    Ok(match wire {
        WireValue::String(s) => match ModelId::from_reference(s) {
            Some(id) if models.is_live(&id) => Value::Model(id),
            Some(id) => return Err(format!("unknown model {}", id.to_reference())),
            None => Value::Str(s.clone()),
        },
        WireValue::Array(items) => Value::List(
            items
                .iter()
                .map(|item| decode_refs(item, models))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        WireValue::Object(map) => Value::Dict(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), decode_refs(v, models)?)))
                .collect::<Result<IndexMap<_, _>, String>>()?,
        ),
        other => Value::from_wire(other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn decodes_live_references_in_containers() {
        let live: HashSet<ModelId> = ["a".into(), "b".into()].into_iter().collect();
        let pair = model_refs();
        let wire = WireValue::Array(vec![
            "IPY_MODEL_a".into(),
            "IPY_MODEL_b".into(),
            "plain".into(),
        ]);
        let value = (pair.from_json)(&wire, &live).unwrap();
        assert_eq!(
            value,
            Value::List(vec![
                Value::Model("a".into()),
                Value::Model("b".into()),
                Value::from("plain"),
            ])
        );
        assert_eq!((pair.to_json)(&value).unwrap(), wire);
    }

    #[test]
    fn unknown_reference_fails() {
        let live: HashSet<ModelId> = HashSet::new();
        let err = (model_refs().from_json)(&"IPY_MODEL_gone".into(), &live).unwrap_err();
        assert!(err.contains("IPY_MODEL_gone"));
    }
}
