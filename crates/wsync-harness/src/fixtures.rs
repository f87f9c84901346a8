#![forbid(unsafe_code)]

//! Reference widget types modelled on the stock controls.
//!
//! The schemas are small but shaped like the real thing: sliders own a
//! layout and a style model, boxes hold children, links reference a
//! `(model, attribute)` pair on each side, and images carry a binary value.

use wsync_core::schema::{BASE_MODULE, CONTROLS_MODULE};
use wsync_core::serializers::model_refs;
use wsync_core::{AttributeSpec, Schema, TypeKey, Value};
use wsync_runtime::{ChannelUnavailable, Model, ModelRegistry, SyncError};

pub const SLIDER_MIN: i64 = 0;
pub const SLIDER_MAX: i64 = 100;

#[must_use]
pub fn layout_schema() -> Schema {
    Schema::builder(TypeKey::model(BASE_MODULE, "LayoutModel"))
        .attribute(AttributeSpec::synced("width", Value::Null))
        .attribute(AttributeSpec::synced("height", Value::Null))
        .build()
}

#[must_use]
pub fn slider_style_schema() -> Schema {
    Schema::builder(TypeKey::model(CONTROLS_MODULE, "SliderStyleModel"))
        .attribute(AttributeSpec::synced("description_width", ""))
        .attribute(AttributeSpec::synced("handle_color", Value::Null))
        .build()
}

/// Integer slider; `value` is clamped to `SLIDER_MIN..=SLIDER_MAX`.
#[must_use]
pub fn int_slider_schema() -> Schema {
    Schema::builder(TypeKey::widget("IntSliderModel", "IntSliderView"))
        .attribute(AttributeSpec::synced("value", 0).validate(|value| match value {
            Value::Int(v) => Ok(Value::Int(v.clamp(SLIDER_MIN, SLIDER_MAX))),
            other => Err(format!("expected an int, got {}", other.kind())),
        }))
        .attribute(AttributeSpec::synced("min", SLIDER_MIN))
        .attribute(AttributeSpec::synced("max", SLIDER_MAX))
        .attribute(AttributeSpec::synced("step", 1))
        .attribute(AttributeSpec::synced("description", ""))
        .attribute(AttributeSpec::synced("layout", Value::Null).serializers(model_refs()))
        .attribute(AttributeSpec::synced("style", Value::Null).serializers(model_refs()))
        .build()
}

/// Horizontal container.
#[must_use]
pub fn hbox_schema() -> Schema {
    Schema::builder(TypeKey::widget("HBoxModel", "HBoxView"))
        .attribute(
            AttributeSpec::synced("children", Value::List(Vec::new())).serializers(model_refs()),
        )
        .attribute(AttributeSpec::synced("layout", Value::Null).serializers(model_refs()))
        .build()
}

/// Front-end link between two `(model, attribute)` pairs.
#[must_use]
pub fn link_schema() -> Schema {
    Schema::builder(TypeKey::model(CONTROLS_MODULE, "LinkModel"))
        .attribute(AttributeSpec::synced("source", Value::Null).serializers(model_refs()))
        .attribute(AttributeSpec::synced("target", Value::Null).serializers(model_refs()))
        .build()
}

/// Image with raw bytes in `value`.
#[must_use]
pub fn image_schema() -> Schema {
    Schema::builder(TypeKey::widget("ImageModel", "ImageView"))
        .attribute(AttributeSpec::synced("value", Value::Bytes(bytes::Bytes::new())).binary())
        .attribute(AttributeSpec::synced("format", "png"))
        .attribute(AttributeSpec::synced("width", ""))
        .attribute(AttributeSpec::synced("height", ""))
        .build()
}

/// Type keys of the registered reference types.
#[derive(Clone, Debug)]
pub struct Controls {
    pub layout: TypeKey,
    pub style: TypeKey,
    pub slider: TypeKey,
    pub hbox: TypeKey,
    pub link: TypeKey,
    pub image: TypeKey,
}

impl Controls {
    /// Register every reference type with `registry`.
    pub fn register(registry: &ModelRegistry) -> Self {
        Self {
            layout: registry.register(layout_schema()),
            style: registry.register(slider_style_schema()),
            slider: registry.register(int_slider_schema()),
            hbox: registry.register(hbox_schema()),
            link: registry.register(link_schema()),
            image: registry.register(image_schema()),
        }
    }

    /// An open slider with its own open layout and style.
    pub fn slider(&self, registry: &ModelRegistry, value: i64) -> Result<Model, SyncError> {
        let layout = model_ref(&registry.create(&self.layout)?)?;
        let style = model_ref(&registry.create(&self.style)?)?;
        registry.create_with(
            &self.slider,
            [
                ("value", Value::Int(value)),
                ("layout", layout),
                ("style", style),
            ],
        )
    }

    /// An open box holding `children`, with its own layout.
    pub fn hbox(&self, registry: &ModelRegistry, children: &[Model]) -> Result<Model, SyncError> {
        let layout = model_ref(&registry.create(&self.layout)?)?;
        let children = children.iter().map(model_ref).collect::<Result<Vec<_>, _>>()?;
        registry.create_with(
            &self.hbox,
            [("children", Value::List(children)), ("layout", layout)],
        )
    }

    /// An open link from `source.0`'s `source.1` to `target.0`'s `target.1`.
    pub fn link(
        &self,
        registry: &ModelRegistry,
        source: (&Model, &str),
        target: (&Model, &str),
    ) -> Result<Model, SyncError> {
        let side = |(model, attribute): (&Model, &str)| -> Result<Value, SyncError> {
            Ok(Value::List(vec![model_ref(model)?, Value::from(attribute)]))
        };
        registry.create_with(&self.link, [("source", side(source)?), ("target", side(target)?)])
    }
}

/// `model` as a reference value; the model must be open.
pub fn model_ref(model: &Model) -> Result<Value, SyncError> {
    model
        .id()
        .map(Value::Model)
        .ok_or_else(|| ChannelUnavailable::new("referenced model has no channel").into())
}
