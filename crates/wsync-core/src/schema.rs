#![forbid(unsafe_code)]

//! Attribute schemas for model types.
//!
//! A concrete widget type is described by a [`Schema`]: its [`TypeKey`] and
//! an ordered list of [`AttributeSpec`]s. Each spec names an attribute and
//! carries its default, an optional validator, optional wire serializers and
//! the flags that decide whether it is synchronized.
//!
//! Schemas are plain data built once per type with [`SchemaBuilder`]; a
//! generic model consumes them at runtime.
//!
//! # Example
//!
//! ```
//! use wsync_core::schema::{AttributeSpec, Schema, TypeKey};
//! use wsync_core::Value;
//!
//! let schema = Schema::builder(TypeKey::widget("IntSliderModel", "IntSliderView"))
//!     .attribute(AttributeSpec::synced("value", 0).validate(|v| match v {
//!         Value::Int(_) => Ok(v),
//!         other => Err(format!("expected int, got {}", other.kind())),
//!     }))
//!     .attribute(AttributeSpec::new("scratch", Value::Null))
//!     .build();
//!
//! assert!(schema.is_synced("value"));
//! assert!(!schema.is_synced("scratch"));
//! assert!(schema.is_synced("_model_name"));
//! ```

use core::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::value::{ModelLookup, Value};
use crate::wire::WireValue;

/// Name of the attribute holding the model's front-end module.
pub const MODEL_MODULE: &str = "_model_module";
/// Name of the attribute holding the model module's version.
pub const MODEL_MODULE_VERSION: &str = "_model_module_version";
/// Name of the attribute holding the model class name.
pub const MODEL_NAME: &str = "_model_name";
/// Name of the attribute holding the view's front-end module.
pub const VIEW_MODULE: &str = "_view_module";
/// Name of the attribute holding the view module's version.
pub const VIEW_MODULE_VERSION: &str = "_view_module_version";
/// Name of the attribute holding the view class name.
pub const VIEW_NAME: &str = "_view_name";

/// Module that hosts the stock widget models.
pub const BASE_MODULE: &str = "@jupyter-widgets/base";
/// Module that hosts the stock control widgets.
pub const CONTROLS_MODULE: &str = "@jupyter-widgets/controls";
/// Default module version for both stock modules.
pub const DEFAULT_MODULE_VERSION: &str = "1.0.0";

/// Errors raised while validating or converting an attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeError {
    /// The value failed the attribute's validator.
    Validation { attribute: String, reason: String },
    /// A `to_json`/`from_json` transform failed.
    Conversion { attribute: String, reason: String },
}

impl AttributeError {
    /// The attribute the error is about.
    #[must_use]
    pub fn attribute(&self) -> &str {
        match self {
            Self::Validation { attribute, .. } | Self::Conversion { attribute, .. } => attribute,
        }
    }
}

impl fmt::Display for AttributeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { attribute, reason } => {
                write!(f, "invalid value for '{attribute}': {reason}")
            }
            Self::Conversion { attribute, reason } => {
                write!(f, "cannot convert '{attribute}': {reason}")
            }
        }
    }
}

impl std::error::Error for AttributeError {}

/// Validator: returns the (possibly coerced) value or a reason.
pub type Validator = Rc<dyn Fn(Value) -> Result<Value, String>>;
/// Serializer from backend value to wire value.
pub type ToJson = Rc<dyn Fn(&Value) -> Result<WireValue, String>>;
/// Deserializer from wire value to backend value.
pub type FromJson = Rc<dyn Fn(&WireValue, &dyn ModelLookup) -> Result<Value, String>>;

/// A `to_json`/`from_json` pair installed together.
#[derive(Clone)]
pub struct Serializers {
    pub to_json: ToJson,
    pub from_json: FromJson,
}

impl fmt::Debug for Serializers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Serializers").finish_non_exhaustive()
    }
}

/// Identity of a model type: model and view classes and their modules.
///
/// Models without a view (links, layouts, styles) have `view_name == None`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeKey {
    pub model_module: String,
    pub model_module_version: String,
    pub model_name: String,
    pub view_module: Option<String>,
    pub view_module_version: String,
    pub view_name: Option<String>,
}

impl TypeKey {
    /// A displayable control from the stock controls module.
    #[must_use]
    pub fn widget(model_name: &str, view_name: &str) -> Self {
        Self {
            model_module: CONTROLS_MODULE.to_owned(),
            model_module_version: DEFAULT_MODULE_VERSION.to_owned(),
            model_name: model_name.to_owned(),
            view_module: Some(CONTROLS_MODULE.to_owned()),
            view_module_version: DEFAULT_MODULE_VERSION.to_owned(),
            view_name: Some(view_name.to_owned()),
        }
    }

    /// A model without a view.
    #[must_use]
    pub fn model(module: &str, model_name: &str) -> Self {
        Self {
            model_module: module.to_owned(),
            model_module_version: DEFAULT_MODULE_VERSION.to_owned(),
            model_name: model_name.to_owned(),
            view_module: None,
            view_module_version: DEFAULT_MODULE_VERSION.to_owned(),
            view_name: None,
        }
    }

    /// Override both module versions.
    #[must_use]
    pub fn with_version(mut self, version: &str) -> Self {
        self.model_module_version = version.to_owned();
        self.view_module_version = version.to_owned();
        self
    }

    /// Whether the type has a renderable view.
    #[must_use]
    pub fn has_view(&self) -> bool {
        self.view_name.is_some()
    }

    /// The identity attributes as `(name, default)` pairs.
    #[must_use]
    pub fn identity_attributes(&self) -> [(&'static str, Value); 6] {
        [
            (MODEL_MODULE, Value::from(self.model_module.as_str())),
            (
                MODEL_MODULE_VERSION,
                Value::from(self.model_module_version.as_str()),
            ),
            (MODEL_NAME, Value::from(self.model_name.as_str())),
            (VIEW_MODULE, Value::from(self.view_module.clone())),
            (
                VIEW_MODULE_VERSION,
                Value::from(self.view_module_version.as_str()),
            ),
            (VIEW_NAME, Value::from(self.view_name.clone())),
        ]
    }

    /// Rebuild a key from identity attributes found in a wire state.
    ///
    /// Returns the name of the first missing (or non-string) required field
    /// on failure. View fields may be absent or `null`.
    pub fn from_state(state: &crate::wire::WireMap) -> Result<Self, &'static str> {
        let required = |name: &'static str| {
            state
                .get(name)
                .and_then(WireValue::as_str)
                .map(str::to_owned)
                .ok_or(name)
        };
        let optional = |name: &'static str| {
            state.get(name).and_then(WireValue::as_str).map(str::to_owned)
        };
        Ok(Self {
            model_module: required(MODEL_MODULE)?,
            model_module_version: required(MODEL_MODULE_VERSION)?,
            model_name: required(MODEL_NAME)?,
            view_module: optional(VIEW_MODULE),
            view_module_version: optional(VIEW_MODULE_VERSION)
                .unwrap_or_else(|| DEFAULT_MODULE_VERSION.to_owned()),
            view_name: optional(VIEW_NAME),
        })
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}",
            self.model_module, self.model_module_version, self.model_name
        )?;
        if let Some(view) = &self.view_name {
            write!(f, " / {view}")?;
        }
        Ok(())
    }
}

/// Declaration of one named attribute.
#[derive(Clone)]
pub struct AttributeSpec {
    name: String,
    default: Value,
    sync: bool,
    binary: bool,
    validator: Option<Validator>,
    to_json: Option<ToJson>,
    from_json: Option<FromJson>,
}

impl AttributeSpec {
    /// A local (non-synchronized) attribute.
    #[must_use]
    pub fn new(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            default: default.into(),
            sync: false,
            binary: false,
            validator: None,
            to_json: None,
            from_json: None,
        }
    }

    /// A synchronized attribute.
    #[must_use]
    pub fn synced(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self::new(name, default).sync()
    }

    /// Mark the attribute for wire transmission.
    #[must_use]
    pub fn sync(mut self) -> Self {
        self.sync = true;
        self
    }

    /// Mark the attribute as binary: values must be bytes or null.
    #[must_use]
    pub fn binary(mut self) -> Self {
        self.binary = true;
        self
    }

    /// Install a validator. Validators may coerce.
    #[must_use]
    pub fn validate(mut self, f: impl Fn(Value) -> Result<Value, String> + 'static) -> Self {
        self.validator = Some(Rc::new(f));
        self
    }

    /// Install a custom backend → wire transform.
    #[must_use]
    pub fn to_json(mut self, f: impl Fn(&Value) -> Result<WireValue, String> + 'static) -> Self {
        self.to_json = Some(Rc::new(f));
        self
    }

    /// Install a custom wire → backend transform.
    #[must_use]
    pub fn from_json(
        mut self,
        f: impl Fn(&WireValue, &dyn ModelLookup) -> Result<Value, String> + 'static,
    ) -> Self {
        self.from_json = Some(Rc::new(f));
        self
    }

    /// Install a serializer pair.
    #[must_use]
    pub fn serializers(mut self, pair: Serializers) -> Self {
        self.to_json = Some(pair.to_json);
        self.from_json = Some(pair.from_json);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn default_value(&self) -> &Value {
        &self.default
    }

    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.sync
    }

    #[must_use]
    pub fn is_binary(&self) -> bool {
        self.binary
    }

    /// Run the binary check and the validator.
    pub fn check(&self, value: Value) -> Result<Value, AttributeError> {
        if self.binary && !matches!(value, Value::Bytes(_) | Value::Null) {
            return Err(AttributeError::Validation {
                attribute: self.name.clone(),
                reason: format!("expected bytes, got {}", value.kind()),
            });
        }
        match &self.validator {
            Some(validate) => validate(value).map_err(|reason| AttributeError::Validation {
                attribute: self.name.clone(),
                reason,
            }),
            None => Ok(value),
        }
    }

    /// Encode a value for the wire.
    pub fn encode(&self, value: &Value) -> Result<WireValue, AttributeError> {
        match &self.to_json {
            Some(to_json) => to_json(value).map_err(|reason| AttributeError::Conversion {
                attribute: self.name.clone(),
                reason,
            }),
            None => Ok(value.to_wire()),
        }
    }

    /// Decode a wire value into a backend value.
    pub fn decode(
        &self,
        wire: &WireValue,
        models: &dyn ModelLookup,
    ) -> Result<Value, AttributeError> {
        match &self.from_json {
            Some(from_json) => {
                from_json(wire, models).map_err(|reason| AttributeError::Conversion {
                    attribute: self.name.clone(),
                    reason,
                })
            }
            None => Ok(Value::from_wire(wire)),
        }
    }
}

impl fmt::Debug for AttributeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeSpec")
            .field("name", &self.name)
            .field("default", &self.default)
            .field("sync", &self.sync)
            .field("binary", &self.binary)
            .field("custom_to_json", &self.to_json.is_some())
            .field("custom_from_json", &self.from_json.is_some())
            .finish()
    }
}

/// Attribute declarations for one model type.
#[derive(Clone, Debug)]
pub struct Schema {
    key: TypeKey,
    attributes: IndexMap<String, AttributeSpec>,
}

impl Schema {
    /// Start a schema for `key`. The identity attributes are added first.
    #[must_use]
    pub fn builder(key: TypeKey) -> SchemaBuilder {
        SchemaBuilder::new(key)
    }

    #[must_use]
    pub fn key(&self) -> &TypeKey {
        &self.key
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.get(name)
    }

    /// All attributes in declaration order.
    pub fn attributes(&self) -> impl Iterator<Item = &AttributeSpec> {
        self.attributes.values()
    }

    /// Names of synchronized attributes in declaration order.
    pub fn sync_keys(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .values()
            .filter(|spec| spec.sync)
            .map(|spec| spec.name.as_str())
    }

    #[must_use]
    pub fn is_synced(&self, name: &str) -> bool {
        self.attributes.get(name).is_some_and(|spec| spec.sync)
    }

    /// Whether models of this type have a renderable view.
    #[must_use]
    pub fn is_displayable(&self) -> bool {
        self.key.has_view()
    }

    /// Add or replace an attribute. Returns the replaced spec, if any.
    pub fn insert(&mut self, spec: AttributeSpec) -> Option<AttributeSpec> {
        self.attributes.insert(spec.name.clone(), spec)
    }
}

/// Builder for [`Schema`].
#[derive(Debug)]
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    fn new(key: TypeKey) -> Self {
        let mut attributes = IndexMap::new();
        for (name, default) in key.identity_attributes() {
            attributes.insert(name.to_owned(), AttributeSpec::synced(name, default));
        }
        Self {
            schema: Schema { key, attributes },
        }
    }

    /// Declare an attribute. Later declarations replace earlier ones with
    /// the same name, keeping the original position.
    #[must_use]
    pub fn attribute(mut self, spec: AttributeSpec) -> Self {
        self.schema.insert(spec);
        self
    }

    #[must_use]
    pub fn build(self) -> Schema {
        self.schema
    }
}
