#![forbid(unsafe_code)]

//! Dependency-closed snapshots of model state.
//!
//! A snapshot maps model ids to [`EmbedState`]s. Starting from root models,
//! [`dependency_state`] follows model references forward
//! ([`get_recursive_state`]) and then, optionally, pulls in live models that
//! refer *to* something already captured ([`add_referring_widgets`]) until
//! nothing more is added.
//!
//! # Invariants
//!
//! 1. Each model appears at most once; a model is recorded before its
//!    references are followed, so reference cycles terminate.
//! 2. References are found in attribute values that are a model, a list of
//!    models, or a dict whose values are models. Deeper nesting is not
//!    explored.
//! 3. Snapshot order is discovery order, so output is reproducible for the
//!    same registry contents.
//! 4. Every reference in a captured state is a key of the snapshot. A
//!    reference to a closed model fails with
//!    [`EmbedError::DanglingReference`] instead of leaving a hole.

use std::collections::HashSet;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use indexmap::IndexMap;
use serde::Serialize;
use wsync_core::{BufferPath, ModelId, Value, WireValue, extract_buffers};
use wsync_runtime::{Model, ModelRegistry};

use crate::error::EmbedError;

/// Major version of the embedded state format.
pub const VERSION_MAJOR: u64 = 2;
/// Minor version of the embedded state format.
pub const VERSION_MINOR: u64 = 0;

/// Snapshot of many models, keyed by id in discovery order.
pub type StateMap = IndexMap<ModelId, EmbedState>;

/// One binary attribute value, inlined as base64.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EmbeddedBuffer {
    pub encoding: &'static str,
    pub path: BufferPath,
    pub data: String,
}

/// Static state of one model.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EmbedState {
    pub model_name: String,
    pub model_module: String,
    pub model_module_version: String,
    /// Attribute wire values with binary leaves removed.
    pub state: WireValue,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub buffers: Vec<EmbeddedBuffer>,
}

/// The `{version_major, version_minor, state}` envelope.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ManagerState {
    pub version_major: u64,
    pub version_minor: u64,
    pub state: StateMap,
}

impl ManagerState {
    #[must_use]
    pub fn new(state: StateMap) -> Self {
        Self {
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            state,
        }
    }
}

/// Capture one model's state for embedding.
pub fn embed_state(model: &Model, drop_defaults: bool) -> Result<EmbedState, EmbedError> {
    let schema = model.schema();
    let key = schema.key();
    let snapshot = model.state_snapshot(drop_defaults)?;
    let (state, paths, buffers) = extract_buffers(WireValue::Object(snapshot)).into_parts();
    let buffers = paths
        .into_iter()
        .zip(buffers)
        .map(|(path, bytes)| EmbeddedBuffer {
            encoding: "base64",
            path,
            data: STANDARD.encode(&bytes),
        })
        .collect();
    Ok(EmbedState {
        model_name: key.model_name.clone(),
        model_module: key.model_module.clone(),
        model_module_version: key.model_module_version.clone(),
        state,
        buffers,
    })
}

/// Models referenced by the named attributes of `model`.
pub fn find_refs<'a>(model: &Model, names: impl IntoIterator<Item = &'a str>) -> Vec<ModelId> {
    let mut refs = Vec::new();
    for name in names {
        match model.get(name) {
            Some(Value::Model(id)) => refs.push(id),
            Some(Value::List(items)) => {
                refs.extend(items.iter().filter_map(Value::as_model).cloned());
            }
            Some(Value::Dict(map)) => {
                refs.extend(map.values().filter_map(Value::as_model).cloned());
            }
            _ => {}
        }
    }
    refs
}

/// References found in the attributes present in an embedded state.
fn state_refs(model: &Model, state: &EmbedState) -> Vec<ModelId> {
    let names = state.state.as_object().into_iter().flat_map(|map| map.keys());
    find_refs(model, names.map(String::as_str))
}

fn require_id(model: &Model) -> Result<ModelId, EmbedError> {
    model.id().ok_or_else(|| EmbedError::Unopened {
        model: model.schema().key().model_name.clone(),
    })
}

/// Record `root` and everything it references, depth first, into `seen`.
///
/// A reference to a model that is no longer live fails with
/// [`EmbedError::DanglingReference`]; the snapshot would not be closed.
pub fn get_recursive_state(
    registry: &ModelRegistry,
    root: &Model,
    seen: &mut StateMap,
    drop_defaults: bool,
) -> Result<(), EmbedError> {
    let mut stack = vec![(require_id(root)?, root.clone())];
    while let Some((id, model)) = stack.pop() {
        if seen.contains_key(&id) {
            continue;
        }
        let state = embed_state(&model, drop_defaults)?;
        let refs = state_refs(&model, &state);
        seen.insert(id.clone(), state);
        for next in refs.into_iter().rev() {
            if seen.contains_key(&next) {
                continue;
            }
            let found = registry.get(&next).ok_or_else(|| EmbedError::DanglingReference {
                from: id.clone(),
                to: next.clone(),
            })?;
            stack.push((next, found));
        }
    }
    Ok(())
}

/// Add every live model that refers to something in `seen`, together with
/// its own forward references. Returns whether anything was added.
pub fn add_referring_widgets(
    registry: &ModelRegistry,
    seen: &mut StateMap,
    drop_defaults: bool,
) -> Result<bool, EmbedError> {
    let mut changed = false;
    for model in registry.models() {
        let Some(id) = model.id() else { continue };
        if seen.contains_key(&id) {
            continue;
        }
        let state = embed_state(&model, drop_defaults)?;
        if state_refs(&model, &state)
            .iter()
            .any(|target| seen.contains_key(target))
        {
            tracing::trace!(model_id = %id, "adding referring model");
            get_recursive_state(registry, &model, seen, drop_defaults)?;
            changed = true;
        }
    }
    Ok(changed)
}

/// State of every live model.
///
/// Fails with [`EmbedError::DanglingReference`] when a live model still
/// references a closed one.
pub fn all_states(registry: &ModelRegistry, drop_defaults: bool) -> Result<StateMap, EmbedError> {
    let mut states = StateMap::new();
    for model in registry.models() {
        let Some(id) = model.id() else { continue };
        let state = embed_state(&model, drop_defaults)?;
        if let Some(to) = state_refs(&model, &state)
            .into_iter()
            .find(|target| !registry.contains(target))
        {
            return Err(EmbedError::DanglingReference { from: id, to });
        }
        states.insert(id, state);
    }
    Ok(states)
}

/// Snapshot of `roots` and their dependencies.
///
/// With no roots (or an empty slice) every live model is captured. With
/// `include_dependents`, referring models are added to a fixed point.
pub fn dependency_state(
    registry: &ModelRegistry,
    roots: Option<&[Model]>,
    drop_defaults: bool,
    include_dependents: bool,
) -> Result<StateMap, EmbedError> {
    let Some(roots) = roots.filter(|roots| !roots.is_empty()) else {
        return all_states(registry, drop_defaults);
    };
    let mut seen = StateMap::new();
    for root in roots {
        get_recursive_state(registry, root, &mut seen, drop_defaults)?;
    }
    if include_dependents {
        while add_referring_widgets(registry, &mut seen, drop_defaults)? {}
    }
    tracing::debug!(
        roots = roots.len(),
        models = seen.len(),
        "resolved dependency state"
    );
    Ok(seen)
}

/// Every live model inside the manager-state envelope.
pub fn manager_state(
    registry: &ModelRegistry,
    drop_defaults: bool,
) -> Result<ManagerState, EmbedError> {
    Ok(ManagerState::new(all_states(registry, drop_defaults)?))
}

/// Displayable live models not referenced by another displayable model.
///
/// Children of container models are rendered by their container, so they
/// are not views of their own.
#[must_use]
pub fn default_views(registry: &ModelRegistry) -> Vec<Model> {
    let displayable: Vec<Model> = registry
        .models()
        .into_iter()
        .filter(|model| model.schema().is_displayable())
        .collect();
    let children: HashSet<ModelId> = displayable
        .iter()
        .flat_map(|model| {
            let schema = model.schema();
            find_refs(model, schema.sync_keys())
        })
        .collect();
    displayable
        .into_iter()
        .filter(|model| model.id().is_some_and(|id| !children.contains(&id)))
        .collect()
}
