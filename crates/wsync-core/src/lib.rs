#![forbid(unsafe_code)]

//! Core data types for wsync.
//!
//! This crate provides:
//! - [`Value`] for backend attribute values and [`ModelId`] for model identity
//! - [`WireValue`] for JSON-like wire values with binary leaves
//! - [`codec`] for pulling binary buffers out of wire state and back in
//! - [`schema`] for declaring typed, synchronizable model attributes

pub mod codec;
pub mod schema;
pub mod serializers;
pub mod value;
pub mod wire;

pub use codec::{BufferPath, CodecError, Extracted, PathSegment, extract_buffers, inject_buffers};
pub use schema::{AttributeError, AttributeSpec, Schema, SchemaBuilder, Serializers, TypeKey};
pub use value::{MODEL_REF_PREFIX, ModelId, ModelLookup, NoModels, Value};
pub use wire::{WireMap, WireValue, wire_eq};
