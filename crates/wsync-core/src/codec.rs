#![forbid(unsafe_code)]

//! Binary buffer extraction and reinjection.
//!
//! Channel payloads are JSON; binary attribute data rides alongside as an
//! ordered list of buffers. [`extract_buffers`] pulls every
//! [`WireValue::Binary`] leaf out of a state tree and records where it was;
//! [`inject_buffers`] writes the buffers back.
//!
//! # Invariants
//!
//! 1. **Round trip**: injecting the output of `extract_buffers(s)` yields `s`.
//! 2. **Deterministic order**: traversal is depth-first, arrays by index,
//!    objects in insertion order; `paths[i]` locates `buffers[i]`.
//! 3. **No copying**: extraction works in place on the owned tree; subtrees
//!    without binary leaves are never rebuilt.
//! 4. **Removal shape**: a binary object value is removed from its object;
//!    a binary array element is replaced by `null` so sibling indices stay
//!    valid; a binary root becomes `null` with the empty path.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Path names a missing key | Sender/receiver codec mismatch | [`CodecError::InvalidPath`] |
//! | Path indexes past an array | Sender/receiver codec mismatch | [`CodecError::InvalidPath`] |
//! | Path walks into a leaf | Sender/receiver codec mismatch | [`CodecError::InvalidPath`] |
//! | Path/buffer counts differ | Truncated message | [`CodecError::BufferCountMismatch`] |

use core::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::wire::WireValue;

/// One step of a buffer access path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// Array index.
    Index(usize),
    /// Object key.
    Key(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "[{i}]"),
            Self::Key(k) => write!(f, ".{k}"),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_owned())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// Access path from the root of a state tree to one buffer.
pub type BufferPath = Vec<PathSegment>;

/// Render a path for diagnostics, e.g. `$.images[2].data`.
#[must_use]
pub fn format_path(path: &[PathSegment]) -> String {
    let mut out = String::from("$");
    for segment in path {
        out.push_str(&segment.to_string());
    }
    out
}

/// Errors from the buffer codec and wire serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A buffer path does not resolve in the target structure.
    InvalidPath { path: BufferPath, reason: String },
    /// Path list and buffer list lengths differ.
    BufferCountMismatch { paths: usize, buffers: usize },
    /// A binary leaf reached a JSON encoder without being extracted.
    UnextractedBinary,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPath { path, reason } => {
                write!(f, "invalid buffer path {}: {reason}", format_path(path))
            }
            Self::BufferCountMismatch { paths, buffers } => {
                write!(f, "{paths} buffer paths but {buffers} buffers")
            }
            Self::UnextractedBinary => {
                write!(f, "binary leaf must be extracted before JSON serialization")
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// Result of [`extract_buffers`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extracted {
    /// The state with every binary leaf removed.
    pub state: WireValue,
    /// Access path of each removed leaf.
    pub paths: Vec<BufferPath>,
    /// Removed bytes, parallel to `paths`.
    pub buffers: Vec<Bytes>,
}

impl Extracted {
    /// Split back into the `(state, paths, buffers)` triple.
    #[must_use]
    pub fn into_parts(self) -> (WireValue, Vec<BufferPath>, Vec<Bytes>) {
        (self.state, self.paths, self.buffers)
    }
}

/// Move every binary leaf of `state` into a side list.
#[must_use]
pub fn extract_buffers(mut state: WireValue) -> Extracted {
    let mut paths = Vec::new();
    let mut buffers = Vec::new();
    if let WireValue::Binary(bytes) = state {
        paths.push(Vec::new());
        buffers.push(bytes);
        state = WireValue::Null;
    } else {
        let mut cursor = Vec::new();
        separate(&mut state, &mut cursor, &mut paths, &mut buffers);
    }
    #[cfg(feature = "tracing")]
    tracing::trace!(buffers = buffers.len(), "extracted binary buffers");
    Extracted {
        state,
        paths,
        buffers,
    }
}

fn separate(
    value: &mut WireValue,
    cursor: &mut BufferPath,
    paths: &mut Vec<BufferPath>,
    buffers: &mut Vec<Bytes>,
) {
    if !value.has_binary() {
        return;
    }
    match value {
        WireValue::Array(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                cursor.push(PathSegment::Index(i));
                if let WireValue::Binary(_) = item {
                    if let WireValue::Binary(bytes) = std::mem::take(item) {
                        paths.push(cursor.clone());
                        buffers.push(bytes);
                    }
                } else {
                    separate(item, cursor, paths, buffers);
                }
                cursor.pop();
            }
        }
        WireValue::Object(map) => {
            let mut i = 0;
            while i < map.len() {
                if matches!(map.get_index(i), Some((_, WireValue::Binary(_)))) {
                    if let Some((key, WireValue::Binary(bytes))) = map.shift_remove_index(i) {
                        cursor.push(PathSegment::Key(key));
                        paths.push(cursor.clone());
                        buffers.push(bytes);
                        cursor.pop();
                    }
                    continue;
                }
                if let Some((key, entry)) = map.get_index_mut(i) {
                    cursor.push(PathSegment::Key(key.clone()));
                    separate(entry, cursor, paths, buffers);
                    cursor.pop();
                }
                i += 1;
            }
        }
        _ => {}
    }
}

/// Write `buffers` back into `state` at `paths`.
///
/// Missing object keys at the final step are created; every other step must
/// already exist.
pub fn inject_buffers(
    state: &mut WireValue,
    paths: &[BufferPath],
    buffers: Vec<Bytes>,
) -> Result<(), CodecError> {
    if paths.len() != buffers.len() {
        return Err(CodecError::BufferCountMismatch {
            paths: paths.len(),
            buffers: buffers.len(),
        });
    }
    #[cfg(feature = "tracing")]
    let _span = tracing::trace_span!("inject_buffers", buffers = buffers.len()).entered();
    for (path, bytes) in paths.iter().zip(buffers) {
        put_buffer(state, path, bytes)?;
    }
    Ok(())
}

fn put_buffer(state: &mut WireValue, path: &[PathSegment], bytes: Bytes) -> Result<(), CodecError> {
    let Some((last, parents)) = path.split_last() else {
        *state = WireValue::Binary(bytes);
        return Ok(());
    };

    let invalid = |reason: String| CodecError::InvalidPath {
        path: path.to_vec(),
        reason,
    };

    let mut cursor = state;
    for segment in parents {
        cursor = match (segment, cursor) {
            (PathSegment::Key(key), WireValue::Object(map)) => map
                .get_mut(key)
                .ok_or_else(|| invalid(format!("missing key {key:?}")))?,
            (PathSegment::Index(i), WireValue::Array(items)) => {
                let len = items.len();
                items
                    .get_mut(*i)
                    .ok_or_else(|| invalid(format!("index {i} out of range for length {len}")))?
            }
            (segment, other) => {
                return Err(invalid(format!(
                    "cannot step {segment} into {}",
                    kind_name(other)
                )));
            }
        };
    }

    match (last, cursor) {
        (PathSegment::Key(key), WireValue::Object(map)) => {
            map.insert(key.clone(), WireValue::Binary(bytes));
            Ok(())
        }
        (PathSegment::Index(i), WireValue::Array(items)) => {
            let len = items.len();
            let slot = items
                .get_mut(*i)
                .ok_or_else(|| invalid(format!("index {i} out of range for length {len}")))?;
            *slot = WireValue::Binary(bytes);
            Ok(())
        }
        (segment, other) => Err(invalid(format!(
            "cannot store at {segment} in {}",
            kind_name(other)
        ))),
    }
}

fn kind_name(value: &WireValue) -> &'static str {
    match value {
        WireValue::Null => "null",
        WireValue::Bool(_) => "bool",
        WireValue::Number(_) => "number",
        WireValue::String(_) => "string",
        WireValue::Binary(_) => "binary",
        WireValue::Array(_) => "array",
        WireValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::WireMap;
    use serde_json::json;

    fn bin(data: &'static [u8]) -> WireValue {
        WireValue::Binary(Bytes::from_static(data))
    }

    fn obj(entries: Vec<(&str, WireValue)>) -> WireValue {
        WireValue::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v))
                .collect::<WireMap>(),
        )
    }

    fn round_trip(state: WireValue) {
        let extracted = extract_buffers(state.clone());
        assert!(!extracted.state.has_binary());
        let (mut rebuilt, paths, buffers) = extracted.into_parts();
        inject_buffers(&mut rebuilt, &paths, buffers).unwrap();
        assert_eq!(rebuilt, state);
    }

    #[test]
    fn plain_state_passes_through() {
        let state = WireValue::from(json!({"a": 1, "b": [1, 2, {"c": "x"}]}));
        let extracted = extract_buffers(state.clone());
        assert_eq!(extracted.state, state);
        assert!(extracted.paths.is_empty());
        assert!(extracted.buffers.is_empty());
    }

    #[test]
    fn top_level_binary() {
        let extracted = extract_buffers(bin(b"root"));
        assert_eq!(extracted.state, WireValue::Null);
        assert_eq!(extracted.paths, vec![Vec::<PathSegment>::new()]);
        round_trip(bin(b"root"));
    }

    #[test]
    fn object_binary_is_removed() {
        let state = obj(vec![("value", bin(b"png")), ("format", "png".into())]);
        let extracted = extract_buffers(state.clone());
        assert_eq!(extracted.state, obj(vec![("format", "png".into())]));
        assert_eq!(extracted.paths, vec![vec![PathSegment::from("value")]]);
        assert_eq!(extracted.buffers, vec![Bytes::from_static(b"png")]);
        round_trip(state);
    }

    #[test]
    fn array_binary_becomes_null() {
        let state = obj(vec![(
            "frames",
            WireValue::Array(vec![bin(b"a"), 7.into(), bin(b"b")]),
        )]);
        let extracted = extract_buffers(state.clone());
        assert_eq!(
            extracted.state,
            obj(vec![(
                "frames",
                WireValue::Array(vec![WireValue::Null, 7.into(), WireValue::Null])
            )])
        );
        assert_eq!(
            extracted.paths,
            vec![
                vec![PathSegment::from("frames"), PathSegment::from(0)],
                vec![PathSegment::from("frames"), PathSegment::from(2)],
            ]
        );
        round_trip(state);
    }

    #[test]
    fn list_of_dicts() {
        let state = obj(vec![(
            "files",
            WireValue::Array(vec![
                obj(vec![("name", "a.txt".into()), ("content", bin(b"aaa"))]),
                obj(vec![("name", "b.txt".into()), ("content", bin(b"bbb"))]),
            ]),
        )]);
        let extracted = extract_buffers(state.clone());
        assert_eq!(extracted.buffers.len(), 2);
        assert_eq!(
            extracted.paths[1],
            vec![
                PathSegment::from("files"),
                PathSegment::from(1),
                PathSegment::from("content")
            ]
        );
        round_trip(state);
    }

    #[test]
    fn deep_nesting() {
        let mut state = bin(b"deep");
        for depth in 0..8 {
            state = if depth % 2 == 0 {
                obj(vec![("level", state), ("n", (depth as i64).into())])
            } else {
                WireValue::Array(vec![WireValue::Null, state])
            };
        }
        let extracted = extract_buffers(state.clone());
        assert_eq!(extracted.paths[0].len(), 8);
        round_trip(state);
    }

    #[test]
    fn paths_serialize_as_keys_and_indices() {
        let path: BufferPath = vec!["a".into(), 3.into()];
        assert_eq!(serde_json::to_string(&path).unwrap(), r#"["a",3]"#);
        let back: BufferPath = serde_json::from_str(r#"["a",3]"#).unwrap();
        assert_eq!(back, path);
    }

    #[test]
    fn missing_parent_is_invalid_path() {
        let mut state = WireValue::from(json!({"a": {}}));
        let err = inject_buffers(
            &mut state,
            &[vec!["b".into(), "c".into()]],
            vec![Bytes::from_static(b"x")],
        )
        .unwrap_err();
        assert!(matches!(err, CodecError::InvalidPath { .. }));
        assert!(err.to_string().contains("$.b.c"));
    }

    #[test]
    fn index_out_of_range_is_invalid_path() {
        let mut state = WireValue::from(json!({"a": [null]}));
        let err = inject_buffers(
            &mut state,
            &[vec!["a".into(), 4.into()]],
            vec![Bytes::from_static(b"x")],
        )
        .unwrap_err();
        assert!(matches!(err, CodecError::InvalidPath { .. }));
    }

    #[test]
    fn stepping_into_leaf_is_invalid_path() {
        let mut state = WireValue::from(json!({"a": 1}));
        let err = inject_buffers(
            &mut state,
            &[vec!["a".into(), "b".into()]],
            vec![Bytes::from_static(b"x")],
        )
        .unwrap_err();
        assert!(matches!(err, CodecError::InvalidPath { .. }));
    }

    #[test]
    fn count_mismatch() {
        let mut state = WireValue::Null;
        let err = inject_buffers(&mut state, &[vec![]], Vec::new()).unwrap_err();
        assert_eq!(
            err,
            CodecError::BufferCountMismatch {
                paths: 1,
                buffers: 0
            }
        );
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn arb_wire() -> impl Strategy<Value = WireValue> {
            let leaf = prop_oneof![
                Just(WireValue::Null),
                any::<bool>().prop_map(WireValue::Bool),
                any::<i64>().prop_map(WireValue::from),
                "[a-z]{0,6}".prop_map(WireValue::String),
                proptest::collection::vec(any::<u8>(), 0..16)
                    .prop_map(|b| WireValue::Binary(Bytes::from(b))),
            ];
            leaf.prop_recursive(4, 48, 6, |inner| {
                prop_oneof![
                    proptest::collection::vec(inner.clone(), 0..6).prop_map(WireValue::Array),
                    proptest::collection::vec(("[a-z]{1,4}", inner), 0..6).prop_map(|entries| {
                        WireValue::Object(entries.into_iter().collect())
                    }),
                ]
            })
        }

        proptest! {
            #[test]
            fn inject_inverts_extract(state in arb_wire()) {
                let extracted = extract_buffers(state.clone());
                prop_assert!(!extracted.state.has_binary());
                prop_assert_eq!(extracted.paths.len(), extracted.buffers.len());
                let (mut rebuilt, paths, buffers) = extracted.into_parts();
                inject_buffers(&mut rebuilt, &paths, buffers).unwrap();
                prop_assert_eq!(rebuilt, state);
            }
        }
    }
}
