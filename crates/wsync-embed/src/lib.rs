#![forbid(unsafe_code)]

//! Static export of synchronized models.
//!
//! # Role in wsync
//! `wsync-embed` turns live models into documents that render without a
//! backend: a dependency-closed state snapshot plus view references,
//! optionally wrapped in an HTML page.
//!
//! # Primary responsibilities
//! - **Snapshots**: per-model state with binary values inlined as base64,
//!   dependency closure over model references, referring-model expansion.
//! - **HTML**: script-tag escaping, fragment and standalone page rendering.
//!
//! # Example
//!
//! ```no_run
//! use wsync_embed::{EmbedOptions, embed_minimal_html};
//! use wsync_runtime::ModelRegistry;
//!
//! # fn run(registry: &ModelRegistry) -> Result<(), wsync_embed::EmbedError> {
//! let page = embed_minimal_html(registry, None, &EmbedOptions::default().title("Report"))?;
//! std::fs::write("report.html", page)?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod html;
pub mod snapshot;

pub use error::EmbedError;
pub use html::{
    DEFAULT_EMBED_REQUIREJS_URL, DEFAULT_EMBED_SCRIPT_URL, DEFAULT_TITLE, EmbedData, EmbedOptions,
    ViewSpec, embed_data, embed_minimal_html, embed_snippet, escape_script, render_snippet,
    write_minimal_html,
};
pub use snapshot::{
    EmbedState, EmbeddedBuffer, ManagerState, StateMap, add_referring_widgets, all_states,
    default_views, dependency_state, embed_state, find_refs, get_recursive_state, manager_state,
};
