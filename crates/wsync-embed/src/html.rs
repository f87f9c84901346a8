#![forbid(unsafe_code)]

//! Static HTML export.
//!
//! An export is a manager-state JSON document inside a
//! `application/vnd.jupyter.widget-state+json` script tag, one
//! `application/vnd.jupyter.widget-view+json` tag per displayed root, and a
//! loader script that renders them in the browser without a backend.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Result |
//! |---------|-------|--------|
//! | Unopened view | A requested root never opened, or was closed | [`EmbedError::Unopened`] |
//! | Dangling reference | A captured model points at a closed model | [`EmbedError::DanglingReference`] |
//! | Serializer failure | An attribute's `to_json` rejected its value | [`EmbedError::Sync`] |
//! | Write failure | The output writer failed | [`EmbedError::Io`] |

use std::io::Write;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use wsync_core::ModelId;
use wsync_runtime::{Model, ModelRegistry};

use crate::error::EmbedError;
use crate::snapshot::{
    ManagerState, VERSION_MAJOR, VERSION_MINOR, all_states, default_views, dependency_state,
};

/// Loader for pages without require.js.
pub const DEFAULT_EMBED_SCRIPT_URL: &str =
    "https://cdn.jsdelivr.net/npm/@jupyter-widgets/html-manager@^1.0.1/dist/embed.js";
/// Loader for pages that use require.js.
pub const DEFAULT_EMBED_REQUIREJS_URL: &str =
    "https://cdn.jsdelivr.net/npm/@jupyter-widgets/html-manager@^1.0.1/dist/embed-amd.js";
/// Document title used when none is given.
pub const DEFAULT_TITLE: &str = "IPyWidget export";

const REQUIREJS_SCRIPT: &str = "<!-- Load require.js. Delete this if your page already loads require.js -->\n\
<script src=\"https://cdnjs.cloudflare.com/ajax/libs/require.js/2.3.4/require.min.js\" \
integrity=\"sha256-Ae2Vz/4ePdIu6ZyI/5ZGsYnb+m0JlOmKPjt6XZ9JJkA=\" crossorigin=\"anonymous\"></script>";

static SCRIPT_BREAKOUT: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(?i)<(script|/script|!--)"));

/// Reference from a view tag to the model it renders.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ViewSpec {
    pub version_major: u64,
    pub version_minor: u64,
    pub model_id: ModelId,
}

impl ViewSpec {
    /// View spec for an open model.
    pub fn for_model(model: &Model) -> Result<Self, EmbedError> {
        let model_id = model.id().ok_or_else(|| EmbedError::Unopened {
            model: model.schema().key().model_name.clone(),
        })?;
        Ok(Self {
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            model_id,
        })
    }
}

/// Export settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmbedOptions {
    /// Omit attributes still at their defaults.
    pub drop_defaults: bool,
    /// Capture only the views' dependency closure instead of every live
    /// model.
    pub expand_dependencies: bool,
    /// Spaces per level in the state JSON; `None` renders it compact.
    pub indent: Option<usize>,
    /// Loader script URL; the default depends on `requirejs`.
    pub embed_url: Option<String>,
    /// Load require.js ahead of the loader.
    pub requirejs: bool,
    /// Mark loader scripts `crossorigin="anonymous"`.
    pub cors: bool,
    /// Title of the standalone page.
    pub title: String,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            drop_defaults: true,
            expand_dependencies: false,
            indent: Some(2),
            embed_url: None,
            requirejs: true,
            cors: true,
            title: DEFAULT_TITLE.to_owned(),
        }
    }
}

impl EmbedOptions {
    #[must_use]
    pub fn drop_defaults(mut self, drop_defaults: bool) -> Self {
        self.drop_defaults = drop_defaults;
        self
    }

    #[must_use]
    pub fn expand_dependencies(mut self, expand: bool) -> Self {
        self.expand_dependencies = expand;
        self
    }

    #[must_use]
    pub fn indent(mut self, indent: Option<usize>) -> Self {
        self.indent = indent;
        self
    }

    #[must_use]
    pub fn embed_url(mut self, url: impl Into<String>) -> Self {
        self.embed_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn requirejs(mut self, requirejs: bool) -> Self {
        self.requirejs = requirejs;
        self
    }

    #[must_use]
    pub fn cors(mut self, cors: bool) -> Self {
        self.cors = cors;
        self
    }

    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    fn loader(&self) -> String {
        let url = self.embed_url.as_deref().unwrap_or(if self.requirejs {
            DEFAULT_EMBED_REQUIREJS_URL
        } else {
            DEFAULT_EMBED_SCRIPT_URL
        });
        let cors = if self.cors { " crossorigin=\"anonymous\"" } else { "" };
        let script = format!("<script src=\"{url}\"{cors}></script>");
        if self.requirejs {
            format!("{REQUIREJS_SCRIPT}\n{script}")
        } else {
            script
        }
    }
}

/// Everything an export needs: the state document and the views to render.
#[derive(Clone, Debug, PartialEq)]
pub struct EmbedData {
    pub manager_state: ManagerState,
    pub view_specs: Vec<ViewSpec>,
}

impl EmbedData {
    /// Manager state as JSON text, indented per `indent`.
    pub fn state_json(&self, indent: Option<usize>) -> Result<String, EmbedError> {
        let Some(width) = indent else {
            return Ok(serde_json::to_string(&self.manager_state)?);
        };
        let pad = vec![b' '; width];
        let formatter = serde_json::ser::PrettyFormatter::with_indent(&pad);
        let mut out = Vec::new();
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.manager_state.serialize(&mut serializer)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

/// Collect state and view specs for `views`.
///
/// Without views, every displayable live model that is not a child of
/// another displayable model becomes a view. Models without a view are
/// skipped. The state covers every live model unless
/// `expand_dependencies` is set.
pub fn embed_data(
    registry: &ModelRegistry,
    views: Option<&[Model]>,
    options: &EmbedOptions,
) -> Result<EmbedData, EmbedError> {
    let roots: Vec<Model> = match views {
        Some(views) if !views.is_empty() => views
            .iter()
            .filter(|model| model.schema().is_displayable())
            .cloned()
            .collect(),
        _ => default_views(registry),
    };
    let state = if options.expand_dependencies {
        dependency_state(registry, Some(roots.as_slice()), options.drop_defaults, true)?
    } else {
        all_states(registry, options.drop_defaults)?
    };
    let view_specs = roots
        .iter()
        .map(ViewSpec::for_model)
        .collect::<Result<Vec<_>, _>>()?;
    tracing::debug!(
        models = state.len(),
        views = view_specs.len(),
        "collected embed data"
    );
    Ok(EmbedData {
        manager_state: ManagerState::new(state),
        view_specs,
    })
}

/// Neutralize sequences that would end or open a script element.
///
/// `<script`, `</script` and `<!--` (any case) have their `<` replaced by
/// the JSON escape `\u003c`, which parses back to the same string.
pub fn escape_script(text: &str) -> Result<String, EmbedError> {
    let pattern = SCRIPT_BREAKOUT.as_ref().map_err(|e| EmbedError::Pattern(e.clone()))?;
    Ok(pattern.replace_all(text, r"\u003c$1").into_owned())
}

/// Render an HTML fragment from collected data.
pub fn render_snippet(data: &EmbedData, options: &EmbedOptions) -> Result<String, EmbedError> {
    let state = escape_script(&data.state_json(options.indent)?)?;
    let views = data
        .view_specs
        .iter()
        .map(|spec| {
            let json = serde_json::to_string(spec)?;
            Ok(format!(
                "<script type=\"application/vnd.jupyter.widget-view+json\">\n{}\n</script>",
                escape_script(&json)?
            ))
        })
        .collect::<Result<Vec<_>, EmbedError>>()?
        .join("\n");
    Ok(format!(
        "\n{load}\n<script type=\"application/vnd.jupyter.widget-state+json\">\n{state}\n</script>\n{views}\n",
        load = options.loader(),
    ))
}

/// HTML fragment embedding `views` (or the default roots).
pub fn embed_snippet(
    registry: &ModelRegistry,
    views: Option<&[Model]>,
    options: &EmbedOptions,
) -> Result<String, EmbedError> {
    render_snippet(&embed_data(registry, views, options)?, options)
}

/// Standalone HTML page embedding `views`.
pub fn embed_minimal_html(
    registry: &ModelRegistry,
    views: Option<&[Model]>,
    options: &EmbedOptions,
) -> Result<String, EmbedError> {
    let snippet = embed_snippet(registry, views, options)?;
    Ok(format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n\n  <meta charset=\"UTF-8\">\n  <title>{title}</title>\n</head>\n<body>\n{snippet}\n</body>\n</html>\n",
        title = options.title,
    ))
}

/// Write a standalone page to `out`.
pub fn write_minimal_html(
    out: &mut impl Write,
    registry: &ModelRegistry,
    views: Option<&[Model]>,
    options: &EmbedOptions,
) -> Result<(), EmbedError> {
    let page = embed_minimal_html(registry, views, options)?;
    out.write_all(page.as_bytes())?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::StateMap;

    #[test]
    fn escapes_script_breakouts_case_insensitively() {
        let escape = |text: &str| escape_script(text).unwrap();
        assert_eq!(escape("a</script>b"), r"a\u003c/script>b");
        assert_eq!(escape("<SCRIPT src=x>"), r"\u003cSCRIPT src=x>");
        assert_eq!(escape("<!-- note -->"), r"\u003c!-- note -->");
        assert_eq!(escape("1 < 2 <b>"), "1 < 2 <b>");
    }

    #[test]
    fn escaped_json_parses_back_unchanged() {
        let original = serde_json::json!({"description": "</script><script>alert(1)</script>"});
        let escaped = escape_script(&serde_json::to_string(&original).unwrap()).unwrap();
        assert!(!escaped.to_lowercase().contains("</script"));
        let back: serde_json::Value = serde_json::from_str(&escaped).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn loader_variants() {
        let amd = EmbedOptions::default().loader();
        assert!(amd.starts_with("<!-- Load require.js."));
        assert!(amd.ends_with(&format!(
            "<script src=\"{DEFAULT_EMBED_REQUIREJS_URL}\" crossorigin=\"anonymous\"></script>"
        )));

        let plain = EmbedOptions::default().requirejs(false).cors(false).loader();
        assert_eq!(plain, format!("<script src=\"{DEFAULT_EMBED_SCRIPT_URL}\"></script>"));

        let custom = EmbedOptions::default()
            .requirejs(false)
            .embed_url("https://example.test/embed.js")
            .loader();
        assert!(custom.contains("https://example.test/embed.js"));
    }

    #[test]
    fn snippet_layout_with_no_models() {
        let data = EmbedData {
            manager_state: ManagerState::new(StateMap::new()),
            view_specs: vec![ViewSpec {
                version_major: 2,
                version_minor: 0,
                model_id: ModelId::new("abc"),
            }],
        };
        let options = EmbedOptions::default().requirejs(false).indent(None);
        let html = render_snippet(&data, &options).unwrap();
        let expected = format!(
            "\n<script src=\"{DEFAULT_EMBED_SCRIPT_URL}\" crossorigin=\"anonymous\"></script>\n\
<script type=\"application/vnd.jupyter.widget-state+json\">\n\
{{\"version_major\":2,\"version_minor\":0,\"state\":{{}}}}\n</script>\n\
<script type=\"application/vnd.jupyter.widget-view+json\">\n\
{{\"version_major\":2,\"version_minor\":0,\"model_id\":\"abc\"}}\n</script>\n"
        );
        assert_eq!(html, expected);
    }

    #[test]
    fn state_json_honours_indent() {
        let data = EmbedData {
            manager_state: ManagerState::new(StateMap::new()),
            view_specs: Vec::new(),
        };
        let pretty = data.state_json(Some(4)).unwrap();
        assert!(pretty.contains("\n    \"version_major\": 2"));
        let compact = data.state_json(None).unwrap();
        assert!(!compact.contains('\n'));
    }

    #[test]
    fn minimal_html_wraps_snippet() {
        let registry = ModelRegistry::new();
        let options = EmbedOptions::default().title("Demo");
        let page = embed_minimal_html(&registry, None, &options).unwrap();
        assert!(page.starts_with("<!DOCTYPE html>\n<html lang=\"en\">"));
        assert!(page.contains("<title>Demo</title>"));
        assert!(page.ends_with("</body>\n</html>\n"));

        let mut out = Vec::new();
        write_minimal_html(&mut out, &registry, None, &options).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), page);
    }
}
