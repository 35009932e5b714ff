//! Template environment.
//!
//! Built once per build from every file under `build.templates.root` whose
//! extension is one of `build.templates.filetypes`. Front matter is stripped
//! on load.
//!
//! Template names are paths relative to the root, with `/` separators:
//!
//! ```text
//! src/
//! ├── layouts/base.html          →  "layouts/base.html"
//! ├── components/button.html     →  "components/button.html"
//! └── templates/index.html       →  "templates/index.html" (page)
//! ```
//!
//! Files under the page directory (`build.templates.source`) are loaded one
//! at a time after everything else, and a page that fails to parse is left
//! out rather than failing the environment. The page itself reports the
//! error when it renders. The page directory may be the root itself, or a
//! parent of it, so layouts and components can live beside the pages.
//!
//! Autoescaping is off; templates produce HTML and are trusted.
//!
//! ## Per-render Capabilities
//!
//! Each render works on its own copy of the loaded environment with two
//! additions bound to that page:
//!
//! - the `markdown` filter (see [`crate::markdown`]), carrying the page's
//!   Markdown options;
//! - the `component` function, which renders another template in place:
//!   `{{ component(src="components/button.html", label="Go") }}`. The
//!   component sees the page context plus its own arguments, and may call
//!   further components up to [`MAX_COMPONENT_DEPTH`] levels deep.

use crate::markdown::{MarkdownFilter, MarkdownOptions};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tera::{Context, Tera, Value};
use thiserror::Error;
use walkdir::WalkDir;

/// Maximum nesting of `component` calls.
pub const MAX_COMPONENT_DEPTH: usize = 16;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("cannot read template root {root}: {source}")]
    Walk {
        root: PathBuf,
        source: walkdir::Error,
    },
    #[error("cannot read template {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot load templates: {0}")]
    Load(String),
    #[error("{0}")]
    Render(String),
}

/// The loaded templates.
#[derive(Debug, Clone)]
pub struct TemplateEnvironment {
    base: Arc<Tera>,
}

impl TemplateEnvironment {
    /// Load every matching template under `root`.
    ///
    /// Templates under `pages` are optional: each is added on its own and
    /// skipped if it does not parse.
    pub fn init(
        root: &Path,
        pages: Option<&Path>,
        filetypes: &[String],
    ) -> Result<Self, TemplateError> {
        let mut shared = Vec::new();
        let mut optional = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|source| TemplateError::Walk {
                root: root.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() || !has_filetype(path, filetypes) {
                continue;
            }
            let text = fs::read_to_string(path).map_err(|source| TemplateError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let template = (
                template_name(root, path),
                crate::frontmatter::strip(&text).to_string(),
            );
            if pages.is_some_and(|dir| path.starts_with(dir)) {
                optional.push(template);
            } else {
                shared.push(template);
            }
        }

        let mut environment = Self::from_templates(shared)?;
        let tera = Arc::make_mut(&mut environment.base);
        for (name, source) in optional {
            // A failed add leaves the template half-registered, so try it on a copy
            let mut candidate = tera.clone();
            match candidate.add_raw_template(&name, &source) {
                Ok(()) => *tera = candidate,
                Err(e) => tracing::debug!(template = %name, error = %describe(&e), "page not loaded as a template"),
            }
        }
        tracing::debug!(
            root = %root.display(),
            count = tera.get_template_names().count(),
            "loaded templates"
        );
        Ok(environment)
    }

    /// Build an environment from in-memory `(name, source)` pairs.
    pub fn from_templates<I, N, S>(templates: I) -> Result<Self, TemplateError>
    where
        I: IntoIterator<Item = (N, S)>,
        N: AsRef<str>,
        S: AsRef<str>,
    {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        let templates: Vec<(N, S)> = templates.into_iter().collect();
        tera.add_raw_templates(
            templates
                .iter()
                .map(|(name, source)| (name.as_ref(), source.as_ref())),
        )
        .map_err(|e| TemplateError::Load(describe(&e)))?;
        Ok(Self {
            base: Arc::new(tera),
        })
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.base.get_template_names().any(|n| n == name)
    }

    /// Render a page body, inside `layout` if given.
    ///
    /// With a layout the body is rendered as a child template of it, so the
    /// body overrides the layout's blocks.
    pub fn render_page(
        &self,
        body: &str,
        layout: Option<&str>,
        context: &Context,
        markdown: &MarkdownOptions,
    ) -> Result<String, TemplateError> {
        let source = match layout {
            Some(layout) => format!("{{% extends \"{layout}\" %}}\n{body}"),
            None => body.to_string(),
        };
        let component = ComponentFunction {
            base: Arc::clone(&self.base),
            markdown: markdown.clone(),
            globals: context.clone(),
            depth: 0,
        };
        let mut tera = component.renderer();
        tera.render_str(&source, context)
            .map_err(|e| TemplateError::Render(describe(&e)))
    }
}

/// The context every page renders with.
pub fn page_context(page: &Value, env: &str, css: &str) -> Context {
    let mut context = Context::new();
    context.insert("page", page);
    context.insert("env", env);
    context.insert("css", css);
    context
}

fn has_filetype(path: &Path, filetypes: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| filetypes.iter().any(|f| f == ext))
}

fn template_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Flatten a tera error and its causes into one line.
///
/// Tera's top-level message only names the template; the useful part is in
/// the source chain.
pub fn describe(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

// ============================================================================
// component()
// ============================================================================

#[derive(Clone)]
struct ComponentFunction {
    base: Arc<Tera>,
    markdown: MarkdownOptions,
    globals: Context,
    depth: usize,
}

impl ComponentFunction {
    /// A copy of the base environment with this level's filter and function.
    fn renderer(&self) -> Tera {
        let mut tera = (*self.base).clone();
        tera.register_filter("markdown", MarkdownFilter::new(self.markdown.clone()));
        tera.register_function(
            "component",
            ComponentFunction {
                depth: self.depth + 1,
                ..self.clone()
            },
        );
        tera
    }
}

impl tera::Function for ComponentFunction {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let src = args
            .get("src")
            .and_then(Value::as_str)
            .ok_or_else(|| tera::Error::msg("component() requires a `src` string argument"))?;
        if self.depth > MAX_COMPONENT_DEPTH {
            return Err(tera::Error::msg(format!(
                "component {src:?} nested more than {MAX_COMPONENT_DEPTH} levels deep"
            )));
        }
        let mut context = self.globals.clone();
        for (key, value) in args.iter().filter(|(k, _)| k.as_str() != "src") {
            context.insert(key.as_str(), value);
        }
        let html = self.renderer().render(src, &context)?;
        Ok(Value::String(html))
    }

    fn is_safe(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn env(templates: &[(&str, &str)]) -> TemplateEnvironment {
        TemplateEnvironment::from_templates(templates.iter().copied()).unwrap()
    }

    fn ctx() -> Context {
        page_context(&json!({ "title": "Hello" }), "local", ".a{}")
    }

    fn render(env: &TemplateEnvironment, body: &str, layout: Option<&str>) -> String {
        env.render_page(body, layout, &ctx(), &MarkdownOptions::default())
            .unwrap()
    }

    #[test]
    fn renders_standalone_body_with_context() {
        let env = env(&[]);
        let html = render(&env, "<h1>{{ page.title }}</h1><i>{{ env }}</i><style>{{ css }}</style>", None);
        assert_eq!(html, "<h1>Hello</h1><i>local</i><style>.a{}</style>");
    }

    #[test]
    fn body_fills_layout_blocks() {
        let env = env(&[(
            "layouts/base.html",
            "<html><title>{{ page.title }}</title><body>{% block content %}{% endblock %}</body></html>",
        )]);
        let html = render(&env, "{% block content %}<p>Hi</p>{% endblock %}", Some("layouts/base.html"));
        assert_eq!(html, "<html><title>Hello</title><body><p>Hi</p></body></html>");
    }

    #[test]
    fn autoescape_is_off() {
        let env = env(&[]);
        let context = page_context(&json!({ "snippet": "<b>x</b>" }), "local", "");
        let html = env
            .render_page("{{ page.snippet }}", None, &context, &MarkdownOptions::default())
            .unwrap();
        assert_eq!(html, "<b>x</b>");
    }

    #[test]
    fn markdown_filter_block_and_value() {
        let env = env(&[]);
        let html = render(
            &env,
            "{% filter markdown %}\n    ## Title\n    Some **bold**.\n{% endfilter %}",
            None,
        );
        assert!(html.contains("<h2>Title</h2>"));
        assert!(html.contains("<strong>bold</strong>"));

        let html = render(&env, "{{ page.title | markdown(inline=true) }}", None);
        assert_eq!(html, "Hello");
    }

    #[test]
    fn markdown_options_are_per_render() {
        let env = env(&[]);
        let breaks = MarkdownOptions {
            breaks: true,
            ..MarkdownOptions::default()
        };
        let body = "{% filter markdown %}a\nb{% endfilter %}";
        let with = env.render_page(body, None, &ctx(), &breaks).unwrap();
        let without = env
            .render_page(body, None, &ctx(), &MarkdownOptions::default())
            .unwrap();
        assert!(with.contains("<br />"));
        assert!(!without.contains("<br />"));
    }

    #[test]
    fn component_renders_with_arguments_and_page() {
        let env = env(&[(
            "components/button.html",
            "<button>{{ label }} / {{ page.title }}</button>",
        )]);
        let html = render(&env, r#"{{ component(src="components/button.html", label="Go") }}"#, None);
        assert_eq!(html, "<button>Go / Hello</button>");
    }

    #[test]
    fn components_nest() {
        let env = env(&[
            ("components/card.html", r#"<div>{{ component(src="components/button.html", label=title) }}</div>"#),
            ("components/button.html", "<button>{{ label }}</button>"),
        ]);
        let html = render(&env, r#"{{ component(src="components/card.html", title="T") }}"#, None);
        assert_eq!(html, "<div><button>T</button></div>");
    }

    #[test]
    fn runaway_component_recursion_is_an_error() {
        let env = env(&[("components/loop.html", r#"{{ component(src="components/loop.html") }}"#)]);
        let result = env.render_page(
            r#"{{ component(src="components/loop.html") }}"#,
            None,
            &ctx(),
            &MarkdownOptions::default(),
        );
        let err = result.unwrap_err().to_string();
        assert!(err.contains("levels deep"), "{err}");
    }

    #[test]
    fn component_without_src_is_an_error() {
        let env = env(&[]);
        let result = env.render_page("{{ component(label=1) }}", None, &ctx(), &MarkdownOptions::default());
        assert!(result.unwrap_err().to_string().contains("`src`"));
    }

    #[test]
    fn render_error_includes_cause() {
        let env = env(&[]);
        let result = env.render_page("{{ missing.value }}", None, &ctx(), &MarkdownOptions::default());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("missing"), "{err}");
    }

    #[test]
    fn init_loads_matching_files_and_strips_front_matter() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("src");
        fs::create_dir_all(root.join("layouts")).unwrap();
        fs::create_dir_all(root.join("templates")).unwrap();
        fs::write(
            root.join("layouts/base.njk"),
            "---\ndescription: base\n---\n<main>{% block content %}{% endblock %}</main>",
        )
        .unwrap();
        fs::write(root.join("layouts/notes.txt"), "{{ broken").unwrap();
        fs::write(root.join("templates/index.html"), "{% block content %}{{ broken").unwrap();
        fs::write(root.join("templates/about.html"), "<p>about</p>").unwrap();

        let filetypes = vec!["html".to_string(), "njk".to_string()];
        let env = TemplateEnvironment::init(&root, Some(&root.join("templates")), &filetypes).unwrap();

        assert!(env.has_template("layouts/base.njk"));
        assert!(!env.has_template("layouts/notes.txt"));
        assert!(!env.has_template("templates/index.html"));
        assert!(env.has_template("templates/about.html"));
        let html = render(&env, "{% block content %}x{% endblock %}", Some("layouts/base.njk"));
        assert_eq!(html, "<main>x</main>");
    }

    #[test]
    fn init_keeps_layouts_when_pages_share_the_root() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("src");
        fs::create_dir_all(root.join("layouts")).unwrap();
        fs::write(
            root.join("layouts/base.html"),
            "<main>{% block content %}{% endblock %}</main>",
        )
        .unwrap();
        fs::write(root.join("index.html"), "{% block content %}<h1>Hi</h1>{% endblock %}").unwrap();
        fs::write(root.join("broken.html"), "{% if %}").unwrap();

        let env = TemplateEnvironment::init(&root, Some(&root), &["html".to_string()]).unwrap();

        assert!(env.has_template("layouts/base.html"));
        assert!(env.has_template("index.html"));
        assert!(!env.has_template("broken.html"));
        let html = render(&env, "{% block content %}x{% endblock %}", Some("layouts/base.html"));
        assert_eq!(html, "<main>x</main>");
    }

    #[test]
    fn init_keeps_layouts_when_pages_contain_the_root() {
        let tmp = TempDir::new().unwrap();
        let pages = tmp.path().join("site");
        let root = pages.join("src");
        fs::create_dir_all(root.join("layouts")).unwrap();
        fs::write(
            root.join("layouts/base.html"),
            "<main>{% block content %}{% endblock %}</main>",
        )
        .unwrap();

        let env = TemplateEnvironment::init(&root, Some(&pages), &["html".to_string()]).unwrap();

        assert!(env.has_template("layouts/base.html"));
    }

    #[test]
    fn init_missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let result = TemplateEnvironment::init(&tmp.path().join("nope"), None, &["html".to_string()]);
        assert!(matches!(result, Err(TemplateError::Walk { .. })));
    }
}
