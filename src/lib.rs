//! # Plinth
//!
//! A static-site build pipeline. Pages are template files with optional
//! front matter; each one is rendered inside a layout, given page-scoped
//! utility CSS, linted, run through a chain of HTML transformers and written
//! to a mirrored output tree.
//!
//! # Architecture: Per-page Pipeline
//!
//! ```text
//! src/templates/about.html
//!   │  front matter ──→ merged over config.toml / config.<env>.toml
//!   │  body ──────────→ {% extends layout %} + body → tera
//!   ▼
//! HTML ─→ content="tailwind" CSS ─→ lint ─→ transformers ─→ dist/about.html
//!                                                             ├─ about.txt   (plaintext)
//!                                                             └─ permalink   (move)
//! ```
//!
//! Rendering is sequential and deterministic (pages in sorted path order).
//! Each page's disk writes run on the rayon pool while the next page
//! renders; [`pipeline::build`] joins them all before it returns.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | Stock defaults, `config.toml` + `config.<env>.toml` layering, per-page merge, validation |
//! | [`frontmatter`] | Splits a template into YAML/TOML front matter and body |
//! | [`markdown`] | Markdown rendering and the `markdown` template filter |
//! | [`templates`] | Template environment: loading, layouts, the `component` function |
//! | [`css`] | Global stylesheet and page-scoped CSS behind the [`css::CssCompiler`] trait |
//! | [`postprocess`] | `content="tailwind"` directive substitution |
//! | [`lint`] | htmlhint-compatible HTML linter |
//! | [`transform`] | HTML transformer chain: string replacement, image URLs, link parameters, minification |
//! | [`plaintext`] | HTML → plain text with bracketed links |
//! | [`emit`] | Output paths, permalinks, writes, asset passthrough |
//! | [`pipeline`] | Build driver and per-page steps |
//! | [`output`] | CLI output formatting for progress and the end-of-build report |
//!
//! # Design Decisions
//!
//! ## Page Config Is a Value, Not a Mutation
//!
//! Front matter is deep-merged over the global config into a fresh
//! [`config::ResolvedConfig`] per page. Markdown options, lint rules and
//! transformer settings are read from that value and passed explicitly into
//! each stage. Nothing is reconfigured in place, so one page's settings
//! cannot leak into the next.
//!
//! ## Explicit Permalink Convention
//!
//! Permalinks always resolve under the destination directory. A trailing
//! slash means a directory index (`/about/` → `dist/about/index.html`);
//! anything else is a file path. See [`emit::permalink_path`].
//!
//! ## Configurable Failure Isolation
//!
//! By default the first failing page stops the build. Setting
//! `build.fail_fast = false` records page failures in the report and keeps
//! going. Lint findings are always advisory.

pub mod config;
pub mod css;
pub mod emit;
pub mod frontmatter;
pub mod lint;
pub mod markdown;
pub mod output;
pub mod pipeline;
pub mod plaintext;
pub mod postprocess;
pub mod templates;
pub mod transform;

#[cfg(test)]
pub(crate) mod test_helpers;
