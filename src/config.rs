//! Build configuration module.
//!
//! Handles loading, layering, validating, and per-page merging of the build
//! configuration. Every template sees the same global configuration, with its
//! own front matter merged on top.
//!
//! ## Config File Location
//!
//! Place `config.toml` in the project root, plus an optional per-environment
//! overlay named after the `--env` flag:
//!
//! ```text
//! project/
//! ├── config.toml              # Base config (overrides stock defaults)
//! ├── config.production.toml   # Applied on top when --env production
//! └── src/
//!     ├── layouts/
//!     ├── components/
//!     └── templates/
//! ```
//!
//! ## Layering
//!
//! ```text
//! stock defaults  →  config.toml  →  config.<env>.toml  →  front matter
//! └──────────── merge_values (replace) ───────────┘   └ deep_merge ┘
//! ```
//!
//! Config files layer with [`merge_values`]: tables merge key-by-key, every
//! other value (arrays included) is replaced. Front matter is merged with
//! [`deep_merge`], which concatenates arrays instead. The two differ on
//! purpose: a config file that sets `filetypes = ["html"]` means "only html",
//! while a page adding to a list wants to extend it.
//!
//! ## Two Views of One Config
//!
//! A [`ResolvedConfig`] carries the merged mapping as a [`serde_json::Value`]
//! (exposed to templates as `page`, arbitrary keys included) and the typed
//! [`SiteConfig`] the pipeline reads. Unknown top-level keys are page data and
//! pass through untouched; unknown keys inside the typed sub-tables
//! (`build.*`, `markdown`, `minify`) are rejected to catch typos early.

use crate::lint::{self, RuleSet};
use crate::markdown::MarkdownOptions;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Name of the environment that gets minified CSS and no CSS file on disk.
pub const PRODUCTION_ENV: &str = "production";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid config value: {0}")]
    Shape(#[from] serde_json::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Whether `env` is the production environment.
pub fn is_production(env: &str) -> bool {
    env == PRODUCTION_ENV
}

/// Typed view of the build configuration.
///
/// All fields have defaults; config files and front matter need only specify
/// what they override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Page-level layout, highest priority.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,
    pub build: BuildConfig,
    /// Options for the `markdown` template filter.
    pub markdown: MarkdownOptions,
    /// Lint rules, keyed by htmlhint rule id.
    pub htmlhint: RuleSet,
    /// Also write a `.txt` plaintext version of the page.
    pub plaintext: bool,
    /// Output path override, relative to the destination root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permalink: Option<String>,
    /// Prefix for relative image URLs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_image_url: Option<String>,
    /// Query parameters appended to absolute links.
    pub url_parameters: BTreeMap<String, String>,
    /// Regex pattern → replacement, applied to the final HTML.
    pub replace_strings: BTreeMap<String, String>,
    pub minify: MinifyConfig,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            layout: None,
            build: BuildConfig::default(),
            markdown: MarkdownOptions::default(),
            htmlhint: lint::default_rules(),
            plaintext: false,
            permalink: None,
            base_image_url: None,
            url_parameters: BTreeMap::new(),
            replace_strings: BTreeMap::new(),
            minify: MinifyConfig::default(),
        }
    }
}

impl SiteConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ext = &self.build.destination.extension;
        if ext.is_empty() {
            return Err(ConfigError::Validation(
                "build.destination.extension must not be empty".into(),
            ));
        }
        if ext.starts_with('.') {
            return Err(ConfigError::Validation(format!(
                "build.destination.extension must not start with a dot (got {ext:?})"
            )));
        }
        if self.build.templates.filetypes.is_empty() {
            return Err(ConfigError::Validation(
                "build.templates.filetypes must not be empty".into(),
            ));
        }
        if self.build.tailwind.css.is_empty() {
            return Err(ConfigError::Validation(
                "build.tailwind.css must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// The layout a page renders inside, if any.
    ///
    /// Checked in order: `layout`, `build.layout`, `build.templates.layout`.
    pub fn resolve_layout(&self) -> Option<&str> {
        self.layout
            .as_deref()
            .or(self.build.layout.as_deref())
            .or(self.build.templates.layout.as_deref())
            .filter(|l| !l.is_empty())
    }
}

/// The `[build]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Fallback layout when the page sets none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,
    /// Stop at the first failing template (`true`) or record the failure
    /// and keep going (`false`).
    pub fail_fast: bool,
    pub templates: TemplatesConfig,
    pub destination: DestinationConfig,
    pub assets: AssetsConfig,
    pub tailwind: TailwindConfig,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            layout: None,
            fail_fast: true,
            templates: TemplatesConfig::default(),
            destination: DestinationConfig::default(),
            assets: AssetsConfig::default(),
            tailwind: TailwindConfig::default(),
        }
    }
}

/// Where templates live and which files count as templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TemplatesConfig {
    /// Base path of the template environment. Layout and component names
    /// are relative to it.
    pub root: String,
    /// Directory scanned for pages to build.
    pub source: String,
    /// File extensions treated as templates. Accepts a list or a
    /// `|`-separated string (`"html|njk"`).
    #[serde(deserialize_with = "deserialize_filetypes")]
    pub filetypes: Vec<String>,
    /// Lowest-priority layout fallback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            root: "src".to_string(),
            source: "src/templates".to_string(),
            filetypes: vec!["html".to_string(), "njk".to_string(), "nunjucks".to_string()],
            layout: None,
        }
    }
}

fn deserialize_filetypes<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum FileTypes {
        Joined(String),
        List(Vec<String>),
    }

    let raw = match FileTypes::deserialize(deserializer)? {
        FileTypes::Joined(s) => s.split('|').map(str::to_string).collect(),
        FileTypes::List(list) => list,
    };
    Ok(raw
        .iter()
        .map(|t| t.trim().trim_start_matches('.').to_string())
        .filter(|t| !t.is_empty())
        .collect())
}

/// Output location settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DestinationConfig {
    /// Output root directory.
    pub path: String,
    /// Extension given to rendered pages (no leading dot).
    pub extension: String,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            path: "dist".to_string(),
            extension: "html".to_string(),
        }
    }
}

/// Static assets copied verbatim before templates are processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssetsConfig {
    pub source: String,
    /// Subpath of the destination root the assets land in.
    pub destination: String,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            source: "src/assets/images".to_string(),
            destination: "images".to_string(),
        }
    }
}

/// Utility CSS settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TailwindConfig {
    /// File name of the stylesheet written to `<destination>/css/`.
    pub css: String,
    /// Source stylesheet. Unset means an empty global stylesheet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// External compiler, e.g. `["npx", "tailwindcss"]`. Empty uses the
    /// built-in compiler.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
}

impl Default for TailwindConfig {
    fn default() -> Self {
        Self {
            css: "tailwind.css".to_string(),
            source: None,
            command: Vec::new(),
        }
    }
}

/// HTML minification settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MinifyConfig {
    pub enabled: bool,
}

// =============================================================================
// Merging
// =============================================================================

/// Recursively merge `overlay` on top of `base`, config-file style.
///
/// - Objects are merged key-by-key (overlay keys override base keys).
/// - Any other overlay value, arrays included, replaces the base value.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_values(base: Value, overlay: Value) -> Value {
    merge_with(base, overlay, false)
}

/// Recursively merge `overlay` on top of `base`, front-matter style.
///
/// Same as [`merge_values`] except arrays are concatenated, base elements
/// first.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    merge_with(base, overlay, true)
}

fn merge_with(base: Value, overlay: Value, concat_arrays: bool) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_val) => merge_with(base_val, overlay_val, concat_arrays),
                    None => overlay_val,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (Value::Array(mut base_items), Value::Array(overlay_items)) if concat_arrays => {
            base_items.extend(overlay_items);
            Value::Array(base_items)
        }
        (_, overlay) => overlay,
    }
}

// =============================================================================
// Resolved configuration
// =============================================================================

/// A fully merged configuration: the raw mapping plus its typed view.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    /// Everything that was merged, including keys the pipeline ignores.
    pub raw: Value,
    pub site: SiteConfig,
}

impl ResolvedConfig {
    /// Deserialize and validate a merged mapping.
    pub fn from_value(raw: Value) -> Result<Self, ConfigError> {
        let site: SiteConfig = serde_json::from_value(raw.clone())?;
        site.validate()?;
        Ok(Self { raw, site })
    }

    /// Produce the page configuration for one template.
    ///
    /// Front-matter values win on every overlapping leaf. The receiver is
    /// left untouched, so no page can observe another page's overrides.
    pub fn merge_page(&self, front_matter: &Value) -> Result<Self, ConfigError> {
        Self::from_value(deep_merge(self.raw.clone(), front_matter.clone()))
    }
}

/// Returns the stock defaults as a JSON object.
///
/// The canonical representation of all default values, used as the base
/// layer that config files are merged onto.
pub fn stock_defaults_value() -> Result<Value, ConfigError> {
    Ok(serde_json::to_value(SiteConfig::default())?)
}

/// Load `<root>/<file_name>` as a raw value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(root: &Path, file_name: &str) -> Result<Option<Value>, ConfigError> {
    let config_path = root.join(file_name);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Resolve the global configuration for `env`.
///
/// Layers `config.toml` and then `config.<env>.toml` on top of the stock
/// defaults, rejects unknown keys in typed tables, and validates the result.
pub fn load_config(root: &Path, env: &str) -> Result<ResolvedConfig, ConfigError> {
    let mut merged = stock_defaults_value()?;
    for name in ["config.toml".to_string(), format!("config.{env}.toml")] {
        if let Some(layer) = load_raw_config(root, &name)? {
            tracing::debug!(file = %name, "applying config layer");
            merged = merge_values(merged, layer);
        }
    }
    ResolvedConfig::from_value(merged)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Plinth Configuration
# =====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Layering, lowest to highest priority:
#   stock defaults -> config.toml -> config.<env>.toml -> page front matter
#
# Any key in this file is visible to templates as `page.<key>`, and any of
# them can be overridden per page in front matter.

# Layout every page renders inside (a template name relative to
# build.templates.root). Without one, pages render standalone.
# layout = "layouts/default.html"

# Write a .txt plaintext version next to every page.
plaintext = false

# Move the rendered page to this path under the destination root.
# A trailing slash means <path>/index.html. Usually set per page.
# permalink = "/about/"

# Prefix relative <img src> and background URLs with this.
# base_image_url = "https://cdn.example.com/images/"

# ---------------------------------------------------------------------------
# Build
# ---------------------------------------------------------------------------
[build]
# Stop at the first failing template. When false, failures are reported
# after the build and the remaining templates still get written.
fail_fast = true

[build.templates]
# Base path for layout and component names.
root = "src"
# Directory scanned for pages.
source = "src/templates"
# Extensions that count as templates.
filetypes = ["html", "njk", "nunjucks"]

[build.destination]
path = "dist"
extension = "html"

[build.assets]
# Copied verbatim to <destination>/<assets.destination> before rendering.
source = "src/assets/images"
destination = "images"

[build.tailwind]
# Stylesheet file name, written to <destination>/css/ outside production.
css = "tailwind.css"
# Source stylesheet. Omit for an empty global stylesheet.
# source = "src/assets/css/main.css"
# Compile the source with the Tailwind CLI instead of the built-in
# compiler (import inlining only). Run from the project root as
# `<command> -i <source> [--minify]`; its stdout is the stylesheet.
# command = ["npx", "tailwindcss"]

# ---------------------------------------------------------------------------
# Markdown (the `markdown` template filter)
# ---------------------------------------------------------------------------
[markdown]
tables = true
footnotes = false
strikethrough = true
tasklists = false
smart_punctuation = false
heading_attributes = false
# Turn single newlines into <br>.
breaks = false

# ---------------------------------------------------------------------------
# HTML lint rules (htmlhint rule ids). Set a rule to false to disable it.
# ---------------------------------------------------------------------------
[htmlhint]
tagname-lowercase = true
attr-lowercase = true
attr-value-double-quotes = true
doctype-first = true
tag-pair = true
spec-char-escape = true
id-unique = true
src-not-empty = true
attr-no-duplication = true
title-require = true

# ---------------------------------------------------------------------------
# Transformers, applied in this order after linting
# ---------------------------------------------------------------------------
# Regex pattern -> replacement.
[replace_strings]

# Query parameters appended to absolute http(s) links.
[url_parameters]
# utm_source = "newsletter"

[minify]
enabled = false
"##
}
