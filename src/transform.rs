//! HTML transformer chain.
//!
//! The last stage before a page reaches disk. Each [`Transformer`] takes the
//! page HTML plus its page configuration and environment and returns the
//! (possibly) rewritten HTML. [`TransformChain::standard`] runs, in order:
//!
//! | Transformer | Config | Effect |
//! |---|---|---|
//! | `replace_strings` | `[replace_strings]` | regex → replacement, in key order |
//! | `base_image_url` | `base_image_url` | prefixes relative `<img src>` and `background` URLs |
//! | `url_parameters` | `[url_parameters]` | appends query parameters to absolute `http(s)` links |
//! | `minify` | `[minify] enabled` | HTML minification |
//!
//! Transformers whose config is empty return the input unchanged.
//!
//! Pages are rewritten as text rather than parsed. Rendered templates are
//! HTML, not XML: unclosed `<br>` and `<p>`, unquoted attributes and a bare
//! `<!DOCTYPE html>` are all legal and must pass through untouched. Only
//! quoted `src`, `background` and `href` values are rewritten.

use crate::config::SiteConfig;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("replace_strings pattern {pattern:?} is not a valid regex: {source}")]
    Pattern {
        pattern: String,
        source: regex::Error,
    },
    #[error("minified output is not UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// One step of the chain.
pub trait Transformer: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, html: String, config: &SiteConfig, env: &str)
    -> Result<String, TransformError>;
}

/// An ordered list of transformers.
pub struct TransformChain {
    steps: Vec<Box<dyn Transformer>>,
}

impl TransformChain {
    pub fn new(steps: Vec<Box<dyn Transformer>>) -> Self {
        Self { steps }
    }

    /// The built-in chain, in its fixed order.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(ReplaceStrings),
            Box::new(BaseImageUrl),
            Box::new(UrlParameters),
            Box::new(Minify),
        ])
    }

    pub fn apply(&self, html: String, config: &SiteConfig, env: &str) -> Result<String, TransformError> {
        self.steps.iter().try_fold(html, |html, step| {
            tracing::trace!(transformer = step.name(), "applying");
            step.apply(html, config, env)
        })
    }
}

impl Default for TransformChain {
    fn default() -> Self {
        Self::standard()
    }
}

// ============================================================================
// replace_strings
// ============================================================================

pub struct ReplaceStrings;

impl Transformer for ReplaceStrings {
    fn name(&self) -> &'static str {
        "replace_strings"
    }

    fn apply(&self, html: String, config: &SiteConfig, _env: &str) -> Result<String, TransformError> {
        let mut html = html;
        for (pattern, replacement) in &config.replace_strings {
            let re = Regex::new(pattern).map_err(|source| TransformError::Pattern {
                pattern: pattern.clone(),
                source,
            })?;
            html = re.replace_all(&html, replacement.as_str()).into_owned();
        }
        Ok(html)
    }
}

// ============================================================================
// base_image_url
// ============================================================================

pub struct BaseImageUrl;

static IMG_SRC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(<img\b[^>]*?\ssrc\s*=\s*)(["'])(.*?)(["'])"#).unwrap()
});
static BACKGROUND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(<[a-z][a-z0-9-]*\b[^>]*?\sbackground\s*=\s*)(["'])(.*?)(["'])"#).unwrap()
});

/// Whether a URL must be left alone by `base_image_url`.
fn is_absolute_or_special(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    lower.is_empty()
        || ["http://", "https://", "//", "data:", "cid:", "mailto:", "{{"]
            .iter()
            .any(|prefix| lower.starts_with(prefix))
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

impl Transformer for BaseImageUrl {
    fn name(&self) -> &'static str {
        "base_image_url"
    }

    fn apply(&self, html: String, config: &SiteConfig, _env: &str) -> Result<String, TransformError> {
        let Some(base) = config.base_image_url.as_deref().filter(|b| !b.is_empty()) else {
            return Ok(html);
        };
        let rewrite = |caps: &regex::Captures| {
            let url = &caps[3];
            let url = if is_absolute_or_special(url) {
                url.to_string()
            } else {
                join_url(base, url)
            };
            format!("{}{}{}{}", &caps[1], &caps[2], url, &caps[4])
        };
        let html = IMG_SRC_RE.replace_all(&html, rewrite).into_owned();
        Ok(BACKGROUND_RE.replace_all(&html, rewrite).into_owned())
    }
}

// ============================================================================
// url_parameters
// ============================================================================

pub struct UrlParameters;

static LINK_HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(<a\b[^>]*?\shref\s*=\s*)(["'])(https?://.*?)(["'])"#).unwrap()
});

fn append_query(url: &str, query: &str) -> String {
    let (base, fragment) = match url.find('#') {
        Some(i) => url.split_at(i),
        None => (url, ""),
    };
    let separator = if base.contains('?') { "&" } else { "?" };
    format!("{base}{separator}{query}{fragment}")
}

impl Transformer for UrlParameters {
    fn name(&self) -> &'static str {
        "url_parameters"
    }

    fn apply(&self, html: String, config: &SiteConfig, _env: &str) -> Result<String, TransformError> {
        if config.url_parameters.is_empty() {
            return Ok(html);
        }
        let query = config
            .url_parameters
            .iter()
            .map(|(key, value)| {
                format!("{}={}", urlencoding::encode(key), urlencoding::encode(value))
            })
            .collect::<Vec<_>>()
            .join("&");
        // Inside an attribute, a bare `&` must be written as `&amp;`
        let query = query.replace('&', "&amp;");
        let html = LINK_HREF_RE.replace_all(&html, |caps: &regex::Captures| {
            format!(
                "{}{}{}{}",
                &caps[1],
                &caps[2],
                append_query(&caps[3], &query),
                &caps[4]
            )
        });
        Ok(html.into_owned())
    }
}

// ============================================================================
// minify
// ============================================================================

pub struct Minify;

impl Transformer for Minify {
    fn name(&self) -> &'static str {
        "minify"
    }

    fn apply(&self, html: String, config: &SiteConfig, _env: &str) -> Result<String, TransformError> {
        if !config.minify.enabled {
            return Ok(html);
        }
        let mut cfg = minify_html::Cfg::new();
        cfg.keep_closing_tags = true;
        cfg.keep_html_and_head_opening_tags = true;
        cfg.keep_comments = false;
        cfg.minify_css = true;
        cfg.minify_js = true;
        cfg.remove_bangs = true;
        cfg.remove_processing_instructions = true;
        Ok(String::from_utf8(minify_html::minify(html.as_bytes(), &cfg))?)
    }
}
