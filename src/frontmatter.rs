//! Front-matter extraction.
//!
//! A template may start with a metadata block that overrides configuration
//! for that page. Two fences are recognized:
//!
//! ```text
//! ---                         +++
//! permalink: /about/          permalink = "/about/"
//! plaintext: true             plaintext = true
//! ---                         +++
//! <h1>About</h1>              <h1>About</h1>
//! ```
//!
//! `---` blocks are YAML, `+++` blocks are TOML. The block must be the very
//! first thing in the file (a UTF-8 BOM is tolerated). A file without one
//! yields an empty mapping and its full text as the body.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrontMatterError {
    #[error("YAML front matter: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("TOML front matter: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("front matter must be a mapping of keys to values")]
    NotAMapping,
    #[error("front matter opened with {0} but never closed")]
    Unclosed(&'static str),
}

/// A template split into its metadata and its body.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<'a> {
    /// Always a JSON object; empty when the file had no front matter.
    pub attributes: Value,
    pub body: &'a str,
}

#[derive(Clone, Copy)]
enum Fence {
    Yaml,
    Toml,
}

impl Fence {
    fn marker(self) -> &'static str {
        match self {
            Fence::Yaml => "---",
            Fence::Toml => "+++",
        }
    }
}

/// Split `text` into front-matter attributes and body.
pub fn split(text: &str) -> Result<Parsed<'_>, FrontMatterError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let Some((fence, after_open)) = opening_fence(text) else {
        return Ok(Parsed {
            attributes: Value::Object(Map::new()),
            body: text,
        });
    };

    let (block, body) =
        find_closing(after_open, fence.marker()).ok_or(FrontMatterError::Unclosed(fence.marker()))?;

    if block.trim().is_empty() {
        return Ok(Parsed {
            attributes: Value::Object(Map::new()),
            body,
        });
    }

    let attributes = match fence {
        Fence::Yaml => serde_yaml::from_str::<Value>(block)?,
        Fence::Toml => toml::from_str::<Value>(block)?,
    };

    let attributes = match attributes {
        Value::Object(_) => attributes,
        // An empty YAML block parses as null
        Value::Null => Value::Object(Map::new()),
        _ => return Err(FrontMatterError::NotAMapping),
    };

    Ok(Parsed { attributes, body })
}

/// Return the body of `text` with any front matter removed, ignoring
/// malformed blocks.
///
/// Used when loading templates into the environment, where a parse error
/// belongs to the page render rather than to environment setup.
pub fn strip(text: &str) -> &str {
    match split(text) {
        Ok(parsed) => parsed.body,
        Err(_) => text,
    }
}

/// If `text` opens with a fence line, return the fence and the text after it.
fn opening_fence(text: &str) -> Option<(Fence, &str)> {
    for fence in [Fence::Yaml, Fence::Toml] {
        if let Some(rest) = text.strip_prefix(fence.marker()) {
            if let Some(after) = strip_line_end(rest) {
                return Some((fence, after));
            }
        }
    }
    None
}

/// Accept trailing spaces, then a line ending, then return what follows.
fn strip_line_end(rest: &str) -> Option<&str> {
    let trimmed = rest.trim_start_matches([' ', '\t']);
    trimmed
        .strip_prefix("\r\n")
        .or_else(|| trimmed.strip_prefix('\n'))
}

/// Find the closing fence line. Returns `(block, body)`.
fn find_closing<'a>(text: &'a str, marker: &str) -> Option<(&'a str, &'a str)> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let content = line.trim_end_matches(['\n', '\r']);
        if content.trim_end() == marker {
            let block = &text[..offset];
            let body = &text[offset + line.len()..];
            return Some((block, body));
        }
        offset += line.len();
    }
    None
}
