//! Content directive substitution.
//!
//! After rendering, any element carrying a `content="<name>"` attribute has
//! its inner content replaced by whatever is registered under `<name>`, and
//! the attribute is dropped:
//!
//! ```text
//! <style content="tailwind"></style>   →   <style>.p-4{padding:1rem}</style>
//! ```
//!
//! The only built-in directive is `tailwind`: the page-scoped stylesheet
//! produced by [`CssCompiler::compile_string`]. If the element has inner CSS
//! it is compiled in place of the global stylesheet. Unknown names are left
//! exactly as written, as are void elements such as
//! `<meta name="x" content="...">`. Same-name elements nested inside a
//! directive element stay part of its content.

use crate::css::{CssCompiler, CssError};
use regex::Regex;
use std::sync::LazyLock;

/// Directive name for page-scoped utility CSS.
pub const TAILWIND_DIRECTIVE: &str = "tailwind";

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

static DIRECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)<([a-z][a-z0-9-]*)(\s[^>]*?)?\s+content\s*=\s*(?:"([^"]*)"|'([^']*)')([^>]*)>"#,
    )
    .unwrap()
});

/// Replace the inner content of every `content="<name>"` element.
///
/// `provide(name, inner)` returns the replacement, or `None` to leave the
/// element untouched.
pub fn substitute<F>(html: &str, mut provide: F) -> Result<String, CssError>
where
    F: FnMut(&str, &str) -> Result<Option<String>, CssError>,
{
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;

    while let Some(caps) = DIRECTIVE_RE.captures_at(html, cursor) {
        let Some(whole) = caps.get(0) else { break };
        let tag = caps.get(1).map_or("", |m| m.as_str());
        let name = caps.get(3).or_else(|| caps.get(4)).map_or("", |m| m.as_str());

        let close = if VOID_ELEMENTS.iter().any(|v| v.eq_ignore_ascii_case(tag)) {
            None
        } else {
            closing_tag(html, whole.end(), tag)
        };

        let Some(close) = close else {
            out.push_str(&html[cursor..whole.end()]);
            cursor = whole.end();
            continue;
        };

        let inner = &html[whole.end()..close];
        match provide(name, inner)? {
            Some(replacement) => {
                let before = caps.get(2).map_or("", |m| m.as_str());
                let after = caps.get(5).map_or("", |m| m.as_str());
                out.push_str(&html[cursor..whole.start()]);
                out.push('<');
                out.push_str(tag);
                out.push_str(before);
                out.push_str(after);
                out.push('>');
                out.push_str(&replacement);
            }
            None => out.push_str(&html[cursor..close]),
        }
        cursor = close;
    }

    out.push_str(&html[cursor..]);
    Ok(out)
}

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title"];

/// Byte offset of the `</tag` closing the element whose content starts at
/// `from`. Same-name elements nested inside are skipped, except in raw-text
/// elements, whose content holds no tags.
fn closing_tag(html: &str, from: usize, tag: &str) -> Option<usize> {
    let bytes = html.as_bytes();
    let raw_text = RAW_TEXT_ELEMENTS.iter().any(|r| r.eq_ignore_ascii_case(tag));
    let names_tag = |at: usize| {
        let end = at + tag.len();
        end <= bytes.len()
            && bytes[at..end].eq_ignore_ascii_case(tag.as_bytes())
            && bytes
                .get(end)
                .is_none_or(|b| b.is_ascii_whitespace() || *b == b'>' || *b == b'/')
    };

    let mut depth = 0usize;
    let mut i = from;
    while let Some(offset) = html[i..].find('<') {
        let at = i + offset;
        if bytes.get(at + 1) == Some(&b'/') && names_tag(at + 2) {
            if depth == 0 {
                return Some(at);
            }
            depth -= 1;
        } else if !raw_text && names_tag(at + 1) {
            depth += 1;
        }
        i = at + 1;
    }
    None
}

/// Substitute page-scoped CSS into a rendered page.
///
/// The stylesheet compiled for each `content="tailwind"` element is the
/// element's own inner CSS if it has any, the global stylesheet otherwise.
pub fn process(
    html: &str,
    global_css: &str,
    compiler: &dyn CssCompiler,
) -> Result<String, CssError> {
    substitute(html, |name, inner| {
        if name != TAILWIND_DIRECTIVE {
            return Ok(None);
        }
        let source = if inner.trim().is_empty() { global_css } else { inner };
        compiler.compile_string(source, html, false).map(Some)
    })
}
