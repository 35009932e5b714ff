//! Markdown rendering for templates.
//!
//! Templates use Markdown through the `markdown` filter, either on a value
//! or around a block:
//!
//! ```text
//! {{ page.intro | markdown }}
//! {{ page.tagline | markdown(inline=true) }}
//!
//! {% filter markdown %}
//!   ## Hello
//!   Some **bold** text.
//! {% endfilter %}
//! ```
//!
//! Block content is dedented first, so Markdown indented to match the
//! surrounding HTML is not mistaken for a code block.
//!
//! Each page renders with its own [`MarkdownOptions`] value, taken from the
//! page's `markdown` config. The filter owns a copy of those options; no
//! renderer state is shared between pages.

use pulldown_cmark::{Event, Options, Parser, html};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tera::Value;

/// Renderer options, set under `[markdown]` or in front matter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarkdownOptions {
    pub tables: bool,
    pub footnotes: bool,
    pub strikethrough: bool,
    pub tasklists: bool,
    /// Curly quotes, en/em dashes, ellipses.
    pub smart_punctuation: bool,
    /// `# Heading {#id .class}` syntax.
    pub heading_attributes: bool,
    /// Render single newlines as `<br>`.
    pub breaks: bool,
}

impl Default for MarkdownOptions {
    fn default() -> Self {
        Self {
            tables: true,
            footnotes: false,
            strikethrough: true,
            tasklists: false,
            smart_punctuation: false,
            heading_attributes: false,
            breaks: false,
        }
    }
}

impl MarkdownOptions {
    fn parser_options(&self) -> Options {
        let mut options = Options::empty();
        let flags = [
            (self.tables, Options::ENABLE_TABLES),
            (self.footnotes, Options::ENABLE_FOOTNOTES),
            (self.strikethrough, Options::ENABLE_STRIKETHROUGH),
            (self.tasklists, Options::ENABLE_TASKLISTS),
            (self.smart_punctuation, Options::ENABLE_SMART_PUNCTUATION),
            (self.heading_attributes, Options::ENABLE_HEADING_ATTRIBUTES),
        ];
        for (enabled, flag) in flags {
            if enabled {
                options.insert(flag);
            }
        }
        options
    }
}

/// Convert Markdown to HTML.
pub fn render(source: &str, options: &MarkdownOptions) -> String {
    let source = dedent(source);
    let parser = Parser::new_ext(&source, options.parser_options());
    let mut out = String::with_capacity(source.len() * 3 / 2);
    if options.breaks {
        let events = parser.map(|event| match event {
            Event::SoftBreak => Event::HardBreak,
            other => other,
        });
        html::push_html(&mut out, events);
    } else {
        html::push_html(&mut out, parser);
    }
    out
}

/// Render Markdown without the wrapping paragraph, for inline snippets.
pub fn render_inline(source: &str, options: &MarkdownOptions) -> String {
    let rendered = render(source, options);
    let trimmed = rendered.trim_end();
    match trimmed
        .strip_prefix("<p>")
        .and_then(|s| s.strip_suffix("</p>"))
    {
        // Only unwrap a single paragraph
        Some(inner) if !inner.contains("<p>") => inner.to_string(),
        _ => rendered,
    }
}

/// Remove the common leading whitespace of all non-blank lines.
fn dedent(source: &str) -> String {
    let indent = source
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start_matches([' ', '\t']).len())
        .min()
        .unwrap_or(0);
    if indent == 0 {
        return source.to_string();
    }
    source
        .lines()
        .map(|l| {
            if l.trim().is_empty() {
                ""
            } else {
                l.get(indent..).unwrap_or_else(|| l.trim_start())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// The `markdown` template filter, bound to one page's options.
pub struct MarkdownFilter {
    options: MarkdownOptions,
}

impl MarkdownFilter {
    pub fn new(options: MarkdownOptions) -> Self {
        Self { options }
    }
}

impl tera::Filter for MarkdownFilter {
    fn filter(&self, value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let source = value
            .as_str()
            .ok_or_else(|| tera::Error::msg("markdown filter expects a string"))?;
        let inline = args.get("inline").and_then(Value::as_bool).unwrap_or(false);
        let html = if inline {
            render_inline(source, &self.options)
        } else {
            render(source, &self.options)
        };
        Ok(Value::String(html))
    }

    fn is_safe(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tera::Filter;

    #[test]
    fn renders_basic_markdown() {
        let html = render("# Title\n\nThis is **bold**.", &MarkdownOptions::default());
        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<strong>bold</strong>"));
    }

    #[test]
    fn indented_block_is_not_code() {
        let html = render("\n    ## Hello\n    text\n", &MarkdownOptions::default());
        assert!(html.contains("<h2>Hello</h2>"));
        assert!(!html.contains("<pre>"));
    }

    #[test]
    fn unicode_blank_lines_in_indented_block() {
        let html = render("    a\n\u{3000}\u{3000}\n    b\n\u{a0}\n    c", &MarkdownOptions::default());
        assert!(!html.contains("<pre>"), "{html}");
        assert!(html.contains("a"));
        assert!(html.contains("c"));
    }

    #[test]
    fn tables_enabled_by_default() {
        let html = render("| a | b |\n|---|---|\n| 1 | 2 |", &MarkdownOptions::default());
        assert!(html.contains("<table>"));
    }

    #[test]
    fn tables_can_be_disabled() {
        let options = MarkdownOptions {
            tables: false,
            ..MarkdownOptions::default()
        };
        let html = render("| a | b |\n|---|---|\n| 1 | 2 |", &options);
        assert!(!html.contains("<table>"));
    }

    #[test]
    fn breaks_option_turns_newlines_into_br() {
        let source = "line one\nline two";
        let plain = render(source, &MarkdownOptions::default());
        assert!(!plain.contains("<br"));

        let options = MarkdownOptions {
            breaks: true,
            ..MarkdownOptions::default()
        };
        let broken = render(source, &options);
        assert!(broken.contains("<br />"));
    }

    #[test]
    fn inline_strips_single_paragraph() {
        let html = render_inline("Hello *there*", &MarkdownOptions::default());
        assert_eq!(html, "Hello <em>there</em>");
    }

    #[test]
    fn inline_keeps_multiple_paragraphs() {
        let html = render_inline("one\n\ntwo", &MarkdownOptions::default());
        assert!(html.contains("<p>one</p>"));
        assert!(html.contains("<p>two</p>"));
    }

    #[test]
    fn filter_rejects_non_strings() {
        let filter = MarkdownFilter::new(MarkdownOptions::default());
        let result = filter.filter(&Value::from(3), &HashMap::new());
        assert!(result.is_err());
    }

    #[test]
    fn filter_is_bound_to_its_options() {
        let with_breaks = MarkdownFilter::new(MarkdownOptions {
            breaks: true,
            ..MarkdownOptions::default()
        });
        let without = MarkdownFilter::new(MarkdownOptions::default());
        let value = Value::from("a\nb");
        let a = with_breaks.filter(&value, &HashMap::new()).unwrap();
        let b = without.filter(&value, &HashMap::new()).unwrap();
        assert!(a.as_str().unwrap().contains("<br />"));
        assert!(!b.as_str().unwrap().contains("<br />"));
    }
}
