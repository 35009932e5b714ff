//! HTML → plaintext.
//!
//! Produces the text derivative written next to a page when `plaintext` is
//! set. Links keep their target, bracketed on its own line:
//!
//! ```text
//! <p>Read <a href="https://x.com/post">the post</a> today.</p>
//!
//! Read the post
//! [https://x.com/post]
//! today.
//! ```
//!
//! Scripts, styles and the document head are dropped; block-level tags
//! become line breaks; entities are decoded; runs of blank lines collapse
//! to one.

use regex::Regex;
use std::sync::LazyLock;

static DROPPED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<!--.*?-->|<script\b.*?</script\s*>|<style\b.*?</style\s*>|<head\b.*?</head\s*>")
        .unwrap()
});
static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\b[^>]*?\shref\s*=\s*(?:"([^"]*)"|'([^']*)')[^>]*>(.*?)</a\s*>"#).unwrap()
});
static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)</?(?:address|article|aside|blockquote|br|dd|div|dl|dt|fieldset|figcaption|figure|footer|form|h[1-6]|header|hr|li|main|nav|ol|p|pre|section|table|tbody|td|tfoot|th|thead|tr|ul)\b[^>]*>",
    )
    .unwrap()
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static SPACES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").unwrap());
static BLANK_LINES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").unwrap());

/// Convert an HTML document to plain text.
pub fn html_to_text(html: &str) -> String {
    let text = DROPPED_RE.replace_all(html, "");
    let text = LINK_RE.replace_all(&text, |caps: &regex::Captures| {
        let href = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map_or("", |m| m.as_str())
            .trim();
        let label = &caps[3];
        if href.is_empty() || href.starts_with('#') {
            label.to_string()
        } else {
            format!("{label}\n[{href}]\n")
        }
    });
    let text = BLOCK_RE.replace_all(&text, "\n");
    let text = TAG_RE.replace_all(&text, "");
    let text = decode_entities(&text);

    let lines: Vec<String> = text
        .lines()
        .map(|line| SPACES_RE.replace_all(line, " ").trim().to_string())
        .collect();
    let text = lines.join("\n");
    BLANK_LINES_RE
        .replace_all(&text, "\n\n")
        .trim()
        .to_string()
}

fn decode_entities(text: &str) -> String {
    ENTITY_RE
        .replace_all(text, |caps: &regex::Captures| {
            let entity = &caps[1];
            let decoded = if let Some(hex) = entity.strip_prefix("#x").or(entity.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse().ok().and_then(char::from_u32)
            } else {
                named_entity(entity)
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "copy" => '©',
        "reg" => '®',
        "trade" => '™',
        "hellip" => '…',
        "mdash" => '—',
        "ndash" => '–',
        "lsquo" => '‘',
        "rsquo" => '’',
        "ldquo" => '“',
        "rdquo" => '”',
        "middot" => '·',
        "bull" => '•',
        "euro" => '€',
        "pound" => '£',
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_are_bracketed_on_their_own_line() {
        let text = html_to_text(r#"<p>Read <a href="https://x.com/post">the post</a> today.</p>"#);
        assert_eq!(text, "Read the post\n[https://x.com/post]\ntoday.");
    }

    #[test]
    fn anchor_and_empty_links_keep_only_text() {
        let text = html_to_text(r##"<p><a href="#top">Top</a> <a href="">Nowhere</a></p>"##);
        assert_eq!(text, "Top Nowhere");
    }

    #[test]
    fn drops_head_scripts_styles_and_comments() {
        let html = "<html><head><title>T</title><style>p{}</style></head><body><!-- c --><script>x()</script><h1>Hi</h1></body></html>";
        assert_eq!(html_to_text(html), "Hi");
    }

    #[test]
    fn block_tags_become_lines_and_blank_runs_collapse() {
        let html = "<h1>Title</h1>\n\n\n<p>One</p><p>Two</p><ul><li>a</li><li>b</li></ul>";
        let text = html_to_text(html);
        assert_eq!(text, "Title\n\nOne\n\nTwo\n\na\n\nb");
    }

    #[test]
    fn entities_are_decoded() {
        let text = html_to_text("<p>Fish &amp; chips &lt;3 &#8212; &#x41; &unknown;</p>");
        assert_eq!(text, "Fish & chips <3 — A &unknown;");
    }

    #[test]
    fn whitespace_is_collapsed() {
        let text = html_to_text("<p>   lots    of\t\tspace   </p>");
        assert_eq!(text, "lots of space");
    }
}
