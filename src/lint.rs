//! HTML linting.
//!
//! Rendered pages are checked against a set of rules named after their
//! [htmlhint](https://htmlhint.com/) counterparts, so existing `htmlhint`
//! config blocks carry over unchanged. Findings are advisory: they are
//! collected per page, tagged with the template path by the pipeline, and
//! printed after the build. They never stop a build.
//!
//! | Rule id | Default | Checks |
//! |---|---|---|
//! | `doctype-first` | on | `<!DOCTYPE>` precedes all other markup |
//! | `tagname-lowercase` | on | element names are lowercase |
//! | `attr-lowercase` | on | attribute names are lowercase (an array value lists exceptions) |
//! | `attr-value-double-quotes` | on | attribute values use `"` |
//! | `attr-no-duplication` | on | no attribute appears twice on one element |
//! | `id-unique` | on | `id` values are unique |
//! | `src-not-empty` | on | `src`/`href`/`data` of embedding elements are non-empty |
//! | `tag-pair` | on | every non-void start tag is closed |
//! | `title-require` | on | `<head>` contains a non-empty `<title>` |
//! | `spec-char-escape` | on | text content has no raw `<` or `>` |
//! | `alt-require` | off | `<img>` has an `alt` attribute |
//!
//! The tokenizer is deliberately forgiving: it never fails, and whatever it
//! cannot make sense of is treated as text.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// Rule id → `true`/`false` or rule options.
pub type RuleSet = BTreeMap<String, Value>;

/// Rules enabled when no `htmlhint` config is given.
pub const DEFAULT_RULES: &[&str] = &[
    "tagname-lowercase",
    "attr-lowercase",
    "attr-value-double-quotes",
    "doctype-first",
    "tag-pair",
    "spec-char-escape",
    "id-unique",
    "src-not-empty",
    "attr-no-duplication",
    "title-require",
];

/// Every rule this linter knows.
pub const KNOWN_RULES: &[&str] = &[
    "tagname-lowercase",
    "attr-lowercase",
    "attr-value-double-quotes",
    "doctype-first",
    "tag-pair",
    "spec-char-escape",
    "id-unique",
    "src-not-empty",
    "attr-no-duplication",
    "title-require",
    "alt-require",
];

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "command", "embed", "hr", "img", "input", "keygen", "link",
    "meta", "param", "source", "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

pub fn default_rules() -> RuleSet {
    DEFAULT_RULES
        .iter()
        .map(|id| (id.to_string(), Value::Bool(true)))
        .collect()
}

/// Rule ids in `rules` that this linter does not implement.
pub fn unknown_rules(rules: &RuleSet) -> Vec<&str> {
    rules
        .keys()
        .map(String::as_str)
        .filter(|id| !KNOWN_RULES.contains(id))
        .collect()
}

/// One linter finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintMessage {
    pub rule: String,
    pub message: String,
    /// The source line the finding points at.
    pub evidence: String,
    /// 1-based.
    pub line: usize,
    /// 1-based.
    pub col: usize,
    /// Template the page was rendered from. Set by the pipeline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// Lint `html` with the enabled rules in `rules`.
pub fn verify(html: &str, rules: &RuleSet) -> Vec<LintMessage> {
    let tokens = tokenize(html);
    let mut linter = Linter::new(html, rules);
    for token in &tokens {
        linter.visit(token);
    }
    linter.finish();
    linter.messages
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Attr<'a> {
    name: &'a str,
    value: Option<&'a str>,
    quote: Option<char>,
}

#[derive(Debug, Clone, PartialEq)]
struct Tag<'a> {
    name: &'a str,
    attrs: Vec<Attr<'a>>,
    self_closing: bool,
    pos: usize,
}

impl Tag<'_> {
    fn attr(&self, name: &str) -> Option<&Attr<'_>> {
        self.attrs.iter().find(|a| a.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token<'a> {
    Doctype { pos: usize },
    Comment,
    Start(Tag<'a>),
    End { name: &'a str, pos: usize },
    Text { text: &'a str, pos: usize },
    /// Contents of `<script>`/`<style>`; not inspected.
    Raw,
}

fn tokenize(html: &str) -> Vec<Token<'_>> {
    let bytes = html.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let rest = &html[i..];
        if rest.starts_with("<!--") {
            let end = rest.find("-->").map(|e| i + e + 3).unwrap_or(bytes.len());
            tokens.push(Token::Comment);
            i = end;
        } else if rest.starts_with("<!") || rest.starts_with("<?") {
            let end = rest.find('>').map(|e| i + e + 1).unwrap_or(bytes.len());
            if rest.get(2..9).is_some_and(|s| s.eq_ignore_ascii_case("doctype")) {
                tokens.push(Token::Doctype { pos: i });
            } else {
                tokens.push(Token::Comment);
            }
            i = end;
        } else if rest.starts_with("</") && rest[2..].starts_with(|c: char| c.is_ascii_alphabetic())
        {
            let name_end = rest[2..]
                .find(|c: char| c.is_whitespace() || c == '>')
                .map(|e| e + 2)
                .unwrap_or(rest.len());
            let end = rest.find('>').map(|e| i + e + 1).unwrap_or(bytes.len());
            tokens.push(Token::End {
                name: &rest[2..name_end],
                pos: i,
            });
            i = end;
        } else if rest.starts_with('<') && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic())
        {
            let (tag, end) = parse_start_tag(html, i);
            let raw = RAW_TEXT_ELEMENTS
                .iter()
                .any(|r| tag.name.eq_ignore_ascii_case(r))
                && !tag.self_closing;
            let closing = format!("</{}", tag.name.to_ascii_lowercase());
            tokens.push(Token::Start(tag));
            i = end;
            if raw {
                let close = html[i..]
                    .to_ascii_lowercase()
                    .find(&closing)
                    .map(|e| i + e)
                    .unwrap_or(bytes.len());
                tokens.push(Token::Raw);
                i = close;
            }
        } else {
            // Text runs to the next '<' that is not the one we are standing on
            let first = rest.chars().next().map(char::len_utf8).unwrap_or(1);
            let next = rest[first..]
                .find('<')
                .map(|e| i + first + e)
                .unwrap_or(bytes.len());
            tokens.push(Token::Text {
                text: &html[i..next],
                pos: i,
            });
            i = next;
        }
    }

    tokens
}

/// Parse a start tag beginning at `start` (which points at `<`).
/// Returns the tag and the offset just past its closing `>`.
fn parse_start_tag(html: &str, start: usize) -> (Tag<'_>, usize) {
    let bytes = html.as_bytes();
    let mut i = start + 1;
    while i < bytes.len() && is_name_byte(bytes[i]) {
        i += 1;
    }
    let name = &html[start + 1..i];
    let mut attrs = Vec::new();
    let mut self_closing = false;

    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        match bytes[i] {
            b'>' => {
                i += 1;
                break;
            }
            b'/' if bytes.get(i + 1) == Some(&b'>') => {
                self_closing = true;
                i += 2;
                break;
            }
            _ => {}
        }

        let name_start = i;
        while i < bytes.len()
            && !bytes[i].is_ascii_whitespace()
            && !matches!(bytes[i], b'=' | b'>' | b'/')
        {
            i += 1;
        }
        if i == name_start {
            // Stray '/' or similar
            i += 1;
            continue;
        }
        let attr_name = &html[name_start..i];

        let mut j = i;
        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
            j += 1;
        }
        if bytes.get(j) != Some(&b'=') {
            attrs.push(Attr {
                name: attr_name,
                value: None,
                quote: None,
            });
            continue;
        }
        j += 1;
        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
            j += 1;
        }

        let (value, quote) = match bytes.get(j) {
            Some(&q @ (b'"' | b'\'')) => {
                let value_start = j + 1;
                let value_end = html[value_start..]
                    .find(q as char)
                    .map(|e| value_start + e)
                    .unwrap_or(bytes.len());
                i = (value_end + 1).min(bytes.len());
                (&html[value_start..value_end], Some(q as char))
            }
            _ => {
                let value_start = j;
                let mut k = j;
                while k < bytes.len() && !bytes[k].is_ascii_whitespace() && bytes[k] != b'>' {
                    k += 1;
                }
                i = k;
                (&html[value_start..k], None)
            }
        };
        attrs.push(Attr {
            name: attr_name,
            value: Some(value),
            quote,
        });
    }

    (
        Tag {
            name,
            attrs,
            self_closing,
            pos: start,
        },
        i,
    )
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b':' | b'_')
}

// ============================================================================
// Rules
// ============================================================================

struct OpenTag {
    name: String,
    pos: usize,
}

struct Linter<'a> {
    html: &'a str,
    rules: &'a RuleSet,
    line_starts: Vec<usize>,
    messages: Vec<LintMessage>,
    seen_markup: bool,
    ids: HashSet<String>,
    stack: Vec<OpenTag>,
    in_head: bool,
    in_title: bool,
    title_text: Option<String>,
}

impl<'a> Linter<'a> {
    fn new(html: &'a str, rules: &'a RuleSet) -> Self {
        let line_starts = std::iter::once(0)
            .chain(html.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            html,
            rules,
            line_starts,
            messages: Vec::new(),
            seen_markup: false,
            ids: HashSet::new(),
            stack: Vec::new(),
            in_head: false,
            in_title: false,
            title_text: None,
        }
    }

    fn option(&self, rule: &str) -> Option<&'a Value> {
        self.rules
            .get(rule)
            .filter(|v| !matches!(v, Value::Bool(false) | Value::Null))
    }

    fn enabled(&self, rule: &str) -> bool {
        self.option(rule).is_some()
    }

    fn report(&mut self, rule: &str, message: String, pos: usize) {
        let line_idx = self.line_starts.partition_point(|&s| s <= pos).saturating_sub(1);
        let line_start = self.line_starts[line_idx];
        let line_end = self.html[line_start..]
            .find('\n')
            .map(|e| line_start + e)
            .unwrap_or(self.html.len());
        self.messages.push(LintMessage {
            rule: rule.to_string(),
            message,
            evidence: self.html[line_start..line_end].trim_end_matches('\r').to_string(),
            line: line_idx + 1,
            col: pos - line_start + 1,
            file: None,
        });
    }

    fn line_of(&self, pos: usize) -> usize {
        self.line_starts.partition_point(|&s| s <= pos)
    }

    fn visit(&mut self, token: &Token<'_>) {
        match token {
            Token::Text { text, .. } if text.trim().is_empty() && !self.seen_markup => {}
            Token::Comment => {}
            Token::Doctype { .. } => self.seen_markup = true,
            _ if !self.seen_markup => {
                self.seen_markup = true;
                if self.enabled("doctype-first") {
                    let pos = match token {
                        Token::Start(tag) => tag.pos,
                        Token::End { pos, .. } | Token::Text { pos, .. } => *pos,
                        _ => 0,
                    };
                    self.report("doctype-first", "Doctype must be declared first.".into(), pos);
                }
                self.visit(token);
            }
            Token::Start(tag) => self.start_tag(tag),
            Token::End { name, pos } => self.end_tag(name, *pos),
            Token::Text { text, pos } => self.text(text, *pos),
            Token::Raw => {}
        }
    }

    fn start_tag(&mut self, tag: &Tag<'_>) {
        let lower = tag.name.to_ascii_lowercase();

        if self.enabled("tagname-lowercase") && tag.name != lower {
            self.report(
                "tagname-lowercase",
                format!("The html element name of [ {} ] must be in lowercase.", tag.name),
                tag.pos,
            );
        }

        if let Some(option) = self.option("attr-lowercase") {
            let exceptions: Vec<String> = option
                .as_array()
                .map(|a| a.iter().filter_map(Value::as_str).map(String::from).collect())
                .unwrap_or_default();
            for attr in &tag.attrs {
                let has_upper = attr.name.chars().any(|c| c.is_ascii_uppercase());
                if has_upper && !exceptions.iter().any(|e| e == attr.name) {
                    self.report(
                        "attr-lowercase",
                        format!("The attribute name of [ {} ] must be in lowercase.", attr.name),
                        tag.pos,
                    );
                }
            }
        }

        if self.enabled("attr-value-double-quotes") {
            for attr in &tag.attrs {
                if attr.value.is_some() && attr.quote != Some('"') {
                    self.report(
                        "attr-value-double-quotes",
                        format!("The value of attribute [ {} ] must be in double quotes.", attr.name),
                        tag.pos,
                    );
                }
            }
        }

        if self.enabled("attr-no-duplication") {
            let mut seen = HashSet::new();
            for attr in &tag.attrs {
                if !seen.insert(attr.name.to_ascii_lowercase()) {
                    self.report(
                        "attr-no-duplication",
                        format!("Duplicate of attribute name [ {} ] was found.", attr.name),
                        tag.pos,
                    );
                }
            }
        }

        if let Some(id) = tag.attr("id").and_then(|a| a.value) {
            if !id.is_empty() && !self.ids.insert(id.to_string()) && self.enabled("id-unique") {
                self.report(
                    "id-unique",
                    format!("The id value [ {id} ] must be unique."),
                    tag.pos,
                );
            }
        }

        if self.enabled("src-not-empty") {
            let attr_name = match lower.as_str() {
                "img" | "script" | "embed" | "bgsound" | "iframe" => Some("src"),
                "link" => Some("href"),
                "object" => Some("data"),
                _ => None,
            };
            if let Some(attr_name) = attr_name {
                if let Some(attr) = tag.attr(attr_name) {
                    if attr.value.is_none_or(|v| v.trim().is_empty()) {
                        self.report(
                            "src-not-empty",
                            format!(
                                "The attribute [ {attr_name} ] of the tag [ {lower} ] must have a value."
                            ),
                            tag.pos,
                        );
                    }
                }
            }
        }

        if self.enabled("alt-require") && lower == "img" && tag.attr("alt").is_none() {
            self.report(
                "alt-require",
                "An alt attribute must be present on <img> elements.".into(),
                tag.pos,
            );
        }

        match lower.as_str() {
            "head" => self.in_head = true,
            "title" if self.in_head => {
                self.in_title = true;
                self.title_text.get_or_insert_with(String::new);
            }
            _ => {}
        }

        if !tag.self_closing && !VOID_ELEMENTS.contains(&lower.as_str()) {
            self.stack.push(OpenTag {
                name: lower,
                pos: tag.pos,
            });
        }
    }

    fn end_tag(&mut self, name: &str, pos: usize) {
        let lower = name.to_ascii_lowercase();

        if self.enabled("tagname-lowercase") && name != lower {
            self.report(
                "tagname-lowercase",
                format!("The html element name of [ {name} ] must be in lowercase."),
                pos,
            );
        }

        match lower.as_str() {
            "title" => self.in_title = false,
            "head" => {
                self.in_head = false;
                if self.enabled("title-require") {
                    let title_empty = self.title_text.as_deref().map(|t| t.trim().is_empty());
                    match title_empty {
                        None => self.report(
                            "title-require",
                            "<title></title> must be present in <head> tag.".into(),
                            pos,
                        ),
                        Some(true) => self.report(
                            "title-require",
                            "<title></title> must not be empty.".into(),
                            pos,
                        ),
                        Some(false) => {}
                    }
                }
            }
            _ => {}
        }

        if VOID_ELEMENTS.contains(&lower.as_str()) {
            return;
        }

        match self.stack.iter().rposition(|t| t.name == lower) {
            Some(idx) => {
                let unclosed: Vec<OpenTag> = self.stack.drain(idx..).skip(1).collect();
                if self.enabled("tag-pair") {
                    for open in unclosed.iter().rev() {
                        let line = self.line_of(open.pos);
                        self.report(
                            "tag-pair",
                            format!(
                                "Tag must be paired, missing: [ </{}> ], start tag match failed [ <{}> ] on line {line}.",
                                open.name, open.name
                            ),
                            pos,
                        );
                    }
                }
            }
            None => {
                if self.enabled("tag-pair") {
                    self.report(
                        "tag-pair",
                        format!("Tag must be paired, no start tag: [ </{lower}> ]"),
                        pos,
                    );
                }
            }
        }
    }

    fn text(&mut self, text: &str, pos: usize) {
        if self.in_title {
            if let Some(title) = self.title_text.as_mut() {
                title.push_str(text);
            }
        }
        if self.enabled("spec-char-escape") {
            for (offset, c) in text.char_indices().filter(|(_, c)| matches!(c, '<' | '>')) {
                self.report(
                    "spec-char-escape",
                    format!("Special characters must be escaped : [ {c} ]."),
                    pos + offset,
                );
            }
        }
    }

    fn finish(&mut self) {
        if !self.enabled("tag-pair") || self.stack.is_empty() {
            return;
        }
        let end = self.html.len().saturating_sub(1);
        let open: Vec<OpenTag> = self.stack.drain(..).collect();
        for tag in open.iter().rev() {
            let line = self.line_of(tag.pos);
            self.report(
                "tag-pair",
                format!(
                    "Tag must be paired, missing: [ </{}> ], open tag match failed [ <{}> ] on line {line}.",
                    tag.name, tag.name
                ),
                end,
            );
        }
    }
}
