//! Utility CSS pipeline.
//!
//! Two operations, mirroring how pages consume CSS:
//!
//! - [`CssCompiler::compile_file`] builds the global stylesheet once per run.
//!   It is exposed to every template as `css`, and outside production it is
//!   also written to `<destination>/css/<build.tailwind.css>`.
//! - [`CssCompiler::compile_string`] builds page-scoped CSS during
//!   post-processing, given the page HTML. With `extract = true` the result
//!   only keeps rules whose class selectors appear in that HTML.
//!
//! [`compiler_for`] picks the implementation from `build.tailwind.command`:
//!
//! - empty: [`BuiltinCss`], which runs in-process;
//! - set: [`TailwindCli`], which runs the Tailwind CLI on the source
//!   stylesheet (so `@tailwind` and `@apply` are expanded) and purges
//!   page-scoped CSS in-process.
//!
//! | Step | What happens in [`BuiltinCss`] |
//! |---|---|
//! | Imports | relative `@import "x.css";` is inlined recursively, cycles are an error |
//! | Validation | unbalanced braces, comments or strings are an error |
//! | Purge | rules are dropped when a class they select is absent from the HTML |
//! | Minify | `minify-html`'s CSS minifier (production only) |
//!
//! Both operations fail loudly: a stylesheet that cannot be compiled aborts
//! the build rather than shipping broken CSS.

use crate::config::{self, SiteConfig};
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CssError {
    #[error("cannot read stylesheet {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("@import cycle through {0}")]
    ImportCycle(PathBuf),
    #[error("invalid CSS in {origin}: {reason}")]
    Invalid { origin: String, reason: String },
    #[error("cannot run CSS compiler {program:?}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("CSS compiler {program:?} failed ({status}): {stderr}")]
    Command {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// Trait for CSS compilers.
///
/// The rest of the pipeline only talks to this trait, so tests can swap in a
/// recording mock.
pub trait CssCompiler: Sync {
    /// Compile the stylesheet at `path`.
    fn compile_file(&self, path: &Path, minify: bool) -> Result<String, CssError>;

    /// Compile `css` in the context of one page's `html`.
    ///
    /// `extract = false` returns the full stylesheet; `extract = true`
    /// purges rules the page does not use.
    fn compile_string(&self, css: &str, html: &str, extract: bool) -> Result<String, CssError>;
}

/// Build the global stylesheet for a run.
///
/// Without `build.tailwind.source` the stylesheet is empty. The source path is
/// relative to `root`. Production builds are minified.
pub fn global_stylesheet(
    compiler: &dyn CssCompiler,
    root: &Path,
    config: &SiteConfig,
    env: &str,
) -> Result<String, CssError> {
    match &config.build.tailwind.source {
        Some(source) => compiler.compile_file(&root.join(source), config::is_production(env)),
        None => {
            tracing::debug!("no build.tailwind.source configured, global stylesheet is empty");
            Ok(String::new())
        }
    }
}

/// The compiler `config` asks for. Commands run from `root`.
pub fn compiler_for(config: &SiteConfig, root: &Path) -> Box<dyn CssCompiler> {
    let command = &config.build.tailwind.command;
    if command.is_empty() {
        Box::new(BuiltinCss)
    } else {
        Box::new(TailwindCli::new(command.clone(), root))
    }
}

/// In-process CSS compiler.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinCss;

impl CssCompiler for BuiltinCss {
    fn compile_file(&self, path: &Path, minify: bool) -> Result<String, CssError> {
        let mut stack = Vec::new();
        let css = inline_imports(path, &mut stack)?;
        check_balanced(&css).map_err(|reason| CssError::Invalid {
            origin: path.display().to_string(),
            reason,
        })?;
        Ok(if minify { minify_css(&css) } else { css })
    }

    fn compile_string(&self, css: &str, html: &str, extract: bool) -> Result<String, CssError> {
        check_balanced(css).map_err(|reason| CssError::Invalid {
            origin: "inline stylesheet".to_string(),
            reason,
        })?;
        if !extract {
            return Ok(css.to_string());
        }
        let classes = html_classes(html);
        let nodes = parse_nodes(css);
        Ok(render_nodes(&purge(nodes, &classes)))
    }
}

/// Runs the Tailwind CLI as `<command> -i <path> [--minify]` and reads the
/// stylesheet from its stdout.
#[derive(Debug, Clone)]
pub struct TailwindCli {
    command: Vec<String>,
    root: PathBuf,
}

impl TailwindCli {
    pub fn new(command: Vec<String>, root: &Path) -> Self {
        Self {
            command,
            root: root.to_path_buf(),
        }
    }
}

impl CssCompiler for TailwindCli {
    fn compile_file(&self, path: &Path, minify: bool) -> Result<String, CssError> {
        let Some((program, args)) = self.command.split_first() else {
            return BuiltinCss.compile_file(path, minify);
        };
        let mut command = Command::new(program);
        command.args(args).arg("-i").arg(path).current_dir(&self.root);
        if minify {
            command.arg("--minify");
        }
        tracing::debug!(command = ?self.command, input = %path.display(), minify, "running tailwind");

        let output = command.output().map_err(|source| CssError::Spawn {
            program: program.clone(),
            source,
        })?;
        if !output.status.success() {
            return Err(CssError::Command {
                program: program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        String::from_utf8(output.stdout).map_err(|e| CssError::Invalid {
            origin: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn compile_string(&self, css: &str, html: &str, extract: bool) -> Result<String, CssError> {
        BuiltinCss.compile_string(css, html, extract)
    }
}

// ============================================================================
// Imports
// ============================================================================

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*@import\s+(?:url\(\s*)?["']([^"')]+)["']\s*\)?\s*;[ \t]*\r?\n?"#)
        .unwrap()
});
static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());

fn inline_imports(path: &Path, stack: &mut Vec<PathBuf>) -> Result<String, CssError> {
    let canonical = path.canonicalize().map_err(|source| CssError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if stack.contains(&canonical) {
        return Err(CssError::ImportCycle(path.to_path_buf()));
    }
    let content = fs::read_to_string(path).map_err(|source| CssError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    stack.push(canonical);

    let dir = path.parent().unwrap_or(Path::new("."));
    let mut out = String::with_capacity(content.len());
    let mut last = 0;
    for caps in IMPORT_RE.captures_iter(&content) {
        let (Some(whole), Some(target)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if is_remote(target.as_str()) {
            continue;
        }
        out.push_str(&content[last..whole.start()]);
        out.push_str(&inline_imports(&dir.join(target.as_str()), stack)?);
        out.push('\n');
        last = whole.end();
    }
    out.push_str(&content[last..]);

    stack.pop();
    Ok(out)
}

fn is_remote(target: &str) -> bool {
    target.starts_with("http://") || target.starts_with("https://") || target.starts_with("//")
}

// ============================================================================
// Validation and minification
// ============================================================================

/// Ensure braces balance outside comments and strings.
fn check_balanced(css: &str) -> Result<(), String> {
    let mut depth: i64 = 0;
    let mut chars = css.chars().peekable();
    let mut line = 1;
    while let Some(c) = chars.next() {
        match c {
            '\n' => line += 1,
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    if c == '\n' {
                        line += 1;
                    }
                    if c == '*' && chars.peek() == Some(&'/') {
                        chars.next();
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(format!("unterminated comment (line {line})"));
                }
            }
            '"' | '\'' => {
                let quote = c;
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            chars.next();
                        }
                        '\n' => break,
                        _ if c == quote => {
                            closed = true;
                            break;
                        }
                        _ => {}
                    }
                }
                if !closed {
                    return Err(format!("unterminated string (line {line})"));
                }
            }
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return Err(format!("unexpected '}}' (line {line})"));
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(format!("{depth} unclosed '{{'"));
    }
    Ok(())
}

/// Minify a stylesheet with `minify-html`'s CSS minifier.
///
/// The stylesheet is minified as the body of a `<style>` element. CSS the
/// minifier cannot parse comes back unchanged.
pub fn minify_css(css: &str) -> String {
    let mut cfg = minify_html::Cfg::new();
    cfg.keep_closing_tags = true;
    cfg.minify_css = true;
    let document = format!("<style>{css}</style>");
    let minified = String::from_utf8_lossy(&minify_html::minify(document.as_bytes(), &cfg)).into_owned();
    minified
        .strip_prefix("<style>")
        .and_then(|rest| rest.strip_suffix("</style>"))
        .map(|inner| inner.trim().to_string())
        .unwrap_or_else(|| css.trim().to_string())
}

// ============================================================================
// Purge
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Node {
    /// `selector { declarations }`
    Rule { selector: String, body: String },
    /// `@media …`, `@supports …`, `@layer …` with nested rules.
    Group { prelude: String, children: Vec<Node> },
    /// Any other at-rule block or statement, kept verbatim.
    Verbatim(String),
}

const GROUP_AT_RULES: &[&str] = &["@media", "@supports", "@layer", "@container"];

/// Split a stylesheet into top-level nodes. Assumes balanced input.
fn parse_nodes(css: &str) -> Vec<Node> {
    let css = COMMENT_RE.replace_all(css, "");
    let bytes = css.as_bytes();
    let mut nodes = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => i = skip_string(bytes, i),
            b';' => {
                let statement = css[start..=i].trim();
                if !statement.is_empty() {
                    nodes.push(Node::Verbatim(statement.to_string()));
                }
                i += 1;
                start = i;
            }
            b'{' => {
                let close = matching_brace(bytes, i);
                let prelude = css[start..i].trim().to_string();
                let body = &css[i + 1..close.min(bytes.len())];
                let node = if prelude.starts_with('@') {
                    let name = prelude.split_whitespace().next().unwrap_or("");
                    if GROUP_AT_RULES.contains(&name) {
                        Node::Group {
                            prelude,
                            children: parse_nodes(body),
                        }
                    } else {
                        Node::Verbatim(format!("{prelude} {{{body}}}"))
                    }
                } else {
                    Node::Rule {
                        selector: prelude,
                        body: body.trim().to_string(),
                    }
                };
                nodes.push(node);
                i = close + 1;
                start = i;
            }
            _ => i += 1,
        }
    }
    nodes
}

fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn matching_brace(bytes: &[u8], open: usize) -> usize {
    let mut depth = 0;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                i = skip_string(bytes, i);
                continue;
            }
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return i;
                }
            }
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}

static CLASS_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bclass\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
});
static SELECTOR_CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.((?:\\.|[A-Za-z0-9_-])+)").unwrap());

/// Every class name used in `html`.
fn html_classes(html: &str) -> HashSet<String> {
    CLASS_ATTR_RE
        .captures_iter(html)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .flat_map(|m| m.as_str().split_whitespace().map(String::from).collect::<Vec<_>>())
        .collect()
}

/// Whether any selector in a comma-separated list can match `classes`.
fn selector_used(selector_list: &str, classes: &HashSet<String>) -> bool {
    split_selectors(selector_list).into_iter().any(|selector| {
        SELECTOR_CLASS_RE
            .captures_iter(selector)
            .filter_map(|caps| caps.get(1))
            .all(|m| classes.contains(&m.as_str().replace('\\', "")))
    })
}

/// Split on top-level commas, leaving `:is(.a, .b)` intact.
fn split_selectors(list: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0;
    let mut start = 0;
    for (i, c) in list.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(list[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(list[start..].trim());
    parts
}

fn purge(nodes: Vec<Node>, classes: &HashSet<String>) -> Vec<Node> {
    nodes
        .into_iter()
        .filter_map(|node| match node {
            Node::Rule { ref selector, .. } if !selector_used(selector, classes) => None,
            Node::Group { prelude, children } => {
                let children = purge(children, classes);
                (!children.is_empty()).then_some(Node::Group { prelude, children })
            }
            other => Some(other),
        })
        .collect()
}

fn render_nodes(nodes: &[Node]) -> String {
    nodes
        .iter()
        .map(|node| match node {
            Node::Rule { selector, body } => format!("{selector} {{ {body} }}"),
            Node::Group { prelude, children } => {
                format!("{prelude} {{\n{}\n}}", render_nodes(children))
            }
            Node::Verbatim(text) => text.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Mock compiler that records calls and echoes its input.
    #[derive(Default)]
    pub struct RecordingCss {
        pub file_calls: Mutex<Vec<(PathBuf, bool)>>,
        pub string_calls: Mutex<Vec<(String, bool)>>,
    }

    impl CssCompiler for RecordingCss {
        fn compile_file(&self, path: &Path, minify: bool) -> Result<String, CssError> {
            self.file_calls
                .lock()
                .unwrap()
                .push((path.to_path_buf(), minify));
            Ok(format!("/* {} */", path.display()))
        }

        fn compile_string(&self, css: &str, _html: &str, extract: bool) -> Result<String, CssError> {
            self.string_calls
                .lock()
                .unwrap()
                .push((css.to_string(), extract));
            Ok(format!("/* scoped */{css}"))
        }
    }

    const UTILITIES: &str = ".p-4 { padding: 1rem; }\n.m-2 { margin: 0.5rem; }\n.sm\\:p-2:hover, .unused { padding: 0.5rem; }\n@media (min-width: 640px) {\n  .m-2 { margin: 1rem; }\n  .hidden { display: none; }\n}\n@media print {\n  .unused { display: none; }\n}\n@font-face { font-family: X; src: url(x.woff); }\n";

    #[test]
    fn compile_string_without_extract_is_passthrough() {
        let css = BuiltinCss.compile_string(UTILITIES, "<p></p>", false).unwrap();
        assert_eq!(css, UTILITIES);
    }

    #[test]
    fn compile_string_with_extract_purges_unused_rules() {
        let html = r#"<div class="p-4 sm:p-2"><span class='m-2'></span></div>"#;
        let css = BuiltinCss.compile_string(UTILITIES, html, true).unwrap();
        assert!(css.contains(".p-4"));
        assert!(css.contains("margin: 0.5rem"));
        assert!(css.contains(".sm\\:p-2:hover"));
        assert!(css.contains("@media (min-width: 640px)"));
        assert!(css.contains("margin: 1rem"));
        assert!(!css.contains(".hidden"));
        // Group emptied by the purge is dropped
        assert!(!css.contains("@media print"));
        // Non-group at-rules are kept
        assert!(css.contains("@font-face"));
    }

    #[test]
    fn element_selectors_survive_purge() {
        let css = BuiltinCss
            .compile_string("body { margin: 0 }\na.btn { color: red }", "<a>x</a>", true)
            .unwrap();
        assert!(css.contains("body"));
        assert!(!css.contains("a.btn"));
    }

    #[test]
    fn compile_string_rejects_unbalanced_css() {
        let result = BuiltinCss.compile_string(".a { color: red", "", false);
        assert!(matches!(result, Err(CssError::Invalid { .. })));
    }

    #[test]
    fn braces_in_strings_and_comments_are_ignored() {
        assert!(check_balanced(".a::before { content: \"}\" } /* { */").is_ok());
        assert!(check_balanced(".a { /* unterminated").is_err());
        assert!(check_balanced("}").is_err());
    }

    #[test]
    fn compile_file_inlines_imports() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("base.css"), ".base { color: red; }\n").unwrap();
        fs::create_dir(tmp.path().join("parts")).unwrap();
        fs::write(tmp.path().join("parts/extra.css"), ".extra { color: blue; }\n").unwrap();
        fs::write(
            tmp.path().join("main.css"),
            "@import \"base.css\";\n@import url('parts/extra.css');\n@import \"https://fonts.example.com/x.css\";\n.main { color: green; }\n",
        )
        .unwrap();

        let css = BuiltinCss
            .compile_file(&tmp.path().join("main.css"), false)
            .unwrap();
        assert!(css.contains(".base { color: red; }"));
        assert!(css.contains(".extra { color: blue; }"));
        assert!(css.contains("@import \"https://fonts.example.com/x.css\";"));
        assert!(!css.contains("@import \"base.css\""));
        assert!(css.contains(".main"));
    }

    #[test]
    fn compile_file_detects_cycles() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.css"), "@import \"b.css\";\n").unwrap();
        fs::write(tmp.path().join("b.css"), "@import \"a.css\";\n").unwrap();
        let result = BuiltinCss.compile_file(&tmp.path().join("a.css"), false);
        assert!(matches!(result, Err(CssError::ImportCycle(_))));
    }

    #[test]
    fn compile_file_missing_is_error() {
        let tmp = TempDir::new().unwrap();
        let result = BuiltinCss.compile_file(&tmp.path().join("nope.css"), false);
        assert!(matches!(result, Err(CssError::Read { .. })));
    }

    #[test]
    fn compile_file_minifies_when_asked() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("main.css"),
            "/* header */\n.a ,\n.b {\n  color: red;\n  margin: 0;\n}\n",
        )
        .unwrap();
        let css = BuiltinCss
            .compile_file(&tmp.path().join("main.css"), true)
            .unwrap();
        assert_eq!(css, ".a,.b{color:red;margin:0}");
    }

    #[test]
    fn compiler_for_follows_the_command_setting() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("main.css"), ".a { color: red; }\n").unwrap();
        let mut config = SiteConfig::default();

        let builtin = compiler_for(&config, tmp.path());
        let css = builtin.compile_file(&tmp.path().join("main.css"), false).unwrap();
        assert_eq!(css, ".a { color: red; }\n");

        config.build.tailwind.command = vec!["plinth-missing-css-compiler".into()];
        let external = compiler_for(&config, tmp.path());
        let result = external.compile_file(&tmp.path().join("main.css"), false);
        assert!(matches!(result, Err(CssError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn tailwind_cli_reads_stdout_and_passes_minify() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("main.css"), "@tailwind utilities;\n").unwrap();
        // $1 is -i, $2 the input, $3 the optional --minify
        let cli = TailwindCli::new(
            vec![
                "sh".into(),
                "-c".into(),
                "printf '/* %s */' \"$3\"; cat \"$2\"".into(),
                "tailwindcss".into(),
            ],
            tmp.path(),
        );

        let css = cli.compile_file(Path::new("main.css"), true).unwrap();
        assert_eq!(css, "/* --minify */@tailwind utilities;\n");
        let css = cli.compile_file(Path::new("main.css"), false).unwrap();
        assert_eq!(css, "/*  */@tailwind utilities;\n");
    }

    #[cfg(unix)]
    #[test]
    fn tailwind_cli_failure_carries_stderr() {
        let tmp = TempDir::new().unwrap();
        let cli = TailwindCli::new(
            vec!["sh".into(), "-c".into(), "echo 'bad input' >&2; exit 3".into()],
            tmp.path(),
        );
        let err = cli.compile_file(Path::new("main.css"), false).unwrap_err();
        assert!(matches!(err, CssError::Command { .. }));
        assert!(err.to_string().contains("bad input"), "{err}");
    }

    #[test]
    fn tailwind_cli_purges_page_css_in_process() {
        let cli = TailwindCli::new(vec!["tailwindcss".into()], Path::new("."));
        let css = cli
            .compile_string(".used { a: b }\n.gone { a: b }", r#"<p class="used"></p>"#, true)
            .unwrap();
        assert!(css.contains(".used"));
        assert!(!css.contains(".gone"));
    }

    #[test]
    fn global_stylesheet_is_empty_without_source() {
        let tmp = TempDir::new().unwrap();
        let css = global_stylesheet(&BuiltinCss, tmp.path(), &SiteConfig::default(), "local")
            .unwrap();
        assert!(css.is_empty());
    }

    #[test]
    fn global_stylesheet_minifies_in_production() {
        let tmp = TempDir::new().unwrap();
        let mut config = SiteConfig::default();
        config.build.tailwind.source = Some("main.css".into());
        let mock = RecordingCss::default();

        global_stylesheet(&mock, tmp.path(), &config, "local").unwrap();
        global_stylesheet(&mock, tmp.path(), &config, "production").unwrap();

        let calls = mock.file_calls.lock().unwrap();
        assert_eq!(calls[0], (tmp.path().join("main.css"), false));
        assert_eq!(calls[1], (tmp.path().join("main.css"), true));
    }

    #[test]
    fn selectors_split_on_top_level_commas() {
        assert_eq!(split_selectors(".a, :is(.b, .c) .d"), vec![".a", ":is(.b, .c) .d"]);
    }
}
