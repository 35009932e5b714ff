//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Progress
//!
//! Printed live while the build runs, one entry per event:
//!
//! ```text
//! Assets: 12 files → dist/images
//! Stylesheet → dist/css/tailwind.css
//! index.html → dist/index.html
//! about.html → dist/about/index.html
//!     Plaintext: dist/about/index.txt
//! ```
//!
//! ## Report
//!
//! After every write has finished: lint findings, then page failures (only
//! when `build.fail_fast = false`), then the summary line.
//!
//! ```text
//! Lint (1 finding)
//!
//! ❌  The value of attribute [ class ] must be in double quotes.
//!    Source:   src/templates/index.html:3:5
//!    Offender: <p class='x'>
//!
//! Failed (1 page)
//!     src/templates/broken.html
//!         could not render: ...
//!
//! Built 3 templates → dist
//! ```
//!
//! Paths are shown relative to the project root when they live under it.
//!
//! # Architecture
//!
//! Each section has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::lint::LintMessage;
use crate::pipeline::{BuildEvent, BuildReport, FileFailure};
use std::path::Path;

// ============================================================================
// Shared helpers
// ============================================================================

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Display `path` relative to `root` when possible.
fn relative(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

/// `1 page`, `2 pages`.
fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

// ============================================================================
// Progress
// ============================================================================

/// Format one progress event.
///
/// Page sources are shown relative to `source_dir`, outputs relative to `root`.
pub fn format_build_event(event: &BuildEvent, root: &Path, source_dir: &Path) -> Vec<String> {
    match event {
        BuildEvent::AssetsCopied { count, destination } => vec![format!(
            "Assets: {} \u{2192} {}",
            plural(*count, "file"),
            relative(destination, root)
        )],
        BuildEvent::StylesheetWritten(path) => {
            vec![format!("Stylesheet \u{2192} {}", relative(path, root))]
        }
        BuildEvent::PageWritten { source, emitted } => {
            let mut lines = vec![format!(
                "{} \u{2192} {}",
                relative(source, source_dir),
                relative(&emitted.page, root)
            )];
            if let Some(text) = &emitted.plaintext {
                lines.push(format!("{}Plaintext: {}", indent(1), relative(text, root)));
            }
            lines
        }
    }
}

// ============================================================================
// Lint report
// ============================================================================

/// Format lint findings, one block per finding, in the order collected.
pub fn format_lint_report(messages: &[LintMessage], root: &Path) -> Vec<String> {
    if messages.is_empty() {
        return Vec::new();
    }
    let mut lines = vec![format!("Lint ({})", plural(messages.len(), "finding"))];
    for message in messages {
        let source = match &message.file {
            Some(file) => format!("{}:{}:{}", relative(file, root), message.line, message.col),
            None => format!("{}:{}", message.line, message.col),
        };
        lines.push(String::new());
        lines.push(format!("\u{274c}  {}", message.message));
        lines.push(format!("   Source:   {source}"));
        lines.push(format!("   Offender: {}", message.evidence.trim()));
    }
    lines
}

// ============================================================================
// Failures and summary
// ============================================================================

/// Format pages that failed in report mode.
pub fn format_failures(failures: &[FileFailure], root: &Path) -> Vec<String> {
    if failures.is_empty() {
        return Vec::new();
    }
    let mut lines = vec![format!("Failed ({})", plural(failures.len(), "page"))];
    for failure in failures {
        lines.push(format!("{}{}", indent(1), relative(&failure.path, root)));
        lines.push(format!("{}{}", indent(2), failure.error));
    }
    lines
}

pub fn format_build_summary(report: &BuildReport, root: &Path) -> String {
    format!(
        "Built {} \u{2192} {}",
        plural(report.template_count, "template"),
        relative(&report.destination, root)
    )
}

/// Format the end-of-build report: lint, failures, summary.
pub fn format_build_report(report: &BuildReport, root: &Path) -> Vec<String> {
    let mut lines = Vec::new();
    for section in [
        format_lint_report(&report.lint, root),
        format_failures(&report.failures, root),
    ] {
        if !section.is_empty() {
            lines.extend(section);
            lines.push(String::new());
        }
    }
    lines.push(format_build_summary(report, root));
    lines
}

/// Print the end-of-build report to stdout.
pub fn print_build_report(report: &BuildReport, root: &Path) {
    for line in format_build_report(report, root) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================
