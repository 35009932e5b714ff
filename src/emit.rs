//! Writing pages to disk.
//!
//! ## Output Paths
//!
//! A template's output mirrors its position under the template source
//! directory, with the extension swapped for `build.destination.extension`:
//!
//! ```text
//! src/templates/index.html          →  dist/index.html
//! src/templates/blog/post.njk       →  dist/blog/post.html
//! ```
//!
//! ## Permalinks
//!
//! A page's `permalink` relocates it, always under the destination root:
//!
//! | Permalink | Final path |
//! |---|---|
//! | `/about/` | `dist/about/index.html` |
//! | `/feed.xml` | `dist/feed.xml` |
//! | `""` or `/` | `dist/index.html` |
//! | `/../x` | rejected |
//!
//! The page is first written to its mirrored path and then moved, so the
//! mirrored path never survives a permalink. The plaintext derivative
//! (`plaintext = true`) is written beside the final path with a `.txt`
//! extension.

use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmitError {
    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("permalink {0:?} escapes the destination directory")]
    Permalink(String),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> EmitError + '_ {
    move |source| EmitError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// The mirrored output path for `template`.
///
/// Templates outside `source_root` land directly in `dest_root`.
pub fn output_path(template: &Path, source_root: &Path, dest_root: &Path, ext: &str) -> PathBuf {
    let relative = template
        .strip_prefix(source_root)
        .ok()
        .map(Path::to_path_buf)
        .or_else(|| template.file_name().map(PathBuf::from))
        .unwrap_or_default();
    dest_root.join(relative).with_extension(ext)
}

/// Resolve a permalink to a path under `dest_root`.
pub fn permalink_path(permalink: &str, dest_root: &Path, ext: &str) -> Result<PathBuf, EmitError> {
    let mut path = dest_root.to_path_buf();
    for component in Path::new(permalink).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => return Err(EmitError::Permalink(permalink.to_string())),
        }
    }
    if permalink.is_empty() || permalink.ends_with('/') || path == dest_root {
        path.push(format!("index.{ext}"));
    }
    Ok(path)
}

/// The plaintext derivative's path for a page written to `target`.
pub fn plaintext_path(target: &Path) -> PathBuf {
    target.with_extension("txt")
}

/// Everything needed to put one page on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct EmitJob {
    pub html: String,
    /// Plaintext derivative, if the page asked for one.
    pub text: Option<String>,
    /// Mirrored output path.
    pub output: PathBuf,
    /// Resolved permalink, if any.
    pub permalink: Option<PathBuf>,
}

impl EmitJob {
    /// Where the page ends up.
    pub fn final_path(&self) -> &Path {
        self.permalink.as_deref().unwrap_or(&self.output)
    }
}

/// Files produced by one [`emit`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct Emitted {
    pub page: PathBuf,
    pub plaintext: Option<PathBuf>,
}

/// Write the page, then its plaintext derivative, then apply the permalink move.
pub fn emit(job: EmitJob) -> Result<Emitted, EmitError> {
    write_file(&job.output, job.html.as_bytes())?;

    let plaintext = match &job.text {
        Some(text) => {
            let path = plaintext_path(job.final_path());
            write_file(&path, text.as_bytes())?;
            Some(path)
        }
        None => None,
    };

    if let Some(target) = &job.permalink {
        if target != &job.output {
            move_file(&job.output, target)?;
        }
    }

    Ok(Emitted {
        page: job.final_path().to_path_buf(),
        plaintext,
    })
}

/// Write `contents` to `path`, creating parent directories.
pub fn write_file(path: &Path, contents: &[u8]) -> Result<(), EmitError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    fs::write(path, contents).map_err(io_error(path))
}

/// Move `from` to `to`, replacing whatever is at `to`.
fn move_file(from: &Path, to: &Path) -> Result<(), EmitError> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    // rename replaces an existing file at `to`
    if fs::rename(from, to).is_err() {
        // Cross-device moves cannot rename
        fs::copy(from, to).map_err(io_error(to))?;
        fs::remove_file(from).map_err(io_error(from))?;
    }
    tracing::debug!(from = %from.display(), to = %to.display(), "applied permalink");
    Ok(())
}

/// Copy the asset directory verbatim. Returns the number of files copied.
///
/// A missing source directory copies nothing.
pub fn copy_assets(src: &Path, dst: &Path) -> Result<usize, EmitError> {
    if !src.is_dir() {
        tracing::debug!(source = %src.display(), "no asset directory, skipping");
        return Ok(0);
    }
    fs::create_dir_all(dst).map_err(io_error(dst))?;
    copy_dir_recursive(src, dst)
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<usize, EmitError> {
    let mut copied = 0;
    for entry in fs::read_dir(src).map_err(io_error(src))? {
        let entry = entry.map_err(io_error(src))?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            fs::create_dir_all(&dst_path).map_err(io_error(&dst_path))?;
            copied += copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path).map_err(io_error(&dst_path))?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn output_path_mirrors_source_tree() {
        let out = output_path(
            Path::new("src/templates/blog/post.njk"),
            Path::new("src/templates"),
            Path::new("dist"),
            "html",
        );
        assert_eq!(out, PathBuf::from("dist/blog/post.html"));
    }

    #[test]
    fn output_path_uses_configured_extension() {
        let out = output_path(
            Path::new("src/templates/index.html"),
            Path::new("src/templates"),
            Path::new("dist"),
            "php",
        );
        assert_eq!(out, PathBuf::from("dist/index.php"));
    }

    #[test]
    fn output_path_is_idempotent() {
        let args = (
            Path::new("src/templates/a/b.html"),
            Path::new("src/templates"),
            Path::new("dist"),
        );
        let first = output_path(args.0, args.1, args.2, "html");
        let second = output_path(args.0, args.1, args.2, "html");
        assert_eq!(first, second);
    }

    #[test]
    fn output_path_outside_source_uses_file_name() {
        let out = output_path(
            Path::new("elsewhere/x.html"),
            Path::new("src/templates"),
            Path::new("dist"),
            "html",
        );
        assert_eq!(out, PathBuf::from("dist/x.html"));
    }

    #[test]
    fn permalink_trailing_slash_is_index() {
        let dest = Path::new("dist");
        assert_eq!(
            permalink_path("/about/", dest, "html").unwrap(),
            PathBuf::from("dist/about/index.html")
        );
        assert_eq!(
            permalink_path("/", dest, "html").unwrap(),
            PathBuf::from("dist/index.html")
        );
        assert_eq!(
            permalink_path("", dest, "php").unwrap(),
            PathBuf::from("dist/index.php")
        );
    }

    #[test]
    fn permalink_file_path_is_verbatim() {
        assert_eq!(
            permalink_path("/feed.xml", Path::new("dist"), "html").unwrap(),
            PathBuf::from("dist/feed.xml")
        );
        assert_eq!(
            permalink_path("docs/./intro", Path::new("dist"), "html").unwrap(),
            PathBuf::from("dist/docs/intro")
        );
    }

    #[test]
    fn permalink_parent_dir_rejected() {
        let result = permalink_path("/../etc/passwd", Path::new("dist"), "html");
        assert!(matches!(result, Err(EmitError::Permalink(_))));
    }

    #[test]
    fn emit_writes_page_and_creates_dirs() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("dist/blog/post.html");
        let emitted = emit(EmitJob {
            html: "<p>x</p>".into(),
            text: None,
            output: output.clone(),
            permalink: None,
        })
        .unwrap();
        assert_eq!(emitted.page, output);
        assert_eq!(emitted.plaintext, None);
        assert_eq!(fs::read_to_string(&output).unwrap(), "<p>x</p>");
    }

    #[test]
    fn emit_moves_to_permalink_with_plaintext_beside_it() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("dist/about.html");
        let permalink = tmp.path().join("dist/about/index.html");
        let emitted = emit(EmitJob {
            html: "<p>about</p>".into(),
            text: Some("about".into()),
            output: output.clone(),
            permalink: Some(permalink.clone()),
        })
        .unwrap();

        assert!(!output.exists());
        assert_eq!(fs::read_to_string(&permalink).unwrap(), "<p>about</p>");
        let txt = tmp.path().join("dist/about/index.txt");
        assert_eq!(emitted.plaintext.as_deref(), Some(txt.as_path()));
        assert_eq!(fs::read_to_string(txt).unwrap(), "about");
        assert!(!tmp.path().join("dist/about.txt").exists());
    }

    #[test]
    fn emit_overwrites_existing_permalink_target() {
        let tmp = TempDir::new().unwrap();
        let permalink = tmp.path().join("dist/x/index.html");
        write_file(&permalink, b"old").unwrap();
        emit(EmitJob {
            html: "new".into(),
            text: None,
            output: tmp.path().join("dist/x.html"),
            permalink: Some(permalink.clone()),
        })
        .unwrap();
        assert_eq!(fs::read_to_string(permalink).unwrap(), "new");
    }

    #[test]
    fn emit_permalink_equal_to_output_is_kept() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("dist/index.html");
        emit(EmitJob {
            html: "home".into(),
            text: None,
            output: output.clone(),
            permalink: Some(output.clone()),
        })
        .unwrap();
        assert_eq!(fs::read_to_string(output).unwrap(), "home");
    }

    #[test]
    fn copy_assets_copies_tree() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("assets");
        fs::create_dir_all(src.join("icons")).unwrap();
        fs::write(src.join("logo.png"), b"png").unwrap();
        fs::write(src.join("icons/a.svg"), b"svg").unwrap();

        let dst = tmp.path().join("dist/images");
        let copied = copy_assets(&src, &dst).unwrap();
        assert_eq!(copied, 2);
        assert_eq!(fs::read(dst.join("logo.png")).unwrap(), b"png");
        assert_eq!(fs::read(dst.join("icons/a.svg")).unwrap(), b"svg");
    }

    #[test]
    fn copy_assets_missing_source_is_noop() {
        let tmp = TempDir::new().unwrap();
        let copied = copy_assets(&tmp.path().join("nope"), &tmp.path().join("dist")).unwrap();
        assert_eq!(copied, 0);
        assert!(!tmp.path().join("dist").exists());
    }
}
