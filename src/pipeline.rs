//! Build driver and per-page pipeline.
//!
//! ## Build Order
//!
//! ```text
//! config ─→ global CSS ─→ discover pages ─→ copy assets ─→ write CSS (non-production)
//!        ─→ load templates ─→ for each page: render (1–9) ─→ spawn write (10–12)
//!        ─→ join writes ─→ BuildReport
//! ```
//!
//! Everything before the page loop is fatal: a bad config, an unreadable
//! stylesheet, an empty template directory or a broken template environment
//! stops the build before any page is written.
//!
//! ## Per-page Steps
//!
//! | Step | Module |
//! |---|---|
//! | 1. read and split front matter | [`crate::frontmatter`] |
//! | 2. merge page config | [`crate::config::ResolvedConfig::merge_page`] |
//! | 3. resolve layout | [`crate::config::SiteConfig::resolve_layout`] |
//! | 4. per-page Markdown options | [`crate::markdown`] |
//! | 5. wrap in layout and render | [`crate::templates`] |
//! | 6. substitute page-scoped CSS | [`crate::postprocess`] |
//! | 7. lint | [`crate::lint`] |
//! | 8. transformer chain | [`crate::transform`] |
//! | 9. output path, permalink, plaintext | [`crate::emit`] |
//! | 10–12. write, plaintext, move | [`crate::emit::emit`] |
//!
//! Pages are rendered one after another in sorted path order. Each page's
//! disk writes are spawned onto the rayon pool as soon as it has rendered,
//! so the next page renders while the previous one is being written. All
//! writes are joined before [`build`] returns; the report always describes
//! a finished output directory.
//!
//! ## Failures
//!
//! With `build.fail_fast = true` (the default) the first page failure ends
//! the build with [`BuildError::Page`]. With `false`, failures are recorded
//! in [`BuildReport::failures`] and the remaining pages still build. Lint
//! findings never fail a build.
//!
//! ## Permalink Collisions
//!
//! Two pages with the same permalink both move to it; whichever write lands
//! last wins. No error is raised.

use crate::config::{self, ConfigError, ResolvedConfig};
use crate::css::{self, CssCompiler, CssError};
use crate::emit::{self, EmitError, EmitJob, Emitted};
use crate::frontmatter::{self, FrontMatterError};
use crate::lint::{self, LintMessage};
use crate::plaintext;
use crate::postprocess;
use crate::templates::{self, TemplateEnvironment, TemplateError};
use crate::transform::{TransformChain, TransformError};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Css(#[from] CssError),
    #[error(transparent)]
    Templates(#[from] TemplateError),
    #[error(transparent)]
    Emit(#[from] EmitError),
    #[error("cannot read template directory {source_dir}: {cause}")]
    Discover {
        source_dir: PathBuf,
        cause: walkdir::Error,
    },
    #[error("no templates matching *.{filetypes} found in {source_dir}")]
    NoTemplates {
        source_dir: PathBuf,
        filetypes: String,
    },
    #[error("{path}: {source}")]
    Page { path: PathBuf, source: PageError },
}

/// Why a single page failed.
#[derive(Error, Debug)]
pub enum PageError {
    #[error("cannot read template: {0}")]
    Read(#[from] std::io::Error),
    #[error(transparent)]
    FrontMatter(#[from] FrontMatterError),
    #[error("page config: {0}")]
    Config(#[from] ConfigError),
    #[error("layout {0:?} is not a loaded template")]
    MissingLayout(String),
    #[error("could not render: {0}")]
    Render(#[from] TemplateError),
    #[error("could not render: template produced no output")]
    EmptyRender,
    #[error("page CSS: {0}")]
    Css(#[from] CssError),
    #[error("transform: {0}")]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Emit(#[from] EmitError),
}

/// A page that failed while the build carried on.
#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: PageError,
}

/// Result of a build.
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Number of templates discovered.
    pub template_count: usize,
    pub destination: PathBuf,
    /// Pages written, in source order.
    pub outputs: Vec<(PathBuf, Emitted)>,
    /// Lint findings, each tagged with its template.
    pub lint: Vec<LintMessage>,
    /// Page failures when `build.fail_fast = false`.
    pub failures: Vec<FileFailure>,
    pub assets_copied: usize,
    /// Where the global stylesheet was written, outside production.
    pub stylesheet: Option<PathBuf>,
}

/// Progress notifications, for live output while building.
#[derive(Debug, Clone)]
pub enum BuildEvent {
    AssetsCopied { count: usize, destination: PathBuf },
    StylesheetWritten(PathBuf),
    PageWritten { source: PathBuf, emitted: Emitted },
}

/// A rendered page, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    pub job: EmitJob,
    pub lint: Vec<LintMessage>,
}

/// Everything a page render needs that is shared across the build.
pub struct BuildContext<'a> {
    pub config: &'a ResolvedConfig,
    pub env: &'a str,
    pub root: &'a Path,
    pub css: &'a str,
    pub compiler: &'a dyn CssCompiler,
    pub templates: &'a TemplateEnvironment,
    pub transforms: &'a TransformChain,
}

/// Build the project at `root` for `env` with the configured CSS compiler.
pub fn build(
    root: &Path,
    env: &str,
    progress: Option<Sender<BuildEvent>>,
) -> Result<BuildReport, BuildError> {
    let config = config::load_config(root, env)?;
    let compiler = css::compiler_for(&config.site, root);
    build_with(root, env, &config, compiler.as_ref(), progress)
}

/// Build with an already resolved config and a given CSS compiler.
pub fn build_with(
    root: &Path,
    env: &str,
    config: &ResolvedConfig,
    compiler: &dyn CssCompiler,
    progress: Option<Sender<BuildEvent>>,
) -> Result<BuildReport, BuildError> {
    let site = &config.site;
    let unknown = lint::unknown_rules(&site.htmlhint);
    if !unknown.is_empty() {
        tracing::warn!(rules = ?unknown, "ignoring unknown htmlhint rules");
    }

    let css = css::global_stylesheet(compiler, root, site, env)?;

    let source_dir = root.join(&site.build.templates.source);
    let destination = root.join(&site.build.destination.path);
    let pages = discover_templates(&source_dir, &site.build.templates.filetypes)?;
    tracing::debug!(count = pages.len(), source = %source_dir.display(), "discovered templates");

    let assets_destination = destination.join(&site.build.assets.destination);
    let assets_copied = emit::copy_assets(&root.join(&site.build.assets.source), &assets_destination)?;
    if assets_copied > 0 {
        notify(
            &progress,
            BuildEvent::AssetsCopied {
                count: assets_copied,
                destination: assets_destination,
            },
        );
    }

    let stylesheet = if config::is_production(env) {
        None
    } else {
        let path = destination.join("css").join(&site.build.tailwind.css);
        emit::write_file(&path, css.as_bytes())?;
        notify(&progress, BuildEvent::StylesheetWritten(path.clone()));
        Some(path)
    };

    let templates = TemplateEnvironment::init(
        &root.join(&site.build.templates.root),
        Some(&source_dir),
        &site.build.templates.filetypes,
    )?;
    let transforms = TransformChain::standard();
    let ctx = BuildContext {
        config,
        env,
        root,
        css: &css,
        compiler,
        templates: &templates,
        transforms: &transforms,
    };

    let mut report = BuildReport {
        template_count: pages.len(),
        destination,
        assets_copied,
        stylesheet,
        ..BuildReport::default()
    };

    let fail_fast = site.build.fail_fast;
    let (tx, rx) = mpsc::channel();
    let rendered: Result<(), BuildError> = rayon::scope(|scope| {
        for (index, path) in pages.iter().enumerate() {
            let page = match render_page(&ctx, path) {
                Ok(page) => page,
                Err(error) if fail_fast => {
                    return Err(BuildError::Page {
                        path: path.clone(),
                        source: error,
                    });
                }
                Err(error) => {
                    tracing::debug!(path = %path.display(), %error, "page failed");
                    report.failures.push(FileFailure {
                        path: path.clone(),
                        error,
                    });
                    continue;
                }
            };
            report.lint.extend(page.lint);

            let tx = tx.clone();
            scope.spawn(move |_| {
                let _ = tx.send((index, emit::emit(page.job)));
            });
        }
        Ok(())
    });
    drop(tx);

    let mut written: Vec<(usize, Result<Emitted, EmitError>)> = rx.into_iter().collect();
    rendered?;
    written.sort_by_key(|(index, _)| *index);

    for (index, result) in written {
        let path = pages[index].clone();
        match result {
            Ok(emitted) => {
                notify(
                    &progress,
                    BuildEvent::PageWritten {
                        source: path.clone(),
                        emitted: emitted.clone(),
                    },
                );
                report.outputs.push((path, emitted));
            }
            Err(error) if fail_fast => {
                return Err(BuildError::Page {
                    path,
                    source: error.into(),
                });
            }
            Err(error) => report.failures.push(FileFailure {
                path,
                error: error.into(),
            }),
        }
    }
    report.failures.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(report)
}

fn notify(progress: &Option<Sender<BuildEvent>>, event: BuildEvent) {
    if let Some(tx) = progress {
        // A dropped receiver only means nobody is watching
        let _ = tx.send(event);
    }
}

/// Every file under `source_dir` with a matching extension, sorted.
pub fn discover_templates(source_dir: &Path, filetypes: &[String]) -> Result<Vec<PathBuf>, BuildError> {
    let no_templates = || BuildError::NoTemplates {
        source_dir: source_dir.to_path_buf(),
        filetypes: filetypes.join("|"),
    };
    if !source_dir.is_dir() {
        return Err(no_templates());
    }

    let mut pages = Vec::new();
    for entry in WalkDir::new(source_dir) {
        let entry = entry.map_err(|cause| BuildError::Discover {
            source_dir: source_dir.to_path_buf(),
            cause,
        })?;
        let matches = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| filetypes.iter().any(|f| f == ext));
        if entry.file_type().is_file() && matches {
            pages.push(entry.into_path());
        }
    }
    if pages.is_empty() {
        return Err(no_templates());
    }
    pages.sort();
    Ok(pages)
}

/// Run steps 1–9 for one page.
pub fn render_page(ctx: &BuildContext<'_>, path: &Path) -> Result<RenderedPage, PageError> {
    tracing::debug!(path = %path.display(), "rendering");

    // 1. read and split
    let text = fs::read_to_string(path)?;
    let parsed = frontmatter::split(&text)?;

    // 2. merge page config
    let page = ctx.config.merge_page(&parsed.attributes)?;
    let site = &page.site;

    // 3. layout
    let layout = site.resolve_layout();
    if let Some(layout) = layout {
        if !ctx.templates.has_template(layout) {
            return Err(PageError::MissingLayout(layout.to_string()));
        }
    }

    // 4–5. render with page-scoped Markdown options
    let context = templates::page_context(&page.raw, ctx.env, ctx.css);
    let html = ctx
        .templates
        .render_page(parsed.body, layout, &context, &site.markdown)?;
    if html.trim().is_empty() {
        return Err(PageError::EmptyRender);
    }

    // 6. page-scoped CSS
    let html = postprocess::process(&html, ctx.css, ctx.compiler)?;

    // 7. lint
    let lint = lint::verify(&html, &site.htmlhint)
        .into_iter()
        .map(|message| LintMessage {
            file: Some(path.to_path_buf()),
            ..message
        })
        .collect();

    // 8. transformers
    let html = ctx.transforms.apply(html, site, ctx.env)?;

    // 9. destination
    let build = &site.build;
    let source_dir = ctx.root.join(&build.templates.source);
    let destination = ctx.root.join(&build.destination.path);
    let ext = &build.destination.extension;
    let output = emit::output_path(path, &source_dir, &destination, ext);
    let permalink = site
        .permalink
        .as_deref()
        .map(|p| emit::permalink_path(p, &destination, ext))
        .transpose()?;
    let text = site.plaintext.then(|| plaintext::html_to_text(&html));

    Ok(RenderedPage {
        job: EmitJob {
            html,
            text,
            output,
            permalink,
        },
        lint,
    })
}
