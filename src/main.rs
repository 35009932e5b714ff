use clap::{Parser, Subcommand};
use plinth::{config, css, output, pipeline};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn version_string() -> &'static str {
    let on_tag = env!("PLINTH_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("PLINTH_GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // clap wants a 'static str; this runs once per process
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "plinth")]
#[command(about = "Static-site build pipeline: front matter, layouts, Markdown and utility CSS")]
#[command(long_about = "\
Static-site build pipeline: front matter, layouts, Markdown and utility CSS

Every template under build.templates.source is rendered inside its layout,
given page-scoped CSS, linted, transformed and written to a mirrored tree
under build.destination.path.

Project structure (defaults):

  project/
  ├── config.toml                  # Site config (optional)
  ├── config.production.toml       # Overlay for --env production (optional)
  └── src/
      ├── main.css                 # build.tailwind.source (optional)
      ├── assets/images/           # Copied verbatim to dist/images/
      ├── layouts/base.html        # {% block content %}{% endblock %}
      ├── components/button.html   # {{ component(src=\"components/button.html\") }}
      └── templates/               # Pages
          ├── index.html           → dist/index.html
          └── about.html           → dist/about.html (or its permalink)

Per-page front matter (YAML --- or TOML +++) overrides any config key:

  ---
  layout: layouts/base.html
  permalink: /about/
  plaintext: true
  ---

Run 'plinth gen-config' to generate a documented config.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Project root (where config.toml lives)
    #[arg(long, default_value = ".", global = true)]
    root: PathBuf,

    /// Show debug diagnostics (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render every template into the destination directory
    Build {
        /// Environment name; selects config.<env>.toml
        #[arg(long, default_value = "local")]
        env: String,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Build { env } => match run_build(&cli.root, &env) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("\u{2717} Build failed");
                eprintln!("{}", error_chain(err.as_ref()));
                ExitCode::FAILURE
            }
        },
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
            ExitCode::SUCCESS
        }
    }
}

fn run_build(root: &Path, env: &str) -> Result<(), Box<dyn std::error::Error>> {
    let resolved = config::load_config(root, env)?;
    let source_dir = root.join(&resolved.site.build.templates.source);

    let (tx, rx) = std::sync::mpsc::channel();
    let printer = {
        let root = root.to_path_buf();
        std::thread::spawn(move || {
            for event in rx {
                for line in output::format_build_event(&event, &root, &source_dir) {
                    println!("{}", line);
                }
            }
        })
    };
    let compiler = css::compiler_for(&resolved.site, root);
    let result = pipeline::build_with(root, env, &resolved, compiler.as_ref(), Some(tx));
    printer
        .join()
        .map_err(|_| "progress printer thread panicked")?;

    let report = result?;
    println!();
    output::print_build_report(&report, root);
    Ok(())
}

/// The error and its causes, one per line, skipping causes whose text the
/// parent message already includes.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut lines = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !lines.iter().any(|l| l.contains(&text)) {
            lines.push(format!("  caused by: {text}"));
        }
        source = cause.source();
    }
    lines.join("\n")
}

/// Install the tracing subscriber: `warn` by default, `debug` with `-v`,
/// `RUST_LOG` when set.
fn init_tracing(verbose: bool) {
    let default = if verbose { "plinth=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
