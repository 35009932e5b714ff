//! Shared test utilities: throwaway projects on disk.
//!
//! # Usage
//!
//! ```rust,ignore
//! use crate::test_helpers::Project;
//!
//! let project = Project::new()
//!     .config("[build]\nlayout = \"layouts/base.html\"\n")
//!     .file("src/layouts/base.html", "<main>{% block content %}{% endblock %}</main>")
//!     .page("index.html", "{% block content %}Hi{% endblock %}");
//!
//! project.build_env("local").unwrap();
//! assert_eq!(project.read("dist/index.html"), "<main>Hi</main>");
//! ```

use std::fs;
use std::path::Path;
use tempfile::TempDir;

use crate::config;
use crate::css::CssCompiler;
use crate::pipeline::{self, BuildError, BuildReport};

/// A project directory with the stock layout: pages in `src/templates`,
/// output in `dist`.
pub struct Project {
    tmp: TempDir,
}

impl Project {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("src/templates")).unwrap();
        Self { tmp }
    }

    pub fn root(&self) -> &Path {
        self.tmp.path()
    }

    /// Write `config.toml`.
    pub fn config(self, toml: &str) -> Self {
        self.file("config.toml", toml)
    }

    /// Write a file relative to the project root.
    pub fn file(self, relative: &str, contents: &str) -> Self {
        let path = self.root().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
        self
    }

    /// Write a page template under `src/templates`.
    pub fn page(self, relative: &str, contents: &str) -> Self {
        self.file(&format!("src/templates/{relative}"), contents)
    }

    /// Read a file relative to the project root. Panics with the path on miss.
    pub fn read(&self, relative: &str) -> String {
        let path = self.root().join(relative);
        fs::read_to_string(&path).unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()))
    }

    pub fn build_env(&self, env: &str) -> Result<BuildReport, BuildError> {
        pipeline::build(self.root(), env, None)
    }

    /// Build for `local` with a specific CSS compiler.
    pub fn build_with(&self, compiler: &dyn CssCompiler) -> Result<BuildReport, BuildError> {
        let resolved = config::load_config(self.root(), "local")?;
        pipeline::build_with(self.root(), "local", &resolved, compiler, None)
    }
}
