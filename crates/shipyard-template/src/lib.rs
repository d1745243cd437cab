//! Template rendering for changelogs, tags, release notes, and commit
//! messages.
//!
//! Backed by [`minijinja`], the way a template address resolves depends
//! on its [`TemplateSource`] scheme: `builtin:<name>` looks up
//! one of the names this crate registers itself, `file:<path>` reads
//! and renders a file relative to a base directory through the
//! injected [`FileSystem`], and `inline:<text>` renders its text
//! directly. All three share one [`Environment`](minijinja::Environment)
//! and the same custom `date` filter, backed by an injected
//! [`ClockSource`] so rendered dates are deterministic under test.

use std::path::Path;
use std::sync::Arc;

use minijinja::Environment;

use shipyard_fs::FileSystem;
use shipyard_types::{ClockSource, TemplateSource};

/// Errors surfaced while rendering a template.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template rendering failed: {0}")]
    Render(#[from] minijinja::Error),
    #[error("no builtin template named {0:?}")]
    UnknownBuiltin(String),
    #[error(transparent)]
    Fs(#[from] shipyard_fs::FsError),
    #[error("template path {0:?} escapes its base directory")]
    PathEscapesBase(std::path::PathBuf),
}

const BUILTIN_DEFAULT: &str = "default";
const BUILTIN_DEFAULT_TAG: &str = "default-tag";
const BUILTIN_GO: &str = "go";
const BUILTIN_GO_ANNOTATED: &str = "go-annotated";
const BUILTIN_NPM: &str = "npm";
const BUILTIN_DATE: &str = "date";
const BUILTIN_VERSIONS: &str = "versions";
const BUILTIN_RELEASE_DATE: &str = "release-date";

/// `<path>/v<version>` when the package's `path` isn't `.`, else bare
/// `v<version>` — shared by `go` and `go-annotated`.
const GO_TAG_NAME: &str = "{% if path is defined and path != \".\" %}{{ path }}/{% endif %}v{{ version }}";

fn register_builtins(env: &mut Environment<'static>) {
    env.add_template(
        BUILTIN_DEFAULT,
        "## {{ version }}\n\n{% for c in consignments %}- {{ c.summary }}\n{% endfor %}",
    )
    .expect("builtin template source is valid");
    env.add_template(BUILTIN_DEFAULT_TAG, "v{{ version }}")
        .expect("builtin template source is valid");
    env.add_template(BUILTIN_GO, GO_TAG_NAME)
        .expect("builtin template source is valid");
    env.add_template(
        BUILTIN_GO_ANNOTATED,
        "{% if path is defined and path != \".\" %}{{ path }}/{% endif %}v{{ version }}\n\nRelease {{ package }} {{ version }}",
    )
    .expect("builtin template source is valid");
    env.add_template(BUILTIN_NPM, "{{ package }}@{{ version }}")
        .expect("builtin template source is valid");
    env.add_template(BUILTIN_DATE, "{{ now|date }}")
        .expect("builtin template source is valid");
    env.add_template(
        BUILTIN_VERSIONS,
        "release\n\n{% for p in packages %}{{ p.name }}@{{ p.version }}\n{% endfor %}",
    )
    .expect("builtin template source is valid");
    env.add_template(BUILTIN_RELEASE_DATE, "{{ now|date(\"%Y-%m-%d\") }}")
        .expect("builtin template source is valid");
}

/// Renders [`TemplateSource`]s against one shared [`minijinja::Environment`].
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl TemplateRenderer {
    /// Builds a renderer whose `date` filter reads from `clock`.
    pub fn new(clock: Arc<dyn ClockSource>) -> Self {
        let mut env = Environment::new();
        register_builtins(&mut env);
        env.add_filter(
            "date",
            move |_value: minijinja::Value, fmt: Option<String>| -> String {
                let now = clock.now();
                match fmt.as_deref() {
                    Some(f) => now.format(f).to_string(),
                    None => now.format("%Y-%m-%d").to_string(),
                }
            },
        );
        TemplateRenderer { env }
    }

    /// Registers an additional named template, so callers can extend the
    /// builtin set (e.g. a per-project default template) without
    /// reaching for `file:`/`inline:` every time.
    pub fn register(&mut self, name: &str, source: &str) -> Result<(), TemplateError> {
        self.env
            .add_template_owned(name.to_string(), source.to_string())
            .map_err(TemplateError::Render)
    }

    /// Renders `source` against `ctx`. `fs`/`base_dir` are only consulted
    /// for `file:` sources.
    pub fn render(
        &self,
        source: &TemplateSource,
        fs: &dyn FileSystem,
        base_dir: &Path,
        ctx: minijinja::Value,
    ) -> Result<String, TemplateError> {
        match source {
            TemplateSource::Builtin(name) => {
                let template = self
                    .env
                    .get_template(name)
                    .map_err(|_| TemplateError::UnknownBuiltin(name.clone()))?;
                Ok(template.render(ctx)?)
            }
            TemplateSource::Inline(text) => Ok(self.env.render_str(text, ctx)?),
            TemplateSource::File(relpath) => {
                let requested = base_dir.join(relpath);
                let base_real = fs.canonicalize(base_dir)?;
                let requested_real = fs.canonicalize(&requested)?;
                if !requested_real.starts_with(&base_real) {
                    tracing::warn!(path = %requested.display(), "rejected template path outside base directory");
                    return Err(TemplateError::PathEscapesBase(requested));
                }
                let bytes = fs.read(&requested_real)?;
                let text = String::from_utf8_lossy(&bytes);
                Ok(self.env.render_str(&text, ctx)?)
            }
        }
    }
}
