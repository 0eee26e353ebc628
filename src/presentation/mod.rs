//! Server-rendered views: embedded templates plus the registered helpers.

pub mod helpers;

use include_dir::{Dir, include_dir};
use minijinja::{Environment, value::Value};
use thiserror::Error;

static TEMPLATES: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/templates");

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template `{name}` is not valid UTF-8")]
    Encoding { name: &'static str },
    #[error("failed to load template `{name}`: {source}")]
    Load {
        name: &'static str,
        source: minijinja::Error,
    },
}

#[derive(Debug, Error)]
#[error("failed to render template `{name}`")]
pub struct TemplateRenderError {
    pub name: String,
    #[source]
    pub source: minijinja::Error,
}

/// The template environment shared by all handlers.
///
/// Templates are embedded at build time; helpers from [`helpers`] are
/// registered before any template is parsed so macro-time lookups resolve.
#[derive(Clone)]
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    pub fn new() -> Result<Self, TemplateError> {
        let mut env = Environment::new();
        helpers::register(&mut env);

        for file in TEMPLATES.files() {
            let name = file
                .path()
                .to_str()
                .unwrap_or("(non-utf8 template path)");
            let source = file
                .contents_utf8()
                .ok_or(TemplateError::Encoding { name })?;
            env.add_template(name, source)
                .map_err(|source| TemplateError::Load { name, source })?;
        }

        Ok(Self { env })
    }

    pub fn render(&self, name: &str, ctx: Value) -> Result<String, TemplateRenderError> {
        let template = self
            .env
            .get_template(name)
            .map_err(|source| TemplateRenderError {
                name: name.to_string(),
                source,
            })?;
        template.render(ctx).map_err(|source| TemplateRenderError {
            name: name.to_string(),
            source,
        })
    }
}
