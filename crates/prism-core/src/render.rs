//! HTML rendering seam
//!
//! The builder hands a JSON data mapping to a [`Renderer`] and writes
//! whatever markup comes back. [`TemplateHtml`] renders the embedded
//! jinja templates under `templates/`; another engine can be plugged in
//! by implementing the trait.
//!
//! Data shapes:
//!
//! ```text
//! Home: { title, description, packages: [{ name, url }] }
//! Leaf: { title, package_title, versions: [{ filename, name, version, url, mtime, ... }] }
//! ```

use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value;
use thiserror::Error;

const HOME_HTML: &str = include_str!("../templates/home.html");
const LEAF_HTML: &str = include_str!("../templates/leaf.html");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Home,
    Leaf,
}

impl Template {
    pub fn name(self) -> &'static str {
        match self {
            Self::Home => "home.html",
            Self::Leaf => "leaf.html",
        }
    }
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),
}

pub trait Renderer: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`RenderError`] if `data` does not fit `template`.
    fn render(&self, template: Template, data: &Value) -> Result<String, RenderError>;
}

impl<T: Renderer + ?Sized> Renderer for std::sync::Arc<T> {
    fn render(&self, template: Template, data: &Value) -> Result<String, RenderError> {
        (**self).render(template, data)
    }
}

/// Jinja renderer over the built-in home and leaf templates.
///
/// Output is HTML auto-escaped, and any field a template references but
/// the data lacks is an error rather than an empty string.
#[derive(Debug, Clone)]
pub struct TemplateHtml {
    env: Environment<'static>,
}

impl TemplateHtml {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_loader(|name| {
            Ok(match name {
                "home.html" => Some(HOME_HTML.to_string()),
                "leaf.html" => Some(LEAF_HTML.to_string()),
                _ => None,
            })
        });
        Self { env }
    }
}

impl Default for TemplateHtml {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for TemplateHtml {
    fn render(&self, template: Template, data: &Value) -> Result<String, RenderError> {
        let tmpl = self.env.get_template(template.name())?;
        Ok(tmpl.render(data)?)
    }
}
