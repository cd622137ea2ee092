//! View resolution. Template rendering itself belongs to the host; the
//! engine only produces a `RenderedView` naming the template and carrying
//! the model.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::context::{AttributeMap, RequestContext};
use crate::expr::Scope;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ViewError {
    #[error("view id must not be blank")]
    Blank,

    #[error("no template registered for view '{0}'")]
    Unknown(String),
}

/// A view ready for the transport to render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedView {
    pub view_id: String,
    pub template: String,
    pub model: AttributeMap,
}

pub trait View: Send + Sync {
    fn view_id(&self) -> &str;

    fn render(&self, ctx: &RequestContext) -> RenderedView;
}

impl fmt::Debug for dyn View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "View({})", self.view_id())
    }
}

/// Resolves view ids while flows are built.
pub trait ViewFactory: Send + Sync {
    fn create_view(&self, view_id: &str) -> Result<Arc<dyn View>, ViewError>;
}

/// A view bound to a template name. The model is every scope merged,
/// narrower scopes overriding wider ones.
#[derive(Debug, Clone)]
pub struct TemplateView {
    view_id: String,
    template: String,
}

impl TemplateView {
    pub fn new(view_id: impl Into<String>, template: impl Into<String>) -> Self {
        TemplateView {
            view_id: view_id.into(),
            template: template.into(),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }
}

impl View for TemplateView {
    fn view_id(&self) -> &str {
        &self.view_id
    }

    fn render(&self, ctx: &RequestContext) -> RenderedView {
        let mut model = AttributeMap::new();
        for scope in [Scope::Conversation, Scope::Flow, Scope::Flash, Scope::Request] {
            if let Some(map) = ctx.scope(scope) {
                model.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        if let Some(principal) = ctx.principal() {
            model.insert("principal".into(), principal.id.clone().into());
        }
        RenderedView {
            view_id: self.view_id.clone(),
            template: self.template.clone(),
            model,
        }
    }
}

/// Maps view ids to template names. A permissive factory accepts any
/// non-blank id and uses it as the template name.
#[derive(Debug, Clone, Default)]
pub struct TemplateViewFactory {
    templates: BTreeMap<String, String>,
    permissive: bool,
}

impl TemplateViewFactory {
    pub fn permissive() -> Self {
        TemplateViewFactory {
            templates: BTreeMap::new(),
            permissive: true,
        }
    }

    pub fn strict() -> Self {
        TemplateViewFactory::default()
    }

    pub fn with_template(mut self, view_id: impl Into<String>, template: impl Into<String>) -> Self {
        self.templates.insert(view_id.into(), template.into());
        self
    }
}

impl ViewFactory for TemplateViewFactory {
    fn create_view(&self, view_id: &str) -> Result<Arc<dyn View>, ViewError> {
        if view_id.trim().is_empty() {
            return Err(ViewError::Blank);
        }
        let template = match self.templates.get(view_id) {
            Some(template) => template.clone(),
            None if self.permissive => view_id.to_string(),
            None => return Err(ViewError::Unknown(view_id.to_string())),
        };
        Ok(Arc::new(TemplateView::new(view_id, template)))
    }
}
