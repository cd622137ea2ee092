//! The action contract and the built-in actions the builder can create.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::context::RequestContext;
use crate::convert::ValueType;
use crate::error::ConfigError;
use crate::expr::Expression;
use crate::failure::ActionError;
use crate::view::View;

/// Well-known event ids.
pub mod events {
    pub const SUCCESS: &str = "success";
    pub const ERROR: &str = "error";
    pub const WARN: &str = "warn";
    pub const YES: &str = "yes";
    pub const NO: &str = "no";
    pub const SUBMIT: &str = "submit";
}

/// The named outcome of executing an action.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Event {
    id: String,
}

impl Event {
    pub fn new(id: impl Into<String>) -> Self {
        Event { id: id.into() }
    }

    pub fn success() -> Self {
        Event::new(events::SUCCESS)
    }

    pub fn error() -> Self {
        Event::new(events::ERROR)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is(&self, id: &str) -> bool {
        self.id == id
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl From<&str> for Event {
    fn from(id: &str) -> Self {
        Event::new(id)
    }
}

impl From<String> for Event {
    fn from(id: String) -> Self {
        Event { id }
    }
}

// ──────────────────────────────────────────────
// Action contract
// ──────────────────────────────────────────────

/// Executable logic attached to a state. Actions are shared across
/// concurrent executions and must not keep per-request state.
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    fn execute(&self, ctx: &mut RequestContext) -> Result<Event, ActionError>;
}

pub type ActionRef = Arc<dyn Action>;

impl fmt::Debug for dyn Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action({})", self.name())
    }
}

/// An action backed by a closure.
pub struct FnAction<F> {
    name: String,
    f: F,
}

impl<F> Action for FnAction<F>
where
    F: Fn(&mut RequestContext) -> Result<Event, ActionError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, ctx: &mut RequestContext) -> Result<Event, ActionError> {
        (self.f)(ctx)
    }
}

pub fn action_fn<F>(name: impl Into<String>, f: F) -> ActionRef
where
    F: Fn(&mut RequestContext) -> Result<Event, ActionError> + Send + Sync + 'static,
{
    Arc::new(FnAction {
        name: name.into(),
        f,
    })
}

// ──────────────────────────────────────────────
// Built-in actions
// ──────────────────────────────────────────────

/// Evaluates an expression and signals an event derived from its value:
/// booleans become `yes`/`no`, strings are used as the event id, anything
/// else is `success`.
#[derive(Debug, Clone)]
pub struct EvaluateAction {
    expression: Expression,
    result: Option<Expression>,
}

impl EvaluateAction {
    pub fn new(expression: Expression) -> Self {
        EvaluateAction {
            expression,
            result: None,
        }
    }

    /// Also store the value at `result`.
    pub fn with_result(mut self, result: Expression) -> Self {
        self.result = Some(result);
        self
    }
}

impl Action for EvaluateAction {
    fn name(&self) -> &str {
        self.expression.expression_string()
    }

    fn execute(&self, ctx: &mut RequestContext) -> Result<Event, ActionError> {
        let value = self.expression.evaluate(ctx).unwrap_or(Value::Null);
        if let Some(result) = &self.result {
            result
                .assign(ctx, value.clone())
                .map_err(|e| ActionError::internal(e.to_string()))?;
        }
        let event = match &value {
            Value::Bool(true) => Event::new(events::YES),
            Value::Bool(false) => Event::new(events::NO),
            Value::String(id) if !id.is_empty() => Event::new(id.as_str()),
            _ => Event::success(),
        };
        Ok(event)
    }
}

/// Assigns the value of one expression to another, optionally converting it.
#[derive(Debug, Clone)]
pub struct SetAction {
    target: Expression,
    value: Expression,
    value_type: Option<ValueType>,
}

impl SetAction {
    pub fn new(target: Expression, value: Expression, value_type: Option<ValueType>) -> Self {
        SetAction {
            target,
            value,
            value_type,
        }
    }
}

impl Action for SetAction {
    fn name(&self) -> &str {
        self.target.expression_string()
    }

    fn execute(&self, ctx: &mut RequestContext) -> Result<Event, ActionError> {
        let mut value = self.value.evaluate(ctx).unwrap_or(Value::Null);
        if let Some(ty) = self.value_type {
            value = ty
                .convert(value)
                .map_err(|e| ActionError::internal(e.to_string()))?;
        }
        self.target
            .assign(ctx, value)
            .map_err(|e| ActionError::internal(e.to_string()))?;
        Ok(Event::success())
    }
}

/// Renders a view into the response. Used as an end state's final response.
pub struct RenderViewAction {
    name: String,
    view: Arc<dyn View>,
}

impl RenderViewAction {
    pub fn new(view: Arc<dyn View>) -> Self {
        RenderViewAction {
            name: format!("render:{}", view.view_id()),
            view,
        }
    }

    pub fn view(&self) -> &Arc<dyn View> {
        &self.view
    }
}

impl Action for RenderViewAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, ctx: &mut RequestContext) -> Result<Event, ActionError> {
        let rendered = self.view.render(ctx);
        ctx.response_mut().view = Some(rendered);
        Ok(Event::success())
    }
}

// ──────────────────────────────────────────────
// ActionRegistry
// ──────────────────────────────────────────────

type ActionFactory = Arc<dyn Fn() -> ActionRef + Send + Sync>;

/// Named action factories. Flow definitions refer to actions by these
/// names, and every name is resolved while the flow is built.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    factories: BTreeMap<String, ActionFactory>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        ActionRegistry::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> ActionRef + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Register a shared instance under its own name.
    pub fn register_instance(&mut self, action: ActionRef) {
        let name = action.name().to_string();
        self.factories.insert(name, Arc::new(move || Arc::clone(&action)));
    }

    pub fn resolve(&self, name: &str) -> Result<ActionRef, ConfigError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| ConfigError::UnknownAction {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ExternalContext, ExternalRequest};
    use crate::expr::Scope;
    use serde_json::json;

    fn context() -> RequestContext {
        RequestContext::new(ExternalContext::new(
            ExternalRequest::new().with_parameter("renew", "true"),
        ))
    }

    #[test]
    fn evaluate_maps_booleans_to_yes_and_no() {
        let mut ctx = context();
        ctx.scope_mut(Scope::Request)
            .unwrap()
            .insert("gateway".into(), json!(false));
        let action = EvaluateAction::new(Expression::parse("requestScope.gateway").unwrap());
        assert_eq!(action.execute(&mut ctx).unwrap(), Event::new("no"));

        let action = EvaluateAction::new(Expression::parse("true").unwrap());
        assert_eq!(action.execute(&mut ctx).unwrap(), Event::new("yes"));
    }

    #[test]
    fn evaluate_uses_strings_as_event_ids() {
        let mut ctx = context();
        let action = EvaluateAction::new(Expression::parse("'warn'").unwrap())
            .with_result(Expression::parse("requestScope.outcome").unwrap());
        assert_eq!(action.execute(&mut ctx).unwrap(), Event::new("warn"));
        assert_eq!(
            ctx.scope(Scope::Request).unwrap().get("outcome"),
            Some(&json!("warn"))
        );
    }

    #[test]
    fn set_converts_before_assigning() {
        let mut ctx = context();
        let action = SetAction::new(
            Expression::parse("requestScope.renew").unwrap(),
            Expression::parse("requestParameters.renew").unwrap(),
            Some(ValueType::Boolean),
        );
        assert_eq!(action.execute(&mut ctx).unwrap(), Event::success());
        assert_eq!(ctx.scope(Scope::Request).unwrap().get("renew"), Some(&json!(true)));
    }

    #[test]
    fn registry_resolves_known_names_only() {
        let mut registry = ActionRegistry::new();
        registry.register_instance(action_fn("noop", |_| Ok(Event::success())));
        assert_eq!(registry.resolve("noop").unwrap().name(), "noop");
        assert_eq!(
            registry.resolve("missing").unwrap_err(),
            ConfigError::UnknownAction {
                name: "missing".to_string()
            }
        );
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["noop"]);
    }
}
