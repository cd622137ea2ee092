//! A deliberately small expression language for reading and writing
//! request-context attributes.
//!
//! Supported forms, optionally wrapped in `${...}`:
//! - literals: `'text'`, `"text"`, `true`, `false`, `null`, numbers
//! - attribute paths: `credential.username`, `flowScope.service`,
//!   `requestParameters.ticket`
//!
//! An unscoped path is resolved against request, flash, flow and
//! conversation scope in that order. Assignment without a scope writes to
//! flow scope.

use std::fmt;

use serde_json::{Number, Value};

use crate::context::{AttributeMap, RequestContext};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExprError {
    #[error("empty expression")]
    Empty,

    #[error("invalid expression '{source_text}': {message}")]
    Syntax {
        source_text: String,
        message: String,
    },

    #[error("expression '{0}' cannot be assigned to")]
    NotAssignable(String),

    #[error("cannot assign '{expression}': '{segment}' is not an object")]
    PathConflict { expression: String, segment: String },

    #[error("cannot assign '{0}' to flow scope outside of an active flow")]
    NoActiveFlow(String),
}

// ──────────────────────────────────────────────
// Scopes
// ──────────────────────────────────────────────

/// Attribute scopes addressable by an expression prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Request,
    Flash,
    Flow,
    Conversation,
    RequestParameters,
}

impl Scope {
    /// Search order for unscoped reads.
    pub const IMPLICIT: [Scope; 4] = [Scope::Request, Scope::Flash, Scope::Flow, Scope::Conversation];

    pub fn prefix(self) -> &'static str {
        match self {
            Scope::Request => "requestScope",
            Scope::Flash => "flashScope",
            Scope::Flow => "flowScope",
            Scope::Conversation => "conversationScope",
            Scope::RequestParameters => "requestParameters",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Scope> {
        match prefix {
            "requestScope" => Some(Scope::Request),
            "flashScope" => Some(Scope::Flash),
            "flowScope" => Some(Scope::Flow),
            "conversationScope" => Some(Scope::Conversation),
            "requestParameters" => Some(Scope::RequestParameters),
            _ => None,
        }
    }
}

// ──────────────────────────────────────────────
// Expression
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum ExpressionKind {
    Literal(Value),
    Attribute { scope: Option<Scope>, path: Vec<String> },
}

/// A parsed expression. Parsing happens once, at build time.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    kind: ExpressionKind,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Expression, ExprError> {
        let trimmed = source.trim();
        let body = trimmed
            .strip_prefix("${")
            .and_then(|rest| rest.strip_suffix('}'))
            .unwrap_or(trimmed)
            .trim();
        if body.is_empty() {
            return Err(ExprError::Empty);
        }
        let syntax = |message: &str| ExprError::Syntax {
            source_text: source.to_string(),
            message: message.to_string(),
        };

        let kind = if let Some(quote) = body.chars().next().filter(|c| *c == '\'' || *c == '"') {
            let inner = body
                .strip_prefix(quote)
                .and_then(|rest| rest.strip_suffix(quote))
                .ok_or_else(|| syntax("unterminated string literal"))?;
            if inner.contains(quote) {
                return Err(syntax("unexpected quote inside string literal"));
            }
            ExpressionKind::Literal(Value::String(inner.to_string()))
        } else if let Some(literal) = keyword_literal(body) {
            ExpressionKind::Literal(literal)
        } else if body.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
            ExpressionKind::Literal(parse_number(body).ok_or_else(|| syntax("invalid number"))?)
        } else {
            let mut segments: Vec<String> = Vec::new();
            for segment in body.split('.') {
                if !is_segment(segment) {
                    return Err(syntax(&format!("invalid path segment '{}'", segment)));
                }
                segments.push(segment.to_string());
            }
            let scope = Scope::from_prefix(&segments[0]);
            if scope.is_some() {
                segments.remove(0);
            }
            ExpressionKind::Attribute {
                scope,
                path: segments,
            }
        };

        Ok(Expression {
            source: source.to_string(),
            kind,
        })
    }

    /// An expression that always evaluates to `value`.
    pub fn literal(value: Value) -> Expression {
        Expression {
            source: value.to_string(),
            kind: ExpressionKind::Literal(value),
        }
    }

    pub fn expression_string(&self) -> &str {
        &self.source
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.kind, ExpressionKind::Literal(_))
    }

    /// Read the value this expression denotes in `ctx`.
    pub fn evaluate(&self, ctx: &RequestContext) -> Option<Value> {
        match &self.kind {
            ExpressionKind::Literal(value) => Some(value.clone()),
            ExpressionKind::Attribute {
                scope: Some(Scope::RequestParameters),
                path,
            } => {
                let parameters = &ctx.external().request.parameters;
                match path.as_slice() {
                    [] => Some(Value::Object(
                        parameters
                            .iter()
                            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                            .collect(),
                    )),
                    [name] => parameters.get(name).cloned().map(Value::String),
                    _ => None,
                }
            }
            ExpressionKind::Attribute {
                scope: Some(scope),
                path,
            } => ctx.scope(*scope).and_then(|map| lookup(map, path)),
            ExpressionKind::Attribute { scope: None, path } => Scope::IMPLICIT
                .iter()
                .filter_map(|scope| ctx.scope(*scope))
                .find_map(|map| lookup(map, path)),
        }
    }

    /// Read against a bare attribute map; any scope prefix is ignored.
    pub fn evaluate_in(&self, map: &AttributeMap) -> Option<Value> {
        match &self.kind {
            ExpressionKind::Literal(value) => Some(value.clone()),
            ExpressionKind::Attribute { path, .. } => lookup(map, path),
        }
    }

    /// Write `value` at the location this expression denotes in `ctx`.
    pub fn assign(&self, ctx: &mut RequestContext, value: Value) -> Result<(), ExprError> {
        let (scope, path) = match &self.kind {
            ExpressionKind::Literal(_)
            | ExpressionKind::Attribute {
                scope: Some(Scope::RequestParameters),
                ..
            } => return Err(ExprError::NotAssignable(self.source.clone())),
            ExpressionKind::Attribute { scope, path } => (scope.unwrap_or(Scope::Flow), path),
        };
        let map = ctx
            .scope_mut(scope)
            .ok_or_else(|| ExprError::NoActiveFlow(self.source.clone()))?;
        assign_path(map, path, value, &self.source)
    }

    /// Write against a bare attribute map; any scope prefix is ignored.
    pub fn assign_in(&self, map: &mut AttributeMap, value: Value) -> Result<(), ExprError> {
        match &self.kind {
            ExpressionKind::Literal(_) => Err(ExprError::NotAssignable(self.source.clone())),
            ExpressionKind::Attribute { path, .. } => assign_path(map, path, value, &self.source),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn keyword_literal(body: &str) -> Option<Value> {
    match body {
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        "null" => Some(Value::Null),
        _ => None,
    }
}

fn parse_number(body: &str) -> Option<Value> {
    if let Ok(i) = body.parse::<i64>() {
        return Some(Value::Number(Number::from(i)));
    }
    body.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

fn is_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn lookup(map: &AttributeMap, path: &[String]) -> Option<Value> {
    let Some((first, rest)) = path.split_first() else {
        return Some(Value::Object(map.clone()));
    };
    let mut current = map.get(first)?;
    for segment in rest {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

fn assign_path(
    map: &mut AttributeMap,
    path: &[String],
    value: Value,
    source: &str,
) -> Result<(), ExprError> {
    let Some((last, parents)) = path.split_last() else {
        return Err(ExprError::NotAssignable(source.to_string()));
    };
    let mut current = map;
    for segment in parents {
        let slot = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(AttributeMap::new()));
        current = match slot {
            Value::Object(inner) => inner,
            _ => {
                return Err(ExprError::PathConflict {
                    expression: source.to_string(),
                    segment: segment.clone(),
                })
            }
        };
    }
    current.insert(last.clone(), value);
    Ok(())
}
