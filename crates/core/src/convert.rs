//! Conversion facade: type aliases, value coercion, and the string forms
//! accepted for state targets and failure kinds.
//!
//! Everything here resolves against a closed table built at startup. There
//! is no lookup by arbitrary type name at run time.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Number, Value};

use crate::failure::FailureKind;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    #[error("unknown type alias '{0}'")]
    UnknownAlias(String),

    #[error("unknown failure kind '{0}'")]
    UnknownFailureKind(String),

    #[error("'{0}' is not a valid state id")]
    InvalidStateId(String),

    #[error("cannot convert {value} to {target}")]
    Incompatible { value: String, target: ValueType },
}

// ──────────────────────────────────────────────
// ValueType
// ──────────────────────────────────────────────

/// The target of a typed attribute mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    String,
    Boolean,
    Integer,
    Float,
    Object,
    List,
    Any,
}

impl ValueType {
    /// Built-in aliases. Custom aliases live on [`ConversionService`].
    pub fn from_alias(alias: &str) -> Option<ValueType> {
        let ty = match alias.to_ascii_lowercase().as_str() {
            "string" | "str" | "text" => ValueType::String,
            "boolean" | "bool" => ValueType::Boolean,
            "integer" | "int" | "long" | "short" => ValueType::Integer,
            "float" | "double" | "decimal" | "number" => ValueType::Float,
            "object" | "map" => ValueType::Object,
            "list" | "array" => ValueType::List,
            "any" | "value" => ValueType::Any,
            _ => return None,
        };
        Some(ty)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Boolean => "boolean",
            ValueType::Integer => "integer",
            ValueType::Float => "float",
            ValueType::Object => "object",
            ValueType::List => "list",
            ValueType::Any => "any",
        }
    }

    /// Coerce `value` into this type.
    pub fn convert(self, value: Value) -> Result<Value, ConversionError> {
        let incompatible = |value: &Value| ConversionError::Incompatible {
            value: value.to_string(),
            target: self,
        };
        match self {
            ValueType::Any => Ok(value),
            ValueType::String => match value {
                Value::String(_) => Ok(value),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                other => Err(incompatible(&other)),
            },
            ValueType::Boolean => match &value {
                Value::Bool(_) => Ok(value),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" | "on" | "1" => Ok(Value::Bool(true)),
                    "false" | "no" | "off" | "0" => Ok(Value::Bool(false)),
                    _ => Err(incompatible(&value)),
                },
                _ => Err(incompatible(&value)),
            },
            ValueType::Integer => match &value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value),
                Value::Number(n) => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        Ok(Value::Number(Number::from(f as i64)))
                    }
                    _ => Err(incompatible(&value)),
                },
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(|i| Value::Number(Number::from(i)))
                    .map_err(|_| incompatible(&value)),
                _ => Err(incompatible(&value)),
            },
            ValueType::Float => match &value {
                Value::Number(_) => Ok(value),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| incompatible(&value)),
                _ => Err(incompatible(&value)),
            },
            ValueType::Object => match value {
                Value::Object(_) => Ok(value),
                other => Err(incompatible(&other)),
            },
            ValueType::List => match value {
                Value::Array(_) => Ok(value),
                other => Err(incompatible(&other)),
            },
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True for ids made of ASCII letters, digits, `_`, `-` and `.`, starting
/// with a letter or `_`.
pub fn is_valid_identifier(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

// ──────────────────────────────────────────────
// ConversionService
// ──────────────────────────────────────────────

/// Alias table plus the string converters the builder relies on.
#[derive(Debug, Clone, Default)]
pub struct ConversionService {
    aliases: BTreeMap<String, ValueType>,
}

impl ConversionService {
    pub fn new() -> Self {
        ConversionService::default()
    }

    /// Register an extra alias. Custom aliases shadow built-in ones.
    pub fn with_alias(mut self, alias: impl Into<String>, ty: ValueType) -> Self {
        self.aliases.insert(alias.into(), ty);
        self
    }

    pub fn class_for_alias(&self, alias: &str) -> Option<ValueType> {
        self.aliases
            .get(alias)
            .copied()
            .or_else(|| ValueType::from_alias(alias))
    }

    pub fn value_type(&self, alias: &str) -> Result<ValueType, ConversionError> {
        self.class_for_alias(alias)
            .ok_or_else(|| ConversionError::UnknownAlias(alias.to_string()))
    }

    /// Parse the string form of a transition target.
    pub fn target_state(&self, text: &str) -> Result<String, ConversionError> {
        let id = text.trim();
        if is_valid_identifier(id) {
            Ok(id.to_string())
        } else {
            Err(ConversionError::InvalidStateId(text.to_string()))
        }
    }

    pub fn failure_kind(&self, name: &str) -> Result<FailureKind, ConversionError> {
        name.trim().parse()
    }
}
