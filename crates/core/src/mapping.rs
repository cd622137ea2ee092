//! Attribute mapping across a subflow boundary.
//!
//! The input mapper builds the child flow's initial scope from the parent's
//! request context. The output mapper copies values from the child's final
//! scope back into the parent. Either direction collects every failing
//! mapping before reporting.

use std::fmt;

use serde_json::Value;

use crate::context::{AttributeMap, RequestContext};
use crate::convert::{ConversionError, ValueType};
use crate::expr::{ExprError, Expression};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("required value '{source_expr}' for '{target}' did not resolve")]
    RequiredValueMissing { source_expr: String, target: String },

    #[error("value of '{source_expr}' for '{target}' could not be converted: {error}")]
    TypeConversion {
        source_expr: String,
        target: String,
        error: ConversionError,
    },

    #[error("could not assign '{target}': {error}")]
    Target { target: String, error: ExprError },
}

/// All mapping failures of one direction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingErrors(Vec<MappingError>);

impl MappingErrors {
    pub fn iter(&self) -> std::slice::Iter<'_, MappingError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<MappingError> {
        self.0
    }
}

impl fmt::Display for MappingErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&messages.join("; "))
    }
}

impl std::error::Error for MappingErrors {}

// ──────────────────────────────────────────────
// Mapping
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    source: Expression,
    target: Expression,
    required: bool,
    value_type: Option<ValueType>,
}

impl Mapping {
    pub fn new(source: Expression, target: Expression) -> Self {
        Mapping {
            source,
            target,
            required: false,
            value_type: None,
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_type(mut self, value_type: Option<ValueType>) -> Self {
        self.value_type = value_type;
        self
    }

    pub fn source(&self) -> &Expression {
        &self.source
    }

    pub fn target(&self) -> &Expression {
        &self.target
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn value_type(&self) -> Option<ValueType> {
        self.value_type
    }

    fn apply<R, W>(&self, read: R, write: &mut W) -> Result<(), MappingError>
    where
        R: Fn(&Expression) -> Option<Value>,
        W: FnMut(&Expression, Value) -> Result<(), ExprError>,
    {
        let Some(mut value) = read(&self.source).filter(|v| !v.is_null()) else {
            if self.required {
                return Err(MappingError::RequiredValueMissing {
                    source_expr: self.source.to_string(),
                    target: self.target.to_string(),
                });
            }
            return Ok(());
        };
        if let Some(ty) = self.value_type {
            value = ty.convert(value).map_err(|error| MappingError::TypeConversion {
                source_expr: self.source.to_string(),
                target: self.target.to_string(),
                error,
            })?;
        }
        write(&self.target, value).map_err(|error| MappingError::Target {
            target: self.target.to_string(),
            error,
        })
    }
}

// ──────────────────────────────────────────────
// Mapper
// ──────────────────────────────────────────────

/// An ordered list of mappings applied as a unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mapper {
    mappings: Vec<Mapping>,
}

impl Mapper {
    pub fn new(mappings: Vec<Mapping>) -> Self {
        Mapper { mappings }
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    /// Build a fresh attribute map from the parent request context.
    pub fn map_input(&self, ctx: &RequestContext) -> Result<AttributeMap, MappingErrors> {
        let mut out = AttributeMap::new();
        let mut write = |target: &Expression, value: Value| target.assign_in(&mut out, value);
        let errors: Vec<MappingError> = self
            .mappings
            .iter()
            .filter_map(|m| m.apply(|source| source.evaluate(ctx), &mut write).err())
            .collect();
        if errors.is_empty() {
            Ok(out)
        } else {
            Err(MappingErrors(errors))
        }
    }

    /// Copy values from a finished subflow's scope into `ctx`.
    pub fn map_output(
        &self,
        output: &AttributeMap,
        ctx: &mut RequestContext,
    ) -> Result<(), MappingErrors> {
        let mut write = |target: &Expression, value: Value| target.assign(ctx, value);
        let errors: Vec<MappingError> = self
            .mappings
            .iter()
            .filter_map(|m| m.apply(|source| source.evaluate_in(output), &mut write).err())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(MappingErrors(errors))
        }
    }
}

/// The input/output contract a subflow state consults on entry and exit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubflowAttributeMapper {
    input: Option<Mapper>,
    output: Option<Mapper>,
}

impl SubflowAttributeMapper {
    pub fn new(input: Option<Mapper>, output: Option<Mapper>) -> Self {
        SubflowAttributeMapper { input, output }
    }

    pub fn input(&self) -> Option<&Mapper> {
        self.input.as_ref()
    }

    pub fn output(&self) -> Option<&Mapper> {
        self.output.as_ref()
    }

    pub fn create_subflow_input(&self, ctx: &RequestContext) -> Result<AttributeMap, MappingErrors> {
        match &self.input {
            Some(mapper) => mapper.map_input(ctx),
            None => Ok(AttributeMap::new()),
        }
    }

    pub fn map_subflow_output(
        &self,
        output: &AttributeMap,
        ctx: &mut RequestContext,
    ) -> Result<(), MappingErrors> {
        match &self.output {
            Some(mapper) => mapper.map_output(output, ctx),
            None => Ok(()),
        }
    }
}
