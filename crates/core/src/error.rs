//! Configuration errors reported while flows are assembled and validated.

use std::fmt;

use crate::convert::ConversionError;
use crate::expr::ExprError;

/// A single problem found while building a flow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("flow '{flow_id}' already declares state '{state_id}'")]
    DuplicateState { flow_id: String, state_id: String },

    #[error("flow '{flow_id}' has no start state")]
    MissingStartState { flow_id: String },

    #[error("start state '{state_id}' is not declared in flow '{flow_id}'")]
    UnknownStartState { flow_id: String, state_id: String },

    #[error("{field} in flow '{flow_id}' targets undeclared state '{target}'")]
    DanglingTarget {
        flow_id: String,
        field: String,
        target: String,
    },

    #[error("state '{state_id}' is not declared in flow '{flow_id}'")]
    StateNotFound { flow_id: String, state_id: String },

    #[error("state '{state_id}' in flow '{flow_id}' is not {expected} state")]
    WrongStateKind {
        flow_id: String,
        state_id: String,
        expected: &'static str,
    },

    #[error("action state '{state_id}' in flow '{flow_id}' has no actions")]
    EmptyActionState { flow_id: String, state_id: String },

    #[error("subflow state '{state_id}' in flow '{flow_id}' references unknown flow '{subflow_id}'")]
    UnknownSubflow {
        flow_id: String,
        state_id: String,
        subflow_id: String,
    },

    #[error("flow '{flow_id}' is not registered")]
    UnknownFlow { flow_id: String },

    #[error(transparent)]
    Expression(#[from] ExprError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("no action registered under '{name}'")]
    UnknownAction { name: String },

    #[error("view '{view_id}' could not be resolved: {message}")]
    View { view_id: String, message: String },
}

/// Every configuration error found in one build pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildErrors(Vec<ConfigError>);

impl BuildErrors {
    pub fn new(errors: Vec<ConfigError>) -> Self {
        BuildErrors(errors)
    }

    pub fn push(&mut self, error: ConfigError) {
        self.0.push(error);
    }

    pub fn extend(&mut self, other: BuildErrors) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConfigError> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<ConfigError> {
        self.0
    }

    /// `Ok(value)` when nothing was collected.
    pub fn into_result<T>(self, value: T) -> Result<T, BuildErrors> {
        if self.0.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for BuildErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} configuration error(s)", self.0.len())?;
        for error in &self.0 {
            write!(f, "\n  - {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for BuildErrors {}

impl From<ConfigError> for BuildErrors {
    fn from(error: ConfigError) -> Self {
        BuildErrors(vec![error])
    }
}

impl IntoIterator for BuildErrors {
    type Item = ConfigError;
    type IntoIter = std::vec::IntoIter<ConfigError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a BuildErrors {
    type Item = &'a ConfigError;
    type IntoIter = std::slice::Iter<'a, ConfigError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
