use std::fmt;

use portcullis_core::{ActionError, MappingErrors};

/// Which side of a subflow boundary a mapping failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingDirection {
    Input,
    Output,
}

impl fmt::Display for MappingDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingDirection::Input => f.write_str("input"),
            MappingDirection::Output => f.write_str("output"),
        }
    }
}

/// Errors that end an execution instead of being routed to a state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    UnknownFlow {
        flow_id: String,
    },
    SubflowNotFound {
        flow_id: String,
        state_id: String,
        subflow_id: String,
    },
    /// A required subflow mapping did not resolve, or a value could not be
    /// converted or assigned. Never routed to exception handlers.
    AttributeMapping {
        flow_id: String,
        state_id: String,
        direction: MappingDirection,
        errors: MappingErrors,
    },
    /// No exception handler on the session stack accepted the failure.
    Unhandled {
        flow_id: String,
        state_id: String,
        failure: ActionError,
    },
    StepLimitExceeded {
        limit: usize,
    },
    NotResumable,
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::UnknownFlow { flow_id } => {
                write!(f, "flow '{}' is not registered", flow_id)
            }
            ExecutionError::SubflowNotFound {
                flow_id,
                state_id,
                subflow_id,
            } => write!(
                f,
                "subflow state '{}' in flow '{}' references unregistered flow '{}'",
                state_id, flow_id, subflow_id
            ),
            ExecutionError::AttributeMapping {
                flow_id,
                state_id,
                direction,
                errors,
            } => write!(
                f,
                "{} mapping failed at subflow state '{}' in flow '{}': {}",
                direction, state_id, flow_id, errors
            ),
            ExecutionError::Unhandled {
                flow_id,
                state_id,
                failure,
            } => write!(
                f,
                "unhandled failure in state '{}' of flow '{}': {}",
                state_id, flow_id, failure
            ),
            ExecutionError::StepLimitExceeded { limit } => {
                write!(f, "exceeded maximum transition count ({})", limit)
            }
            ExecutionError::NotResumable => {
                write!(f, "execution is not paused and cannot be resumed")
            }
        }
    }
}

impl std::error::Error for ExecutionError {}
