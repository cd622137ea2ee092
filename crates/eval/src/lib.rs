//! Portcullis flow executor -- walks registered login flows for one
//! request at a time.
//!
//! The executor consumes flows built by `portcullis-core`, runs state
//! actions against an execution-owned request context, routes failures
//! through exception handlers, and crosses subflow boundaries with their
//! attribute mappers.

pub mod error;
pub mod executor;

pub use error::{ExecutionError, MappingDirection};
pub use executor::{
    ExecutionStatus, FlowExecution, FlowExecutor, StepRecord, DEFAULT_MAX_STEPS, FAILURE_ATTRIBUTE,
};
