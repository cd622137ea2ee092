//! portcullis-core: the login flow model.
//!
//! Flows are directed graphs of states (action, view, subflow, end) whose
//! transitions are keyed by named outcomes. They are assembled once at
//! startup by [`FlowBuilder`]s driven from [`FlowConfigurer`]s, validated
//! into immutable [`Flow`]s, and shared through a [`FlowRegistry`].
//!
//! # Public API
//!
//! - [`FlowInitializer`] -- run configurers, validate, register
//! - [`FlowBuilder`] / [`BuilderServices`] -- builder primitives
//! - [`Flow`], [`State`], [`StateKind`], [`Transition`] -- the built graph
//! - [`RequestContext`] -- execution-scoped data for one login attempt
//! - [`Action`], [`Event`], [`ActionError`] -- the action contract
//! - [`FlowDefinition`] / [`DefinitionConfigurer`] -- JSON flow definitions

pub mod action;
pub mod builder;
pub mod configurer;
pub mod context;
pub mod convert;
pub mod credential;
pub mod definition;
pub mod error;
pub mod expr;
pub mod failure;
pub mod flow;
pub mod mapping;
pub mod registry;
pub mod state;
pub mod transition;
pub mod validate;
pub mod view;

// ── Convenience re-exports: model ────────────────────────────────────

pub use action::{action_fn, events, Action, ActionRef, ActionRegistry, Event};
pub use context::{
    AttributeMap, ExternalContext, ExternalRequest, ExternalResponse, FlowSession, RequestContext,
};
pub use credential::{Credential, Principal, SpnegoCredential};
pub use error::{BuildErrors, ConfigError};
pub use failure::{ActionError, FailureKind};
pub use flow::{Flow, FlowSummary};
pub use mapping::{Mapper, Mapping, MappingError, MappingErrors, SubflowAttributeMapper};
pub use state::{ActionChainPolicy, State, StateIdx, StateKind};
pub use transition::{ExceptionHandler, Transition, TransitionCriteria};
pub use view::{RenderedView, TemplateViewFactory, View, ViewFactory};

// ── Convenience re-exports: assembly ─────────────────────────────────

pub use builder::{BuilderServices, FlowBuilder};
pub use configurer::{FlowConfigurer, FlowDrafts, FlowInitializer, FLOW_ID_LOGIN, FLOW_ID_LOGOUT};
pub use definition::{DefinitionConfigurer, FlowDefinition};
pub use registry::FlowRegistry;
