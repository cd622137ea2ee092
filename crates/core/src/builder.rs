//! Builder primitives for assembling a flow.
//!
//! A `FlowBuilder` is a mutable draft of one flow. Targets are plain state
//! ids here and may name states that do not exist yet; `build()` runs the
//! validation pass that resolves them. Every primitive returns a
//! `Result` so callers can collect configuration errors instead of
//! producing a half-built flow.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use crate::action::{ActionRef, ActionRegistry, EvaluateAction, RenderViewAction, SetAction};
use crate::convert::ConversionService;
use crate::error::{BuildErrors, ConfigError};
use crate::expr::Expression;
use crate::failure::FailureKind;
use crate::flow::Flow;
use crate::mapping::{Mapper, Mapping, SubflowAttributeMapper};
use crate::state::{ActionChainPolicy, StateDef, StateKind};
use crate::transition::{ExceptionHandlerDef, TransitionDef};
use crate::validate::validate_flow;
use crate::view::{View, ViewFactory};

// ──────────────────────────────────────────────
// BuilderServices
// ──────────────────────────────────────────────

/// Collaborators every builder needs, passed in explicitly.
#[derive(Clone)]
pub struct BuilderServices {
    conversion: ConversionService,
    actions: Arc<ActionRegistry>,
    views: Arc<dyn ViewFactory>,
}

impl BuilderServices {
    pub fn new(actions: ActionRegistry, views: Arc<dyn ViewFactory>) -> Self {
        BuilderServices {
            conversion: ConversionService::new(),
            actions: Arc::new(actions),
            views,
        }
    }

    pub fn with_conversion(mut self, conversion: ConversionService) -> Self {
        self.conversion = conversion;
        self
    }

    pub fn conversion(&self) -> &ConversionService {
        &self.conversion
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn resolve_action(&self, name: &str) -> Result<ActionRef, ConfigError> {
        self.actions.resolve(name)
    }

    pub fn create_evaluate_action(
        &self,
        expression: &str,
        result: Option<&str>,
    ) -> Result<ActionRef, ConfigError> {
        let mut action = EvaluateAction::new(Expression::parse(expression)?);
        if let Some(result) = result {
            action = action.with_result(Expression::parse(result)?);
        }
        Ok(Arc::new(action))
    }

    pub fn create_set_action(
        &self,
        target: &str,
        value: &str,
        type_alias: Option<&str>,
    ) -> Result<ActionRef, ConfigError> {
        let value_type = type_alias
            .map(|alias| self.conversion.value_type(alias))
            .transpose()?;
        Ok(Arc::new(SetAction::new(
            Expression::parse(target)?,
            Expression::parse(value)?,
            value_type,
        )))
    }

    pub fn create_view(&self, view_id: &str) -> Result<Arc<dyn View>, ConfigError> {
        self.views.create_view(view_id).map_err(|e| ConfigError::View {
            view_id: view_id.to_string(),
            message: e.to_string(),
        })
    }

    pub fn create_transition(
        &self,
        outcome: Option<&str>,
        target: &str,
    ) -> Result<TransitionDef, ConfigError> {
        let target = self.conversion.target_state(target)?;
        Ok(TransitionDef::new(outcome, target))
    }

    /// A mapping from `source` to `target` with optional type conversion.
    pub fn create_mapping(
        &self,
        source: &str,
        target: &str,
        required: bool,
        type_alias: Option<&str>,
    ) -> Result<Mapping, ConfigError> {
        let value_type = type_alias
            .map(|alias| self.conversion.value_type(alias))
            .transpose()?;
        Ok(Mapping::new(Expression::parse(source)?, Expression::parse(target)?)
            .required(required)
            .with_type(value_type))
    }

    /// Maps the parent expression `value` to the subflow attribute `name`.
    pub fn create_mapping_to_subflow_state(
        &self,
        name: &str,
        value: &str,
        required: bool,
        type_alias: Option<&str>,
    ) -> Result<Mapping, ConfigError> {
        self.create_mapping(value, name, required, type_alias)
    }

    pub fn create_mapper_to_subflow_state(&self, mappings: Vec<Mapping>) -> Mapper {
        Mapper::new(mappings)
    }

    pub fn create_subflow_attribute_mapper(
        &self,
        input: Option<Mapper>,
        output: Option<Mapper>,
    ) -> SubflowAttributeMapper {
        SubflowAttributeMapper::new(input, output)
    }
}

impl fmt::Debug for BuilderServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuilderServices")
            .field("conversion", &self.conversion)
            .field("actions", &self.actions)
            .finish_non_exhaustive()
    }
}

// ──────────────────────────────────────────────
// FlowBuilder
// ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FlowBuilder {
    id: String,
    services: Arc<BuilderServices>,
    states: IndexMap<String, StateDef>,
    start: Option<String>,
    global_transitions: Vec<TransitionDef>,
    exception_handlers: Vec<ExceptionHandlerDef>,
}

impl FlowBuilder {
    pub fn new(id: impl Into<String>, services: Arc<BuilderServices>) -> Self {
        FlowBuilder {
            id: id.into(),
            services,
            states: IndexMap::new(),
            start: None,
            global_transitions: Vec::new(),
            exception_handlers: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn services(&self) -> &BuilderServices {
        &self.services
    }

    // ── states ──

    fn add_state(&mut self, id: &str, kind: StateKind) -> Result<&mut StateDef, ConfigError> {
        let id = self.services.conversion.target_state(id)?;
        if self.states.contains_key(&id) {
            return Err(ConfigError::DuplicateState {
                flow_id: self.id.clone(),
                state_id: id,
            });
        }
        debug!(flow = %self.id, state = %id, kind = kind.label(), "created state");
        let (idx, _) = self.states.insert_full(id.clone(), StateDef::new(id, kind));
        Ok(&mut self.states[idx])
    }

    /// An action state running `actions` in order on entry.
    pub fn create_action_state(
        &mut self,
        id: &str,
        actions: Vec<ActionRef>,
    ) -> Result<&mut StateDef, ConfigError> {
        self.add_state(
            id,
            StateKind::Action {
                actions,
                policy: ActionChainPolicy::default(),
            },
        )
    }

    pub fn add_view_state(&mut self, id: &str, view_id: &str) -> Result<&mut StateDef, ConfigError> {
        let view = self.services.create_view(view_id)?;
        self.add_state(id, StateKind::View { view })
    }

    /// An end state, rendering `view_id` as its final response when given.
    pub fn add_end_state(
        &mut self,
        id: &str,
        view_id: Option<&str>,
    ) -> Result<&mut StateDef, ConfigError> {
        let final_response = match view_id {
            Some(view_id) => {
                let view = self.services.create_view(view_id)?;
                Some(Arc::new(RenderViewAction::new(view)) as ActionRef)
            }
            None => None,
        };
        self.add_state(id, StateKind::End { final_response })
    }

    /// A state delegating to the flow registered as `subflow_id`. The
    /// subflow may be registered later; references are checked when flows
    /// are registered.
    pub fn create_subflow_state(
        &mut self,
        id: &str,
        subflow_id: &str,
        entry_action: Option<ActionRef>,
    ) -> Result<&mut StateDef, ConfigError> {
        let subflow_id = self.services.conversion.target_state(subflow_id)?;
        let state = self.add_state(
            id,
            StateKind::Subflow {
                subflow_id,
                mapper: None,
            },
        )?;
        state.entry_actions.extend(entry_action);
        Ok(state)
    }

    pub fn state(&self, id: &str) -> Option<&StateDef> {
        self.states.get(id)
    }

    pub fn state_mut(&mut self, id: &str) -> Option<&mut StateDef> {
        self.states.get_mut(id)
    }

    pub fn contains_state(&self, id: &str) -> bool {
        self.states.contains_key(id)
    }

    pub fn state_ids(&self) -> Vec<&str> {
        self.states.keys().map(String::as_str).collect()
    }

    pub fn states(&self) -> impl Iterator<Item = &StateDef> {
        self.states.values()
    }

    fn existing_state(&mut self, id: &str) -> Result<&mut StateDef, ConfigError> {
        let flow_id = &self.id;
        self.states
            .get_mut(id)
            .ok_or_else(|| ConfigError::StateNotFound {
                flow_id: flow_id.clone(),
                state_id: id.to_string(),
            })
    }

    // ── start state ──

    /// Point the flow's start at `state_id`. The id is checked by `build()`.
    pub fn set_start_state(&mut self, state_id: &str) {
        debug!(flow = %self.id, state = state_id, "set start state");
        self.start = Some(state_id.trim().to_string());
    }

    pub fn start_state(&self) -> Option<&str> {
        self.start.as_deref()
    }

    // ── transitions ──

    pub fn create_transition(
        &self,
        outcome: Option<&str>,
        target: &str,
    ) -> Result<TransitionDef, ConfigError> {
        self.services.create_transition(outcome, target)
    }

    /// Append `transition` to any state that can leave.
    pub fn add_transition(
        &mut self,
        state_id: &str,
        transition: TransitionDef,
    ) -> Result<(), ConfigError> {
        if self.existing_state(state_id)?.is_end() {
            return Err(wrong_kind(&self.id, state_id, "a transitionable"));
        }
        debug!(
            flow = %self.id,
            state = state_id,
            on = %transition.criteria,
            to = %transition.target,
            "added transition"
        );
        if let Some(state) = self.states.get_mut(state_id) {
            state.transitions.push(transition);
        }
        Ok(())
    }

    pub fn add_transition_to_action_state(
        &mut self,
        state_id: &str,
        outcome: Option<&str>,
        target: &str,
    ) -> Result<(), ConfigError> {
        let is_action = matches!(
            self.existing_state(state_id)?.kind,
            StateKind::Action { .. }
        );
        if !is_action {
            return Err(wrong_kind(&self.id, state_id, "an action"));
        }
        let transition = self.create_transition(outcome, target)?;
        self.add_transition(state_id, transition)
    }

    /// Add an unconditional transition. Returns `Ok(false)` and changes
    /// nothing when `state_id` is not (yet) part of the flow.
    pub fn add_default_transition_to_state(
        &mut self,
        state_id: &str,
        target: &str,
    ) -> Result<bool, ConfigError> {
        if !self.contains_state(state_id) {
            debug!(
                flow = %self.id,
                state = state_id,
                "state not found; default transition not added"
            );
            return Ok(false);
        }
        let transition = self.create_transition(None, target)?;
        self.add_transition(state_id, transition)?;
        Ok(true)
    }

    /// A flow-level transition consulted when the current state has none
    /// matching.
    pub fn add_global_transition(
        &mut self,
        outcome: Option<&str>,
        target: &str,
    ) -> Result<(), ConfigError> {
        let transition = self.create_transition(outcome, target)?;
        self.global_transitions.push(transition);
        Ok(())
    }

    /// Route failures of `kind` (and its descendants) to `target`.
    pub fn add_global_transition_if_exception_is_thrown(
        &mut self,
        target: &str,
        kind: FailureKind,
    ) -> Result<(), ConfigError> {
        let target = self.services.conversion.target_state(target)?;
        debug!(flow = %self.id, %kind, to = %target, "added exception handler");
        self.exception_handlers
            .push(ExceptionHandlerDef { kind, target });
        Ok(())
    }

    // ── state details ──

    pub fn add_entry_action(&mut self, state_id: &str, action: ActionRef) -> Result<(), ConfigError> {
        self.existing_state(state_id)?.entry_actions.push(action);
        Ok(())
    }

    pub fn add_exit_action(&mut self, state_id: &str, action: ActionRef) -> Result<(), ConfigError> {
        self.existing_state(state_id)?.exit_actions.push(action);
        Ok(())
    }

    pub fn set_subflow_attribute_mapper(
        &mut self,
        state_id: &str,
        attribute_mapper: SubflowAttributeMapper,
    ) -> Result<(), ConfigError> {
        let flow_id = self.id.clone();
        match &mut self.existing_state(state_id)?.kind {
            StateKind::Subflow { mapper, .. } => {
                *mapper = Some(attribute_mapper);
                Ok(())
            }
            _ => Err(wrong_kind(&flow_id, state_id, "a subflow")),
        }
    }

    pub fn set_action_chain_policy(
        &mut self,
        state_id: &str,
        chain_policy: ActionChainPolicy,
    ) -> Result<(), ConfigError> {
        let flow_id = self.id.clone();
        match &mut self.existing_state(state_id)?.kind {
            StateKind::Action { policy, .. } => {
                *policy = chain_policy;
                Ok(())
            }
            _ => Err(wrong_kind(&flow_id, state_id, "an action")),
        }
    }

    // ── accessors used by validation ──

    pub(crate) fn draft_states(&self) -> &IndexMap<String, StateDef> {
        &self.states
    }

    pub(crate) fn global_transition_defs(&self) -> &[TransitionDef] {
        &self.global_transitions
    }

    pub(crate) fn exception_handler_defs(&self) -> &[ExceptionHandlerDef] {
        &self.exception_handlers
    }

    /// Validate the draft and produce the immutable flow.
    pub fn build(&self) -> Result<Flow, BuildErrors> {
        validate_flow(self)
    }
}

fn wrong_kind(flow_id: &str, state_id: &str, expected: &'static str) -> ConfigError {
    ConfigError::WrongStateKind {
        flow_id: flow_id.to_string(),
        state_id: state_id.to_string(),
        expected,
    }
}
