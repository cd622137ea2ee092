//! Declarative flow definitions (JSON) and the configurer that applies them
//! to flow drafts.
//!
//! ```json
//! {
//!   "id": "login",
//!   "start_state": "startAuthenticate",
//!   "states": [
//!     { "id": "startAuthenticate", "type": "action",
//!       "actions": ["principalFromRemoteUser"],
//!       "transitions": [ { "on": "success", "to": "sendTicketGrantingTicket" },
//!                        { "on": "error", "to": "viewLoginForm" } ] },
//!     { "id": "viewLoginForm", "type": "view", "view": "casLoginView",
//!       "transitions": [ { "on": "submit", "to": "startAuthenticate" } ] },
//!     { "id": "sendTicketGrantingTicket", "type": "end", "view": "casLoginGenericSuccessView" }
//!   ],
//!   "exception_handlers": [ { "on_exception": "authentication", "to": "viewLoginForm" } ]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::action::ActionRef;
use crate::builder::{BuilderServices, FlowBuilder};
use crate::configurer::{FlowConfigurer, FlowDrafts};
use crate::error::{BuildErrors, ConfigError};
use crate::failure::FailureKind;
use crate::mapping::Mapping;
use crate::state::ActionChainPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowDefinition {
    pub id: String,
    pub start_state: String,
    pub states: Vec<StateDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub global_transitions: Vec<TransitionDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exception_handlers: Vec<ExceptionHandlerDefinition>,
}

impl FlowDefinition {
    pub fn from_json_str(source: &str) -> Result<FlowDefinition, serde_json::Error> {
        serde_json::from_str(source)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDefinition {
    pub id: String,
    #[serde(flatten)]
    pub kind: StateKindDefinition,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_entry: Vec<ActionDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_exit: Vec<ActionDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<TransitionDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateKindDefinition {
    Action {
        actions: Vec<ActionDefinition>,
        #[serde(default)]
        policy: ActionChainPolicy,
    },
    View {
        view: String,
    },
    Subflow {
        subflow: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        input: Vec<MappingDefinition>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        output: Vec<MappingDefinition>,
    },
    End {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        view: Option<String>,
    },
}

/// A named registry action, an evaluate expression, or a set expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionDefinition {
    Named(String),
    Evaluate {
        evaluate: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
    Set {
        set: String,
        value: String,
        #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
        value_type: Option<String>,
    },
}

impl ActionDefinition {
    pub fn resolve(&self, services: &BuilderServices) -> Result<ActionRef, ConfigError> {
        match self {
            ActionDefinition::Named(name) => services.resolve_action(name),
            ActionDefinition::Evaluate { evaluate, result } => {
                services.create_evaluate_action(evaluate, result.as_deref())
            }
            ActionDefinition::Set {
                set,
                value,
                value_type,
            } => services.create_set_action(set, value, value_type.as_deref()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<String>,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExceptionHandlerDefinition {
    pub on_exception: FailureKind,
    pub to: String,
}

/// `name` is always the destination and `value` the source: for input
/// mappings `name` is a subflow attribute, for output mappings it is a
/// parent expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingDefinition {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
}

impl MappingDefinition {
    fn resolve(&self, services: &BuilderServices) -> Result<Mapping, ConfigError> {
        services.create_mapping_to_subflow_state(
            &self.name,
            &self.value,
            self.required,
            self.value_type.as_deref(),
        )
    }
}

// ──────────────────────────────────────────────
// DefinitionConfigurer
// ──────────────────────────────────────────────

/// Applies parsed definitions to the drafts of the same id.
#[derive(Debug, Clone, Default)]
pub struct DefinitionConfigurer {
    definitions: Vec<FlowDefinition>,
}

impl DefinitionConfigurer {
    pub fn new(definitions: Vec<FlowDefinition>) -> Self {
        DefinitionConfigurer { definitions }
    }

    pub fn definitions(&self) -> &[FlowDefinition] {
        &self.definitions
    }
}

impl FlowConfigurer for DefinitionConfigurer {
    fn name(&self) -> &str {
        "definitions"
    }

    fn configure(&self, drafts: &mut FlowDrafts) -> Result<(), BuildErrors> {
        let mut errors = BuildErrors::default();
        for definition in &self.definitions {
            let flow = drafts.flow(&definition.id);
            if let Err(e) = apply_definition(flow, definition) {
                errors.extend(e);
            }
        }
        errors.into_result(())
    }
}

/// Apply one definition, collecting every error instead of stopping at the
/// first.
pub fn apply_definition(flow: &mut FlowBuilder, definition: &FlowDefinition) -> Result<(), BuildErrors> {
    let mut errors = BuildErrors::default();

    for state in &definition.states {
        if let Err(e) = apply_state(flow, state) {
            errors.extend(e);
        }
    }
    for t in &definition.global_transitions {
        if let Err(e) = flow.add_global_transition(t.on.as_deref(), &t.to) {
            errors.push(e);
        }
    }
    for h in &definition.exception_handlers {
        if let Err(e) = flow.add_global_transition_if_exception_is_thrown(&h.to, h.on_exception) {
            errors.push(e);
        }
    }
    flow.set_start_state(&definition.start_state);

    errors.into_result(())
}

fn resolve_actions(
    services: &BuilderServices,
    definitions: &[ActionDefinition],
    errors: &mut BuildErrors,
) -> Vec<ActionRef> {
    definitions
        .iter()
        .filter_map(|d| d.resolve(services).map_err(|e| errors.push(e)).ok())
        .collect()
}

fn apply_state(flow: &mut FlowBuilder, state: &StateDefinition) -> Result<(), BuildErrors> {
    let mut errors = BuildErrors::default();
    let id = state.id.as_str();

    let created = match &state.kind {
        StateKindDefinition::Action { actions, policy } => {
            let actions = resolve_actions(flow.services(), actions, &mut errors);
            flow.create_action_state(id, actions)
                .map(|_| ())
                .and_then(|()| flow.set_action_chain_policy(id, *policy))
        }
        StateKindDefinition::View { view } => flow.add_view_state(id, view).map(|_| ()),
        StateKindDefinition::End { view } => flow.add_end_state(id, view.as_deref()).map(|_| ()),
        StateKindDefinition::Subflow {
            subflow,
            input,
            output,
        } => {
            let services = flow.services();
            let mut mapper_for = |defs: &[MappingDefinition]| {
                if defs.is_empty() {
                    return None;
                }
                let mappings = defs
                    .iter()
                    .filter_map(|d| d.resolve(services).map_err(|e| errors.push(e)).ok())
                    .collect();
                Some(services.create_mapper_to_subflow_state(mappings))
            };
            let input = mapper_for(input);
            let output = mapper_for(output);
            let mapper = (input.is_some() || output.is_some())
                .then(|| services.create_subflow_attribute_mapper(input, output));
            flow.create_subflow_state(id, subflow, None)
                .map(|_| ())
                .and_then(|()| match mapper {
                    Some(mapper) => flow.set_subflow_attribute_mapper(id, mapper),
                    None => Ok(()),
                })
        }
    };
    if let Err(e) = created {
        errors.push(e);
        return Err(errors);
    }

    for action in resolve_actions(flow.services(), &state.on_entry, &mut errors) {
        if let Err(e) = flow.add_entry_action(id, action) {
            errors.push(e);
        }
    }
    for action in resolve_actions(flow.services(), &state.on_exit, &mut errors) {
        if let Err(e) = flow.add_exit_action(id, action) {
            errors.push(e);
        }
    }
    for t in &state.transitions {
        let added = flow
            .create_transition(t.on.as_deref(), &t.to)
            .and_then(|transition| flow.add_transition(id, transition));
        if let Err(e) = added {
            errors.push(e);
        }
    }

    errors.into_result(())
}
