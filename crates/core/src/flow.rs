//! An assembled, validated flow. Immutable once built.

use std::collections::HashMap;

use serde::Serialize;

use crate::action::Event;
use crate::failure::FailureKind;
use crate::state::{State, StateIdx, StateKind};
use crate::transition::{ExceptionHandler, Transition};

#[derive(Debug)]
pub struct Flow {
    id: String,
    states: Vec<State>,
    index: HashMap<String, StateIdx>,
    start: StateIdx,
    global_transitions: Vec<Transition>,
    exception_handlers: Vec<ExceptionHandler>,
}

impl Flow {
    pub(crate) fn new(
        id: String,
        states: Vec<State>,
        start: StateIdx,
        global_transitions: Vec<Transition>,
        exception_handlers: Vec<ExceptionHandler>,
    ) -> Self {
        let index = states
            .iter()
            .map(|state| (state.id().to_string(), state.idx()))
            .collect();
        Flow {
            id,
            states,
            index,
            start,
            global_transitions,
            exception_handlers,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn start_state(&self) -> &State {
        self.state(self.start)
    }

    /// A state by handle. Handles are only ever issued by this flow's
    /// validation pass, so they are always in range.
    pub fn state(&self, idx: StateIdx) -> &State {
        &self.states[idx.0]
    }

    pub fn state_by_id(&self, id: &str) -> Option<&State> {
        self.index.get(id).map(|idx| self.state(*idx))
    }

    pub fn contains_state(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.states.iter()
    }

    /// State ids in declaration order.
    pub fn state_ids(&self) -> Vec<&str> {
        self.states.iter().map(State::id).collect()
    }

    pub fn global_transitions(&self) -> &[Transition] {
        &self.global_transitions
    }

    pub fn exception_handlers(&self) -> &[ExceptionHandler] {
        &self.exception_handlers
    }

    /// The first registered handler whose kind is `failure` or one of its
    /// ancestors.
    pub fn handler_for(&self, failure: FailureKind) -> Option<&ExceptionHandler> {
        self.exception_handlers
            .iter()
            .find(|handler| handler.handles(failure))
    }

    /// The state's own transitions are consulted before the flow's global
    /// transitions.
    pub fn find_transition<'a>(
        &'a self,
        state: &'a State,
        event: &Event,
    ) -> Option<&'a Transition> {
        state
            .transitions()
            .iter()
            .chain(self.global_transitions.iter())
            .find(|transition| transition.matches(event))
    }

    /// `(state id, subflow id)` for every subflow state.
    pub fn subflow_references(&self) -> Vec<(&str, &str)> {
        self.states
            .iter()
            .filter_map(|state| match state.kind() {
                StateKind::Subflow { subflow_id, .. } => Some((state.id(), subflow_id.as_str())),
                _ => None,
            })
            .collect()
    }

    pub fn summary(&self) -> FlowSummary {
        let target = |idx: StateIdx| self.state(idx).id().to_string();
        let transition = |t: &Transition| TransitionSummary {
            on: t.criteria().outcome().map(str::to_string),
            to: target(t.target()),
        };
        let action_names = |actions: &[crate::action::ActionRef]| -> Vec<String> {
            actions.iter().map(|a| a.name().to_string()).collect()
        };

        let states = self
            .states
            .iter()
            .map(|state| {
                let (actions, view, subflow) = match state.kind() {
                    StateKind::Action { actions, .. } => (action_names(actions), None, None),
                    StateKind::View { view } => (Vec::new(), Some(view.view_id().to_string()), None),
                    StateKind::Subflow { subflow_id, .. } => {
                        (Vec::new(), None, Some(subflow_id.clone()))
                    }
                    StateKind::End { final_response } => (
                        final_response.iter().map(|a| a.name().to_string()).collect(),
                        None,
                        None,
                    ),
                };
                StateSummary {
                    id: state.id().to_string(),
                    kind: state.kind().label(),
                    entry_actions: action_names(state.entry_actions()),
                    actions,
                    exit_actions: action_names(state.exit_actions()),
                    view,
                    subflow,
                    transitions: state.transitions().iter().map(transition).collect(),
                }
            })
            .collect();

        FlowSummary {
            id: self.id.clone(),
            start_state: self.start_state().id().to_string(),
            states,
            global_transitions: self.global_transitions.iter().map(transition).collect(),
            exception_handlers: self
                .exception_handlers
                .iter()
                .map(|h| HandlerSummary {
                    on_exception: h.kind(),
                    to: target(h.target()),
                })
                .collect(),
        }
    }
}

// ──────────────────────────────────────────────
// Summary
// ──────────────────────────────────────────────

/// A plain-data view of a flow's graph, for reporting and comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowSummary {
    pub id: String,
    pub start_state: String,
    pub states: Vec<StateSummary>,
    pub global_transitions: Vec<TransitionSummary>,
    pub exception_handlers: Vec<HandlerSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateSummary {
    pub id: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entry_actions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exit_actions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subflow: Option<String>,
    pub transitions: Vec<TransitionSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on: Option<String>,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerSummary {
    pub on_exception: FailureKind,
    pub to: String,
}
