//! Post-build validation: resolves every state id reference to a
//! `StateIdx` and reports all problems in one pass.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::warn;

use crate::builder::FlowBuilder;
use crate::error::{BuildErrors, ConfigError};
use crate::flow::Flow;
use crate::state::{State, StateIdx, StateKind};
use crate::transition::{ExceptionHandler, Transition};

/// Check a draft and produce the immutable flow.
///
/// Reported: missing or undeclared start state, action states without
/// actions, and every transition, global transition or exception handler
/// whose target is not a state of the flow. Unreachable states are only
/// warned about.
pub fn validate_flow(builder: &FlowBuilder) -> Result<Flow, BuildErrors> {
    let flow_id = builder.id();
    let drafts = builder.draft_states();
    let index: HashMap<&str, StateIdx> = drafts
        .keys()
        .enumerate()
        .map(|(i, id)| (id.as_str(), StateIdx(i)))
        .collect();
    let mut errors = BuildErrors::default();

    let resolve = |errors: &mut BuildErrors, field: String, target: &str| -> Option<StateIdx> {
        let idx = index.get(target).copied();
        if idx.is_none() {
            errors.push(ConfigError::DanglingTarget {
                flow_id: flow_id.to_string(),
                field,
                target: target.to_string(),
            });
        }
        idx
    };

    let start = match builder.start_state() {
        None => {
            errors.push(ConfigError::MissingStartState {
                flow_id: flow_id.to_string(),
            });
            None
        }
        Some(id) => {
            let idx = index.get(id).copied();
            if idx.is_none() {
                errors.push(ConfigError::UnknownStartState {
                    flow_id: flow_id.to_string(),
                    state_id: id.to_string(),
                });
            }
            idx
        }
    };

    let mut resolved_transitions: Vec<Vec<Transition>> = Vec::with_capacity(drafts.len());
    for def in drafts.values() {
        if let StateKind::Action { actions, .. } = &def.kind {
            if actions.is_empty() {
                errors.push(ConfigError::EmptyActionState {
                    flow_id: flow_id.to_string(),
                    state_id: def.id.clone(),
                });
            }
        }
        let transitions = def
            .transitions
            .iter()
            .filter_map(|t| {
                let field = format!("transition '{}' of state '{}'", t.criteria, def.id);
                resolve(&mut errors, field, &t.target)
                    .map(|idx| Transition::new(t.criteria.clone(), idx))
            })
            .collect();
        resolved_transitions.push(transitions);
    }

    let global_transitions: Vec<Transition> = builder
        .global_transition_defs()
        .iter()
        .filter_map(|t| {
            let field = format!("global transition '{}'", t.criteria);
            resolve(&mut errors, field, &t.target).map(|idx| Transition::new(t.criteria.clone(), idx))
        })
        .collect();

    let exception_handlers: Vec<ExceptionHandler> = builder
        .exception_handler_defs()
        .iter()
        .filter_map(|h| {
            let field = format!("exception handler for '{}'", h.kind);
            resolve(&mut errors, field, &h.target).map(|idx| ExceptionHandler::new(h.kind, idx))
        })
        .collect();

    let start = match start {
        Some(start) if errors.is_empty() => start,
        _ => return Err(errors),
    };

    let states: Vec<State> = drafts
        .values()
        .cloned()
        .zip(resolved_transitions)
        .enumerate()
        .map(|(i, (def, transitions))| State::new(def, StateIdx(i), transitions))
        .collect();

    let flow = Flow::new(
        flow_id.to_string(),
        states,
        start,
        global_transitions,
        exception_handlers,
    );
    warn_unreachable(&flow);
    Ok(flow)
}

/// Breadth-first walk from the start state. Global transition and exception
/// handler targets are reachable from any state, so they seed the walk too.
pub fn reachable_states(flow: &Flow) -> HashSet<StateIdx> {
    let mut seen: HashSet<StateIdx> = HashSet::new();
    let mut queue: VecDeque<StateIdx> = VecDeque::new();
    let seeds = std::iter::once(flow.start_state().idx())
        .chain(flow.global_transitions().iter().map(Transition::target))
        .chain(flow.exception_handlers().iter().map(ExceptionHandler::target));
    for seed in seeds {
        if seen.insert(seed) {
            queue.push_back(seed);
        }
    }
    while let Some(idx) = queue.pop_front() {
        for transition in flow.state(idx).transitions() {
            if seen.insert(transition.target()) {
                queue.push_back(transition.target());
            }
        }
    }
    seen
}

fn warn_unreachable(flow: &Flow) {
    let reachable = reachable_states(flow);
    for state in flow.states() {
        if !reachable.contains(&state.idx()) {
            warn!(flow = flow.id(), state = state.id(), "state is unreachable from the start state");
        }
    }
}

/// Every subflow state must name a flow for which `known` returns true.
pub fn validate_subflow_references<'a, I, K>(flows: I, known: K) -> BuildErrors
where
    I: IntoIterator<Item = &'a Flow>,
    K: Fn(&str) -> bool,
{
    let mut errors = BuildErrors::default();
    for flow in flows {
        for (state_id, subflow_id) in flow.subflow_references() {
            if !known(subflow_id) {
                errors.push(ConfigError::UnknownSubflow {
                    flow_id: flow.id().to_string(),
                    state_id: state_id.to_string(),
                    subflow_id: subflow_id.to_string(),
                });
            }
        }
    }
    errors
}
