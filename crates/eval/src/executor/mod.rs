//! Flow execution as a state machine walk over shared, immutable flows.
//!
//! Each execution owns its `RequestContext`; the flows it walks are
//! `Arc<Flow>` handles from the registry and are never mutated. One
//! executor can drive any number of concurrent executions.
//!
//! A walk alternates between three kinds of step:
//! - entering a state (entry actions, then the state's own behavior)
//! - signalling an event (transition lookup, exit actions)
//! - handling a failure (exception handler lookup on the session stack)
//!
//! It stops when a view state pauses for input, the outermost flow
//! reaches an end state, or an error cannot be routed to a state.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use portcullis_core::{
    ActionChainPolicy, ActionError, ActionRef, AttributeMap, Event, ExternalContext,
    ExternalRequest, FailureKind, Flow, FlowRegistry, FlowSession, RequestContext, State,
    StateIdx, StateKind,
};

use crate::error::{ExecutionError, MappingDirection};

/// Maximum number of steps per request before the walk is aborted.
pub const DEFAULT_MAX_STEPS: usize = 1000;

/// Flash-scope attribute holding the most recent handled failure.
pub const FAILURE_ATTRIBUTE: &str = "flowExecutionException";

// ──────────────────────────────────────────────
// Execution result types
// ──────────────────────────────────────────────

/// Record of a single step taken during an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub flow_id: String,
    pub state_id: String,
    pub state_type: &'static str,
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Waiting in a view state for the next request.
    Paused { flow_id: String, state_id: String },
    /// The outermost flow reached an end state; `outcome` is its id.
    Ended { flow_id: String, outcome: String },
}

/// An execution after one request has been processed.
#[derive(Debug)]
pub struct FlowExecution {
    context: RequestContext,
    status: ExecutionStatus,
    steps: Vec<StepRecord>,
    output: AttributeMap,
}

impl FlowExecution {
    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut RequestContext {
        &mut self.context
    }

    pub fn into_context(self) -> RequestContext {
        self.context
    }

    pub fn status(&self) -> &ExecutionStatus {
        &self.status
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.status, ExecutionStatus::Paused { .. })
    }

    /// The end state id once the outermost flow has ended.
    pub fn outcome(&self) -> Option<&str> {
        match &self.status {
            ExecutionStatus::Ended { outcome, .. } => Some(outcome),
            ExecutionStatus::Paused { .. } => None,
        }
    }

    /// Every step taken so far, across requests.
    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    /// The outermost flow's scope at the time it ended.
    pub fn output(&self) -> &AttributeMap {
        &self.output
    }
}

// ──────────────────────────────────────────────
// Executor
// ──────────────────────────────────────────────

enum Step {
    Enter(StateIdx),
    Signal(Event),
    Fail(ActionError),
}

enum Entered {
    Next(Step),
    Paused,
    Finished { flow_id: String, outcome: String, output: AttributeMap },
}

#[derive(Debug, Clone)]
pub struct FlowExecutor {
    registry: Arc<FlowRegistry>,
    max_steps: usize,
}

impl FlowExecutor {
    pub fn new(registry: Arc<FlowRegistry>) -> Self {
        FlowExecutor {
            registry,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn registry(&self) -> &Arc<FlowRegistry> {
        &self.registry
    }

    /// Start `flow_id` with `input` as its initial flow scope.
    pub fn launch(
        &self,
        flow_id: &str,
        external: ExternalContext,
        input: AttributeMap,
    ) -> Result<FlowExecution, ExecutionError> {
        let flow = self
            .registry
            .get(flow_id)
            .ok_or_else(|| ExecutionError::UnknownFlow {
                flow_id: flow_id.to_string(),
            })?;
        info!(flow = flow_id, "launching flow execution");

        let mut context = RequestContext::new(external);
        let start = flow.start_state().idx();
        context.push_session(FlowSession::new(flow, input));
        self.drive(context, Vec::new(), Step::Enter(start))
    }

    /// Continue a paused execution by signalling `event` from its view
    /// state, with `request` as the new inbound request.
    pub fn resume(
        &self,
        execution: FlowExecution,
        event: impl Into<Event>,
        request: ExternalRequest,
    ) -> Result<FlowExecution, ExecutionError> {
        if !execution.is_paused() {
            return Err(ExecutionError::NotResumable);
        }
        let FlowExecution {
            mut context, steps, ..
        } = execution;
        context.begin_request(request);
        let event = event.into();
        debug!(event = %event, "resuming flow execution");
        self.drive(context, steps, Step::Signal(event))
    }

    fn drive(
        &self,
        mut ctx: RequestContext,
        mut steps: Vec<StepRecord>,
        first: Step,
    ) -> Result<FlowExecution, ExecutionError> {
        let mut next = first;
        let mut step_count = 0;

        loop {
            step_count += 1;
            if step_count > self.max_steps {
                return Err(ExecutionError::StepLimitExceeded {
                    limit: self.max_steps,
                });
            }

            next = match next {
                Step::Enter(idx) => match self.enter(&mut ctx, idx, &mut steps)? {
                    Entered::Next(step) => step,
                    Entered::Paused => {
                        let (flow_id, state_id) = position(&ctx);
                        info!(flow = %flow_id, state = %state_id, "flow execution paused");
                        return Ok(FlowExecution {
                            context: ctx,
                            status: ExecutionStatus::Paused { flow_id, state_id },
                            steps,
                            output: AttributeMap::new(),
                        });
                    }
                    Entered::Finished {
                        flow_id,
                        outcome,
                        output,
                    } => {
                        info!(flow = %flow_id, outcome = %outcome, "flow execution ended");
                        return Ok(FlowExecution {
                            context: ctx,
                            status: ExecutionStatus::Ended { flow_id, outcome },
                            steps,
                            output,
                        });
                    }
                },
                Step::Signal(event) => self.signal(&mut ctx, event),
                Step::Fail(failure) => self.handle_failure(&mut ctx, failure, &mut steps)?,
            };
        }
    }

    fn enter(
        &self,
        ctx: &mut RequestContext,
        idx: StateIdx,
        steps: &mut Vec<StepRecord>,
    ) -> Result<Entered, ExecutionError> {
        let flow = match ctx.active_session_mut() {
            Some(session) => {
                session.set_state(idx);
                Arc::clone(session.flow())
            }
            None => return Err(ExecutionError::NotResumable),
        };
        let state = flow.state(idx);
        debug!(flow = flow.id(), state = state.id(), kind = state.kind().label(), "entering state");

        if let Err(failure) = run_actions(ctx, state.entry_actions()) {
            steps.push(record(&flow, state, format!("entry failed: {}", failure.kind())));
            return Ok(Entered::Next(Step::Fail(failure)));
        }

        match state.kind() {
            StateKind::Action { actions, policy } => {
                let mut last = None;
                for action in actions {
                    match action.execute(ctx) {
                        Ok(event) => {
                            steps.push(record(&flow, state, event.to_string()));
                            let matched = flow.find_transition(state, &event).is_some();
                            last = Some(event);
                            if matched && *policy == ActionChainPolicy::FirstMatch {
                                break;
                            }
                        }
                        Err(failure) => {
                            steps.push(record(&flow, state, format!("error: {}", failure.kind())));
                            return Ok(Entered::Next(Step::Fail(failure)));
                        }
                    }
                }
                Ok(Entered::Next(Step::Signal(last.unwrap_or_else(Event::success))))
            }

            StateKind::View { view } => {
                let rendered = view.render(ctx);
                ctx.response_mut().view = Some(rendered);
                steps.push(record(&flow, state, "paused".to_string()));
                Ok(Entered::Paused)
            }

            StateKind::Subflow { subflow_id, mapper } => {
                let subflow =
                    self.registry
                        .get(subflow_id)
                        .ok_or_else(|| ExecutionError::SubflowNotFound {
                            flow_id: flow.id().to_string(),
                            state_id: state.id().to_string(),
                            subflow_id: subflow_id.clone(),
                        })?;
                let input = match mapper {
                    Some(mapper) => mapper.create_subflow_input(ctx).map_err(|errors| {
                        ExecutionError::AttributeMapping {
                            flow_id: flow.id().to_string(),
                            state_id: state.id().to_string(),
                            direction: MappingDirection::Input,
                            errors,
                        }
                    })?,
                    None => AttributeMap::new(),
                };
                steps.push(record(&flow, state, format!("spawned '{}'", subflow_id)));
                let start = subflow.start_state().idx();
                ctx.push_session(FlowSession::new(subflow, input));
                Ok(Entered::Next(Step::Enter(start)))
            }

            StateKind::End { final_response } => {
                if let Some(action) = final_response {
                    if let Err(failure) = action.execute(ctx) {
                        steps.push(record(&flow, state, format!("error: {}", failure.kind())));
                        return Ok(Entered::Next(Step::Fail(failure)));
                    }
                }
                steps.push(record(&flow, state, "ended".to_string()));
                let output = ctx
                    .pop_session()
                    .map(FlowSession::into_scope)
                    .unwrap_or_default();

                let Some((parent_flow, parent_idx)) = ctx
                    .active_session()
                    .map(|parent| (Arc::clone(parent.flow()), parent.state_idx()))
                else {
                    return Ok(Entered::Finished {
                        flow_id: flow.id().to_string(),
                        outcome: state.id().to_string(),
                        output,
                    });
                };

                // The parent is sitting in the subflow state that spawned us.
                if let Some(subflow_state) = parent_idx.map(|idx| parent_flow.state(idx)) {
                    if let StateKind::Subflow {
                        mapper: Some(mapper),
                        ..
                    } = subflow_state.kind()
                    {
                        let state_id = subflow_state.id().to_string();
                        mapper.map_subflow_output(&output, ctx).map_err(|errors| {
                            ExecutionError::AttributeMapping {
                                flow_id: parent_flow.id().to_string(),
                                state_id,
                                direction: MappingDirection::Output,
                                errors,
                            }
                        })?;
                    }
                }
                Ok(Entered::Next(Step::Signal(Event::new(state.id()))))
            }
        }
    }

    /// Resolve `event` against the active state. A missing transition is a
    /// `NoMatchingTransition` failure so flows can route it like any other.
    fn signal(&self, ctx: &mut RequestContext, event: Event) -> Step {
        ctx.set_last_event(event.clone());
        let Some((flow, idx)) = ctx
            .active_session()
            .and_then(|session| Some((Arc::clone(session.flow()), session.state_idx()?)))
        else {
            return Step::Fail(ActionError::internal("no active state to signal"));
        };
        let state = flow.state(idx);

        let Some(transition) = flow.find_transition(state, &event) else {
            return Step::Fail(ActionError::new(
                FailureKind::NoMatchingTransition,
                format!(
                    "no transition for event '{}' in state '{}' of flow '{}'",
                    event,
                    state.id(),
                    flow.id()
                ),
            ));
        };
        let target = transition.target();

        if let Err(failure) = run_actions(ctx, state.exit_actions()) {
            return Step::Fail(failure);
        }
        debug!(
            flow = flow.id(),
            from = state.id(),
            to = flow.state(target).id(),
            on = %event,
            "transition"
        );
        Step::Enter(target)
    }

    /// Walk the session stack from the innermost flow outwards and enter the
    /// target of the first flow whose handlers accept the failure. Sessions
    /// above that flow are discarded.
    fn handle_failure(
        &self,
        ctx: &mut RequestContext,
        failure: ActionError,
        steps: &mut Vec<StepRecord>,
    ) -> Result<Step, ExecutionError> {
        warn!(kind = %failure.kind(), message = failure.message(), "action failed");
        ctx.flash_scope_mut()
            .insert(FAILURE_ATTRIBUTE.to_string(), failure.to_json_value());
        ctx.set_failure(failure.clone());

        let handled = ctx
            .sessions()
            .iter()
            .enumerate()
            .rev()
            .find_map(|(depth, session)| {
                session
                    .flow()
                    .handler_for(failure.kind())
                    .map(|handler| (depth, Arc::clone(session.flow()), handler.target()))
            });

        match handled {
            Some((depth, flow, target)) => {
                ctx.truncate_sessions(depth + 1);
                let state = flow.state(target);
                debug!(flow = flow.id(), to = state.id(), kind = %failure.kind(), "failure handled");
                steps.push(StepRecord {
                    flow_id: flow.id().to_string(),
                    state_id: ctx
                        .current_state()
                        .map(|s| s.id().to_string())
                        .unwrap_or_default(),
                    state_type: "handler",
                    result: format!("{} -> {}", failure.kind(), state.id()),
                });
                Ok(Step::Enter(target))
            }
            None => {
                let (flow_id, state_id) = position(ctx);
                Err(ExecutionError::Unhandled {
                    flow_id,
                    state_id,
                    failure,
                })
            }
        }
    }
}

fn run_actions(ctx: &mut RequestContext, actions: &[ActionRef]) -> Result<(), ActionError> {
    for action in actions {
        action.execute(ctx)?;
    }
    Ok(())
}

fn record(flow: &Flow, state: &State, result: String) -> StepRecord {
    StepRecord {
        flow_id: flow.id().to_string(),
        state_id: state.id().to_string(),
        state_type: state.kind().label(),
        result,
    }
}

/// `(flow id, state id)` of the active session.
fn position(ctx: &RequestContext) -> (String, String) {
    match ctx.active_session() {
        Some(session) => (
            session.flow().id().to_string(),
            session
                .current_state()
                .map(|s| s.id().to_string())
                .unwrap_or_default(),
        ),
        None => (String::new(), String::new()),
    }
}

#[cfg(test)]
mod tests;
