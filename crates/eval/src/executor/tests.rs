use super::*;

use std::sync::atomic::{AtomicUsize, Ordering};

use portcullis_core::expr::Scope;
use portcullis_core::{
    action_fn, events, ActionRegistry, BuilderServices, FlowBuilder, MappingError, Principal,
    TemplateViewFactory,
};
use serde_json::json;

// ──────────────────────────────────────
// Fixtures
// ──────────────────────────────────────

fn services() -> Arc<BuilderServices> {
    Arc::new(BuilderServices::new(
        ActionRegistry::new(),
        Arc::new(TemplateViewFactory::permissive()),
    ))
}

fn builder(id: &str) -> FlowBuilder {
    FlowBuilder::new(id, services())
}

fn emit(event: &'static str) -> ActionRef {
    action_fn(format!("emit:{}", event), move |_| Ok(Event::new(event)))
}

fn fail(kind: FailureKind) -> ActionRef {
    action_fn("fail", move |_| Err(ActionError::new(kind, "boom")))
}

/// Appends `label` to `conversationScope.trace`.
fn trace(label: &'static str) -> ActionRef {
    action_fn(format!("trace:{}", label), move |ctx| {
        let entry = ctx
            .conversation_scope_mut()
            .entry("trace")
            .or_insert_with(|| json!([]));
        if let Some(list) = entry.as_array_mut() {
            list.push(json!(label));
        }
        Ok(Event::success())
    })
}

fn traced(execution: &FlowExecution) -> Option<serde_json::Value> {
    execution
        .context()
        .scope(Scope::Conversation)
        .and_then(|scope| scope.get("trace"))
        .cloned()
}

fn executor(flows: Vec<FlowBuilder>) -> FlowExecutor {
    let registry = FlowRegistry::new();
    for flow in flows {
        registry.register(flow.build().unwrap());
    }
    FlowExecutor::new(Arc::new(registry))
}

fn launch(executor: &FlowExecutor, flow_id: &str) -> Result<FlowExecution, ExecutionError> {
    executor.launch(flow_id, ExternalContext::default(), AttributeMap::new())
}

/// check --success--> done
fn check_then_done(actions: Vec<ActionRef>) -> FlowBuilder {
    let mut b = builder("login");
    b.create_action_state("check", actions).unwrap();
    b.add_transition_to_action_state("check", Some(events::SUCCESS), "done")
        .unwrap();
    b.add_end_state("done", Some("casLoginGenericSuccessView")).unwrap();
    b.set_start_state("check");
    b
}

// ──────────────────────────────────────
// Basic traversal
// ──────────────────────────────────────

#[test]
fn action_state_transitions_to_end_state() {
    let exec = executor(vec![check_then_done(vec![emit("success")])]);
    let execution = launch(&exec, "login").unwrap();

    assert_eq!(
        execution.status(),
        &ExecutionStatus::Ended {
            flow_id: "login".into(),
            outcome: "done".into()
        }
    );
    let view = execution.context().response().view.as_ref().unwrap();
    assert_eq!(view.template, "casLoginGenericSuccessView");
    let results: Vec<(&str, &str)> = execution
        .steps()
        .iter()
        .map(|s| (s.state_id.as_str(), s.result.as_str()))
        .collect();
    assert_eq!(results, vec![("check", "success"), ("done", "ended")]);
    assert!(execution.context().sessions().is_empty());
}

#[test]
fn view_state_pauses_until_resumed() {
    let mut b = builder("login");
    b.add_view_state("viewLoginForm", "casLoginView").unwrap();
    b.add_transition("viewLoginForm", b.create_transition(Some("submit"), "check").unwrap())
        .unwrap();
    b.create_action_state("check", vec![emit("success")]).unwrap();
    b.add_transition_to_action_state("check", Some("success"), "done")
        .unwrap();
    b.add_end_state("done", None).unwrap();
    b.set_start_state("viewLoginForm");
    let exec = executor(vec![b]);

    let paused = launch(&exec, "login").unwrap();
    assert_eq!(
        paused.status(),
        &ExecutionStatus::Paused {
            flow_id: "login".into(),
            state_id: "viewLoginForm".into()
        }
    );
    assert_eq!(
        paused.context().response().view.as_ref().map(|v| v.view_id.as_str()),
        Some("casLoginView")
    );

    let ended = exec
        .resume(paused, "submit", ExternalRequest::new().with_parameter("username", "alice"))
        .unwrap();
    assert_eq!(ended.outcome(), Some("done"));
    assert_eq!(ended.context().request().parameter("username"), Some("alice"));
    assert!(ended.context().response().view.is_none());

    assert_eq!(
        exec.resume(ended, "submit", ExternalRequest::new()).unwrap_err(),
        ExecutionError::NotResumable
    );
}

#[test]
fn entry_and_exit_actions_wrap_the_state() {
    let mut b = check_then_done(vec![trace("act")]);
    b.add_entry_action("check", trace("enter")).unwrap();
    b.add_exit_action("check", trace("exit")).unwrap();
    b.add_entry_action("done", trace("end")).unwrap();
    let exec = executor(vec![b]);

    let execution = launch(&exec, "login").unwrap();
    assert_eq!(traced(&execution), Some(json!(["enter", "act", "exit", "end"])));
}

#[test]
fn global_transition_is_a_fallback() {
    let mut b = check_then_done(vec![emit("cancel")]);
    b.add_global_transition(Some("cancel"), "cancelled").unwrap();
    b.add_global_transition(Some("success"), "cancelled").unwrap();
    b.add_end_state("cancelled", None).unwrap();
    let exec = executor(vec![b]);
    assert_eq!(launch(&exec, "login").unwrap().outcome(), Some("cancelled"));

    // The state's own transition wins over the global one.
    let mut b = check_then_done(vec![emit("success")]);
    b.add_global_transition(Some("success"), "cancelled").unwrap();
    b.add_end_state("cancelled", None).unwrap();
    let exec = executor(vec![b]);
    assert_eq!(launch(&exec, "login").unwrap().outcome(), Some("done"));
}

#[test]
fn unknown_flow_cannot_be_launched() {
    let exec = executor(vec![]);
    assert_eq!(
        launch(&exec, "login").unwrap_err(),
        ExecutionError::UnknownFlow {
            flow_id: "login".into()
        }
    );
}

#[test]
fn runaway_flows_hit_the_step_limit() {
    let mut b = builder("spin");
    b.create_action_state("loop", vec![emit("again")]).unwrap();
    b.add_transition_to_action_state("loop", Some("again"), "loop").unwrap();
    b.set_start_state("loop");
    let exec = executor(vec![b]).with_max_steps(50);
    assert_eq!(
        launch(&exec, "spin").unwrap_err(),
        ExecutionError::StepLimitExceeded { limit: 50 }
    );
}

// ──────────────────────────────────────
// Action chains
// ──────────────────────────────────────

#[test]
fn first_match_policy_stops_at_the_first_routable_event() {
    let exec = executor(vec![check_then_done(vec![
        emit("unrouted"),
        emit("success"),
        trace("never"),
    ])]);
    let execution = launch(&exec, "login").unwrap();
    assert_eq!(execution.outcome(), Some("done"));
    assert_eq!(traced(&execution), None);
}

#[test]
fn last_result_policy_runs_every_action() {
    let mut b = check_then_done(vec![emit("success"), trace("second"), emit("warn")]);
    b.set_action_chain_policy("check", ActionChainPolicy::LastResult)
        .unwrap();
    b.add_transition_to_action_state("check", Some(events::WARN), "warned")
        .unwrap();
    b.add_end_state("warned", None).unwrap();
    let exec = executor(vec![b]);

    let execution = launch(&exec, "login").unwrap();
    assert_eq!(execution.outcome(), Some("warned"));
    assert_eq!(traced(&execution), Some(json!(["second"])));
}

// ──────────────────────────────────────
// Exception handling
// ──────────────────────────────────────

fn failing_flow(kind: FailureKind, handlers: &[(&str, FailureKind)]) -> FlowBuilder {
    let mut b = check_then_done(vec![fail(kind)]);
    for (target, handled) in handlers {
        b.add_global_transition_if_exception_is_thrown(target, *handled)
            .unwrap();
        if !b.contains_state(target) {
            b.add_end_state(target, None).unwrap();
        }
    }
    b
}

#[test]
fn first_registered_matching_handler_wins() {
    let exec = executor(vec![failing_flow(
        FailureKind::BadCredentials,
        &[
            ("authFailed", FailureKind::Authentication),
            ("badCredentials", FailureKind::BadCredentials),
        ],
    )]);
    let execution = launch(&exec, "login").unwrap();
    assert_eq!(execution.outcome(), Some("authFailed"));
    assert_eq!(
        execution.context().failure().map(ActionError::kind),
        Some(FailureKind::BadCredentials)
    );
    let flashed = execution
        .context()
        .scope(Scope::Flash)
        .and_then(|flash| flash.get(FAILURE_ATTRIBUTE))
        .cloned();
    assert_eq!(flashed, Some(json!({"kind": "bad_credentials", "message": "boom"})));

    let exec = executor(vec![failing_flow(
        FailureKind::BadCredentials,
        &[
            ("badCredentials", FailureKind::BadCredentials),
            ("authFailed", FailureKind::Authentication),
        ],
    )]);
    assert_eq!(launch(&exec, "login").unwrap().outcome(), Some("badCredentials"));
}

#[test]
fn unmatched_failure_propagates() {
    let exec = executor(vec![failing_flow(
        FailureKind::BadCredentials,
        &[("directoryDown", FailureKind::Directory)],
    )]);
    match launch(&exec, "login").unwrap_err() {
        ExecutionError::Unhandled {
            flow_id,
            state_id,
            failure,
        } => {
            assert_eq!(flow_id, "login");
            assert_eq!(state_id, "check");
            assert_eq!(failure.kind(), FailureKind::BadCredentials);
        }
        other => panic!("expected unhandled failure, got {}", other),
    }
}

#[test]
fn missing_transition_is_a_routable_failure() {
    let exec = executor(vec![check_then_done(vec![emit("warn")])]);
    assert!(matches!(
        launch(&exec, "login").unwrap_err(),
        ExecutionError::Unhandled { failure, .. } if failure.kind() == FailureKind::NoMatchingTransition
    ));

    let exec = executor(vec![failing_flow(
        FailureKind::NoMatchingTransition,
        &[("lost", FailureKind::NoMatchingTransition)],
    )]);
    assert_eq!(launch(&exec, "login").unwrap().outcome(), Some("lost"));

    let mut b = check_then_done(vec![emit("warn")]);
    b.add_global_transition_if_exception_is_thrown("lost", FailureKind::Any)
        .unwrap();
    b.add_end_state("lost", None).unwrap();
    let exec = executor(vec![b]);
    assert_eq!(launch(&exec, "login").unwrap().outcome(), Some("lost"));
}

// ──────────────────────────────────────
// Subflows
// ──────────────────────────────────────

/// spnego: negotiate --success--> authenticated. Reads `flowScope.service`
/// and writes `flowScope.principal`.
fn spnego_subflow(runs: Arc<AtomicUsize>) -> FlowBuilder {
    let negotiate = action_fn("negotiate", move |ctx| {
        runs.fetch_add(1, Ordering::SeqCst);
        let scope = ctx
            .scope_mut(Scope::Flow)
            .ok_or_else(|| ActionError::internal("no flow scope"))?;
        if scope.get("service").is_none() {
            return Err(ActionError::internal("service not mapped"));
        }
        scope.insert("principal".into(), json!("alice"));
        Ok(Event::success())
    });
    let mut b = builder("spnego");
    b.create_action_state("negotiate", vec![negotiate]).unwrap();
    b.add_transition_to_action_state("negotiate", Some("success"), "authenticated")
        .unwrap();
    b.add_end_state("authenticated", None).unwrap();
    b.set_start_state("negotiate");
    b
}

/// login: delegate(spnego) --authenticated--> done
fn delegating_flow() -> FlowBuilder {
    let mut b = builder("login");
    b.create_subflow_state("delegate", "spnego", None).unwrap();
    let services = b.services().clone();
    let input = services.create_mapper_to_subflow_state(vec![services
        .create_mapping_to_subflow_state("service", "flowScope.service", true, None)
        .unwrap()]);
    let output = services.create_mapper_to_subflow_state(vec![services
        .create_mapping("principal", "conversationScope.principal", true, None)
        .unwrap()]);
    b.set_subflow_attribute_mapper(
        "delegate",
        services.create_subflow_attribute_mapper(Some(input), Some(output)),
    )
    .unwrap();
    b.add_transition("delegate", b.create_transition(Some("authenticated"), "done").unwrap())
        .unwrap();
    b.add_end_state("done", None).unwrap();
    b.set_start_state("delegate");
    b
}

#[test]
fn subflow_maps_input_and_output() {
    let runs = Arc::new(AtomicUsize::new(0));
    let exec = executor(vec![spnego_subflow(Arc::clone(&runs)), delegating_flow()]);

    let mut input = AttributeMap::new();
    input.insert("service".into(), json!("https://app.example.org"));
    let execution = exec
        .launch("login", ExternalContext::default(), input)
        .unwrap();

    assert_eq!(execution.outcome(), Some("done"));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(
        execution
            .context()
            .scope(Scope::Conversation)
            .and_then(|s| s.get("principal")),
        Some(&json!("alice"))
    );
    assert_eq!(
        execution.output().get("service"),
        Some(&json!("https://app.example.org"))
    );
    let flows: Vec<&str> = execution.steps().iter().map(|s| s.flow_id.as_str()).collect();
    assert_eq!(flows, vec!["login", "spnego", "spnego", "login"]);
}

#[test]
fn required_input_mapping_blocks_subflow_entry() {
    let runs = Arc::new(AtomicUsize::new(0));
    let exec = executor(vec![spnego_subflow(Arc::clone(&runs)), delegating_flow()]);

    match launch(&exec, "login").unwrap_err() {
        ExecutionError::AttributeMapping {
            flow_id,
            state_id,
            direction,
            errors,
        } => {
            assert_eq!(flow_id, "login");
            assert_eq!(state_id, "delegate");
            assert_eq!(direction, MappingDirection::Input);
            assert!(matches!(
                errors.iter().next(),
                Some(MappingError::RequiredValueMissing { .. })
            ));
        }
        other => panic!("expected mapping failure, got {}", other),
    }
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[test]
fn parent_handler_catches_subflow_failure() {
    let mut child = builder("spnego");
    child
        .create_action_state("negotiate", vec![fail(FailureKind::Negotiation)])
        .unwrap();
    child
        .add_transition_to_action_state("negotiate", Some("success"), "authenticated")
        .unwrap();
    child.add_end_state("authenticated", None).unwrap();
    child.set_start_state("negotiate");

    let mut parent = builder("login");
    parent.create_subflow_state("delegate", "spnego", None).unwrap();
    parent
        .add_default_transition_to_state("delegate", "done")
        .unwrap();
    parent.add_end_state("done", None).unwrap();
    parent.add_end_state("fallback", None).unwrap();
    parent
        .add_global_transition_if_exception_is_thrown("fallback", FailureKind::Authentication)
        .unwrap();
    parent.set_start_state("delegate");

    let exec = executor(vec![child, parent]);
    let execution = launch(&exec, "login").unwrap();
    assert_eq!(
        execution.status(),
        &ExecutionStatus::Ended {
            flow_id: "login".into(),
            outcome: "fallback".into()
        }
    );
    assert!(execution
        .steps()
        .iter()
        .any(|s| s.state_type == "handler" && s.result == "negotiation -> fallback"));
}

#[test]
fn unregistered_subflow_fails_at_entry() {
    let mut b = builder("login");
    b.create_subflow_state("delegate", "spnego", None).unwrap();
    b.add_default_transition_to_state("delegate", "done").unwrap();
    b.add_end_state("done", None).unwrap();
    b.set_start_state("delegate");
    let exec = executor(vec![b]);

    assert_eq!(
        launch(&exec, "login").unwrap_err(),
        ExecutionError::SubflowNotFound {
            flow_id: "login".into(),
            state_id: "delegate".into(),
            subflow_id: "spnego".into()
        }
    );
}

// ──────────────────────────────────────
// Concurrency
// ──────────────────────────────────────

#[test]
fn concurrent_executions_share_one_flow() {
    let trusted = action_fn("principalFromRemoteUser", |ctx| {
        match ctx.request().remote_user.clone() {
            Some(user) => {
                ctx.set_principal(Principal::new(user));
                Ok(Event::success())
            }
            None => Ok(Event::error()),
        }
    });
    let mut b = check_then_done(vec![trusted]);
    b.add_transition_to_action_state("check", Some(events::ERROR), "failed")
        .unwrap();
    b.add_end_state("failed", None).unwrap();
    let exec = executor(vec![b]);

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let exec = &exec;
                scope.spawn(move || {
                    let mut request = ExternalRequest::new();
                    if i % 2 == 0 {
                        request = request.with_remote_user(format!("user{}", i));
                    }
                    let execution = exec
                        .launch("login", ExternalContext::new(request), AttributeMap::new())
                        .unwrap();
                    (i, execution)
                })
            })
            .collect();

        for handle in handles {
            let (i, execution) = handle.join().unwrap();
            if i % 2 == 0 {
                assert_eq!(execution.outcome(), Some("done"));
                let expected = format!("user{}", i);
                assert_eq!(
                    execution.context().principal().map(|p| p.id.as_str()),
                    Some(expected.as_str())
                );
            } else {
                assert_eq!(execution.outcome(), Some("failed"));
                assert!(execution.context().principal().is_none());
            }
        }
    });
}
