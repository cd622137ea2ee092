//! End-to-end runs of the sample login flows under `flows/`.
//!
//! The flows are loaded from their JSON definitions, built through the
//! initializer, and driven with the real credential actions from
//! `portcullis-support`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use http::header::{HeaderName, HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE};
use http::StatusCode;

use portcullis_core::expr::Scope;
use portcullis_core::{
    action_fn, events, ActionError, ActionRef, ActionRegistry, AttributeMap, BuilderServices,
    DefinitionConfigurer, ExternalContext, ExternalRequest, FailureKind, FlowBuilder,
    FlowDefinition, FlowInitializer, FlowRegistry, Principal, TemplateViewFactory,
};
use portcullis_eval::{ExecutionStatus, FlowExecution, FlowExecutor, FAILURE_ATTRIBUTE};
use portcullis_support::{
    AcceptUsersHandler, AuthenticationManager, Negotiation, NonInteractiveCredentialsAction,
    PrincipalBearingHandler, RemoteUserPrincipalExtractor, RequestHeaderPrincipalExtractor,
    SpnegoAuthenticationHandler, SpnegoCredentialsExtractor, StaticNegotiator,
    UsernamePasswordFormExtractor,
};

/// The bytes of base64 `AbCd`.
const TOKEN: &[u8] = &[0x01, 0xB0, 0x9D];

/// Locate the workspace root by walking up from CARGO_MANIFEST_DIR.
fn workspace_root() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root")
        .to_path_buf()
}

fn definition(name: &str) -> FlowDefinition {
    let path = workspace_root().join("flows").join(format!("{}.json", name));
    let source = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
    FlowDefinition::from_json_str(&source)
        .unwrap_or_else(|e| panic!("Invalid definition {}: {}", path.display(), e))
}

fn credential_actions(negotiator: StaticNegotiator) -> ActionRegistry {
    let manager = Arc::new(
        AuthenticationManager::new()
            .with_handler(AcceptUsersHandler::new([("alice", "secret")]))
            .with_handler(PrincipalBearingHandler)
            .with_handler(SpnegoAuthenticationHandler::new(negotiator)),
    );
    let mut actions = ActionRegistry::new();
    actions.register_instance(Arc::new(NonInteractiveCredentialsAction::new(
        RemoteUserPrincipalExtractor,
        Arc::clone(&manager),
    )));
    actions.register_instance(Arc::new(NonInteractiveCredentialsAction::new(
        RequestHeaderPrincipalExtractor::new(HeaderName::from_static("x-remote-user")),
        Arc::clone(&manager),
    )));
    actions.register_instance(Arc::new(NonInteractiveCredentialsAction::new(
        SpnegoCredentialsExtractor::new(false),
        Arc::clone(&manager),
    )));
    actions.register_instance(Arc::new(NonInteractiveCredentialsAction::new(
        UsernamePasswordFormExtractor,
        manager,
    )));
    actions
}

fn executor(actions: ActionRegistry) -> FlowExecutor {
    let services = BuilderServices::new(actions, Arc::new(TemplateViewFactory::permissive()));
    let mut initializer = FlowInitializer::new(services);
    initializer.add_configurer(DefinitionConfigurer::new(vec![
        definition("login"),
        definition("spnego"),
    ]));
    let registry = FlowRegistry::new();
    let ids = initializer.initialize(&registry).expect("sample flows build");
    assert_eq!(ids, vec!["login".to_string(), "spnego".to_string()]);
    FlowExecutor::new(Arc::new(registry))
}

fn launch(executor: &FlowExecutor, request: ExternalRequest) -> FlowExecution {
    executor
        .launch("login", ExternalContext::new(request), AttributeMap::new())
        .expect("launch login")
}

fn negotiate_request() -> ExternalRequest {
    ExternalRequest::new().with_header(AUTHORIZATION, HeaderValue::from_static("Negotiate AbCd=="))
}

fn ended(outcome: &str) -> ExecutionStatus {
    ExecutionStatus::Ended {
        flow_id: "login".to_string(),
        outcome: outcome.to_string(),
    }
}

#[test]
fn remote_user_skips_negotiation() {
    let executor = executor(credential_actions(StaticNegotiator::new()));
    let execution = launch(&executor, ExternalRequest::new().with_remote_user("alice"));

    assert_eq!(execution.status(), &ended("authenticated"));
    assert_eq!(
        execution.context().principal().map(|p| p.id.as_str()),
        Some("alice")
    );
    assert!(execution.steps().iter().all(|s| s.flow_id == "login"));
}

#[test]
fn negotiated_principal_crosses_the_subflow_boundary() {
    let negotiator = StaticNegotiator::new().with_token(
        TOKEN,
        Negotiation {
            principal: Some(Principal::new("alice@EXAMPLE.ORG")),
            next_token: None,
        },
    );
    let executor = executor(credential_actions(negotiator));
    let execution = launch(&executor, negotiate_request());

    assert_eq!(execution.status(), &ended("authenticated"));
    assert_eq!(
        execution.output().get("negotiated"),
        Some(&serde_json::json!(true))
    );
    assert_eq!(execution.context().response().status, StatusCode::OK);
    assert!(execution
        .steps()
        .iter()
        .any(|s| s.flow_id == "spnego" && s.state_id == "negotiated"));
}

#[test]
fn unfinished_negotiation_falls_back_to_the_form() {
    let reply = b"continue".to_vec();
    let negotiator = StaticNegotiator::new().with_token(
        TOKEN,
        Negotiation {
            principal: None,
            next_token: Some(reply.clone()),
        },
    );
    let executor = executor(credential_actions(negotiator));
    let execution = launch(&executor, negotiate_request());

    assert_eq!(
        execution.status(),
        &ExecutionStatus::Paused {
            flow_id: "login".to_string(),
            state_id: "viewLoginForm".to_string(),
        }
    );
    let response = execution.context().response();
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers.get(WWW_AUTHENTICATE).unwrap(),
        &format!("Negotiate {}", BASE64.encode(&reply))
    );
    assert_eq!(
        response.view.as_ref().map(|v| v.view_id.as_str()),
        Some("casLoginView")
    );
    assert!(execution.output().is_empty());
}

#[test]
fn form_login_after_pause() {
    let executor = executor(credential_actions(StaticNegotiator::new()));
    let paused = launch(&executor, ExternalRequest::new());
    assert!(paused.is_paused());

    let retry = executor
        .resume(
            paused,
            "submit",
            ExternalRequest::new()
                .with_parameter("username", "alice")
                .with_parameter("password", "wrong"),
        )
        .unwrap();
    assert!(retry.is_paused());
    assert!(retry.context().principal().is_none());

    let done = executor
        .resume(
            retry,
            "submit",
            ExternalRequest::new()
                .with_parameter("username", "alice")
                .with_parameter("password", "secret"),
        )
        .unwrap();
    assert_eq!(done.status(), &ended("authenticated"));
    assert_eq!(
        done.context().principal().map(|p| p.id.as_str()),
        Some("alice")
    );
}

#[test]
fn locked_account_routes_through_the_exception_handler() {
    let mut actions = credential_actions(StaticNegotiator::new());
    actions.register_instance(action_fn("authenticateForm", |_| {
        Err(ActionError::new(FailureKind::AccountLocked, "account alice is locked"))
    }));
    let executor = executor(actions);

    let paused = launch(&executor, ExternalRequest::new());
    let execution = executor
        .resume(paused, "submit", ExternalRequest::new())
        .unwrap();

    assert_eq!(execution.status(), &ended("accountLocked"));
    let failure = execution
        .context()
        .scope(Scope::Flash)
        .and_then(|flash| flash.get(FAILURE_ATTRIBUTE))
        .cloned();
    assert_eq!(
        failure,
        Some(serde_json::json!({
            "kind": "account_locked",
            "message": "account alice is locked",
        }))
    );
    assert!(execution
        .steps()
        .iter()
        .any(|s| s.state_type == "handler" && s.result == "account_locked -> accountLocked"));
}

/// negotiate --error--> form --submit--> negotiate
#[test]
fn retried_negotiation_without_header_leaves_response_alone() {
    let negotiator = StaticNegotiator::new().with_token(
        TOKEN,
        Negotiation {
            principal: None,
            next_token: Some(b"challenge".to_vec()),
        },
    );
    let spnego: ActionRef = Arc::new(NonInteractiveCredentialsAction::new(
        SpnegoCredentialsExtractor::new(false),
        Arc::new(
            AuthenticationManager::new().with_handler(SpnegoAuthenticationHandler::new(negotiator)),
        ),
    ));
    let services = Arc::new(BuilderServices::new(
        ActionRegistry::new(),
        Arc::new(TemplateViewFactory::permissive()),
    ));
    let mut b = FlowBuilder::new("login", services);
    b.create_action_state("negotiate", vec![spnego]).unwrap();
    b.add_transition_to_action_state("negotiate", Some(events::SUCCESS), "done")
        .unwrap();
    b.add_transition_to_action_state("negotiate", Some(events::ERROR), "form")
        .unwrap();
    b.add_view_state("form", "casLoginView").unwrap();
    let submit = b.create_transition(Some("submit"), "negotiate").unwrap();
    b.add_transition("form", submit).unwrap();
    b.add_end_state("done", None).unwrap();
    b.set_start_state("negotiate");

    let registry = FlowRegistry::new();
    registry.register(b.build().unwrap());
    let executor = FlowExecutor::new(Arc::new(registry));

    let first = launch(&executor, negotiate_request());
    assert!(first.is_paused());
    assert_eq!(first.context().response().status, StatusCode::UNAUTHORIZED);
    assert!(first.context().response().headers.contains_key(WWW_AUTHENTICATE));

    let second = executor
        .resume(first, "submit", ExternalRequest::new())
        .unwrap();
    assert_eq!(
        second.status(),
        &ExecutionStatus::Paused {
            flow_id: "login".to_string(),
            state_id: "form".to_string(),
        }
    );
    let response = second.context().response();
    assert_eq!(response.status, StatusCode::OK);
    assert!(!response.headers.contains_key(WWW_AUTHENTICATE));
    assert!(second.context().credential().is_none());
    assert!(second.context().principal().is_none());
}
