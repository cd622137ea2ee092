//! Execution-scoped state for one in-flight login attempt.
//!
//! A `RequestContext` is owned by exactly one execution. Flows referenced
//! from its session stack are shared, immutable `Arc<Flow>` handles.

use std::collections::BTreeMap;
use std::sync::Arc;

use http::header::{AsHeaderName, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use serde_json::Value;

use crate::action::Event;
use crate::credential::{Credential, Principal};
use crate::expr::Scope;
use crate::failure::ActionError;
use crate::flow::Flow;
use crate::state::{State, StateIdx};
use crate::view::RenderedView;

/// Attribute storage used by every scope.
pub type AttributeMap = serde_json::Map<String, Value>;

// ──────────────────────────────────────────────
// External request / response
// ──────────────────────────────────────────────

/// The inbound request as seen by the engine.
#[derive(Debug, Clone, Default)]
pub struct ExternalRequest {
    pub headers: HeaderMap,
    pub parameters: BTreeMap<String, String>,
    /// Principal name asserted by the container or a fronting proxy.
    pub remote_user: Option<String>,
}

impl ExternalRequest {
    pub fn new() -> Self {
        ExternalRequest::default()
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_remote_user(mut self, user: impl Into<String>) -> Self {
        self.remote_user = Some(user.into());
        self
    }

    /// First value of `name`, if present and visible ASCII.
    pub fn header<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }
}

/// What the engine hands back to the transport.
#[derive(Debug, Clone)]
pub struct ExternalResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub view: Option<RenderedView>,
}

impl Default for ExternalResponse {
    fn default() -> Self {
        ExternalResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            view: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExternalContext {
    pub request: ExternalRequest,
    pub response: ExternalResponse,
}

impl ExternalContext {
    pub fn new(request: ExternalRequest) -> Self {
        ExternalContext {
            request,
            response: ExternalResponse::default(),
        }
    }
}

// ──────────────────────────────────────────────
// Flow sessions
// ──────────────────────────────────────────────

/// One active flow on the execution's session stack.
#[derive(Debug, Clone)]
pub struct FlowSession {
    flow: Arc<Flow>,
    state: Option<StateIdx>,
    scope: AttributeMap,
}

impl FlowSession {
    pub fn new(flow: Arc<Flow>, scope: AttributeMap) -> Self {
        FlowSession {
            flow,
            state: None,
            scope,
        }
    }

    pub fn flow(&self) -> &Arc<Flow> {
        &self.flow
    }

    pub fn state_idx(&self) -> Option<StateIdx> {
        self.state
    }

    pub fn set_state(&mut self, idx: StateIdx) {
        self.state = Some(idx);
    }

    pub fn current_state(&self) -> Option<&State> {
        self.state.map(|idx| self.flow.state(idx))
    }

    pub fn scope(&self) -> &AttributeMap {
        &self.scope
    }

    pub fn scope_mut(&mut self) -> &mut AttributeMap {
        &mut self.scope
    }

    pub fn into_scope(self) -> AttributeMap {
        self.scope
    }
}

// ──────────────────────────────────────────────
// RequestContext
// ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RequestContext {
    external: ExternalContext,
    request_scope: AttributeMap,
    flash_scope: AttributeMap,
    conversation_scope: AttributeMap,
    sessions: Vec<FlowSession>,
    credential: Option<Credential>,
    principal: Option<Principal>,
    last_event: Option<Event>,
    failure: Option<ActionError>,
}

impl RequestContext {
    pub fn new(external: ExternalContext) -> Self {
        RequestContext {
            external,
            request_scope: AttributeMap::new(),
            flash_scope: AttributeMap::new(),
            conversation_scope: AttributeMap::new(),
            sessions: Vec::new(),
            credential: None,
            principal: None,
            last_event: None,
            failure: None,
        }
    }

    pub fn external(&self) -> &ExternalContext {
        &self.external
    }

    pub fn external_mut(&mut self) -> &mut ExternalContext {
        &mut self.external
    }

    pub fn request(&self) -> &ExternalRequest {
        &self.external.request
    }

    pub fn response(&self) -> &ExternalResponse {
        &self.external.response
    }

    pub fn response_mut(&mut self) -> &mut ExternalResponse {
        &mut self.external.response
    }

    /// Start a new request against the same execution: request and flash
    /// scope are cleared, the response is reset, and credentials from the
    /// previous request are dropped.
    pub fn begin_request(&mut self, request: ExternalRequest) {
        self.external = ExternalContext::new(request);
        self.request_scope.clear();
        self.flash_scope.clear();
        self.credential = None;
        self.principal = None;
        self.last_event = None;
    }

    /// The attribute map behind `scope`. Request parameters are not a map
    /// and flow scope needs an active session, so both may be `None`.
    pub fn scope(&self, scope: Scope) -> Option<&AttributeMap> {
        match scope {
            Scope::Request => Some(&self.request_scope),
            Scope::Flash => Some(&self.flash_scope),
            Scope::Conversation => Some(&self.conversation_scope),
            Scope::Flow => self.sessions.last().map(FlowSession::scope),
            Scope::RequestParameters => None,
        }
    }

    pub fn scope_mut(&mut self, scope: Scope) -> Option<&mut AttributeMap> {
        match scope {
            Scope::Request => Some(&mut self.request_scope),
            Scope::Flash => Some(&mut self.flash_scope),
            Scope::Conversation => Some(&mut self.conversation_scope),
            Scope::Flow => self.sessions.last_mut().map(FlowSession::scope_mut),
            Scope::RequestParameters => None,
        }
    }

    pub fn flash_scope_mut(&mut self) -> &mut AttributeMap {
        &mut self.flash_scope
    }

    pub fn conversation_scope_mut(&mut self) -> &mut AttributeMap {
        &mut self.conversation_scope
    }

    // ── session stack ──

    pub fn active_session(&self) -> Option<&FlowSession> {
        self.sessions.last()
    }

    pub fn active_session_mut(&mut self) -> Option<&mut FlowSession> {
        self.sessions.last_mut()
    }

    pub fn sessions(&self) -> &[FlowSession] {
        &self.sessions
    }

    pub fn session_depth(&self) -> usize {
        self.sessions.len()
    }

    pub fn push_session(&mut self, session: FlowSession) {
        self.sessions.push(session);
    }

    pub fn pop_session(&mut self) -> Option<FlowSession> {
        self.sessions.pop()
    }

    /// Drop every session above `depth`.
    pub fn truncate_sessions(&mut self, depth: usize) {
        self.sessions.truncate(depth);
    }

    pub fn session_mut(&mut self, depth: usize) -> Option<&mut FlowSession> {
        self.sessions.get_mut(depth)
    }

    /// The state the active session is in.
    pub fn current_state(&self) -> Option<&State> {
        self.active_session().and_then(FlowSession::current_state)
    }

    // ── authentication results ──

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn credential_mut(&mut self) -> Option<&mut Credential> {
        self.credential.as_mut()
    }

    pub fn set_credential(&mut self, credential: Credential) {
        self.credential = Some(credential);
    }

    pub fn take_credential(&mut self) -> Option<Credential> {
        self.credential.take()
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn set_principal(&mut self, principal: Principal) {
        self.principal = Some(principal);
    }

    // ── execution bookkeeping ──

    pub fn last_event(&self) -> Option<&Event> {
        self.last_event.as_ref()
    }

    pub fn set_last_event(&mut self, event: Event) {
        self.last_event = Some(event);
    }

    pub fn failure(&self) -> Option<&ActionError> {
        self.failure.as_ref()
    }

    pub fn set_failure(&mut self, failure: ActionError) {
        self.failure = Some(failure);
    }

    pub fn clear_failure(&mut self) -> Option<ActionError> {
        self.failure.take()
    }
}
