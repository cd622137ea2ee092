//! Adapter turning a credential extractor into a flow action.
//!
//! The action builds a credential from the request, authenticates it,
//! and signals `success` or `error`. Infrastructure failures surface as
//! action failures so flows can route them through exception handlers.

use std::sync::Arc;

use tracing::{debug, error, warn};

use portcullis_core::{Action, ActionError, Credential, Event, RequestContext};

use crate::authentication::AuthenticationManager;

/// Builds a credential from the current request without user interaction.
pub trait CredentialExtractor: Send + Sync {
    /// The action name flows refer to.
    fn name(&self) -> &str;

    fn construct_credential(&self, ctx: &RequestContext) -> Option<Credential>;

    fn on_success(&self, _ctx: &mut RequestContext) {}

    fn on_error(&self, _ctx: &mut RequestContext) {}
}

pub struct NonInteractiveCredentialsAction<E> {
    extractor: E,
    authentication: Arc<AuthenticationManager>,
}

impl<E: CredentialExtractor> NonInteractiveCredentialsAction<E> {
    pub fn new(extractor: E, authentication: Arc<AuthenticationManager>) -> Self {
        NonInteractiveCredentialsAction {
            extractor,
            authentication,
        }
    }

    pub fn extractor(&self) -> &E {
        &self.extractor
    }
}

impl<E: CredentialExtractor> Action for NonInteractiveCredentialsAction<E> {
    fn name(&self) -> &str {
        self.extractor.name()
    }

    fn execute(&self, ctx: &mut RequestContext) -> Result<Event, ActionError> {
        // Hooks must only see a credential built by this attempt.
        ctx.take_credential();
        let Some(credential) = self.extractor.construct_credential(ctx) else {
            debug!(action = self.name(), "no credential in request");
            self.extractor.on_error(ctx);
            return Ok(Event::error());
        };

        // The credential stays on the context so extractor hooks can read
        // whatever the handlers wrote back into it.
        ctx.set_credential(credential);
        let result = match ctx.credential_mut() {
            Some(credential) => self.authentication.authenticate(credential),
            None => return Err(ActionError::internal("credential vanished from context")),
        };

        match result {
            Ok(principal) => {
                if let Some(spnego) = ctx.credential_mut().and_then(Credential::as_spnego_mut) {
                    spnego.principal.get_or_insert_with(|| principal.clone());
                }
                ctx.set_principal(principal);
                self.extractor.on_success(ctx);
                Ok(Event::success())
            }
            Err(e) if e.is_rejection() => {
                warn!(action = self.name(), error = %e, "credential rejected");
                self.extractor.on_error(ctx);
                Ok(Event::error())
            }
            Err(e) => {
                error!(action = self.name(), error = %e, "authentication failed");
                self.extractor.on_error(ctx);
                Err(e.into())
            }
        }
    }
}
